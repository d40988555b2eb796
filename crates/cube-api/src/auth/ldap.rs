//! LDAP identity provider

use std::time::Duration;

use async_trait::async_trait;
use ldap3::{
    ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, LdapError, Scope, SearchEntry,
    SearchOptions, SearchResult,
};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info, warn};

use cube_common::{Error, Result};

use super::Identity;

/// LDAP result code for a failed bind
const INVALID_CREDENTIALS: u32 = 49;

/// LDAP result code when more entries matched than the size limit
const SIZE_LIMIT_EXCEEDED: u32 = 4;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// LDAP connection and search settings
#[derive(Clone, Debug)]
pub struct LdapConfig {
    /// Use LDAP for logins
    pub enabled: bool,
    /// `objectClass` users must have; empty to skip
    pub object_class: String,
    /// Attribute holding the login name
    pub login_name_attr: String,
    /// `objectCategory` users must have; empty to skip
    pub object_category: String,
    /// Server host, or a full `ldap://`/`ldaps://` URL
    pub server: String,
    /// Server port
    pub port: u16,
    /// Search base
    pub base_dn: String,
    /// DN used for the search bind
    pub admin_account: String,
    /// Password for the search bind
    pub admin_password: String,
}

impl Default for LdapConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            object_class: "person".to_string(),
            login_name_attr: "uid".to_string(),
            object_category: String::new(),
            server: String::new(),
            port: 389,
            base_dn: String::new(),
            admin_account: String::new(),
            admin_password: String::new(),
        }
    }
}

impl LdapConfig {
    /// Connection URL
    pub fn url(&self) -> String {
        if self.server.contains("://") {
            self.server.clone()
        } else {
            format!("ldap://{}:{}", self.server, self.port)
        }
    }

    /// Search filter for `username`, with the name escaped
    pub fn user_filter(&self, username: &str) -> String {
        let mut terms = Vec::new();
        if !self.object_category.is_empty() {
            terms.push(format!("(objectCategory={})", ldap_escape(&self.object_category)));
        }
        if !self.object_class.is_empty() {
            terms.push(format!("(objectClass={})", ldap_escape(&self.object_class)));
        }
        terms.push(format!("({}={})", self.login_name_attr, ldap_escape(username)));

        if terms.len() == 1 {
            terms.remove(0)
        } else {
            format!("(&{})", terms.concat())
        }
    }
}

/// Directory operations the provider needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LdapDirectory: Send + Sync {
    /// DNs of entries matching `filter`
    ///
    /// Runs under the admin bind. More than `limit` matches yields none.
    async fn search_dns(&self, filter: &str, limit: i32) -> Result<Vec<String>>;

    /// Bind as `dn`; `Ok(false)` if the credentials are rejected
    async fn bind(&self, dn: &str, password: &str) -> Result<bool>;
}

fn ldap_error(e: LdapError) -> Error {
    Error::internal_with_context("ldap", e.to_string())
}

/// `LdapDirectory` over the `ldap3` client
pub struct Ldap3Directory {
    config: LdapConfig,
}

impl Ldap3Directory {
    /// Create a directory client; connections are opened per call
    pub fn new(config: LdapConfig) -> Self {
        Self { config }
    }

    async fn connect(&self) -> Result<Ldap> {
        let settings = LdapConnSettings::new().set_conn_timeout(CONNECT_TIMEOUT);
        let (conn, ldap) = LdapConnAsync::with_settings(settings, &self.config.url())
            .await
            .map_err(ldap_error)?;
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "ldap connection error");
            }
        });
        Ok(ldap)
    }
}

#[async_trait]
impl LdapDirectory for Ldap3Directory {
    async fn search_dns(&self, filter: &str, limit: i32) -> Result<Vec<String>> {
        let mut ldap = self.connect().await?;
        ldap.simple_bind(&self.config.admin_account, &self.config.admin_password)
            .await
            .and_then(|r| r.success())
            .map_err(ldap_error)?;

        let SearchResult(entries, result) = ldap
            .with_search_options(SearchOptions::new().sizelimit(limit))
            .search(&self.config.base_dn, Scope::Subtree, filter, vec!["1.1"])
            .await
            .map_err(ldap_error)?;
        let _ = ldap.unbind().await;

        match result.rc {
            0 => {}
            SIZE_LIMIT_EXCEEDED => {
                debug!(filter, "ldap search matched too many entries");
                return Ok(Vec::new());
            }
            _ => {
                return Err(Error::internal_with_context(
                    "ldap",
                    format!("search failed: {}", result),
                ))
            }
        }
        Ok(entries
            .into_iter()
            .map(|e| SearchEntry::construct(e).dn)
            .collect())
    }

    async fn bind(&self, dn: &str, password: &str) -> Result<bool> {
        let mut ldap = self.connect().await?;
        let result = ldap.simple_bind(dn, password).await.map_err(ldap_error)?;
        let _ = ldap.unbind().await;
        match result.rc {
            0 => Ok(true),
            INVALID_CREDENTIALS => Ok(false),
            _ => Err(Error::internal_with_context(
                "ldap",
                format!("bind failed: {}", result),
            )),
        }
    }
}

/// Authenticates users against an LDAP directory
pub struct LdapProvider {
    config: LdapConfig,
    directory: Box<dyn LdapDirectory>,
}

impl LdapProvider {
    /// Create a provider over `directory`
    pub fn new(config: LdapConfig, directory: Box<dyn LdapDirectory>) -> Self {
        Self { config, directory }
    }

    /// Create a provider talking to the configured server
    pub fn connect(config: LdapConfig) -> Self {
        let directory = Box::new(Ldap3Directory::new(config.clone()));
        Self::new(config, directory)
    }

    /// Find the user's entry, then bind as it with `password`
    ///
    /// An empty password is rejected up front: servers treat it as an
    /// unauthenticated bind and report success.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Identity> {
        if password.is_empty() {
            debug!(username, "ldap login with empty password");
            return Err(Error::Unauthorized("incorrect username or password".to_string()));
        }

        let filter = self.config.user_filter(username);
        let dns = self.directory.search_dns(&filter, 1).await?;
        let [dn] = dns.as_slice() else {
            debug!(username, matches = dns.len(), "ldap search did not find exactly one user");
            return Err(Error::Unauthorized("incorrect username or password".to_string()));
        };

        if !self.directory.bind(dn, password).await? {
            warn!(username, "ldap bind rejected");
            return Err(Error::Unauthorized("incorrect username or password".to_string()));
        }

        info!(username, "ldap login");
        Ok(Identity::named(username))
    }
}
