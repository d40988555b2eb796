//! Identity providers for `/login`
//!
//! One provider is chosen from configuration at startup: LDAP when enabled,
//! otherwise bearer tokens signed by this control plane.

mod ldap;
mod token;

pub use ldap::{Ldap3Directory, LdapConfig, LdapDirectory, LdapProvider};
pub use token::{TokenClaims, TokenConfig, TokenProvider};

#[cfg(test)]
pub use ldap::MockLdapDirectory;

use std::collections::BTreeMap;

use serde::Serialize;

use cube_common::{Error, Result};

/// An authenticated user
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Stable user id
    pub user_id: String,
    /// Login name
    pub username: String,
    /// Group memberships, comma separated
    pub group: String,
    /// Email address, if known
    pub email: String,
    /// Headers to set on the login response
    #[serde(skip)]
    pub response_headers: BTreeMap<String, String>,
}

impl Identity {
    /// Identity with only a user name, as LDAP yields
    pub fn named(username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            user_id: username.clone(),
            username,
            ..Default::default()
        }
    }
}

/// The configured way of checking credentials
pub enum IdentityProvider {
    /// Directory bind
    Ldap(LdapProvider),
    /// Signed bearer token as password
    Token(TokenProvider),
}

impl IdentityProvider {
    /// Check a username and password
    ///
    /// Bad credentials are `Unauthorized`; directory or configuration
    /// failures are other errors.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Identity> {
        if username.is_empty() || password.is_empty() {
            return Err(Error::invalid_input("username and password are required"));
        }
        match self {
            IdentityProvider::Ldap(p) => p.authenticate(username, password).await,
            IdentityProvider::Token(p) => p.authenticate(username, password),
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            IdentityProvider::Ldap(_) => "ldap",
            IdentityProvider::Token(_) => "token",
        }
    }
}
