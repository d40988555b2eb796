//! Bearer-token identity provider (HS256)

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use cube_common::{Error, Result};

use super::Identity;

/// Default token lifetime
pub const DEFAULT_TOKEN_EXPIRY: Duration = Duration::from_secs(3600);

/// Token signing settings
#[derive(Clone, Debug)]
pub struct TokenConfig {
    /// HMAC secret
    pub secret: String,
    /// Issuer written into and required on tokens; empty to skip
    pub issuer: String,
    /// Lifetime of issued tokens
    pub expiry: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: "kubecube".to_string(),
            expiry: DEFAULT_TOKEN_EXPIRY,
        }
    }
}

/// Claims carried by control-plane tokens
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct TokenClaims {
    /// User name
    pub sub: String,
    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Issued at, seconds since the epoch
    #[serde(default)]
    pub iat: i64,
    /// Expiry, seconds since the epoch
    pub exp: i64,
    /// Group memberships
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    /// Email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Validates and issues HS256 tokens
#[derive(Clone)]
pub struct TokenProvider {
    config: TokenConfig,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenProvider {
    /// Create a provider; an empty secret is rejected
    pub fn new(config: TokenConfig) -> Result<Self> {
        if config.secret.is_empty() {
            return Err(Error::invalid_field("jwt-secret", "token secret must not be empty"));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            config,
        })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        if !self.config.issuer.is_empty() {
            validation.set_issuer(&[&self.config.issuer]);
        }
        validation.validate_exp = true;
        validation
    }

    /// Validate `token` and return its claims
    pub fn verify(&self, token: &str) -> Result<TokenClaims> {
        decode::<TokenClaims>(token, &self.decoding, &self.validation())
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "token rejected");
                Error::Unauthorized(format!("invalid token: {}", e))
            })
    }

    /// Treat `password` as a token that must belong to `username`
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Identity> {
        let claims = self.verify(password)?;
        if claims.sub != username {
            return Err(Error::Unauthorized(
                "token does not belong to this user".to_string(),
            ));
        }
        Ok(Identity {
            user_id: claims.sub.clone(),
            username: claims.sub,
            group: claims.groups.join(","),
            email: claims.email.unwrap_or_default(),
            ..Default::default()
        })
    }

    /// Mint a token for `identity` valid for the configured lifetime
    pub fn issue(&self, identity: &Identity) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            sub: identity.username.clone(),
            iss: (!self.config.issuer.is_empty()).then(|| self.config.issuer.clone()),
            iat: now,
            exp: now + self.config.expiry.as_secs() as i64,
            groups: identity
                .group
                .split(',')
                .filter(|g| !g.is_empty())
                .map(str::to_string)
                .collect(),
            email: (!identity.email.is_empty()).then(|| identity.email.clone()),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::internal_with_context("token", e.to_string()))
    }
}
