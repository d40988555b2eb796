//! `POST /login`

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tracing::{info, warn};

use crate::auth::Identity;
use crate::error::{ApiError, Result};
use crate::response::ok;
use crate::server::AppState;

/// Login body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Login name
    pub username: String,
    /// Password, or a token for the token provider
    pub password: String,
}

fn header_map(identity: &Identity) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in &identity.response_headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "dropping unrepresentable identity header"),
        }
    }
    headers
}

/// Authenticate and return the identity
///
/// When token signing is configured a fresh session token is returned in
/// the `Authorization` header.
pub async fn login(
    State(state): State<AppState>,
    body: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(request) = body?;
    let provider = state
        .identity
        .as_ref()
        .ok_or_else(|| ApiError::Internal("no identity provider configured".to_string()))?;

    let mut identity = provider
        .authenticate(&request.username, &request.password)
        .await?;
    if let Some(tokens) = state.tokens.as_ref() {
        let token = tokens.issue(&identity)?;
        identity
            .response_headers
            .insert("Authorization".to_string(), format!("Bearer {}", token));
    }

    info!(username = %identity.username, provider = provider.kind(), "login succeeded");
    Ok((header_map(&identity), ok(identity)))
}
