//! API error type and its wire form

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Result type for handlers
pub type Result<T> = std::result::Result<T, ApiError>;

/// Error returned by API handlers
///
/// Every variant maps to a stable `code` string in the response body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The named cluster is not a fleet member
    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    /// Some other entity does not exist
    #[error("{0}")]
    NotFound(String),

    /// Name conflict
    #[error("{0}")]
    AlreadyExists(String),

    /// Malformed request
    #[error("{0}")]
    InvalidInput(String),

    /// A cluster could not be reached
    #[error("{0}")]
    Unreachable(String),

    /// The request was cancelled before anything usable was collected
    #[error("request cancelled")]
    Cancelled,

    /// Authentication failed
    #[error("{0}")]
    Unauthorized(String),

    /// Anything else
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::ClusterNotFound(_) => "ClusterNotFound",
            ApiError::NotFound(_) => "NotFound",
            ApiError::AlreadyExists(_) => "AlreadyExists",
            ApiError::InvalidInput(_) => "InvalidInput",
            ApiError::Unreachable(_) => "Unreachable",
            ApiError::Cancelled => "Cancelled",
            ApiError::Unauthorized(_) => "Unauthorized",
            ApiError::Internal(_) => "InternalError",
        }
    }

    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::ClusterNotFound(_) | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::AlreadyExists(_) => StatusCode::CONFLICT,
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Unreachable(_) => StatusCode::BAD_GATEWAY,
            // nginx's "client closed request"
            ApiError::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
            }
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }

        let body = serde_json::json!({
            "success": false,
            "code": self.code(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<cube_common::Error> for ApiError {
    fn from(e: cube_common::Error) -> Self {
        use cube_common::Error;

        if let Some(cluster) = e.cluster().filter(|_| e.is_not_found()) {
            return ApiError::ClusterNotFound(cluster.to_string());
        }
        if e.is_not_found() {
            return ApiError::NotFound(e.to_string());
        }
        if e.is_already_exists() {
            return ApiError::AlreadyExists(e.to_string());
        }
        match e {
            Error::InvalidInput { .. } => ApiError::InvalidInput(e.to_string()),
            Error::Unreachable { .. } => ApiError::Unreachable(e.to_string()),
            Error::Cancelled => ApiError::Cancelled,
            Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            // registration failures keep the underlying message verbatim
            Error::Internal { message, .. } => ApiError::Internal(message),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<axum::extract::rejection::JsonRejection> for ApiError {
    fn from(e: axum::extract::rejection::JsonRejection) -> Self {
        ApiError::InvalidInput(e.body_text())
    }
}

impl From<axum::extract::rejection::QueryRejection> for ApiError {
    fn from(e: axum::extract::rejection::QueryRejection) -> Self {
        ApiError::InvalidInput(e.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cube_common::Error;

    #[test]
    fn missing_cluster_maps_to_cluster_not_found() {
        let e: ApiError = Error::not_found("cluster", "ghost").into();
        assert!(matches!(e, ApiError::ClusterNotFound(ref n) if n == "ghost"));
        assert_eq!(e.code(), "ClusterNotFound");
        assert_eq!(e.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn other_missing_entities_are_not_found() {
        let e: ApiError = Error::not_found("user", "alice").into();
        assert_eq!(e.code(), "NotFound");
    }

    #[test]
    fn codes_follow_the_taxonomy() {
        let cases: Vec<(Error, &str)> = vec![
            (Error::already_exists("cluster", "a"), "AlreadyExists"),
            (Error::invalid_input("bad"), "InvalidInput"),
            (Error::unreachable("a", "down"), "Unreachable"),
            (Error::Cancelled, "Cancelled"),
            (Error::Unauthorized("nope".into()), "Unauthorized"),
            (Error::internal("boom"), "InternalError"),
            (Error::serialization("bad json"), "InternalError"),
        ];
        for (err, code) in cases {
            assert_eq!(ApiError::from(err).code(), code);
        }
    }

    #[test]
    fn internal_keeps_original_message() {
        let e: ApiError = Error::internal_with_context("registration", "etcd timeout").into();
        assert_eq!(e.to_string(), "etcd timeout");
    }
}
