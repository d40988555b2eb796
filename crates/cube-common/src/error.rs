//! Error types for the fleet control plane
//!
//! Errors carry structured fields so that the HTTP layer can map them to a
//! stable error code, and so that logs name the cluster or object involved.

use thiserror::Error;

/// Context recorded on internal errors raised without one
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for fleet operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error that has not been classified further
    #[error("kube api: {source}")]
    Kube {
        /// Source error from the client
        #[from]
        source: kube::Error,
    },

    /// A named entity (cluster, namespace, user) does not exist
    #[error("{kind} not found: {name}")]
    NotFound {
        /// Kind of the missing entity (e.g. "cluster")
        kind: String,
        /// Name that was looked up
        name: String,
    },

    /// A named entity already exists
    #[error("{kind} already exists: {name}")]
    AlreadyExists {
        /// Kind of the conflicting entity
        kind: String,
        /// Conflicting name
        name: String,
    },

    /// Malformed request data (credential bundle, selector, body)
    #[error("invalid input: {message}")]
    InvalidInput {
        /// What is wrong with it
        message: String,
        /// The offending field, if known (e.g. "kubeConfig")
        field: Option<String>,
    },

    /// A specific cluster's call failed or timed out
    #[error("cluster {cluster} unreachable: {message}")]
    Unreachable {
        /// Cluster that could not be reached
        cluster: String,
        /// Description of the failure
        message: String,
    },

    /// The caller cancelled the operation before any result was collected
    #[error("operation cancelled")]
    Cancelled,

    /// Credentials were rejected
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A payload could not be encoded or decoded
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// Kind of the payload, when known
        kind: Option<String>,
    },

    /// Store-layer or operational failure with no more specific classification
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g. "registration", "sync", "template")
        context: String,
    },
}

impl Error {
    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an already-exists error
    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an invalid-input error without a field path
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
            field: None,
        }
    }

    /// Create an invalid-input error for a specific field
    pub fn invalid_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an unreachable error for a cluster
    pub fn unreachable(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Unreachable {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Serialization failure for a known resource kind
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Internal error without a more specific origin
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Internal error attributed to `context` (e.g. "registration")
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// True for a missing entity, including a kube API 404
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// True for a name conflict, including a kube API 409 `AlreadyExists`
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::AlreadyExists { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409 && ae.reason == "AlreadyExists",
            _ => false,
        }
    }

    /// Check if this error is worth retrying
    ///
    /// Input and identity errors need a caller-side fix; connection failures
    /// and 5xx responses may clear up on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Unreachable { .. } | Error::Internal { .. } => true,
            Error::NotFound { .. }
            | Error::AlreadyExists { .. }
            | Error::InvalidInput { .. }
            | Error::Cancelled
            | Error::Unauthorized(_)
            | Error::Serialization { .. } => false,
        }
    }

    /// Get the cluster name if this error is tied to one cluster
    pub fn cluster(&self) -> Option<&str> {
        match self {
            Error::Unreachable { cluster, .. } => Some(cluster),
            Error::NotFound { kind, name } | Error::AlreadyExists { kind, name }
                if kind == "cluster" =>
            {
                Some(name)
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
