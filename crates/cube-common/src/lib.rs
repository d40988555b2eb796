//! Common types for the kubecube fleet control plane: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod labels;
pub mod metrics;
pub mod quantity;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Name under which the pivot cluster is registered unless overridden
pub const DEFAULT_PIVOT_CLUSTER: &str = "pivot-cluster";

/// Default port for the kubecube HTTP API
pub const DEFAULT_API_PORT: u16 = 7443;

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "kubecube-controller";
