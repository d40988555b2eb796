//! OpenTelemetry instruments for the fleet control plane
//!
//! Covers registry size, fan-out degradation, cluster registrations and
//! namespace-driven reconcile requests.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;

static METER: Lazy<Meter> = Lazy::new(|| global::meter("kubecube"));

/// Number of clusters currently present in the registry
pub static REGISTRY_CLUSTERS: Lazy<Gauge<u64>> = Lazy::new(|| {
    METER
        .u64_gauge("cube_registry_clusters")
        .with_description("Number of clusters in the multi-cluster registry")
        .with_unit("{clusters}")
        .build()
});

/// Clusters skipped or degraded during a fan-out
///
/// Labels:
/// - `operation`: cluster_info, clusters_for_namespace, subnamespaces
/// - `cluster`: cluster name
pub static FANOUT_SKIPPED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("cube_fanout_skipped_total")
        .with_description("Clusters skipped during cross-cluster fan-out")
        .with_unit("{clusters}")
        .build()
});

/// Registration callbacks by outcome
///
/// Labels:
/// - `outcome`: created, already_registered, failed
pub static CLUSTER_REGISTRATIONS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("cube_cluster_registrations_total")
        .with_description("Cluster registration callbacks by outcome")
        .with_unit("{registrations}")
        .build()
});

/// Reconcile requests emitted by the namespace mapper
pub static MAPPER_REQUESTS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("cube_mapper_requests_total")
        .with_description("User reconcile requests emitted from namespace changes")
        .with_unit("{requests}")
        .build()
});

/// Outcome label for a registration callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationResult {
    /// Descriptor was created
    Created,
    /// Descriptor already existed
    AlreadyRegistered,
    /// Create failed
    Failed,
}

impl RegistrationResult {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AlreadyRegistered => "already_registered",
            Self::Failed => "failed",
        }
    }
}

/// Record the current registry size
pub fn record_registry_size(len: usize) {
    REGISTRY_CLUSTERS.record(len as u64, &[]);
}

/// Record one cluster dropped from a fan-out
pub fn record_fanout_skip(operation: &'static str, cluster: &str) {
    FANOUT_SKIPPED.add(
        1,
        &[
            KeyValue::new("operation", operation),
            KeyValue::new("cluster", cluster.to_string()),
        ],
    );
}

/// Record a registration callback outcome
pub fn record_registration(outcome: RegistrationResult) {
    CLUSTER_REGISTRATIONS.add(1, &[KeyValue::new("outcome", outcome.as_str())]);
}

/// Record reconcile requests produced by one namespace event
pub fn record_mapper_requests(count: usize) {
    MAPPER_REQUESTS.add(count as u64, &[]);
}
