//! Multi-cluster core for the kubecube control plane
//!
//! - [`registry`]: the live table of fleet members and their clients
//! - [`sync`]: keeps the registry in step with Cluster descriptors
//! - [`aggregator`]: fan-out queries across the fleet
//! - [`lifecycle`]: join-script generation and registration
//! - [`reconcile`]: namespace-driven User membership reconciliation

#![deny(missing_docs)]

pub mod aggregator;
pub mod client;
pub mod fanout;
pub mod lifecycle;
pub mod reconcile;
pub mod registry;
pub mod sync;

pub use aggregator::{
    Aggregator, ClusterInfo, ClusterResources, Listing, QuotaCalculator, ResourceQuotaCalculator,
    ResourceTally, SubnamespaceRecord,
};
pub use client::{ClusterClient, KubeClusterClient};
pub use fanout::{FanOutConfig, SkippedCluster};
pub use lifecycle::{ClusterLifecycle, JoinDefaults, JoinRequest, RegistrationOutcome};
pub use registry::{ClusterDescriptor, ClusterEntry, ClusterRegistry};
pub use sync::{ClientFactory, ClusterSync, KubeClientFactory};
