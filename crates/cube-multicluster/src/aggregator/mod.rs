//! Cross-cluster aggregator
//!
//! A stateless query layer over the [`ClusterRegistry`]. Multi-cluster queries
//! fan out to every entry and tolerate partial failure; single-cluster
//! queries propagate their errors.

mod info;
mod quota;
mod resources;
mod search;

use std::sync::Arc;

use serde::Serialize;

use crate::fanout::{FanOutConfig, SkippedCluster};
use crate::registry::ClusterRegistry;

pub use info::{ClusterInfo, ClusterStats, UNREACHABLE_STATUS};
pub use quota::{node_capacity, QuotaCalculator, ResourceQuotaCalculator, ResourceTotals};
pub use resources::{ClusterResources, ResourceTally};
pub use search::SubnamespaceRecord;

#[cfg(test)]
pub use quota::MockQuotaCalculator;

/// A merged multi-cluster listing
#[derive(Clone, Debug, Serialize)]
pub struct Listing<T> {
    /// Number of items
    pub total: usize,
    /// Items
    pub items: Vec<T>,
    /// Clusters left out of the result
    #[serde(skip)]
    pub skipped: Vec<SkippedCluster>,
}

impl<T> Listing<T> {
    /// Build a listing, counting the items
    pub fn new(items: Vec<T>, skipped: Vec<SkippedCluster>) -> Self {
        Self {
            total: items.len(),
            items,
            skipped,
        }
    }
}

/// Query layer over the registry
#[derive(Clone)]
pub struct Aggregator {
    registry: ClusterRegistry,
    pivot_cluster: String,
    quota: Arc<dyn QuotaCalculator>,
    config: FanOutConfig,
}

impl Aggregator {
    /// Create an aggregator reading descriptors from `pivot_cluster`
    pub fn new(
        registry: ClusterRegistry,
        pivot_cluster: impl Into<String>,
        quota: Arc<dyn QuotaCalculator>,
        config: FanOutConfig,
    ) -> Self {
        Self {
            registry,
            pivot_cluster: pivot_cluster.into(),
            quota,
            config,
        }
    }
}
