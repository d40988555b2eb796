//! Capacity versus assigned quota for a single cluster

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use cube_common::quantity::bytes_to_mebibytes;
use cube_common::{Error, Result};

use super::quota::{node_capacity, ResourceTotals};
use super::Aggregator;

/// Capacity and assigned amount of one resource, in the same unit
///
/// `assigned` may exceed `capacity`; neither is clamped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceTally {
    /// Total available
    pub capacity: i64,
    /// Total handed out through quotas
    pub assigned: i64,
}

/// Resource tally for one cluster
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClusterResources {
    /// CPU in millicores
    pub cpu: ResourceTally,
    /// Memory in mebibytes
    pub memory: ResourceTally,
    /// Accelerators in milli-units
    pub gpu: ResourceTally,
}

impl ClusterResources {
    /// Build from raw totals, converting memory bytes to mebibytes
    pub fn from_totals(capacity: ResourceTotals, assigned: ResourceTotals) -> Self {
        Self {
            cpu: ResourceTally {
                capacity: capacity.cpu_milli,
                assigned: assigned.cpu_milli,
            },
            memory: ResourceTally {
                capacity: bytes_to_mebibytes(capacity.memory_bytes),
                assigned: bytes_to_mebibytes(assigned.memory_bytes),
            },
            gpu: ResourceTally {
                capacity: capacity.gpu_milli,
                assigned: assigned.gpu_milli,
            },
        }
    }
}

impl Aggregator {
    /// Node capacity and quota assignments for `cluster`
    ///
    /// `NotFound` if the cluster is not in the registry. Errors from the
    /// cluster propagate; a timeout is `Unreachable`.
    #[instrument(skip(self, cancel))]
    pub async fn cluster_resources(
        &self,
        cluster: &str,
        cancel: &CancellationToken,
    ) -> Result<ClusterResources> {
        let client = self.registry.lookup(cluster)?;

        let tally = async {
            let nodes = client.list_nodes().await?;
            let capacity = node_capacity(&nodes)?;
            let assigned = self.quota.assigned(cluster, client.clone()).await?;
            debug!(cluster, nodes = nodes.len(), "computed resource tally");
            Ok(ClusterResources::from_totals(capacity, assigned))
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(self.config.timeout, tally) => match result {
                Ok(tally) => tally,
                Err(_) => Err(Error::unreachable(cluster, "timed out computing resources")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_is_reported_in_mebibytes() {
        let capacity = ResourceTotals {
            memory_bytes: 1 << 31,
            ..Default::default()
        };
        let r = ClusterResources::from_totals(capacity, ResourceTotals::default());
        assert_eq!(r.memory.capacity, 2048);
        assert_eq!(r.memory.assigned, 0);
    }

    #[test]
    fn assigned_is_not_clamped() {
        let capacity = ResourceTotals {
            cpu_milli: 4000,
            ..Default::default()
        };
        let assigned = ResourceTotals {
            cpu_milli: 9000,
            ..Default::default()
        };
        let r = ClusterResources::from_totals(capacity, assigned);
        assert_eq!(r.cpu, ResourceTally { capacity: 4000, assigned: 9000 });
    }
}
