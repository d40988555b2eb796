//! Cluster detail lookup with live enrichment

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use cube_common::quantity::bytes_to_mebibytes;
use cube_common::{metrics, Error, Result};

use super::quota::{node_capacity, QuotaCalculator, ResourceTotals};
use super::{Aggregator, Listing};
use crate::fanout::{fan_out, SkippedCluster};
use crate::registry::{ClusterDescriptor, ClusterEntry};

/// Status reported for a cluster whose live stats could not be collected
pub const UNREACHABLE_STATUS: &str = "Unreachable";

/// Live statistics for one cluster
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClusterStats {
    /// Number of nodes
    pub node_count: usize,
    /// Number of namespaces
    pub namespace_count: usize,
    /// Summed node capacity
    pub capacity: ResourceTotals,
    /// Summed quota assignments
    pub assigned: ResourceTotals,
}

/// One cluster in the `info` response
///
/// CPU is in millicores, memory and storage in mebibytes, accelerators in
/// whole devices.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    /// Cluster name
    pub cluster_name: String,
    /// Free-form description
    pub cluster_description: String,
    /// CNI in use
    pub network_type: String,
    /// Image registry address
    pub harbor_addr: String,
    /// Number of nodes
    pub node_count: usize,
    /// Node CPU capacity
    pub total_cpu: i64,
    /// CPU assigned through quotas
    pub used_cpu: i64,
    /// Number of namespaces
    pub namespace_count: usize,
    /// Node memory capacity
    pub total_mem: i64,
    /// Memory assigned through quotas
    pub used_mem: i64,
    /// Node ephemeral storage capacity
    pub total_storage: i64,
    /// Storage assigned through quotas
    pub used_storage: i64,
    /// Accelerator capacity
    pub total_gpu: i64,
    /// Accelerators assigned through quotas
    pub used_gpu: i64,
    /// False for the pivot cluster
    pub is_member_cluster: bool,
    /// When the cluster was registered
    pub create_time: Option<DateTime<Utc>>,
    /// API server address
    pub kube_api_server: String,
    /// Lifecycle state, or `Unreachable` when degraded
    pub status: String,
}

impl ClusterInfo {
    /// Combine a descriptor with its stats; no stats means degraded
    pub fn new(descriptor: &ClusterDescriptor, stats: Option<&ClusterStats>) -> Self {
        let s = stats.copied().unwrap_or_default();
        let status = match stats {
            Some(_) => descriptor.status.to_string(),
            None => UNREACHABLE_STATUS.to_string(),
        };
        Self {
            cluster_name: descriptor.name.clone(),
            cluster_description: descriptor.description.clone(),
            network_type: descriptor.network_type.clone(),
            harbor_addr: descriptor.harbor_addr.clone(),
            node_count: s.node_count,
            total_cpu: s.capacity.cpu_milli,
            used_cpu: s.assigned.cpu_milli,
            namespace_count: s.namespace_count,
            total_mem: bytes_to_mebibytes(s.capacity.memory_bytes),
            used_mem: bytes_to_mebibytes(s.assigned.memory_bytes),
            total_storage: bytes_to_mebibytes(s.capacity.storage_bytes),
            used_storage: bytes_to_mebibytes(s.assigned.storage_bytes),
            total_gpu: s.capacity.gpu_milli / 1000,
            used_gpu: s.assigned.gpu_milli / 1000,
            is_member_cluster: descriptor.is_member_cluster,
            create_time: descriptor.create_time,
            kube_api_server: descriptor.api_endpoint.clone(),
            status,
        }
    }

    /// True if live stats were unavailable
    pub fn is_degraded(&self) -> bool {
        self.status == UNREACHABLE_STATUS
    }
}

async fn collect_stats(
    entry: Arc<ClusterEntry>,
    quota: Arc<dyn QuotaCalculator>,
) -> Result<ClusterStats> {
    let client = entry.client.clone();
    let (nodes, namespaces, assigned) = tokio::try_join!(
        client.list_nodes(),
        client.list_namespaces(None),
        quota.assigned(entry.name(), client.clone()),
    )?;

    Ok(ClusterStats {
        node_count: nodes.len(),
        namespace_count: namespaces.len(),
        capacity: node_capacity(&nodes)?,
        assigned,
    })
}

impl Aggregator {
    /// Descriptors from the pivot store, enriched with live stats
    ///
    /// With a name, that one descriptor (`Internal` if the store has no such
    /// cluster); otherwise all
    /// of them, ordered by name. A cluster that cannot be enriched is
    /// reported with status `Unreachable` rather than failing the call.
    #[instrument(skip(self, cancel))]
    pub async fn cluster_info(
        &self,
        cluster: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Listing<ClusterInfo>> {
        let pivot = self.registry.lookup(&self.pivot_cluster).map_err(|_| {
            Error::unreachable(&self.pivot_cluster, "pivot cluster is not registered")
        })?;

        let mut descriptors: Vec<ClusterDescriptor> = match cluster {
            Some(name) => {
                let found = pivot
                    .get_cluster(name)
                    .await?
                    .ok_or_else(|| {
                        Error::internal_with_context(
                            "cluster_info",
                            format!("cluster {} not found in store", name),
                        )
                    })?;
                vec![ClusterDescriptor::from(&found)]
            }
            None => pivot
                .list_clusters()
                .await?
                .iter()
                .map(ClusterDescriptor::from)
                .collect(),
        };
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));

        let mut skipped = Vec::new();
        let mut targets = Vec::with_capacity(descriptors.len());
        for d in &descriptors {
            match self.registry.entry(&d.name) {
                Some(entry) => targets.push(entry),
                None => {
                    warn!(cluster = %d.name, "cluster descriptor has no registry entry");
                    metrics::record_fanout_skip("cluster_info", &d.name);
                    skipped.push(SkippedCluster::new(&d.name, "not present in registry"));
                }
            }
        }

        let quota = self.quota.clone();
        let out = fan_out("cluster_info", targets, &self.config, cancel, |entry| {
            collect_stats(entry, quota.clone())
        })
        .await
        .usable()?;

        skipped.extend(out.skipped);
        let stats: HashMap<String, ClusterStats> = out.results.into_iter().collect();

        let items: Vec<ClusterInfo> = descriptors
            .iter()
            .map(|d| ClusterInfo::new(d, stats.get(&d.name)))
            .collect();

        // clusters dropped by cancellation have neither stats nor a skip record
        for info in items.iter().filter(|i| i.is_degraded()) {
            if !skipped.iter().any(|s| s.cluster == info.cluster_name) {
                skipped.push(SkippedCluster::new(&info.cluster_name, "cancelled"));
            }
        }
        skipped.sort_by(|a, b| a.cluster.cmp(&b.cluster));

        Ok(Listing::new(items, skipped))
    }
}
