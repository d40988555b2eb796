//! Resource totals and the quota collaborator

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
#[cfg(test)]
use mockall::automock;

use cube_common::labels::NVIDIA_GPU_RESOURCE;
use cube_common::{quantity, Result};

use crate::client::ClusterClient;

/// Summed CPU, memory, storage and accelerator amounts
///
/// Sums saturate at `i64::MAX`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceTotals {
    /// CPU in millicores
    pub cpu_milli: i64,
    /// Memory in bytes
    pub memory_bytes: i64,
    /// Storage in bytes
    pub storage_bytes: i64,
    /// Accelerators in milli-units
    pub gpu_milli: i64,
}

impl std::ops::AddAssign for ResourceTotals {
    fn add_assign(&mut self, rhs: Self) {
        self.cpu_milli = self.cpu_milli.saturating_add(rhs.cpu_milli);
        self.memory_bytes = self.memory_bytes.saturating_add(rhs.memory_bytes);
        self.storage_bytes = self.storage_bytes.saturating_add(rhs.storage_bytes);
        self.gpu_milli = self.gpu_milli.saturating_add(rhs.gpu_milli);
    }
}

fn first_present<'a>(
    list: &'a BTreeMap<String, Quantity>,
    keys: &[&str],
) -> Option<&'a Quantity> {
    keys.iter().find_map(|k| list.get(*k))
}

fn milli_of(list: &BTreeMap<String, Quantity>, keys: &[&str]) -> Result<i64> {
    first_present(list, keys).map_or(Ok(0), quantity::milli)
}

fn value_of(list: &BTreeMap<String, Quantity>, keys: &[&str]) -> Result<i64> {
    first_present(list, keys).map_or(Ok(0), quantity::value)
}

/// Sum `status.capacity` over nodes; a missing key counts as zero
pub fn node_capacity(nodes: &[Node]) -> Result<ResourceTotals> {
    let mut totals = ResourceTotals::default();
    for capacity in nodes
        .iter()
        .filter_map(|n| n.status.as_ref().and_then(|s| s.capacity.as_ref()))
    {
        totals += ResourceTotals {
            cpu_milli: milli_of(capacity, &["cpu"])?,
            memory_bytes: value_of(capacity, &["memory"])?,
            storage_bytes: value_of(capacity, &["ephemeral-storage"])?,
            gpu_milli: milli_of(capacity, &[NVIDIA_GPU_RESOURCE])?,
        };
    }
    Ok(totals)
}

/// Computes how much of a cluster has been handed out
#[cfg_attr(test, automock)]
#[async_trait]
pub trait QuotaCalculator: Send + Sync {
    /// Assigned amounts in `cluster`
    async fn assigned(&self, cluster: &str, client: Arc<dyn ClusterClient>)
        -> Result<ResourceTotals>;
}

/// Sums `spec.hard` over every ResourceQuota in the cluster
#[derive(Clone, Copy, Debug, Default)]
pub struct ResourceQuotaCalculator;

const GPU_REQUEST_KEY: &str = "requests.nvidia.com/gpu";

#[async_trait]
impl QuotaCalculator for ResourceQuotaCalculator {
    async fn assigned(
        &self,
        _cluster: &str,
        client: Arc<dyn ClusterClient>,
    ) -> Result<ResourceTotals> {
        let quotas = client.list_resource_quotas().await?;
        let mut totals = ResourceTotals::default();
        for hard in quotas
            .iter()
            .filter_map(|q| q.spec.as_ref().and_then(|s| s.hard.as_ref()))
        {
            totals += ResourceTotals {
                cpu_milli: milli_of(hard, &["requests.cpu", "cpu"])?,
                memory_bytes: value_of(hard, &["requests.memory", "memory"])?,
                storage_bytes: value_of(hard, &["requests.storage"])?,
                gpu_milli: milli_of(hard, &[GPU_REQUEST_KEY])?,
            };
        }
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterClient;
    use k8s_openapi::api::core::v1::{NodeStatus, ResourceQuota, ResourceQuotaSpec};

    fn quantities(pairs: &[(&str, &str)]) -> BTreeMap<String, Quantity> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
            .collect()
    }

    fn node(pairs: &[(&str, &str)]) -> Node {
        Node {
            status: Some(NodeStatus {
                capacity: Some(quantities(pairs)),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn quota(pairs: &[(&str, &str)]) -> ResourceQuota {
        ResourceQuota {
            spec: Some(ResourceQuotaSpec {
                hard: Some(quantities(pairs)),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn capacities_add_up() {
        let nodes = vec![
            node(&[("cpu", "4"), ("memory", "1Gi")]),
            node(&[("cpu", "8"), ("memory", "1Gi"), (NVIDIA_GPU_RESOURCE, "2")]),
        ];
        let totals = node_capacity(&nodes).unwrap();
        assert_eq!(totals.cpu_milli, 12_000);
        assert_eq!(totals.memory_bytes, 1 << 31);
        assert_eq!(totals.gpu_milli, 2000);
    }

    #[test]
    fn missing_accelerator_is_zero() {
        let totals = node_capacity(&[node(&[("cpu", "4")])]).unwrap();
        assert_eq!(totals.gpu_milli, 0);
    }

    #[test]
    fn node_without_status_is_ignored() {
        let totals = node_capacity(&[Node::default(), node(&[("cpu", "500m")])]).unwrap();
        assert_eq!(totals.cpu_milli, 500);
    }

    #[test]
    fn huge_capacities_saturate() {
        let nodes = vec![node(&[("memory", "5E")]), node(&[("memory", "5E")])];
        let totals = node_capacity(&nodes).unwrap();
        assert_eq!(totals.memory_bytes, i64::MAX);
    }

    #[test]
    fn malformed_capacity_is_an_error() {
        assert!(node_capacity(&[node(&[("cpu", "lots")])]).is_err());
    }

    #[tokio::test]
    async fn quota_prefers_requests_keys() {
        let mut client = MockClusterClient::new();
        client.expect_list_resource_quotas().returning(|| {
            Ok(vec![
                quota(&[("requests.cpu", "2"), ("cpu", "100"), ("requests.memory", "1Gi")]),
                quota(&[("cpu", "500m"), ("memory", "512Mi"), (GPU_REQUEST_KEY, "1")]),
                ResourceQuota::default(),
            ])
        });

        let totals = ResourceQuotaCalculator
            .assigned("member-1", Arc::new(client))
            .await
            .unwrap();

        assert_eq!(totals.cpu_milli, 2500);
        assert_eq!(totals.memory_bytes, (1 << 30) + (512 << 20));
        assert_eq!(totals.gpu_milli, 1000);
    }

    #[tokio::test]
    async fn unbounded_quota_does_not_fail_the_tally() {
        let mut client = MockClusterClient::new();
        client.expect_list_resource_quotas().returning(|| {
            Ok(vec![
                quota(&[("requests.memory", "10E"), ("requests.cpu", "1")]),
                quota(&[("requests.memory", "1Gi")]),
            ])
        });

        let totals = ResourceQuotaCalculator
            .assigned("member-1", Arc::new(client))
            .await
            .unwrap();

        assert_eq!(totals.memory_bytes, i64::MAX);
        assert_eq!(totals.cpu_milli, 1000);
    }

    #[tokio::test]
    async fn quota_list_failure_propagates() {
        let mut client = MockClusterClient::new();
        client
            .expect_list_resource_quotas()
            .returning(|| Err(cube_common::Error::unreachable("member-1", "refused")));

        let result = ResourceQuotaCalculator
            .assigned("member-1", Arc::new(client))
            .await;
        assert!(result.is_err());
    }
}
