//! Registration callback from a member cluster's join script

use tracing::{info, warn};

use cube_common::crd::Cluster;
use cube_common::labels::validate_dns_label;
use cube_common::metrics::{self, RegistrationResult};
use cube_common::{Error, Result};

use crate::client::ClusterClient;

/// How a registration completed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// A new descriptor was written
    Created,
    /// A descriptor with this name already existed
    AlreadyRegistered,
}

/// Strip server-populated metadata so the object can be created
fn prepare(cluster: &Cluster) -> Cluster {
    let mut fresh = cluster.clone();
    fresh.metadata.resource_version = None;
    fresh.metadata.uid = None;
    fresh.metadata.creation_timestamp = None;
    fresh.metadata.managed_fields = None;
    fresh.metadata.namespace = None;
    // status is owned by the health checker; new descriptors start in Processing
    fresh.status = None;
    fresh
}

/// Write a Cluster descriptor to the pivot store
///
/// Registering the same name twice is a success both times.
pub async fn register_cluster(
    pivot: &dyn ClusterClient,
    cluster: &Cluster,
) -> Result<RegistrationOutcome> {
    let name = cluster.metadata.name.clone().unwrap_or_default();
    validate_dns_label("metadata.name", &name)?;

    match pivot.create_cluster(&prepare(cluster)).await {
        Ok(_) => {
            info!(cluster = %name, "registered cluster");
            metrics::record_registration(RegistrationResult::Created);
            Ok(RegistrationOutcome::Created)
        }
        Err(e) if e.is_already_exists() => {
            warn!(cluster = %name, "cluster already registered");
            metrics::record_registration(RegistrationResult::AlreadyRegistered);
            Ok(RegistrationOutcome::AlreadyRegistered)
        }
        Err(e) => {
            warn!(cluster = %name, error = %e, "cluster registration failed");
            metrics::record_registration(RegistrationResult::Failed);
            Err(Error::internal_with_context("registration", e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterClient;
    use cube_common::crd::{ClusterSpec, ClusterState, ClusterStatus};

    fn cluster() -> Cluster {
        let mut c = Cluster::new(
            "member-1",
            ClusterSpec {
                is_member_cluster: true,
                ..Default::default()
            },
        );
        c.metadata.resource_version = Some("42".to_string());
        c.status = Some(ClusterStatus {
            state: ClusterState::Normal,
            ..Default::default()
        });
        c
    }

    #[tokio::test]
    async fn creates_without_server_fields() {
        let mut pivot = MockClusterClient::new();
        pivot
            .expect_create_cluster()
            .withf(|c| c.metadata.resource_version.is_none() && c.status.is_none())
            .times(1)
            .returning(|c| Ok(c.clone()));

        let outcome = register_cluster(&pivot, &cluster()).await.unwrap();
        assert_eq!(outcome, RegistrationOutcome::Created);
    }

    #[tokio::test]
    async fn already_exists_is_success() {
        let mut pivot = MockClusterClient::new();
        pivot
            .expect_create_cluster()
            .returning(|_| Err(Error::already_exists("cluster", "member-1")));

        let outcome = register_cluster(&pivot, &cluster()).await.unwrap();
        assert_eq!(outcome, RegistrationOutcome::AlreadyRegistered);
    }

    #[tokio::test]
    async fn other_failures_are_internal_with_message() {
        let mut pivot = MockClusterClient::new();
        pivot
            .expect_create_cluster()
            .returning(|_| Err(Error::unreachable("pivot-cluster", "connection refused")));

        let err = register_cluster(&pivot, &cluster()).await.unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn nameless_descriptor_is_invalid_input() {
        let pivot = MockClusterClient::new();
        let mut c = cluster();
        c.metadata.name = None;

        let err = register_cluster(&pivot, &c).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
    }
}
