//! Cluster lifecycle: join-script generation and registration
//!
//! A member cluster moves through `Unregistered → Processing → Normal |
//! Abnormal → Removed`. Joining renders a script the operator runs on the
//! member; that script calls back into [`ClusterLifecycle::register`], which
//! writes the descriptor in `Processing`. The health checker owns the
//! `Normal`/`Abnormal` transitions, and deleting the descriptor drops the
//! registry entry through `ClusterSync`.

mod join;
mod register;

pub use join::{
    JoinDefaults, JoinRequest, JoinScriptRenderer, DEFAULT_DESCRIPTION, DEFAULT_NETWORK_TYPE,
    JOIN_TEMPLATE_VERSION,
};
pub use register::{register_cluster, RegistrationOutcome};

use tracing::instrument;

use cube_common::crd::Cluster;
use cube_common::{Error, Result};

use crate::registry::ClusterRegistry;

/// Join and registration entry points bound to the pivot cluster
pub struct ClusterLifecycle {
    registry: ClusterRegistry,
    pivot_cluster: String,
    renderer: JoinScriptRenderer,
}

impl ClusterLifecycle {
    /// Create a lifecycle manager writing through `pivot_cluster`
    pub fn new(
        registry: ClusterRegistry,
        pivot_cluster: impl Into<String>,
        defaults: JoinDefaults,
    ) -> Result<Self> {
        Ok(Self {
            registry,
            pivot_cluster: pivot_cluster.into(),
            renderer: JoinScriptRenderer::new(defaults)?,
        })
    }

    /// Render the base64-encoded join script for a candidate member
    #[instrument(skip(self, request), fields(cluster = %request.cluster_name))]
    pub fn join_script(&self, request: &JoinRequest) -> Result<String> {
        self.renderer.render(request)
    }

    /// Record a member cluster in the pivot store
    #[instrument(skip(self, cluster), fields(cluster = ?cluster.metadata.name))]
    pub async fn register(&self, cluster: &Cluster) -> Result<RegistrationOutcome> {
        let pivot = self.registry.lookup(&self.pivot_cluster).map_err(|_| {
            Error::internal_with_context(
                "registration",
                format!("pivot cluster {} is not registered", self.pivot_cluster),
            )
        })?;
        register_cluster(pivot.as_ref(), cluster).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use cube_common::crd::{ClusterSpec, ClusterState};

    use crate::client::MockClusterClient;
    use crate::registry::ClusterDescriptor;

    fn pivot_descriptor() -> ClusterDescriptor {
        ClusterDescriptor {
            name: "pivot-cluster".to_string(),
            is_member_cluster: false,
            network_type: String::new(),
            harbor_addr: String::new(),
            description: String::new(),
            api_endpoint: String::new(),
            create_time: None,
            status: ClusterState::Normal,
        }
    }

    #[tokio::test]
    async fn register_goes_through_pivot() {
        let mut pivot = MockClusterClient::new();
        pivot
            .expect_create_cluster()
            .times(1)
            .returning(|c| Ok(c.clone()));
        let registry = ClusterRegistry::new();
        registry.add(pivot_descriptor(), Arc::new(pivot)).unwrap();

        let lifecycle =
            ClusterLifecycle::new(registry, "pivot-cluster", JoinDefaults::default()).unwrap();
        let cluster = Cluster::new("member-1", ClusterSpec::default());
        assert_eq!(
            lifecycle.register(&cluster).await.unwrap(),
            RegistrationOutcome::Created
        );
    }

    #[tokio::test]
    async fn register_without_pivot_is_internal() {
        let lifecycle =
            ClusterLifecycle::new(ClusterRegistry::new(), "pivot-cluster", JoinDefaults::default())
                .unwrap();
        let cluster = Cluster::new("member-1", ClusterSpec::default());
        assert!(matches!(
            lifecycle.register(&cluster).await,
            Err(Error::Internal { .. })
        ));
    }
}
