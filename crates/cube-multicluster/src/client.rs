//! Per-cluster client capability
//!
//! Reads go through the API server's watch cache (`resourceVersion=0`), so
//! they are cheap and eventually consistent. Writes go straight to etcd.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Node, ResourceQuota};
use kube::api::{GetParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use cube_common::crd::{Cluster, SubnamespaceAnchor};
use cube_common::{Error, Result, FIELD_MANAGER};

/// Connect timeout for member cluster clients
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Read timeout for member cluster clients
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle to one cluster's API
///
/// Implemented over `kube::Client` in production and by mocks or in-memory
/// fakes in tests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List all nodes
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// List namespaces, optionally filtered by a label selector
    async fn list_namespaces(&self, label_selector: Option<String>) -> Result<Vec<Namespace>>;

    /// Get a namespace by name, `None` if absent
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;

    /// List SubnamespaceAnchors across all namespaces
    async fn list_subnamespace_anchors(
        &self,
        label_selector: Option<String>,
    ) -> Result<Vec<SubnamespaceAnchor>>;

    /// List ResourceQuotas across all namespaces
    async fn list_resource_quotas(&self) -> Result<Vec<ResourceQuota>>;

    /// Get a Cluster descriptor by name, `None` if absent
    async fn get_cluster(&self, name: &str) -> Result<Option<Cluster>>;

    /// List all Cluster descriptors
    async fn list_clusters(&self) -> Result<Vec<Cluster>>;

    /// Create a Cluster descriptor, bypassing the cache
    ///
    /// A name conflict is reported as `Error::AlreadyExists`.
    async fn create_cluster(&self, cluster: &Cluster) -> Result<Cluster>;
}

/// `ClusterClient` backed by a kube-rs client
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Wrap an existing kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from kubeconfig YAML
    pub async fn from_kubeconfig_yaml(yaml: &str) -> Result<Self> {
        let kubeconfig = Kubeconfig::from_yaml(yaml)
            .map_err(|e| Error::invalid_field("kubeconfig", format!("invalid kubeconfig: {}", e)))?;

        let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::invalid_field("kubeconfig", format!("unusable kubeconfig: {}", e)))?;
        config.connect_timeout = Some(CONNECT_TIMEOUT);
        config.read_timeout = Some(READ_TIMEOUT);

        let client = Client::try_from(config)?;
        Ok(Self::new(client))
    }

    fn cached_list() -> ListParams {
        ListParams::default().match_any()
    }

    fn selected_list(label_selector: Option<String>) -> ListParams {
        match label_selector {
            Some(selector) => Self::cached_list().labels(&selector),
            None => Self::cached_list(),
        }
    }
}

/// Map a kube 404 to `None`
fn optional<T>(result: std::result::Result<T, kube::Error>) -> Result<Option<T>> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&Self::cached_list()).await?.items)
    }

    async fn list_namespaces(&self, label_selector: Option<String>) -> Result<Vec<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.list(&Self::selected_list(label_selector)).await?.items)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        optional(api.get_with(name, &GetParams::any()).await)
    }

    async fn list_subnamespace_anchors(
        &self,
        label_selector: Option<String>,
    ) -> Result<Vec<SubnamespaceAnchor>> {
        let api: Api<SubnamespaceAnchor> = Api::all(self.client.clone());
        Ok(api.list(&Self::selected_list(label_selector)).await?.items)
    }

    async fn list_resource_quotas(&self) -> Result<Vec<ResourceQuota>> {
        let api: Api<ResourceQuota> = Api::all(self.client.clone());
        Ok(api.list(&Self::cached_list()).await?.items)
    }

    async fn get_cluster(&self, name: &str) -> Result<Option<Cluster>> {
        let api: Api<Cluster> = Api::all(self.client.clone());
        optional(api.get_with(name, &GetParams::any()).await)
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        let api: Api<Cluster> = Api::all(self.client.clone());
        Ok(api.list(&Self::cached_list()).await?.items)
    }

    async fn create_cluster(&self, cluster: &Cluster) -> Result<Cluster> {
        let api: Api<Cluster> = Api::all(self.client.clone());
        let name = cluster.name_any();

        // server-owned fields from the caller's copy would be rejected
        let mut desired = cluster.clone();
        desired.metadata.resource_version = None;
        desired.metadata.uid = None;
        desired.metadata.creation_timestamp = None;
        desired.metadata.managed_fields = None;

        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        match api.create(&params, &desired).await {
            Ok(created) => {
                debug!(cluster = %name, "created cluster descriptor");
                Ok(created)
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Err(Error::already_exists("cluster", name))
            }
            Err(e) => Err(e.into()),
        }
    }
}
