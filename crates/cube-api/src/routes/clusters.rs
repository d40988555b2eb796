//! `/api/v1/cube/clusters/*` handlers

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use cube_common::crd::Cluster;
use cube_common::quantity::{format_mebibytes, format_milli};
use cube_multicluster::{
    ClusterInfo, ClusterResources, JoinRequest, Listing, SkippedCluster, SubnamespaceRecord,
};

use crate::error::{ApiError, Result};
use crate::response::{ok, Envelope};
use crate::server::AppState;

/// Query string for endpoints taking an optional cluster
#[derive(Debug, Default, Deserialize)]
pub struct ClusterQuery {
    /// Cluster name
    pub cluster: Option<String>,
}

/// Query string for the namespace lookup
#[derive(Debug, Default, Deserialize)]
pub struct NamespaceQuery {
    /// Namespace name
    pub namespace: Option<String>,
}

/// Query string for the subnamespace search
#[derive(Debug, Default, Deserialize)]
pub struct SubnamespaceQuery {
    /// Tenant filter
    pub tenant: Option<String>,
    /// Include skipped clusters in the response
    #[serde(default)]
    pub diagnostics: bool,
}

/// Capacity against assigned quota, as Kubernetes quantity strings
#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesResponse {
    /// Node CPU capacity
    pub capacity_cpu: String,
    /// CPU assigned through quotas
    pub assigned_cpu: String,
    /// Node memory capacity
    pub capacity_mem: String,
    /// Memory assigned through quotas
    pub assigned_mem: String,
    /// Accelerator capacity
    pub capacity_gpu: String,
    /// Accelerators assigned through quotas
    pub assigned_gpu: String,
}

impl From<ClusterResources> for ResourcesResponse {
    fn from(r: ClusterResources) -> Self {
        Self {
            capacity_cpu: format_milli(r.cpu.capacity),
            assigned_cpu: format_milli(r.cpu.assigned),
            capacity_mem: format_mebibytes(r.memory.capacity),
            assigned_mem: format_mebibytes(r.memory.assigned),
            capacity_gpu: format_milli(r.gpu.capacity),
            assigned_gpu: format_milli(r.gpu.assigned),
        }
    }
}

/// Subnamespace search result
#[derive(Debug, Serialize)]
pub struct SubnamespaceListing {
    /// Number of items
    pub total: usize,
    /// Matching subnamespaces
    pub items: Vec<SubnamespaceRecord>,
    /// Clusters left out, only with `diagnostics=true`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<Vec<SkippedCluster>>,
}

/// Empty query values mean "not given"
fn given(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Cancelled when the handler's future is dropped
fn request_token() -> (CancellationToken, tokio_util::sync::DropGuard) {
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    (token, guard)
}

/// `GET /clusters/info`
pub async fn cluster_info(
    State(state): State<AppState>,
    query: std::result::Result<Query<ClusterQuery>, QueryRejection>,
) -> Result<Json<Envelope<Listing<ClusterInfo>>>> {
    let Query(query) = query?;
    let (cancel, _guard) = request_token();
    let listing = state
        .aggregator
        .cluster_info(given(query.cluster).as_deref(), &cancel)
        .await?;
    Ok(ok(listing))
}

/// `GET /clusters/namespaces`
pub async fn clusters_for_namespace(
    State(state): State<AppState>,
    query: std::result::Result<Query<NamespaceQuery>, QueryRejection>,
) -> Result<Json<Envelope<Listing<String>>>> {
    let Query(query) = query?;
    let (cancel, _guard) = request_token();
    let listing = state
        .aggregator
        .clusters_for_namespace(given(query.namespace).as_deref(), &cancel)
        .await?;
    Ok(ok(listing))
}

/// `GET /clusters/resources`
pub async fn cluster_resources(
    State(state): State<AppState>,
    query: std::result::Result<Query<ClusterQuery>, QueryRejection>,
) -> Result<Json<Envelope<ResourcesResponse>>> {
    let Query(query) = query?;
    let cluster = given(query.cluster)
        .ok_or_else(|| ApiError::InvalidInput("query parameter cluster is required".to_string()))?;
    let (cancel, _guard) = request_token();
    let resources = state
        .aggregator
        .cluster_resources(&cluster, &cancel)
        .await?;
    Ok(ok(ResourcesResponse::from(resources)))
}

/// `GET /clusters/subnamespaces`
pub async fn subnamespaces(
    State(state): State<AppState>,
    query: std::result::Result<Query<SubnamespaceQuery>, QueryRejection>,
) -> Result<Json<Envelope<SubnamespaceListing>>> {
    let Query(query) = query?;
    let (cancel, _guard) = request_token();
    let listing = state
        .aggregator
        .subnamespaces(given(query.tenant).as_deref(), &cancel)
        .await?;
    Ok(ok(SubnamespaceListing {
        total: listing.total,
        items: listing.items,
        skipped: query.diagnostics.then_some(listing.skipped),
    }))
}

/// `POST /clusters/add`: render a join script
pub async fn add_cluster(
    State(state): State<AppState>,
    body: std::result::Result<Json<JoinRequest>, JsonRejection>,
) -> Result<Json<Envelope<String>>> {
    let Json(request) = body?;
    let script = state.lifecycle.join_script(&request)?;
    info!(cluster = %request.cluster_name, "rendered join script");
    Ok(ok(script))
}

/// `POST /clusters/register`: callback from a join script
pub async fn register_cluster(
    State(state): State<AppState>,
    body: std::result::Result<Json<Cluster>, JsonRejection>,
) -> Result<Json<Envelope<&'static str>>> {
    let Json(cluster) = body?;
    state.lifecycle.register(&cluster).await?;
    Ok(ok("success"))
}
