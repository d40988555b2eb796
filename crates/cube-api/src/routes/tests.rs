use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use k8s_openapi::api::core::v1::{Namespace, Node, NodeStatus, ResourceQuota};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde_json::{json, Value};
use std::sync::Mutex;
use tower::ServiceExt;

use cube_common::crd::{Cluster, ClusterSpec, SubnamespaceAnchor, SubnamespaceAnchorSpec};
use cube_common::labels::PROJECT_LABEL;
use cube_common::{Error, Result};
use cube_multicluster::{
    Aggregator, ClusterClient, ClusterDescriptor, ClusterLifecycle, ClusterRegistry,
    FanOutConfig, JoinDefaults, ResourceQuotaCalculator,
};

use super::router;
use crate::auth::{Identity, IdentityProvider, TokenConfig, TokenProvider};
use crate::server::AppState;

const PIVOT: &str = "pivot-cluster";

#[derive(Default)]
struct StubCluster {
    nodes: Vec<Node>,
    anchors: Vec<SubnamespaceAnchor>,
    store: Mutex<BTreeMap<String, Cluster>>,
    down: bool,
}

impl StubCluster {
    fn up(&self) -> Result<()> {
        if self.down {
            Err(Error::unreachable("stub", "connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ClusterClient for StubCluster {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        self.up()?;
        Ok(self.nodes.clone())
    }

    async fn list_namespaces(&self, _selector: Option<String>) -> Result<Vec<Namespace>> {
        self.up()?;
        Ok(Vec::new())
    }

    async fn get_namespace(&self, _name: &str) -> Result<Option<Namespace>> {
        self.up()?;
        Ok(None)
    }

    async fn list_subnamespace_anchors(
        &self,
        _selector: Option<String>,
    ) -> Result<Vec<SubnamespaceAnchor>> {
        self.up()?;
        Ok(self.anchors.clone())
    }

    async fn list_resource_quotas(&self) -> Result<Vec<ResourceQuota>> {
        self.up()?;
        Ok(Vec::new())
    }

    async fn get_cluster(&self, name: &str) -> Result<Option<Cluster>> {
        self.up()?;
        Ok(self.store.lock().unwrap().get(name).cloned())
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        self.up()?;
        Ok(self.store.lock().unwrap().values().cloned().collect())
    }

    async fn create_cluster(&self, cluster: &Cluster) -> Result<Cluster> {
        self.up()?;
        let name = cluster.metadata.name.clone().unwrap_or_default();
        let mut store = self.store.lock().unwrap();
        if store.contains_key(&name) {
            return Err(Error::already_exists("cluster", name));
        }
        store.insert(name, cluster.clone());
        Ok(cluster.clone())
    }
}

fn descriptor(name: &str) -> ClusterDescriptor {
    ClusterDescriptor::from(&Cluster::new(
        name,
        ClusterSpec {
            is_member_cluster: name != PIVOT,
            ..Default::default()
        },
    ))
}

fn tokens() -> TokenProvider {
    TokenProvider::new(TokenConfig {
        secret: "test-secret".to_string(),
        ..Default::default()
    })
    .unwrap()
}

fn app_with(identity: Option<IdentityProvider>) -> Router {
    let registry = ClusterRegistry::new();

    let mut memory = BTreeMap::new();
    memory.insert("memory".to_string(), Quantity("2Gi".to_string()));
    memory.insert("cpu".to_string(), Quantity("4".to_string()));
    let pivot = StubCluster {
        nodes: vec![Node {
            status: Some(NodeStatus {
                capacity: Some(memory),
                ..Default::default()
            }),
            ..Default::default()
        }],
        anchors: vec![{
            let mut a = SubnamespaceAnchor::new("web-dev", SubnamespaceAnchorSpec::default());
            a.metadata.labels = Some([(PROJECT_LABEL.to_string(), "web".to_string())].into());
            a
        }],
        ..Default::default()
    };
    registry.add(descriptor(PIVOT), Arc::new(pivot)).unwrap();
    registry
        .add(
            descriptor("broken"),
            Arc::new(StubCluster {
                down: true,
                ..Default::default()
            }),
        )
        .unwrap();

    let aggregator = Aggregator::new(
        registry.clone(),
        PIVOT,
        Arc::new(ResourceQuotaCalculator),
        FanOutConfig::default(),
    );
    let lifecycle = ClusterLifecycle::new(registry, PIVOT, JoinDefaults::default()).unwrap();

    router(AppState {
        aggregator,
        lifecycle: Arc::new(lifecycle),
        identity: identity.map(Arc::new),
        tokens: Some(Arc::new(tokens())),
    })
}

fn app() -> Router {
    app_with(Some(IdentityProvider::Token(tokens())))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn healthz_is_ok() {
    let response = app().oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn resources_require_cluster_parameter() {
    let (status, _, body) = send(app(), get("/api/v1/cube/clusters/resources")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "InvalidInput");
}

#[tokio::test]
async fn resources_of_unknown_cluster_is_cluster_not_found() {
    let (status, _, body) = send(app(), get("/api/v1/cube/clusters/resources?cluster=ghost")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "ClusterNotFound");
}

#[tokio::test]
async fn info_for_cluster_missing_from_store_is_internal_error() {
    let (status, _, body) = send(app(), get("/api/v1/cube/clusters/info?cluster=ghost")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "InternalError");
}

#[tokio::test]
async fn resources_are_reported_as_quantities() {
    let (status, _, body) = send(
        app(),
        get("/api/v1/cube/clusters/resources?cluster=pivot-cluster"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["capacityCpu"], "4");
    assert_eq!(body["data"]["capacityMem"], "2048Mi");
    assert_eq!(body["data"]["assignedGpu"], "0");
}

#[tokio::test]
async fn subnamespaces_hide_skipped_unless_asked() {
    let (status, _, body) = send(app(), get("/api/v1/cube/clusters/subnamespaces")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["namespace"], "web-dev");
    assert!(body["data"].get("skipped").is_none());

    let (_, _, body) = send(
        app(),
        get("/api/v1/cube/clusters/subnamespaces?tenant=&diagnostics=true"),
    )
    .await;
    assert_eq!(body["data"]["skipped"][0]["cluster"], "broken");
}

#[tokio::test]
async fn namespaces_without_filter_lists_every_cluster() {
    let (status, _, body) = send(app(), get("/api/v1/cube/clusters/namespaces")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items"], json!(["broken", "pivot-cluster"]));
}

#[tokio::test]
async fn register_is_idempotent() {
    let app = app();
    let cluster = json!({
        "apiVersion": "cluster.kubecube.io/v1",
        "kind": "Cluster",
        "metadata": { "name": "member-1" },
        "spec": { "isMemberCluster": true }
    });
    for _ in 0..2 {
        let (status, _, body) = send(
            app.clone(),
            post("/api/v1/cube/clusters/register", cluster.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], "success");
    }

    let (_, _, body) = send(app, get("/api/v1/cube/clusters/info?cluster=member-1")).await;
    assert_eq!(body["data"]["total"], 1);
    // member-1 has no client yet, so it is reported degraded
    assert_eq!(body["data"]["items"][0]["status"], "Unreachable");
}

#[tokio::test]
async fn add_with_bad_kubeconfig_is_invalid_input() {
    let (status, _, body) = send(
        app(),
        post(
            "/api/v1/cube/clusters/add",
            json!({ "clusterName": "member-1", "kubeConfig": "not base64!" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "InvalidInput");
}

#[tokio::test]
async fn malformed_json_is_invalid_input() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/cube/clusters/add")
        .header("content-type", "application/json")
        .body(Body::from("{"))
        .unwrap();
    let (status, _, body) = send(app(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "InvalidInput");
}

#[tokio::test]
async fn login_returns_identity_and_session_token() {
    let token = tokens()
        .issue(&Identity::named("alice"))
        .unwrap();
    let (status, headers, body) = send(
        app(),
        post("/login", json!({ "username": "alice", "password": token })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["username"], "alice");
    let auth = headers.get("authorization").unwrap().to_str().unwrap();
    assert!(auth.starts_with("Bearer "));
}

#[tokio::test]
async fn login_with_foreign_token_is_unauthorized() {
    let token = tokens().issue(&Identity::named("bob")).unwrap();
    let (status, _, body) = send(
        app(),
        post("/login", json!({ "username": "alice", "password": token })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "Unauthorized");
}

#[tokio::test]
async fn login_without_provider_is_internal_error() {
    let (status, _, body) = send(
        app_with(None),
        post("/login", json!({ "username": "alice", "password": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "InternalError");
}
