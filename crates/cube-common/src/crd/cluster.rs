//! Cluster Custom Resource Definition
//!
//! A `Cluster` is the pivot-side descriptor of one fleet member. Exactly one
//! descriptor has `isMemberCluster: false`; that one is the pivot itself.

use base64::Engine;
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Specification for a Cluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.kubecube.io",
    version = "v1",
    kind = "Cluster",
    plural = "clusters",
    status = "ClusterStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Member","type":"boolean","jsonPath":".spec.isMemberCluster"}"#,
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".spec.kubernetesAPIEndpoint"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Base64-encoded kubeconfig for reaching the cluster
    ///
    /// Absent for the pivot, which uses the in-cluster credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,

    /// Address of the cluster's API server
    #[serde(rename = "kubernetesAPIEndpoint", default)]
    pub kubernetes_api_endpoint: String,

    /// CNI in use (e.g. "calico")
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network_type: String,

    /// Image registry address for the cluster
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub harbor_addr: String,

    /// False for the pivot cluster, true for every member
    #[serde(default)]
    pub is_member_cluster: bool,

    /// Free-form description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ClusterSpec {
    /// Decode the stored kubeconfig into YAML text
    ///
    /// Returns `Ok(None)` when the spec carries no kubeconfig.
    pub fn decoded_kubeconfig(&self) -> Result<Option<String>> {
        let Some(encoded) = self.kubeconfig.as_deref() else {
            return Ok(None);
        };
        decode_base64_text(encoded, "kubeconfig").map(Some)
    }
}

/// Decode standard base64 into UTF-8 text, attributing failures to `field`
pub fn decode_base64_text(encoded: &str, field: &str) -> Result<String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::invalid_field(field, format!("{} is not valid base64: {}", field, e)))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::invalid_field(field, format!("{} is not valid UTF-8: {}", field, e)))
}

/// Lifecycle state of a registered cluster
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ClusterState {
    /// Registered, waiting for the first successful health check
    #[default]
    Processing,
    /// Healthy and queryable
    Normal,
    /// Health checks are failing; still queryable
    Abnormal,
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Processing => write!(f, "Processing"),
            Self::Normal => write!(f, "Normal"),
            Self::Abnormal => write!(f, "Abnormal"),
        }
    }
}

/// Status for a Cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Current lifecycle state
    #[serde(default)]
    pub state: ClusterState,

    /// Reason for the current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Last time the health check saw the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl Cluster {
    /// Current state; a descriptor without status is still processing
    pub fn state(&self) -> ClusterState {
        self.status
            .as_ref()
            .map(|s| s.state)
            .unwrap_or_default()
    }

    /// True if this descriptor is the pivot cluster
    pub fn is_pivot(&self) -> bool {
        !self.spec.is_member_cluster
    }
}
