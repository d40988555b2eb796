//! Join-script generation for candidate member clusters

use base64::Engine;
use kube::config::Kubeconfig;
use minijinja::{AutoEscape, Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};

use cube_common::crd::{decode_base64_text, Cluster, ClusterSpec};
use cube_common::labels::validate_dns_label;
use cube_common::{Error, Result, DEFAULT_API_PORT};

/// Version stamped into rendered scripts
pub const JOIN_TEMPLATE_VERSION: &str = "v1";

const JOIN_TEMPLATE_NAME: &str = "join.sh";
const JOIN_TEMPLATE: &str = include_str!("../../templates/join.sh.j2");

/// Network type used when the request names none
pub const DEFAULT_NETWORK_TYPE: &str = "calico";

/// Description used when the request carries none
pub const DEFAULT_DESCRIPTION: &str = "this is member cluster";

/// A request to produce a join script
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    /// Name the member cluster will be registered under
    pub cluster_name: String,
    /// Base64-encoded kubeconfig of the member cluster
    pub kube_config: String,
    /// API server address; defaults to the kubeconfig's server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s_endpoint: Option<String>,
    /// CNI in use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_type: Option<String>,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Address of the pivot the script calls back to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_cube_host: Option<String>,
}

/// Values filled in when a join request leaves them out
#[derive(Clone, Debug)]
pub struct JoinDefaults {
    /// Address of this node, used as the callback host
    pub kube_cube_host: String,
    /// Port of the kubecube API on the pivot
    pub kube_cube_port: u16,
    /// Default network type
    pub network_type: String,
    /// Default description
    pub description: String,
}

impl Default for JoinDefaults {
    fn default() -> Self {
        Self {
            kube_cube_host: std::env::var("NODE_IP").unwrap_or_else(|_| "127.0.0.1".to_string()),
            kube_cube_port: DEFAULT_API_PORT,
            network_type: DEFAULT_NETWORK_TYPE.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
        }
    }
}

#[derive(Serialize)]
struct JoinScriptContext<'a> {
    template_version: &'a str,
    cluster_name: &'a str,
    k8s_endpoint: &'a str,
    kube_cube_host: &'a str,
    kube_cube_port: u16,
    kube_config: &'a str,
    registration: String,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Single-quote a value for POSIX shells
fn shell_quote(value: String) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Server address of the kubeconfig's current context
///
/// Falls back to the first cluster when there is no current context.
fn kubeconfig_server(kubeconfig: &Kubeconfig) -> Option<String> {
    let cluster_name = kubeconfig
        .current_context
        .as_deref()
        .and_then(|current| kubeconfig.contexts.iter().find(|c| c.name == current))
        .and_then(|c| c.context.as_ref())
        .map(|c| c.cluster.clone());

    let named = match cluster_name {
        Some(name) => kubeconfig.clusters.iter().find(|c| c.name == name),
        None => kubeconfig.clusters.first(),
    }?;
    named
        .cluster
        .as_ref()
        .and_then(|c| c.server.clone())
        .filter(|s| !s.is_empty())
}

/// Renders join scripts from the embedded template
pub struct JoinScriptRenderer {
    env: Environment<'static>,
    defaults: JoinDefaults,
}

impl JoinScriptRenderer {
    /// Compile the embedded template
    pub fn new(defaults: JoinDefaults) -> Result<Self> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.add_filter("shell_quote", shell_quote);
        env.add_template(JOIN_TEMPLATE_NAME, JOIN_TEMPLATE)
            .map_err(|e| Error::internal_with_context("template", e.to_string()))?;
        Ok(Self { env, defaults })
    }

    /// Validate a join request and render its script, base64-encoded
    ///
    /// Pure transform: nothing in any cluster is touched.
    pub fn render(&self, request: &JoinRequest) -> Result<String> {
        validate_dns_label("clusterName", &request.cluster_name)?;

        let kubeconfig_yaml = decode_base64_text(&request.kube_config, "kubeConfig")?;
        let kubeconfig = Kubeconfig::from_yaml(&kubeconfig_yaml).map_err(|e| {
            Error::invalid_field("kubeConfig", format!("kubeConfig invalid: {}", e))
        })?;

        let k8s_endpoint = match non_empty(&request.k8s_endpoint) {
            Some(endpoint) => endpoint.to_string(),
            None => kubeconfig_server(&kubeconfig).ok_or_else(|| {
                Error::invalid_field("kubeConfig", "kubeConfig names no API server")
            })?,
        };
        let network_type = non_empty(&request.network_type).unwrap_or(&self.defaults.network_type);
        let description = non_empty(&request.description).unwrap_or(&self.defaults.description);
        let kube_cube_host =
            non_empty(&request.kube_cube_host).unwrap_or(&self.defaults.kube_cube_host);

        let kube_config = request.kube_config.trim();
        let registration = Cluster::new(
            &request.cluster_name,
            ClusterSpec {
                kubeconfig: Some(kube_config.to_string()),
                kubernetes_api_endpoint: k8s_endpoint.clone(),
                network_type: network_type.to_string(),
                is_member_cluster: true,
                description: description.to_string(),
                ..Default::default()
            },
        );

        let ctx = JoinScriptContext {
            template_version: JOIN_TEMPLATE_VERSION,
            cluster_name: &request.cluster_name,
            k8s_endpoint: &k8s_endpoint,
            kube_cube_host,
            kube_cube_port: self.defaults.kube_cube_port,
            kube_config,
            registration: serde_json::to_string(&registration)
                .map_err(|e| Error::serialization_for_kind("Cluster", e.to_string()))?,
        };

        let script = self
            .env
            .get_template(JOIN_TEMPLATE_NAME)
            .and_then(|t| t.render(&ctx))
            .map_err(|e| Error::internal_with_context("template", e.to_string()))?;

        Ok(base64::engine::general_purpose::STANDARD.encode(script))
    }
}
