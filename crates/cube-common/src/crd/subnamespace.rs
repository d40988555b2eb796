//! SubnamespaceAnchor from the hierarchical namespace controller
//!
//! Only the fields the control plane reads are modelled. The anchor's name is
//! the name of the subnamespace it owns. The CRD belongs to HNC, so the type
//! implements [`Resource`] by hand and tolerates anchors stored without a
//! `spec`.

use std::borrow::Cow;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::NamespaceResourceScope;
use kube::Resource;
use serde::{Deserialize, Serialize};

const GROUP: &str = "hnc.x-k8s.io";
const VERSION: &str = "v1alpha2";
const KIND: &str = "SubnamespaceAnchor";
const PLURAL: &str = "subnamespaceanchors";

/// A namespaced `hnc.x-k8s.io/v1alpha2` SubnamespaceAnchor
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SubnamespaceAnchor {
    /// Standard object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Desired subnamespace metadata; empty when the anchor has no spec
    #[serde(default)]
    pub spec: SubnamespaceAnchorSpec,

    /// Observed state reported by HNC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SubnamespaceAnchorStatus>,
}

impl SubnamespaceAnchor {
    /// Anchor named `name` with no namespace set
    pub fn new(name: &str, spec: SubnamespaceAnchorSpec) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }
}

impl Resource for SubnamespaceAnchor {
    type DynamicType = ();
    type Scope = NamespaceResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        KIND.into()
    }

    fn group(_: &()) -> Cow<'_, str> {
        GROUP.into()
    }

    fn version(_: &()) -> Cow<'_, str> {
        VERSION.into()
    }

    fn plural(_: &()) -> Cow<'_, str> {
        PLURAL.into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Specification for a SubnamespaceAnchor
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SubnamespaceAnchorSpec {
    /// Labels to set on the subnamespace
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<MetaKeyValue>,

    /// Annotations to set on the subnamespace
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<MetaKeyValue>,
}

/// One label or annotation entry
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct MetaKeyValue {
    /// Key
    pub key: String,
    /// Value
    pub value: String,
}

/// Status for a SubnamespaceAnchor
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SubnamespaceAnchorStatus {
    /// One of `Ok`, `Missing`, `Conflict`, `Forbidden`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::ResourceExt;

    #[test]
    fn resource_is_namespaced_hnc_anchor() {
        assert_eq!(SubnamespaceAnchor::api_version(&()), "hnc.x-k8s.io/v1alpha2");
        assert_eq!(SubnamespaceAnchor::plural(&()), "subnamespaceanchors");
        let url = SubnamespaceAnchor::url_path(&(), Some("kubecube-project-web"));
        assert_eq!(
            url,
            "/apis/hnc.x-k8s.io/v1alpha2/namespaces/kubecube-project-web/subnamespaceanchors"
        );
    }

    #[test]
    fn parses_anchor_with_unknown_status() {
        let yaml = r#"
apiVersion: hnc.x-k8s.io/v1alpha2
kind: SubnamespaceAnchor
metadata:
  name: web-dev
  namespace: kubecube-project-web
  labels:
    kubecube.io/tenant: acme
    kubecube.io/project: web
status:
  status: Ok
"#;
        let anchor: SubnamespaceAnchor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(anchor.name_any(), "web-dev");
        assert_eq!(anchor.labels().get("kubecube.io/project").unwrap(), "web");
        assert_eq!(anchor.spec, SubnamespaceAnchorSpec::default());
        assert_eq!(anchor.status.unwrap().status.as_deref(), Some("Ok"));
    }

    #[test]
    fn anchor_list_without_specs_parses() {
        let json = serde_json::json!({
            "apiVersion": "hnc.x-k8s.io/v1alpha2",
            "kind": "SubnamespaceAnchorList",
            "metadata": {},
            "items": [
                { "metadata": { "name": "web-dev", "namespace": "kubecube-project-web" } },
                {
                    "metadata": { "name": "web-qa", "namespace": "kubecube-project-web" },
                    "spec": { "labels": [{ "key": "team", "value": "qa" }] }
                }
            ]
        });
        let list: kube::core::ObjectList<SubnamespaceAnchor> =
            serde_json::from_value(json).unwrap();
        let names: Vec<_> = list.items.iter().map(|a| a.name_any()).collect();
        assert_eq!(names, ["web-dev", "web-qa"]);
        assert_eq!(list.items[1].spec.labels[0].value, "qa");
    }
}
