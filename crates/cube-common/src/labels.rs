//! Well-known label keys and label value validation

use std::collections::BTreeMap;

use crate::{Error, Result};

/// Tenant label carried by SubnamespaceAnchors and tenant namespaces
pub const TENANT_LABEL: &str = "kubecube.io/tenant";

/// Project label carried by SubnamespaceAnchors and project namespaces
pub const PROJECT_LABEL: &str = "kubecube.io/project";

/// Tenant label propagated by the hierarchical namespace controller
pub const HNC_TENANT_LABEL: &str = "kubecube.hnc.x-k8s.io/tenant";

/// Project label propagated by the hierarchical namespace controller
pub const HNC_PROJECT_LABEL: &str = "kubecube.hnc.x-k8s.io/project";

/// Extended resource name for NVIDIA accelerators
pub const NVIDIA_GPU_RESOURCE: &str = "nvidia.com/gpu";

/// Maximum length of a label value
pub const MAX_LABEL_VALUE_LEN: usize = 63;

/// Validate a Kubernetes label value
///
/// Empty is valid. Otherwise at most 63 characters, alphanumeric at both
/// ends, with `-`, `_` and `.` allowed in between.
pub fn validate_label_value(value: &str) -> Result<()> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > MAX_LABEL_VALUE_LEN {
        return Err(Error::invalid_input(format!(
            "label value '{}' exceeds {} characters",
            value, MAX_LABEL_VALUE_LEN
        )));
    }

    let bytes = value.as_bytes();
    let edges_ok = bytes[0].is_ascii_alphanumeric() && bytes[bytes.len() - 1].is_ascii_alphanumeric();
    let body_ok = bytes
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));

    if !edges_ok || !body_ok {
        return Err(Error::invalid_input(format!(
            "label value '{}' must consist of alphanumeric characters, '-', '_' or '.', \
             and must start and end with an alphanumeric character",
            value
        )));
    }
    Ok(())
}

/// Validate an RFC 1123 label: the shape of cluster and namespace names
pub fn validate_dns_label(field: &str, value: &str) -> Result<()> {
    let bytes = value.as_bytes();
    let valid = !bytes.is_empty()
        && bytes.len() <= MAX_LABEL_VALUE_LEN
        && bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-');

    if !valid {
        return Err(Error::invalid_field(
            field,
            format!(
                "{} '{}' must be 1-63 lowercase alphanumeric characters or '-', \
                 starting and ending with an alphanumeric character",
                field, value
            ),
        ));
    }
    Ok(())
}

/// Build an equality selector `key=value` after validating the value
pub fn equality_selector(key: &str, value: &str) -> Result<String> {
    validate_label_value(value)?;
    Ok(format!("{}={}", key, value))
}

/// Non-empty value of `key` in an optional label map
pub fn non_empty<'a>(labels: Option<&'a BTreeMap<String, String>>, key: &str) -> Option<&'a str> {
    labels
        .and_then(|l| l.get(key))
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_values() {
        for v in ["acme", "a", "web-1", "team_a.prod", "0abc9", ""] {
            assert!(validate_label_value(v).is_ok(), "{v} should be valid");
        }
    }

    #[test]
    fn rejects_bad_edges_and_chars() {
        for v in ["-acme", "acme-", "ac me", "a/b", "tenant=x", ".a"] {
            assert!(validate_label_value(v).is_err(), "{v} should be invalid");
        }
    }

    #[test]
    fn rejects_overlong_value() {
        let v = "a".repeat(MAX_LABEL_VALUE_LEN + 1);
        assert!(matches!(
            validate_label_value(&v),
            Err(Error::InvalidInput { .. })
        ));
        assert!(validate_label_value(&"a".repeat(MAX_LABEL_VALUE_LEN)).is_ok());
    }

    #[test]
    fn dns_labels() {
        assert!(validate_dns_label("clusterName", "member-1").is_ok());
        for v in ["", "Member", "-a", "a-", "a_b", "a.b"] {
            assert!(validate_dns_label("clusterName", v).is_err(), "{v} should be invalid");
        }
        match validate_dns_label("namespace", "Bad") {
            Err(Error::InvalidInput { field, .. }) => assert_eq!(field.as_deref(), Some("namespace")),
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn selector_is_key_equals_value() {
        assert_eq!(
            equality_selector(TENANT_LABEL, "acme").unwrap(),
            "kubecube.io/tenant=acme"
        );
        assert!(equality_selector(TENANT_LABEL, "acme,x=y").is_err());
    }

    #[test]
    fn non_empty_skips_blank_values() {
        let mut labels = BTreeMap::new();
        labels.insert(HNC_TENANT_LABEL.to_string(), "acme".to_string());
        labels.insert(HNC_PROJECT_LABEL.to_string(), String::new());

        assert_eq!(non_empty(Some(&labels), HNC_TENANT_LABEL), Some("acme"));
        assert_eq!(non_empty(Some(&labels), HNC_PROJECT_LABEL), None);
        assert_eq!(non_empty(None, HNC_TENANT_LABEL), None);
    }
}
