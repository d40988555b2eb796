//! Namespace and subnamespace searches across the fleet

use kube::ResourceExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use cube_common::labels::{equality_selector, validate_dns_label, PROJECT_LABEL, TENANT_LABEL};
use cube_common::Result;

use super::{Aggregator, Listing};
use crate::fanout::fan_out;

/// A subnamespace found in some cluster
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubnamespaceRecord {
    /// Subnamespace name (the anchor's name)
    pub namespace: String,
    /// Cluster it was found in
    pub cluster: String,
    /// Owning project
    pub project: String,
}

impl Aggregator {
    /// Clusters where `namespace` lives
    ///
    /// A cluster matches if it has the namespace, or a SubnamespaceAnchor of
    /// that name. Without a namespace, every registered cluster name.
    #[instrument(skip(self, cancel))]
    pub async fn clusters_for_namespace(
        &self,
        namespace: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Listing<String>> {
        let Some(namespace) = namespace else {
            return Ok(Listing::new(self.registry.names(), Vec::new()));
        };
        validate_dns_label("namespace", namespace)?;

        let out = fan_out(
            "clusters_for_namespace",
            self.registry.snapshot(),
            &self.config,
            cancel,
            |entry| async move {
                if entry.client.get_namespace(namespace).await?.is_some() {
                    return Ok(true);
                }
                let anchors = entry.client.list_subnamespace_anchors(None).await?;
                Ok(anchors.iter().any(|a| a.name_any() == namespace))
            },
        )
        .await
        .usable()?;

        let skipped = out.skipped.clone();
        let names = out
            .sorted_results()
            .into_iter()
            .filter_map(|(cluster, found)| found.then_some(cluster))
            .collect();
        Ok(Listing::new(names, skipped))
    }

    /// SubnamespaceAnchors owned by a project, across every cluster
    ///
    /// With a tenant, only anchors labelled with that tenant. Anchors without
    /// a project label or being deleted are left out. The result is the
    /// union over clusters, ordered by cluster.
    #[instrument(skip(self, cancel))]
    pub async fn subnamespaces(
        &self,
        tenant: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Listing<SubnamespaceRecord>> {
        let selector = tenant
            .map(|t| equality_selector(TENANT_LABEL, t))
            .transpose()?;

        let out = fan_out(
            "subnamespaces",
            self.registry.snapshot(),
            &self.config,
            cancel,
            |entry| {
                let selector = selector.clone();
                async move {
                    let anchors = entry.client.list_subnamespace_anchors(selector).await?;
                    let records: Vec<SubnamespaceRecord> = anchors
                        .iter()
                        .filter(|a| a.metadata.deletion_timestamp.is_none())
                        .filter_map(|a| {
                            a.labels().get(PROJECT_LABEL).map(|project| SubnamespaceRecord {
                                namespace: a.name_any(),
                                cluster: entry.name().to_string(),
                                project: project.clone(),
                            })
                        })
                        .collect();
                    Ok(records)
                }
            },
        )
        .await
        .usable()?;

        let skipped = out.skipped.clone();
        let items = out
            .sorted_results()
            .into_iter()
            .flat_map(|(_, records)| records)
            .collect();
        Ok(Listing::new(items, skipped))
    }
}
