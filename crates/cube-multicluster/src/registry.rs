//! Cluster Registry - the process-wide table of fleet members
//!
//! Maps cluster name to its descriptor and a live client. A name present in
//! the registry has a queryable client; absence means "not a fleet member".
//!
//! All mutations take a single write lock, and entries are swapped whole as
//! `Arc`s, so lookups and snapshots never see a half-updated entry. Readers
//! clone what they need and drop the lock before any network I/O.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use parking_lot::RwLock;
use tracing::{debug, info};

use cube_common::crd::{Cluster, ClusterState};
use cube_common::{metrics, Error, Result};

use crate::client::ClusterClient;

/// Registry-side metadata for one cluster
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterDescriptor {
    /// Unique cluster name
    pub name: String,
    /// False for the pivot cluster
    pub is_member_cluster: bool,
    /// CNI in use
    pub network_type: String,
    /// Image registry address
    pub harbor_addr: String,
    /// Free-form description
    pub description: String,
    /// API server address
    pub api_endpoint: String,
    /// When the descriptor was created in the pivot store
    pub create_time: Option<DateTime<Utc>>,
    /// Lifecycle state
    pub status: ClusterState,
}

impl ClusterDescriptor {
    /// True if this is the pivot cluster
    pub fn is_pivot(&self) -> bool {
        !self.is_member_cluster
    }
}

impl From<&Cluster> for ClusterDescriptor {
    fn from(cluster: &Cluster) -> Self {
        Self {
            name: cluster.name_any(),
            is_member_cluster: cluster.spec.is_member_cluster,
            network_type: cluster.spec.network_type.clone(),
            harbor_addr: cluster.spec.harbor_addr.clone(),
            description: cluster.spec.description.clone(),
            api_endpoint: cluster.spec.kubernetes_api_endpoint.clone(),
            create_time: cluster.metadata.creation_timestamp.as_ref().map(|t| t.0),
            status: cluster.state(),
        }
    }
}

/// A registry entry: descriptor plus the client bound to it
pub struct ClusterEntry {
    /// Cluster metadata
    pub descriptor: ClusterDescriptor,
    /// Live client for this cluster
    pub client: Arc<dyn ClusterClient>,
}

impl ClusterEntry {
    /// Create a new entry
    pub fn new(descriptor: ClusterDescriptor, client: Arc<dyn ClusterClient>) -> Self {
        Self { descriptor, client }
    }

    /// Cluster name
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

impl fmt::Debug for ClusterEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterEntry")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Thread-safe registry of fleet members
///
/// Cloning is cheap and yields a handle to the same table.
#[derive(Clone, Default)]
pub struct ClusterRegistry {
    entries: Arc<RwLock<BTreeMap<String, Arc<ClusterEntry>>>>,
}

impl ClusterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Client for `name`, or `NotFound`
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn ClusterClient>> {
        self.entries
            .read()
            .get(name)
            .map(|entry| entry.client.clone())
            .ok_or_else(|| Error::not_found("cluster", name))
    }

    /// Full entry for `name`, if present
    pub fn entry(&self, name: &str) -> Option<Arc<ClusterEntry>> {
        self.entries.read().get(name).cloned()
    }

    /// True if `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Insert a new cluster
    ///
    /// Fails with `AlreadyExists` if the name is taken and with
    /// `InvalidInput` if this would register a second pivot.
    pub fn add(&self, descriptor: ClusterDescriptor, client: Arc<dyn ClusterClient>) -> Result<()> {
        let name = descriptor.name.clone();
        let len = {
            let mut entries = self.entries.write();
            if entries.contains_key(&name) {
                return Err(Error::already_exists("cluster", name));
            }
            check_single_pivot(&entries, &descriptor)?;
            entries.insert(name.clone(), Arc::new(ClusterEntry::new(descriptor, client)));
            entries.len()
        };

        metrics::record_registry_size(len);
        info!(cluster = %name, clusters = len, "cluster added to registry");
        Ok(())
    }

    /// Remove a cluster; absent names are ignored
    ///
    /// Returns true if an entry was removed. Operations already holding the
    /// old client finish against it.
    pub fn remove(&self, name: &str) -> bool {
        let (removed, len) = {
            let mut entries = self.entries.write();
            let removed = entries.remove(name).is_some();
            (removed, entries.len())
        };

        if removed {
            metrics::record_registry_size(len);
            info!(cluster = %name, clusters = len, "cluster removed from registry");
        } else {
            debug!(cluster = %name, "remove of unknown cluster ignored");
        }
        removed
    }

    /// Swap the client (and descriptor) of an existing cluster
    ///
    /// This is how a stale client is retired after a reconnect or
    /// credential rotation. `NotFound` if the name is absent.
    pub fn replace(
        &self,
        descriptor: ClusterDescriptor,
        client: Arc<dyn ClusterClient>,
    ) -> Result<()> {
        let name = descriptor.name.clone();
        {
            let mut entries = self.entries.write();
            if !entries.contains_key(&name) {
                return Err(Error::not_found("cluster", name));
            }
            check_single_pivot(&entries, &descriptor)?;
            entries.insert(name.clone(), Arc::new(ClusterEntry::new(descriptor, client)));
        }

        info!(cluster = %name, "cluster client replaced");
        Ok(())
    }

    /// Refresh metadata of an existing cluster without touching its client
    pub fn update_descriptor(&self, descriptor: ClusterDescriptor) -> Result<()> {
        let mut entries = self.entries.write();
        let client = match entries.get(&descriptor.name) {
            Some(existing) if existing.descriptor == descriptor => return Ok(()),
            Some(existing) => existing.client.clone(),
            None => return Err(Error::not_found("cluster", descriptor.name)),
        };
        check_single_pivot(&entries, &descriptor)?;

        debug!(cluster = %descriptor.name, status = %descriptor.status, "cluster descriptor updated");
        entries.insert(
            descriptor.name.clone(),
            Arc::new(ClusterEntry::new(descriptor, client)),
        );
        Ok(())
    }

    /// Point-in-time copy of all entries, ordered by name
    pub fn snapshot(&self) -> Vec<Arc<ClusterEntry>> {
        self.entries.read().values().cloned().collect()
    }

    /// Sorted names of all registered clusters
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// The pivot entry, if registered
    pub fn pivot(&self) -> Option<Arc<ClusterEntry>> {
        self.entries
            .read()
            .values()
            .find(|entry| entry.descriptor.is_pivot())
            .cloned()
    }

    /// Number of registered clusters
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if no clusters are registered
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn check_single_pivot(
    entries: &BTreeMap<String, Arc<ClusterEntry>>,
    descriptor: &ClusterDescriptor,
) -> Result<()> {
    if !descriptor.is_pivot() {
        return Ok(());
    }
    let other_pivot = entries
        .values()
        .find(|e| e.descriptor.is_pivot() && e.descriptor.name != descriptor.name);
    match other_pivot {
        Some(existing) => Err(Error::invalid_input(format!(
            "cluster {} cannot be the pivot: {} is already registered as pivot",
            descriptor.name, existing.descriptor.name
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterClient;

    fn descriptor(name: &str, member: bool) -> ClusterDescriptor {
        ClusterDescriptor {
            name: name.to_string(),
            is_member_cluster: member,
            network_type: "calico".to_string(),
            harbor_addr: String::new(),
            description: String::new(),
            api_endpoint: format!("https://{name}:6443"),
            create_time: None,
            status: ClusterState::Normal,
        }
    }

    fn client() -> Arc<dyn ClusterClient> {
        Arc::new(MockClusterClient::new())
    }

    fn registry_with(names: &[&str]) -> ClusterRegistry {
        let registry = ClusterRegistry::new();
        for name in names {
            registry.add(descriptor(name, true), client()).unwrap();
        }
        registry
    }

    #[test]
    fn lookup_missing_is_not_found() {
        let registry = ClusterRegistry::new();
        let err = registry.lookup("nope").err().unwrap();
        assert!(err.is_not_found());
        assert_eq!(err.cluster(), Some("nope"));
    }

    #[test]
    fn add_then_lookup() {
        let registry = registry_with(&["member-1"]);
        assert!(registry.lookup("member-1").is_ok());
        assert!(registry.contains("member-1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_add_is_already_exists() {
        let registry = registry_with(&["member-1"]);
        let err = registry.add(descriptor("member-1", true), client()).unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn second_pivot_is_rejected() {
        let registry = ClusterRegistry::new();
        registry.add(descriptor("pivot-cluster", false), client()).unwrap();

        let err = registry.add(descriptor("other-pivot", false), client()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
        assert!(!registry.contains("other-pivot"));
        assert_eq!(registry.pivot().unwrap().name(), "pivot-cluster");
    }

    #[test]
    fn remove_absent_is_noop() {
        let registry = registry_with(&["member-1"]);
        assert!(!registry.remove("ghost"));
        assert!(registry.remove("member-1"));
        assert!(!registry.remove("member-1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_ordered_by_name() {
        let registry = registry_with(&["c", "a", "b"]);
        let names: Vec<_> = registry
            .snapshot()
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(registry.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn snapshot_does_not_see_later_mutations() {
        let registry = registry_with(&["a", "b"]);
        let snapshot = registry.snapshot();

        registry.remove("a");
        registry.add(descriptor("z", true), client()).unwrap();

        let names: Vec<_> = snapshot.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn replace_swaps_client() {
        let registry = registry_with(&["member-1"]);
        let before = registry.lookup("member-1").unwrap();

        registry.replace(descriptor("member-1", true), client()).unwrap();
        let after = registry.lookup("member-1").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn replace_unknown_is_not_found() {
        let registry = ClusterRegistry::new();
        let err = registry.replace(descriptor("ghost", true), client()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn update_descriptor_keeps_client() {
        let registry = registry_with(&["member-1"]);
        let before = registry.lookup("member-1").unwrap();

        let mut updated = descriptor("member-1", true);
        updated.status = ClusterState::Abnormal;
        registry.update_descriptor(updated).unwrap();

        let entry = registry.entry("member-1").unwrap();
        assert_eq!(entry.descriptor.status, ClusterState::Abnormal);
        assert!(Arc::ptr_eq(&before, &entry.client));
    }

    #[test]
    fn descriptor_from_cluster() {
        use cube_common::crd::{ClusterSpec, ClusterStatus};

        let mut cluster = Cluster::new(
            "member-1",
            ClusterSpec {
                kubernetes_api_endpoint: "https://10.0.0.2:6443".to_string(),
                network_type: "flannel".to_string(),
                is_member_cluster: true,
                ..Default::default()
            },
        );
        cluster.status = Some(ClusterStatus {
            state: ClusterState::Normal,
            ..Default::default()
        });

        let d = ClusterDescriptor::from(&cluster);
        assert_eq!(d.name, "member-1");
        assert_eq!(d.api_endpoint, "https://10.0.0.2:6443");
        assert_eq!(d.network_type, "flannel");
        assert!(!d.is_pivot());
        assert_eq!(d.status, ClusterState::Normal);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_add_remove_snapshot_stay_consistent() {
        let registry = ClusterRegistry::new();
        let mut handles = Vec::new();

        for i in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                for j in 0..50 {
                    let name = format!("c-{i}-{j}");
                    registry.add(descriptor(&name, true), client()).unwrap();
                    if j % 2 == 0 {
                        registry.remove(&name);
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        let reader = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    let snapshot = registry.snapshot();
                    for entry in &snapshot {
                        assert_eq!(entry.name(), entry.descriptor.name);
                        assert_eq!(
                            entry.descriptor.api_endpoint,
                            format!("https://{}:6443", entry.name())
                        );
                        // names are never re-added, so a live entry keeps its client
                        if let Some(live) = registry.entry(entry.name()) {
                            assert!(Arc::ptr_eq(&live.client, &entry.client));
                            assert_eq!(live.descriptor.name, entry.descriptor.name);
                        }
                        assert!(registry.lookup(entry.name()).map_or(true, |c| {
                            Arc::ptr_eq(&c, &entry.client)
                        }));
                    }
                    let names: Vec<_> = snapshot.iter().map(|e| e.name().to_string()).collect();
                    let mut sorted = names.clone();
                    sorted.sort();
                    sorted.dedup();
                    assert_eq!(names, sorted);
                    tokio::task::yield_now().await;
                }
            })
        };

        for h in handles {
            h.await.unwrap();
        }
        reader.await.unwrap();

        // odd indices survive
        assert_eq!(registry.len(), 8 * 25);
        assert!(registry.names().iter().all(|n| {
            let j: u32 = n.rsplit('-').next().unwrap().parse().unwrap();
            j % 2 == 1
        }));
    }
}
