//! Namespace change to User reconcile request mapping
//!
//! When a tenant or project namespace changes, every User that belongs to
//! that tenant or project may need its status recomputed.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use futures::{stream, Stream, StreamExt};
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Resource, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, warn};

use cube_common::crd::User;
use cube_common::labels::{non_empty, HNC_PROJECT_LABEL, HNC_TENANT_LABEL};
use cube_common::{metrics, Result};

/// A change observed on a watched object
#[derive(Clone, Debug, PartialEq)]
pub enum ChangeEvent<K> {
    /// First sighting of the object
    Create(K),
    /// The object changed
    Update {
        /// Previous version
        old: K,
        /// Current version
        new: K,
    },
    /// The object is gone
    Delete(K),
    /// Resync or external trigger
    Generic(K),
}

/// Tenant and project labels, both non-empty
pub fn tenant_and_project(labels: Option<&BTreeMap<String, String>>) -> Option<(&str, &str)> {
    Some((
        non_empty(labels, HNC_TENANT_LABEL)?,
        non_empty(labels, HNC_PROJECT_LABEL)?,
    ))
}

/// Labels the admission decision is made on, if the event kind qualifies
fn judged_labels<K: Resource>(event: &ChangeEvent<K>) -> Option<&BTreeMap<String, String>> {
    match event {
        ChangeEvent::Create(obj) => obj.meta().labels.as_ref(),
        ChangeEvent::Update { new, .. } => new.meta().labels.as_ref(),
        ChangeEvent::Delete(_) | ChangeEvent::Generic(_) => None,
    }
}

/// True if the event should be mapped to User reconciles
///
/// Creates and updates qualify when the (new) object carries both a tenant
/// and a project label. Deletes and generic events never do.
pub fn is_eligible<K: Resource>(event: &ChangeEvent<K>) -> bool {
    tenant_and_project(judged_labels(event)).is_some()
}

/// Names of users belonging to `tenant` or to `project`, each once
pub fn related_users<'a>(
    users: impl IntoIterator<Item = &'a User>,
    tenant: &str,
    project: &str,
) -> BTreeSet<String> {
    users
        .into_iter()
        .filter(|u| {
            u.status
                .as_ref()
                .is_some_and(|s| s.belongs_to_tenant(tenant) || s.belongs_to_project(project))
        })
        .map(|u| u.name_any())
        .collect()
}

/// Source of the current User set
#[cfg_attr(test, automock)]
pub trait UserLister: Send + Sync {
    /// All users, as currently known
    fn list_users(&self) -> Result<Vec<Arc<User>>>;
}

impl UserLister for Store<User> {
    fn list_users(&self) -> Result<Vec<Arc<User>>> {
        Ok(self.state())
    }
}

/// Maps namespace changes to reconcile requests for related users
#[derive(Clone)]
pub struct NamespaceMapper {
    users: Arc<dyn UserLister>,
}

impl NamespaceMapper {
    /// Create a mapper reading users from `users`
    pub fn new(users: Arc<dyn UserLister>) -> Self {
        Self { users }
    }

    /// Reconcile requests for one event, in no particular order
    ///
    /// Users are listed afresh on every call. A listing failure is logged and
    /// produces no requests; the periodic resync picks up the slack.
    pub fn map(&self, event: &ChangeEvent<Namespace>) -> Vec<ObjectRef<User>> {
        let Some((tenant, project)) = tenant_and_project(judged_labels(event)) else {
            return Vec::new();
        };

        let users = match self.users.list_users() {
            Ok(users) => users,
            Err(e) => {
                warn!(tenant, project, error = %e, "failed to list users for namespace change");
                return Vec::new();
            }
        };

        let names = related_users(users.iter().map(Arc::as_ref), tenant, project);
        debug!(tenant, project, users = names.len(), "mapped namespace change to users");
        metrics::record_mapper_requests(names.len());
        names.iter().map(|n| ObjectRef::new(n)).collect()
    }
}

/// Turns raw watcher events into create/update/delete changes
///
/// Remembers the last version of each namespace so an update carries its
/// predecessor. A relist that no longer contains a namespace yields a delete.
#[derive(Default)]
pub struct NamespaceTracker {
    seen: HashMap<String, Namespace>,
    relisted: Option<HashSet<String>>,
}

impl NamespaceTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert(&mut self, ns: Namespace) -> ChangeEvent<Namespace> {
        let name = ns.name_any();
        match self.seen.insert(name, ns.clone()) {
            Some(old) => ChangeEvent::Update { old, new: ns },
            None => ChangeEvent::Create(ns),
        }
    }

    /// Classify one watcher event
    pub fn observe(&mut self, event: watcher::Event<Namespace>) -> Vec<ChangeEvent<Namespace>> {
        match event {
            watcher::Event::Apply(ns) => vec![self.upsert(ns)],
            watcher::Event::Delete(ns) => {
                self.seen.remove(&ns.name_any());
                vec![ChangeEvent::Delete(ns)]
            }
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(ns) => {
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(ns.name_any());
                }
                vec![self.upsert(ns)]
            }
            watcher::Event::InitDone => {
                let Some(relisted) = self.relisted.take() else {
                    return Vec::new();
                };
                let gone: Vec<String> = self
                    .seen
                    .keys()
                    .filter(|name| !relisted.contains(*name))
                    .cloned()
                    .collect();
                gone.into_iter()
                    .filter_map(|name| self.seen.remove(&name))
                    .map(ChangeEvent::Delete)
                    .collect()
            }
        }
    }
}

/// Stream of namespace changes from a watch on `api`
///
/// Watch errors are logged; the watcher backs off and recovers by itself.
pub fn namespace_changes(
    api: Api<Namespace>,
    config: watcher::Config,
) -> impl Stream<Item = ChangeEvent<Namespace>> + Send {
    let mut tracker = NamespaceTracker::new();
    watcher::watcher(api, config)
        .default_backoff()
        .filter_map(|event| async move {
            match event {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "namespace watch error");
                    None
                }
            }
        })
        .map(move |event| stream::iter(tracker.observe(event)))
        .flatten()
}
