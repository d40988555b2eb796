//! Keeps the Cluster Registry in step with Cluster descriptors on the pivot
//!
//! The pivot store is the source of truth for fleet membership. A watch on
//! `Cluster` objects drives registry mutations: new descriptors get a client
//! and an entry, credential or endpoint changes swap the client, status
//! changes refresh the descriptor, and deletions drop the entry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cube_common::crd::Cluster;
use cube_common::{Error, Result};

use crate::client::{ClusterClient, KubeClusterClient};
use crate::registry::{ClusterDescriptor, ClusterRegistry};

/// Watch timeout, kept under the client read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Builds a client for a Cluster descriptor
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Connect to the cluster a descriptor points at
    async fn connect(&self, cluster: &Cluster) -> Result<Arc<dyn ClusterClient>>;
}

/// Connects the pivot through the local client, members through their
/// stored kubeconfig
pub struct KubeClientFactory {
    local: Client,
    pivot_cluster: String,
}

impl KubeClientFactory {
    /// Create a factory; `local` talks to the cluster this process runs in
    pub fn new(local: Client, pivot_cluster: impl Into<String>) -> Self {
        Self {
            local,
            pivot_cluster: pivot_cluster.into(),
        }
    }
}

#[async_trait]
impl ClientFactory for KubeClientFactory {
    async fn connect(&self, cluster: &Cluster) -> Result<Arc<dyn ClusterClient>> {
        let name = cluster.name_any();
        if name == self.pivot_cluster || cluster.is_pivot() {
            return Ok(Arc::new(KubeClusterClient::new(self.local.clone())));
        }

        let yaml = cluster
            .spec
            .decoded_kubeconfig()?
            .ok_or_else(|| Error::invalid_field("kubeconfig", format!("cluster {} has no kubeconfig", name)))?;
        Ok(Arc::new(KubeClusterClient::from_kubeconfig_yaml(&yaml).await?))
    }
}

/// What a client was built from; a change means a new client is needed
#[derive(Clone, Debug, PartialEq, Eq)]
struct ConnectionKey {
    kubeconfig: Option<String>,
    endpoint: String,
}

impl From<&Cluster> for ConnectionKey {
    fn from(cluster: &Cluster) -> Self {
        Self {
            kubeconfig: cluster.spec.kubeconfig.clone(),
            endpoint: cluster.spec.kubernetes_api_endpoint.clone(),
        }
    }
}

/// Applies Cluster watch events to a registry
pub struct ClusterSync {
    registry: ClusterRegistry,
    factory: Arc<dyn ClientFactory>,
    connections: HashMap<String, ConnectionKey>,
    relisted: Option<HashSet<String>>,
}

impl ClusterSync {
    /// Create a sync loop feeding `registry`
    pub fn new(registry: ClusterRegistry, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            registry,
            factory,
            connections: HashMap::new(),
            relisted: None,
        }
    }

    /// Apply one watch event
    pub async fn handle(&mut self, event: Event<Cluster>) {
        match event {
            Event::Apply(cluster) => self.apply(&cluster).await,
            Event::Delete(cluster) => self.delete(&cluster.name_any()),
            Event::Init => self.relisted = Some(HashSet::new()),
            Event::InitApply(cluster) => {
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(cluster.name_any());
                }
                self.apply(&cluster).await;
            }
            Event::InitDone => self.prune(),
        }
    }

    async fn apply(&mut self, cluster: &Cluster) {
        let name = cluster.name_any();
        let descriptor = ClusterDescriptor::from(cluster);
        let key = ConnectionKey::from(cluster);

        if self.registry.contains(&name) && self.connections.get(&name) == Some(&key) {
            debug!(cluster = %name, state = %descriptor.status, "refreshing cluster descriptor");
            if let Err(e) = self.registry.update_descriptor(descriptor) {
                warn!(cluster = %name, error = %e, "failed to refresh cluster descriptor");
            }
            return;
        }

        let client = match self.factory.connect(cluster).await {
            Ok(client) => client,
            Err(e) => {
                warn!(cluster = %name, error = %e, "cannot build cluster client, cluster not queryable");
                // a stale client must not outlive its credentials
                self.delete(&name);
                return;
            }
        };

        let result = if self.registry.contains(&name) {
            info!(cluster = %name, "cluster connection changed, replacing client");
            self.registry.replace(descriptor, client)
        } else {
            self.registry.add(descriptor, client)
        };
        match result {
            Ok(()) => {
                self.connections.insert(name, key);
            }
            Err(e) => warn!(cluster = %name, error = %e, "failed to register cluster client"),
        }
    }

    fn delete(&mut self, name: &str) {
        self.connections.remove(name);
        if self.registry.remove(name) {
            debug!(cluster = %name, "cluster removed from registry");
        }
    }

    /// Drop entries that a completed relist no longer contains
    fn prune(&mut self) {
        let Some(relisted) = self.relisted.take() else {
            return;
        };
        let gone: Vec<String> = self
            .connections
            .keys()
            .filter(|name| !relisted.contains(*name))
            .cloned()
            .collect();
        for name in gone {
            info!(cluster = %name, "cluster vanished during relist");
            self.delete(&name);
        }
    }

    /// Watch Cluster descriptors until `shutdown` fires
    pub async fn run(mut self, api: Api<Cluster>, shutdown: CancellationToken) {
        let config = watcher::Config::default().timeout(WATCH_TIMEOUT_SECS);
        let mut stream = watcher::watcher(api, config).default_backoff().boxed();

        info!("Starting cluster registry sync");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(event)) => self.handle(event).await,
                    Some(Err(e)) => warn!(error = %e, "cluster watch error"),
                    None => break,
                },
            }
        }
        info!("Cluster registry sync stopped");
    }
}
