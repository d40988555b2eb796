//! Bounded-concurrency fan-out across registry entries
//!
//! One call per cluster, each under its own timeout. A failing or slow
//! cluster is captured as a [`SkippedCluster`] and never fails the whole
//! operation. Cancelling the token drops in-flight calls and returns what
//! has been collected so far.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use cube_common::{metrics, Error, Result};

use crate::registry::ClusterEntry;

/// Maximum number of clusters queried at once
pub const MAX_CONCURRENT_CLUSTERS: usize = 15;

/// Default timeout for one cluster's call
pub const DEFAULT_CLUSTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Fan-out tuning
#[derive(Clone, Debug)]
pub struct FanOutConfig {
    /// Per-cluster timeout
    pub timeout: Duration,
    /// Maximum in-flight cluster calls
    pub concurrency: usize,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CLUSTER_TIMEOUT,
            concurrency: MAX_CONCURRENT_CLUSTERS,
        }
    }
}

/// A cluster left out of a fan-out result
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkippedCluster {
    /// Cluster name
    pub cluster: String,
    /// Why it was skipped
    pub reason: String,
}

impl SkippedCluster {
    /// Create a skip record
    pub fn new(cluster: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            reason: reason.into(),
        }
    }
}

/// Collected outcome of a fan-out
#[derive(Debug)]
pub struct FanOut<T> {
    /// Successful results by cluster, in completion order
    pub results: Vec<(String, T)>,
    /// Clusters that failed or timed out
    pub skipped: Vec<SkippedCluster>,
    /// True if the token fired before every cluster answered
    pub cancelled: bool,
}

impl<T> FanOut<T> {
    /// `Cancelled` if the fan-out was cancelled before anything was collected
    pub fn usable(self) -> Result<Self> {
        if self.cancelled && self.results.is_empty() {
            return Err(Error::Cancelled);
        }
        Ok(self)
    }

    /// Results ordered by cluster name
    pub fn sorted_results(mut self) -> Vec<(String, T)> {
        self.results.sort_by(|a, b| a.0.cmp(&b.0));
        self.results
    }
}

enum Outcome<T> {
    Done(T),
    Failed(String),
}

/// Run `call` against every entry
///
/// `operation` names the caller in logs and in the skipped-cluster metric.
pub async fn fan_out<T, F, Fut>(
    operation: &'static str,
    entries: Vec<Arc<ClusterEntry>>,
    config: &FanOutConfig,
    cancel: &CancellationToken,
    call: F,
) -> FanOut<T>
where
    F: Fn(Arc<ClusterEntry>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut out = FanOut {
        results: Vec::with_capacity(entries.len()),
        skipped: Vec::new(),
        cancelled: false,
    };
    if entries.is_empty() {
        return out;
    }

    let timeout = config.timeout;
    let total = entries.len();
    let mut calls = stream::iter(entries)
        .map(|entry| {
            let name = entry.name().to_string();
            let fut = call(entry);
            async move {
                let outcome = match tokio::time::timeout(timeout, fut).await {
                    Ok(Ok(value)) => Outcome::Done(value),
                    Ok(Err(e)) => Outcome::Failed(e.to_string()),
                    Err(_) => Outcome::Failed(format!("timed out after {}s", timeout.as_secs_f64())),
                };
                (name, outcome)
            }
        })
        .buffer_unordered(config.concurrency.max(1));

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                out.cancelled = true;
                debug!(
                    operation,
                    collected = out.results.len(),
                    total,
                    "fan-out cancelled"
                );
                break;
            }
            next = calls.next() => match next {
                Some((cluster, Outcome::Done(value))) => out.results.push((cluster, value)),
                Some((cluster, Outcome::Failed(reason))) => {
                    warn!(operation, cluster = %cluster, error = %reason, "skipping cluster");
                    metrics::record_fanout_skip(operation, &cluster);
                    out.skipped.push(SkippedCluster::new(cluster, reason));
                }
                None => break,
            }
        }
    }

    out.skipped.sort_by(|a, b| a.cluster.cmp(&b.cluster));
    out
}
