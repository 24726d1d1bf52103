//! Cluster-wide mining control.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use ethws_upstream::{Node, NodeSet, UpstreamError};

use crate::ClusterError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningConfig {
    /// How long a toggle waits for one already in flight before giving up
    /// with `ClusterBusy`.
    #[serde(with = "duration_secs")]
    pub toggle_wait: Duration,
    /// Deadline for each node's answer during a fan-out.
    #[serde(with = "duration_secs")]
    pub node_timeout: Duration,
    /// Miner thread count passed to `miner_start`; omitted when `None`.
    pub threads: Option<u32>,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            toggle_wait: Duration::from_secs(30),
            node_timeout: Duration::from_secs(5),
            threads: None,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Starts, stops, and polls mining on every node of the cluster.
///
/// Toggles hold a cluster-wide lock for their whole fan-out, so two
/// operators can never leave the cluster half started and half stopped.
/// Status polls take no lock.
pub struct MiningCoordinator {
    nodes: Arc<NodeSet>,
    config: MiningConfig,
    toggle_lock: Mutex<()>,
    /// Set by `drain`; later toggles are refused.
    closed: AtomicBool,
}

impl MiningCoordinator {
    pub fn new(nodes: Arc<NodeSet>, config: MiningConfig) -> Self {
        Self {
            nodes,
            config,
            toggle_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &MiningConfig {
        &self.config
    }

    /// Start or stop mining on every node.
    ///
    /// Returns one flag per configured node, in configuration order. A node
    /// that fails or misses its deadline reports `false` without affecting
    /// the others.
    pub async fn toggle_mining(&self, start: bool) -> Result<Vec<bool>, ClusterError> {
        if self.is_closed() {
            return Err(ClusterError::ShuttingDown);
        }
        let _guard = timeout(self.config.toggle_wait, self.toggle_lock.lock())
            .await
            .map_err(|_| ClusterError::ClusterBusy(self.config.toggle_wait))?;
        // drain may have started while this call was queued
        if self.is_closed() {
            return Err(ClusterError::ShuttingDown);
        }

        info!(start, nodes = self.nodes.len(), "toggling mining");
        let threads = self.config.threads;
        let results = self
            .fan_out(if start { "miner_start" } else { "miner_stop" }, move |node| async move {
                let result = if start {
                    node.start_mining(threads).await
                } else {
                    node.stop_mining().await
                };
                result.map(|()| true)
            })
            .await;

        let ok = results.iter().filter(|r| **r).count();
        if ok < results.len() {
            warn!(start, ok, total = results.len(), "mining toggle partially applied");
        }
        Ok(results)
    }

    /// Current mining flag of every node, in configuration order. A node
    /// that fails or misses its deadline reports `false`.
    pub async fn get_mining_status(&self) -> Vec<bool> {
        self.fan_out("eth_mining", |node| async move { node.is_mining().await })
            .await
    }

    /// Refuse further toggles and wait up to `grace` for the one in flight
    /// to finish. Returns whether the coordinator is idle.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.closed.store(true, Ordering::Release);
        timeout(grace, self.toggle_lock.lock()).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Run `op` on every node concurrently, each on its own task under the
    /// per-node deadline, and collect the answers in node order.
    async fn fan_out<F, Fut>(&self, what: &'static str, op: F) -> Vec<bool>
    where
        F: Fn(Node) -> Fut,
        Fut: Future<Output = Result<bool, UpstreamError>> + Send + 'static,
    {
        let deadline = self.config.node_timeout;
        let handles: Vec<_> = self
            .nodes
            .iter()
            .map(|node| {
                let index = node.index();
                let call = op(node.clone());
                tokio::spawn(async move {
                    match timeout(deadline, call).await {
                        Ok(Ok(value)) => value,
                        Ok(Err(e)) => {
                            warn!(node = index, what, error = %e, "node call failed");
                            false
                        }
                        Err(_) => {
                            warn!(node = index, what, ?deadline, "node call timed out");
                            false
                        }
                    }
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            results.push(handle.await.unwrap_or_else(|e| {
                debug!(node = index, what, error = %e, "node task did not complete");
                false
            }));
        }
        results
    }
}
