//! Gateway orchestrator.
//!
//! Owns every long-lived component (node set, reader, mining coordinator,
//! subscriber hub, head watcher) and drives their lifecycle:
//! [`Gateway::start`] spawns the hub control loop and the watcher,
//! [`Gateway::stop`] stops taking new work, lets in-flight commands and
//! mining toggles finish, then closes the remaining client sockets.

use axum::Router;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use ethws_cluster::{ChainReader, MiningCoordinator};
use ethws_upstream::NodeSet;
use ethws_utils::{format_duration, unix_now_secs, StatsCounter};
use ethws_websocket::{Dispatcher, HubControlLoop, SubscriberHub};

use crate::metrics::GatewayMetrics;
use crate::shutdown::ShutdownController;
use crate::watcher::{Watcher, WatcherState};
use crate::{GatewayConfig, GatewayError};

/// Components built in `new` and consumed by `start`.
struct Pending {
    control: HubControlLoop,
    watcher: Watcher,
}

pub struct Gateway {
    config: GatewayConfig,
    nodes: Arc<NodeSet>,
    reader: Arc<ChainReader>,
    mining: Arc<MiningCoordinator>,
    hub: Arc<SubscriberHub>,
    shutdown: ShutdownController,
    metrics: GatewayMetrics,
    watcher_state: watch::Receiver<WatcherState>,
    watcher_stats: Arc<StatsCounter>,
    pending: Mutex<Option<Pending>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    /// Unix seconds at `start`; 0 while not started.
    started_at: AtomicU64,
}

/// Point-in-time summary returned by [`Gateway::status`].
#[derive(Clone, Debug, Serialize)]
pub struct GatewayStatus {
    pub node_count: usize,
    pub primary: String,
    pub watcher: WatcherState,
    pub connected_clients: u64,
    pub subscribed_clients: u64,
    pub uptime_secs: u64,
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} node(s), primary {}, watcher {}, {} client(s) ({} subscribed), up {}",
            self.node_count,
            self.primary,
            self.watcher,
            self.connected_clients,
            self.subscribed_clients,
            format_duration(self.uptime_secs)
        )
    }
}

impl Gateway {
    /// Validate `config` and build clients for the configured nodes.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        config.validate()?;
        let nodes = NodeSet::connect(&config.endpoints()?, &config.upstream_timeouts())?;
        Self::with_node_set(config, Arc::new(nodes))
    }

    /// Build the gateway over an existing node set. The node layout in
    /// `config` is not consulted.
    pub fn with_node_set(config: GatewayConfig, nodes: Arc<NodeSet>) -> Result<Self, GatewayError> {
        let reader = Arc::new(ChainReader::new(nodes.clone(), config.reader_config()));
        let mining = Arc::new(MiningCoordinator::new(nodes.clone(), config.mining_config()));
        let (hub, control) = SubscriberHub::new(
            config.hub_config(),
            Dispatcher::new(reader.clone(), mining.clone()),
        );
        let watcher = Watcher::new(
            nodes.clone(),
            reader.clone(),
            hub.clone(),
            config.resubscribe_backoff(),
        );
        let watcher_state = watcher.state();
        let watcher_stats = watcher.stats().clone();
        let metrics = GatewayMetrics::new()?;

        Ok(Self {
            config,
            nodes,
            reader,
            mining,
            hub,
            shutdown: ShutdownController::new(),
            metrics,
            watcher_state,
            watcher_stats,
            pending: Mutex::new(Some(Pending { control, watcher })),
            task_handles: Mutex::new(Vec::new()),
            started_at: AtomicU64::new(0),
        })
    }

    /// Spawn the hub control loop and the head watcher.
    pub async fn start(&self) -> Result<(), GatewayError> {
        let Pending { control, watcher } = self
            .pending
            .lock()
            .await
            .take()
            .ok_or(GatewayError::AlreadyStarted)?;

        tracing::info!(
            nodes = self.nodes.len(),
            primary = %self.nodes.primary().endpoint(),
            failover = ?self.config.failover,
            "gateway starting"
        );

        let mut handles = self.task_handles.lock().await;
        handles.push(tokio::spawn(control.run()));
        handles.push(tokio::spawn(watcher.run(self.shutdown.subscribe())));
        self.started_at.store(unix_now_secs(), Ordering::Release);
        Ok(())
    }

    /// Stop the gateway.
    ///
    /// New connections, commands and mining toggles are refused first. Work
    /// already in flight gets up to the configured grace period to finish,
    /// then every client socket is closed and the background tasks joined.
    pub async fn stop(&self) -> Result<(), GatewayError> {
        tracing::info!("gateway stopping");
        self.shutdown.shutdown();
        self.hub.close_intake();

        let grace = self.config.shutdown_grace();
        let (mining_idle, handlers_done) =
            tokio::join!(self.mining.drain(grace), self.hub.drain(grace));
        if !mining_idle {
            tracing::warn!(
                grace_ms = grace.as_millis() as u64,
                "mining toggle still in flight at shutdown"
            );
        }
        if !handlers_done {
            tracing::warn!(
                grace_ms = grace.as_millis() as u64,
                "command handlers still running at shutdown"
            );
        }

        self.hub.shutdown();

        let handles: Vec<JoinHandle<()>> = self.task_handles.lock().await.drain(..).collect();
        let wait_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(grace, wait_all).await.is_err() {
            tracing::warn!(
                "shutdown timeout ({:?}), some tasks may still be running",
                grace
            );
            return Err(GatewayError::ShutdownTimeout);
        }

        tracing::info!(
            streamed = self.watcher_stats.get(crate::watcher::BLOCKS_STREAMED),
            accepted = self.hub.stats().accepted(),
            "gateway stopped"
        );
        Ok(())
    }

    pub fn status(&self) -> GatewayStatus {
        let started_at = self.started_at.load(Ordering::Acquire);
        let uptime_secs = if started_at == 0 {
            0
        } else {
            unix_now_secs().saturating_sub(started_at)
        };
        let stats = self.hub.stats();
        GatewayStatus {
            node_count: self.nodes.len(),
            primary: self.nodes.primary().endpoint().url(),
            watcher: *self.watcher_state.borrow(),
            connected_clients: stats.connected(),
            subscribed_clients: stats.subscribed(),
            uptime_secs,
        }
    }

    /// The `/ws` route, ready to merge into the daemon's router.
    pub fn router(&self) -> Router {
        ethws_websocket::router(self.hub.clone())
    }

    /// Refresh and encode the Prometheus registry.
    pub fn metrics_text(&self) -> Result<String, GatewayError> {
        self.metrics.refresh(
            self.hub.stats(),
            &self.watcher_stats,
            *self.watcher_state.borrow(),
            self.nodes.len(),
        );
        self.metrics.encode()
    }

    /// Resolves once the watcher reaches `state`, or after `wait`.
    pub async fn wait_for_watcher(&self, state: WatcherState, wait: Duration) -> bool {
        let mut rx = self.watcher_state.clone();
        tokio::time::timeout(wait, rx.wait_for(|current| *current == state))
            .await
            .map(|res| res.is_ok())
            .unwrap_or(false)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn nodes(&self) -> &Arc<NodeSet> {
        &self.nodes
    }

    pub fn reader(&self) -> &Arc<ChainReader> {
        &self.reader
    }

    pub fn mining(&self) -> &Arc<MiningCoordinator> {
        &self.mining
    }

    pub fn hub(&self) -> &Arc<SubscriberHub> {
        &self.hub
    }

    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }
}
