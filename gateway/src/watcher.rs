//! Primary-node head watcher.
//!
//! Keeps a `newHeads` subscription open on the primary node. Every head is
//! resolved into a full block through the [`ChainReader`] and broadcast to
//! the hub's subscribers. When the subscription fails or ends, the watcher
//! waits out a capped exponential backoff and subscribes again, for as long
//! as the gateway runs.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use ethws_cluster::ChainReader;
use ethws_upstream::{HeadNotification, NodeSet};
use ethws_utils::{ExponentialBackoff, StatsCounter};
use ethws_websocket::SubscriberHub;

pub const RECONNECTS: &str = "watcher_reconnects";
pub const HEADS_RECEIVED: &str = "heads_received";
pub const BLOCKS_STREAMED: &str = "blocks_streamed";
pub const RESOLVE_FAILURES: &str = "resolve_failures";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherState {
    Disconnected,
    Subscribing,
    Streaming,
    Stopped,
}

impl WatcherState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Watcher {
    nodes: Arc<NodeSet>,
    reader: Arc<ChainReader>,
    hub: Arc<SubscriberHub>,
    backoff: ExponentialBackoff,
    state: watch::Sender<WatcherState>,
    stats: Arc<StatsCounter>,
}

impl Watcher {
    pub fn new(
        nodes: Arc<NodeSet>,
        reader: Arc<ChainReader>,
        hub: Arc<SubscriberHub>,
        backoff: ExponentialBackoff,
    ) -> Self {
        let (state, _) = watch::channel(WatcherState::Disconnected);
        Self {
            nodes,
            reader,
            hub,
            backoff,
            state,
            stats: Arc::new(StatsCounter::new(&[
                RECONNECTS,
                HEADS_RECEIVED,
                BLOCKS_STREAMED,
                RESOLVE_FAILURES,
            ])),
        }
    }

    pub fn state(&self) -> watch::Receiver<WatcherState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> &Arc<StatsCounter> {
        &self.stats
    }

    /// Run until `shutdown` fires.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let primary = self.nodes.primary().clone();
        info!(primary = %primary.endpoint(), "head watcher started");

        'watch: loop {
            self.set_state(WatcherState::Subscribing);
            let subscribed = tokio::select! {
                _ = shutdown.recv() => break 'watch,
                subscribed = primary.subscribe_new_heads() => subscribed,
            };

            match subscribed {
                Ok(mut heads) => {
                    self.set_state(WatcherState::Streaming);
                    info!("streaming new heads");
                    loop {
                        let head = tokio::select! {
                            _ = shutdown.recv() => break 'watch,
                            head = heads.recv() => head,
                        };
                        match head {
                            Some(head) => {
                                self.backoff.reset();
                                self.resolve_and_broadcast(head).await;
                            }
                            None => {
                                warn!("head subscription ended");
                                break;
                            }
                        }
                    }
                }
                Err(e) => warn!(error = %e, "head subscription failed"),
            }

            self.set_state(WatcherState::Disconnected);
            self.stats.increment(RECONNECTS);
            let delay = self.backoff.next_delay();
            info!(
                attempt = self.backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "resubscribing after backoff"
            );
            tokio::select! {
                _ = shutdown.recv() => break 'watch,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(WatcherState::Stopped);
        info!(
            streamed = self.stats.get(BLOCKS_STREAMED),
            reconnects = self.stats.get(RECONNECTS),
            "head watcher stopped"
        );
    }

    async fn resolve_and_broadcast(&self, head: HeadNotification) {
        self.stats.increment(HEADS_RECEIVED);
        match self.reader.get_block_by_number(head.number).await {
            Ok(block) => {
                if let Err(e) = self.hub.broadcast_block(&block) {
                    debug!(number = head.number, error = %e, "broadcast skipped");
                    return;
                }
                self.stats.increment(BLOCKS_STREAMED);
                debug!(number = head.number, txs = block.transaction_count, "block streamed");
            }
            Err(e) => {
                self.stats.increment(RESOLVE_FAILURES);
                warn!(number = head.number, hash = %head.hash, error = %e, "could not resolve head, skipping");
            }
        }
    }

    fn set_state(&self, state: WatcherState) {
        self.state.send_replace(state);
        debug!(state = %state, "watcher state");
    }
}

