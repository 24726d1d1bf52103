//! Prometheus metrics for the gateway.
//!
//! The hub and the watcher keep their own lock-free counters; [`GatewayMetrics`]
//! copies them into a dedicated [`Registry`] on every scrape of `/metrics`.

use std::sync::{Mutex, PoisonError};

use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

use ethws_utils::StatsCounter;
use ethws_websocket::HubStats;

use crate::watcher::{WatcherState, BLOCKS_STREAMED, RECONNECTS, RESOLVE_FAILURES};
use crate::GatewayError;

pub struct GatewayMetrics {
    pub registry: Registry,

    // ── Gauges ──────────────────────────────────────────────────────────
    pub connected_clients: IntGauge,
    pub subscribed_clients: IntGauge,
    pub node_count: IntGauge,
    /// 1 while the watcher holds a live head subscription.
    pub watcher_streaming: IntGauge,

    // ── Counters ────────────────────────────────────────────────────────
    pub broadcasts: IntCounter,
    pub frames_sent: IntCounter,
    pub slow_consumer_drops: IntCounter,
    pub watcher_reconnects: IntCounter,
    pub blocks_streamed: IntCounter,
    pub resolve_failures: IntCounter,

    /// Serializes `refresh`; the counter catch-up reads then increments.
    refresh_lock: Mutex<()>,
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, GatewayError> {
    let gauge = IntGauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, GatewayError> {
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

/// Advance a mirrored counter to `value`; counters never go backwards.
/// Callers hold `refresh_lock`.
fn sync_counter(counter: &IntCounter, value: u64) {
    let current = counter.get();
    if value > current {
        counter.inc_by(value - current);
    }
}

impl GatewayMetrics {
    pub fn new() -> Result<Self, GatewayError> {
        let registry = Registry::new();
        Ok(Self {
            connected_clients: gauge(
                &registry,
                "ethws_connected_clients",
                "Currently connected websocket clients",
            )?,
            subscribed_clients: gauge(
                &registry,
                "ethws_subscribed_clients",
                "Clients subscribed to block updates",
            )?,
            node_count: gauge(&registry, "ethws_node_count", "Configured upstream nodes")?,
            watcher_streaming: gauge(
                &registry,
                "ethws_watcher_streaming",
                "Whether the head watcher is streaming (1) or not (0)",
            )?,
            broadcasts: counter(
                &registry,
                "ethws_broadcasts_total",
                "Block updates fanned out to subscribers",
            )?,
            frames_sent: counter(
                &registry,
                "ethws_frames_sent_total",
                "Frames written to client sockets",
            )?,
            slow_consumer_drops: counter(
                &registry,
                "ethws_slow_consumer_drops_total",
                "Clients dropped for overflowing their outbound queue",
            )?,
            watcher_reconnects: counter(
                &registry,
                "ethws_watcher_reconnects_total",
                "Head subscription losses followed by a resubscribe",
            )?,
            blocks_streamed: counter(
                &registry,
                "ethws_blocks_streamed_total",
                "Heads resolved and broadcast",
            )?,
            resolve_failures: counter(
                &registry,
                "ethws_resolve_failures_total",
                "Heads skipped because the block could not be fetched",
            )?,
            registry,
            refresh_lock: Mutex::new(()),
        })
    }

    /// Copy the hub and watcher counters into the registry.
    pub fn refresh(&self, hub: &HubStats, watcher: &StatsCounter, state: WatcherState, nodes: usize) {
        let _guard = self.refresh_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.connected_clients.set(hub.connected() as i64);
        self.subscribed_clients.set(hub.subscribed() as i64);
        self.node_count.set(nodes as i64);
        self.watcher_streaming
            .set(i64::from(state == WatcherState::Streaming));
        sync_counter(&self.broadcasts, hub.broadcasts());
        sync_counter(&self.frames_sent, hub.frames_sent());
        sync_counter(&self.slow_consumer_drops, hub.slow_consumer_drops());
        sync_counter(&self.watcher_reconnects, watcher.get(RECONNECTS));
        sync_counter(&self.blocks_streamed, watcher.get(BLOCKS_STREAMED));
        sync_counter(&self.resolve_failures, watcher.get(RESOLVE_FAILURES));
    }

    /// Prometheus text exposition of every metric.
    pub fn encode(&self) -> Result<String, GatewayError> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::HEADS_RECEIVED;

    #[test]
    fn refresh_mirrors_counters_without_going_backwards() {
        let metrics = GatewayMetrics::new().unwrap();
        let hub = HubStats::default();
        let watcher = StatsCounter::new(&[RECONNECTS, HEADS_RECEIVED, BLOCKS_STREAMED, RESOLVE_FAILURES]);
        watcher.add(BLOCKS_STREAMED, 5);

        metrics.refresh(&hub, &watcher, WatcherState::Streaming, 3);
        assert_eq!(metrics.blocks_streamed.get(), 5);
        assert_eq!(metrics.watcher_streaming.get(), 1);
        assert_eq!(metrics.node_count.get(), 3);

        watcher.set(BLOCKS_STREAMED, 2);
        metrics.refresh(&hub, &watcher, WatcherState::Disconnected, 3);
        assert_eq!(metrics.blocks_streamed.get(), 5);
        assert_eq!(metrics.watcher_streaming.get(), 0);
    }

    #[test]
    fn concurrent_scrapes_never_overshoot() {
        let metrics = GatewayMetrics::new().unwrap();
        let hub = HubStats::default();
        let watcher = StatsCounter::new(&[RECONNECTS, HEADS_RECEIVED, BLOCKS_STREAMED, RESOLVE_FAILURES]);

        for round in 1..=50u64 {
            watcher.set(BLOCKS_STREAMED, round * 7);
            std::thread::scope(|scope| {
                for _ in 0..8 {
                    scope.spawn(|| metrics.refresh(&hub, &watcher, WatcherState::Streaming, 2));
                }
            });
            assert_eq!(metrics.blocks_streamed.get(), round * 7);
        }
    }

    #[test]
    fn encodes_text_exposition() {
        let metrics = GatewayMetrics::new().unwrap();
        metrics.broadcasts.inc();
        let text = metrics.encode().unwrap();
        assert!(text.contains("ethws_broadcasts_total 1"));
        assert!(text.contains("# TYPE ethws_connected_clients gauge"));
    }
}
