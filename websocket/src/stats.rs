//! Hub counters, read by the metrics exporter.

use std::collections::BTreeMap;

use ethws_utils::StatsCounter;

const CONNECTED: &str = "connected_clients";
const SUBSCRIBED: &str = "subscribed_clients";
const ACCEPTED: &str = "connections_accepted";
const BROADCASTS: &str = "broadcasts";
const FRAMES_SENT: &str = "frames_sent";
const SLOW_DROPS: &str = "slow_consumer_drops";

/// Live view of the hub. Gauges are written by the control loop only.
#[derive(Debug)]
pub struct HubStats {
    counters: StatsCounter,
}

impl Default for HubStats {
    fn default() -> Self {
        Self {
            counters: StatsCounter::new(&[
                CONNECTED,
                SUBSCRIBED,
                ACCEPTED,
                BROADCASTS,
                FRAMES_SENT,
                SLOW_DROPS,
            ]),
        }
    }
}

impl HubStats {
    pub fn connected(&self) -> u64 {
        self.counters.get(CONNECTED)
    }

    pub fn subscribed(&self) -> u64 {
        self.counters.get(SUBSCRIBED)
    }

    pub fn accepted(&self) -> u64 {
        self.counters.get(ACCEPTED)
    }

    pub fn broadcasts(&self) -> u64 {
        self.counters.get(BROADCASTS)
    }

    pub fn frames_sent(&self) -> u64 {
        self.counters.get(FRAMES_SENT)
    }

    pub fn slow_consumer_drops(&self) -> u64 {
        self.counters.get(SLOW_DROPS)
    }

    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        self.counters.snapshot()
    }

    pub(crate) fn set_gauges(&self, connected: usize, subscribed: usize) {
        self.counters.set(CONNECTED, connected as u64);
        self.counters.set(SUBSCRIBED, subscribed as u64);
    }

    pub(crate) fn record_accept(&self) {
        self.counters.increment(ACCEPTED);
    }

    pub(crate) fn record_broadcast(&self) {
        self.counters.increment(BROADCASTS);
    }

    pub(crate) fn record_frame_sent(&self) {
        self.counters.increment(FRAMES_SENT);
    }

    pub(crate) fn record_slow_drop(&self) {
        self.counters.increment(SLOW_DROPS);
    }
}
