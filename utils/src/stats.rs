//! Lock-free named counters.
//!
//! Components that must not depend on the Prometheus registry (the hub, the
//! watcher) record into a [`StatsCounter`]; the gateway's metrics exporter
//! copies a snapshot into its gauges on every scrape.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A fixed set of named `u64` counters, usable as monotonic counters or as
/// gauges via [`set`](Self::set) / [`decrement`](Self::decrement).
#[derive(Debug)]
pub struct StatsCounter {
    counters: BTreeMap<&'static str, AtomicU64>,
}

impl StatsCounter {
    pub fn new(names: &[&'static str]) -> Self {
        let counters = names.iter().map(|&n| (n, AtomicU64::new(0))).collect();
        Self { counters }
    }

    pub fn increment(&self, name: &str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &str, value: u64) {
        if let Some(counter) = self.counters.get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
        }
    }

    /// Saturating decrement, for gauge-style counters.
    pub fn decrement(&self, name: &str) {
        if let Some(counter) = self.counters.get(name) {
            let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
        }
    }

    pub fn set(&self, name: &str, value: u64) {
        if let Some(counter) = self.counters.get(name) {
            counter.store(value, Ordering::Relaxed);
        }
    }

    /// Unknown names read as zero.
    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Point-in-time copy of every counter, sorted by name.
    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        self.counters
            .iter()
            .map(|(&k, v)| (k, v.load(Ordering::Relaxed)))
            .collect()
    }
}
