//! Gateway orchestration.
//!
//! Ties the upstream node set, the cluster read and control paths, and the
//! websocket hub into one runnable service, with TOML configuration, a
//! resubscribing head watcher, Prometheus metrics and graceful shutdown.

pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod shutdown;
pub mod watcher;

pub use config::{parse_list, parse_ports, GatewayConfig};
pub use error::GatewayError;
pub use gateway::{Gateway, GatewayStatus};
pub use metrics::GatewayMetrics;
pub use shutdown::ShutdownController;
pub use watcher::{Watcher, WatcherState};
