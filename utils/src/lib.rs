//! Shared utilities for the websocket gateway.

pub mod backoff;
pub mod logging;
pub mod stats;
pub mod time;

pub use backoff::ExponentialBackoff;
pub use logging::{init_logging, LogFormat};
pub use stats::StatsCounter;
pub use time::{duration_ms, format_duration, unix_now_secs};
