//! Gateway configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use ethws_cluster::{FailoverPolicy, MiningConfig, ReaderConfig};
use ethws_types::NodeEndpoint;
use ethws_upstream::UpstreamTimeouts;
use ethws_utils::{ExponentialBackoff, LogFormat};
use ethws_websocket::HubConfig;

use crate::GatewayError;

/// Configuration for the gateway.
///
/// Can be loaded from a TOML file via [`GatewayConfig::from_toml_file`] or
/// built programmatically (e.g. for tests). Node `i` is reached at
/// `addresses[i]:ports[i]`; node 0 is the primary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Number of upstream nodes. Must match both address and port counts.
    #[serde(default = "default_node_count")]
    pub node_count: usize,

    #[serde(default = "default_addresses")]
    pub addresses: Vec<String>,

    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,

    /// Socket address the HTTP server binds.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Log format: "human" or "json".
    #[serde(default)]
    pub log_format: LogFormat,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Per-call deadline for upstream requests.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Deadline for opening the primary's websocket.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_max_latest_blocks")]
    pub max_latest_blocks: usize,

    /// Blocks sampled for the average block time.
    #[serde(default = "default_metrics_window")]
    pub metrics_window: usize,

    #[serde(default)]
    pub failover: FailoverPolicy,

    /// How long a mining toggle waits for one already in flight.
    #[serde(default = "default_toggle_wait_ms")]
    pub toggle_wait_ms: u64,

    /// Per-node deadline for mining fan-out calls.
    #[serde(default = "default_mining_node_timeout_ms")]
    pub mining_node_timeout_ms: u64,

    /// Thread count passed to `miner_start`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub miner_threads: Option<u32>,

    /// Outbound frames buffered per client before it is dropped as slow.
    #[serde(default = "default_queue_capacity")]
    pub client_queue_capacity: usize,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    #[serde(default = "default_backoff_initial_ms")]
    pub resubscribe_initial_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub resubscribe_max_ms: u64,

    /// Grace period for draining in-flight work on stop.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_node_count() -> usize {
    1
}

fn default_addresses() -> Vec<String> {
    vec!["127.0.0.1".to_string()]
}

fn default_ports() -> Vec<u16> {
    vec![8546]
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_max_latest_blocks() -> usize {
    100
}

fn default_metrics_window() -> usize {
    10
}

fn default_toggle_wait_ms() -> u64 {
    30_000
}

fn default_mining_node_timeout_ms() -> u64 {
    5_000
}

fn default_queue_capacity() -> usize {
    64
}

fn default_max_frame_bytes() -> usize {
    64 * 1024
}

fn default_backoff_initial_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

// ── Impl ───────────────────────────────────────────────────────────────

impl GatewayConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, GatewayError> {
        toml::from_str(s).map_err(|e| GatewayError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, GatewayError> {
        toml::to_string_pretty(self).map_err(|e| GatewayError::Config(e.to_string()))
    }

    /// Check node layout and limits. Any failure here is fatal at startup.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.node_count == 0 {
            return Err(GatewayError::Config("at least one node is required".into()));
        }
        if self.addresses.len() != self.node_count {
            return Err(GatewayError::Config(format!(
                "{} nodes configured but {} addresses given",
                self.node_count,
                self.addresses.len()
            )));
        }
        if self.ports.len() != self.node_count {
            return Err(GatewayError::Config(format!(
                "{} nodes configured but {} ports given",
                self.node_count,
                self.ports.len()
            )));
        }
        if self.max_latest_blocks == 0 {
            return Err(GatewayError::Config("max_latest_blocks must be at least 1".into()));
        }
        if self.client_queue_capacity == 0 {
            return Err(GatewayError::Config(
                "client_queue_capacity must be at least 1".into(),
            ));
        }
        self.endpoints().map(|_| ())
    }

    /// Endpoints in configuration order.
    pub fn endpoints(&self) -> Result<Vec<NodeEndpoint>, GatewayError> {
        self.addresses
            .iter()
            .zip(&self.ports)
            .enumerate()
            .map(|(index, (address, port))| {
                NodeEndpoint::new(index, address.as_str(), *port)
                    .map_err(|e| GatewayError::Config(format!("node {index}: {e}")))
            })
            .collect()
    }

    pub fn upstream_timeouts(&self) -> UpstreamTimeouts {
        UpstreamTimeouts {
            request: Duration::from_millis(self.request_timeout_ms),
            connect: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            max_latest_blocks: self.max_latest_blocks,
            metrics_window: self.metrics_window,
            failover: self.failover,
        }
    }

    pub fn mining_config(&self) -> MiningConfig {
        MiningConfig {
            toggle_wait: Duration::from_millis(self.toggle_wait_ms),
            node_timeout: Duration::from_millis(self.mining_node_timeout_ms),
            threads: self.miner_threads,
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            queue_capacity: self.client_queue_capacity,
            max_frame_bytes: self.max_frame_bytes,
            max_latest_blocks: self.max_latest_blocks,
        }
    }

    pub fn resubscribe_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.resubscribe_initial_ms),
            Duration::from_millis(self.resubscribe_max_ms),
        )
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Split a comma-delimited flag value, dropping empty items.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a comma-delimited list of ports.
pub fn parse_ports(value: &str) -> Result<Vec<u16>, GatewayError> {
    parse_list(value)
        .iter()
        .map(|p| {
            p.parse::<u16>()
                .map_err(|e| GatewayError::Config(format!("invalid port {p:?}: {e}")))
        })
        .collect()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            node_count: default_node_count(),
            addresses: default_addresses(),
            ports: default_ports(),
            listen: default_listen(),
            log_format: LogFormat::default(),
            log_level: default_log_level(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_latest_blocks: default_max_latest_blocks(),
            metrics_window: default_metrics_window(),
            failover: FailoverPolicy::default(),
            toggle_wait_ms: default_toggle_wait_ms(),
            mining_node_timeout_ms: default_mining_node_timeout_ms(),
            miner_threads: None,
            client_queue_capacity: default_queue_capacity(),
            max_frame_bytes: default_max_frame_bytes(),
            resubscribe_initial_ms: default_backoff_initial_ms(),
            resubscribe_max_ms: default_backoff_max_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn three_nodes() -> GatewayConfig {
        GatewayConfig {
            node_count: 3,
            addresses: vec!["10.0.0.1".into(), "10.0.0.2".into(), "10.0.0.3".into()],
            ports: vec![8546, 8545, 8545],
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = three_nodes();
        let toml_str = config.to_toml_string().unwrap();
        let parsed = GatewayConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = GatewayConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.node_count, 1);
        assert_eq!(config.listen, "0.0.0.0:8080");
        assert_eq!(config.log_format, LogFormat::Human);
        assert_eq!(config.failover, FailoverPolicy::Rotating);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            node_count = 2
            addresses = ["a.local", "b.local"]
            ports = [8546, 8545]
            log_format = "json"
            failover = "round_robin"
            miner_threads = 2
        "#;
        let config = GatewayConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.failover, FailoverPolicy::RoundRobin);
        assert_eq!(config.mining_config().threads, Some(2));
        let endpoints = config.endpoints().unwrap();
        assert_eq!(endpoints[0].url(), "ws://a.local:8546");
        assert_eq!(endpoints[1].url(), "http://b.local:8545");
    }

    #[test]
    fn mismatched_counts_are_config_errors() {
        let mut config = three_nodes();
        config.ports.pop();
        assert!(matches!(config.validate(), Err(GatewayError::Config(m)) if m.contains("ports")));

        let mut config = three_nodes();
        config.addresses.push("10.0.0.4".into());
        assert!(matches!(config.validate(), Err(GatewayError::Config(m)) if m.contains("addresses")));

        let config = GatewayConfig {
            node_count: 0,
            addresses: vec![],
            ports: vec![],
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_endpoints_are_config_errors() {
        let mut config = three_nodes();
        config.ports[1] = 0;
        assert!(matches!(config.validate(), Err(GatewayError::Config(m)) if m.contains("node 1")));

        let mut config = three_nodes();
        config.addresses[2] = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn flag_lists_parse() {
        assert_eq!(parse_list("a, b,,c "), vec!["a", "b", "c"]);
        assert_eq!(parse_ports("8546,8545").unwrap(), vec![8546, 8545]);
        assert!(matches!(parse_ports("8546,http"), Err(GatewayError::Config(_))));
        assert!(parse_ports("70000").is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "listen = \"127.0.0.1:9000\"").unwrap();
        writeln!(file, "shutdown_grace_ms = 250").unwrap();
        let config = GatewayConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.listen, "127.0.0.1:9000");
        assert_eq!(config.shutdown_grace(), Duration::from_millis(250));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = GatewayConfig::from_toml_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }
}
