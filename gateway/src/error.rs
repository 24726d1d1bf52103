use thiserror::Error;

use ethws_cluster::ClusterError;
use ethws_upstream::UpstreamError;
use ethws_websocket::HubError;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Invalid startup configuration. Fatal: the gateway does not start.
    #[error("config error: {0}")]
    Config(String),

    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("hub error: {0}")]
    Hub(#[from] HubError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gateway already started")]
    AlreadyStarted,

    #[error("shutdown timeout")]
    ShutdownTimeout,
}
