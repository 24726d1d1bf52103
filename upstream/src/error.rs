//! Upstream error types.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum UpstreamError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("connection to node lost")]
    Disconnected,

    #[error("node does not support head subscriptions")]
    SubscriptionUnsupported,

    #[error("invalid node set: {0}")]
    InvalidNodeSet(String),
}

impl UpstreamError {
    /// Whether retrying the same call (possibly on another node) can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) | Self::Disconnected => true,
            Self::HttpStatus(code) => *code >= 500 || *code == 429,
            Self::Rpc { .. }
            | Self::Decode(_)
            | Self::SubscriptionUnsupported
            | Self::InvalidNodeSet(_) => false,
        }
    }
}

impl From<ethws_types::TypesError> for UpstreamError {
    fn from(e: ethws_types::TypesError) -> Self {
        UpstreamError::Decode(e.to_string())
    }
}

impl From<serde_json::Error> for UpstreamError {
    fn from(e: serde_json::Error) -> Self {
        UpstreamError::Decode(e.to_string())
    }
}
