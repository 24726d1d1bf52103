//! Cluster error types.

use std::time::Duration;
use thiserror::Error;

use ethws_upstream::UpstreamError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClusterError {
    #[error("only {retrieved} of {requested} blocks could be retrieved")]
    InsufficientData { requested: usize, retrieved: usize },

    #[error("block {0} not found on any node")]
    NotFound(u64),

    #[error("all {attempts} nodes failed, last error: {last}")]
    Upstream { attempts: usize, last: UpstreamError },

    #[error("invalid {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("another mining toggle is in progress (waited {0:?})")]
    ClusterBusy(Duration),

    #[error("mining control is shutting down")]
    ShuttingDown,
}

impl ClusterError {
    /// Field name for argument errors, so replies can point at it.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::InvalidArgument { field, .. } => Some(field),
            _ => None,
        }
    }
}
