//! Transport traits shared by the real clients and test doubles.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::UpstreamError;

/// A JSON-RPC request/response channel to one node.
///
/// Implementations must be safe for concurrent use; callers never
/// serialize access to a transport.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Issue `method` with `params` (a JSON array) and return the `result`
    /// member of the response.
    async fn request(&self, method: &str, params: Value) -> Result<Value, UpstreamError>;
}

/// A new chain head announced by a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeadNotification {
    pub number: u64,
    pub hash: String,
}

/// Stream of head notifications. Ends (`recv` returns `None`) when the
/// underlying subscription is lost.
pub type HeadStream = mpsc::Receiver<HeadNotification>;

/// A node able to push new-head events.
#[async_trait]
pub trait HeadSubscriber: Send + Sync {
    async fn subscribe_new_heads(&self) -> Result<HeadStream, UpstreamError>;
}
