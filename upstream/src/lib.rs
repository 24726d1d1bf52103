//! Upstream node access.
//!
//! Every call to a blockchain node goes through the [`RpcTransport`] seam:
//! - [`HttpRpcClient`] speaks JSON-RPC over HTTP to secondary nodes.
//! - [`WsRpcClient`] keeps one persistent websocket to the primary node,
//!   multiplexes requests over it, and serves `newHeads` subscriptions.
//!
//! A [`NodeSet`] holds one [`Node`] per configured endpoint. Node 0 is the
//! primary; the role assignment never changes after construction.

pub mod error;
pub mod eth;
pub mod http;
pub mod jsonrpc;
pub mod node_set;
pub mod transport;
pub mod ws;

pub use error::UpstreamError;
pub use eth::{RpcBlock, RpcReceipt, RpcTransaction};
pub use http::HttpRpcClient;
pub use node_set::{Node, NodeSet, UpstreamTimeouts};
pub use transport::{HeadNotification, HeadStream, HeadSubscriber, RpcTransport};
pub use ws::WsRpcClient;
