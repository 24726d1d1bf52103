//! WebSocket subscriber hub.
//!
//! Clients connect at `/ws` and exchange JSON envelopes:
//! - block queries (`get_latest_blocks`, `get_block`)
//! - block push subscription (`subscribe_blocks` / `unsubscribe_blocks`,
//!   then `block_update` pushes)
//! - mining control (`get_mining_status`, `toggle_mining`)
//! - cluster info (`get_validators`, `get_network_metrics`)

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod messages;
pub mod server;
pub mod stats;

pub use dispatch::Dispatcher;
pub use error::HubError;
pub use hub::{ConnectionId, HubConfig, HubControlLoop, SubscriberHub};
pub use messages::{ClientMessage, DecodeError, ServerMessage};
pub use server::router;
pub use stats::HubStats;
