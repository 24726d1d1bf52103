//! Fundamental types for the websocket gateway.
//!
//! This crate defines the values shared across every other crate in the
//! workspace: block snapshots, node endpoints, network metrics, and the hex
//! quantity helpers used to decode upstream JSON-RPC responses.

pub mod block;
pub mod error;
pub mod metrics;
pub mod node;
pub mod quantity;

pub use block::{Block, BlockTransaction};
pub use error::TypesError;
pub use metrics::{average_block_time, NetworkMetrics};
pub use node::{NodeEndpoint, NodeRole};
pub use quantity::{parse_quantity, parse_quantity_u128, to_quantity, wei_to_ether};
