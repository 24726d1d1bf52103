//! Nullable infrastructure for deterministic testing.
//!
//! Upstream nodes are reached through the `RpcTransport` and
//! `HeadSubscriber` traits. This crate provides an in-memory implementation
//! that:
//! - Serves a synthetic chain with predictable numbers, hashes, and timestamps
//! - Can be made unreachable, slow, or selectively broken per method
//! - Records every call for assertions
//! - Never touches the network
//!
//! Usage: build a `NodeSet` from `NullNode`s instead of real clients.

pub mod cluster;
pub mod node;

pub use cluster::null_cluster;
pub use node::NullNode;
