//! Aggregation over the upstream node cluster.
//!
//! - [`ChainReader`]: read path. Blocks, validators, and network metrics,
//!   each call failing over across nodes before giving up.
//! - [`MiningCoordinator`]: control path. Cluster-wide mining start/stop and
//!   status polling, fanned out concurrently with per-node deadlines; toggles
//!   are serialized behind a cluster-wide lock.

pub mod convert;
pub mod error;
pub mod fees;
pub mod mining;
pub mod reader;

pub use error::ClusterError;
pub use mining::{MiningConfig, MiningCoordinator};
pub use reader::{ChainReader, FailoverPolicy, ReaderConfig};
