//! Read path over the node cluster.
//!
//! Every read walks the node ring starting at a cursor. A node that errors
//! is skipped in favour of the next one; the call fails only once every
//! node has been tried. With the default [`FailoverPolicy::Rotating`] the
//! starting node moves one step along the ring after every clean read, and
//! after a failover the next read starts at the node that answered.
//! [`FailoverPolicy::Sticky`] pins reads to the last node that answered;
//! [`FailoverPolicy::RoundRobin`] rotates without regard to failures.

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use ethws_types::{average_block_time, parse_quantity_u128, Block, NetworkMetrics};
use ethws_upstream::{Node, NodeSet, RpcBlock, UpstreamError};
use ethws_utils::duration_ms;

use crate::convert::{parse_timestamp, to_block, ZERO_ADDRESS};
use crate::fees::{approximate_fees, exact_fees};
use crate::ClusterError;

/// Where each read starts on the node ring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverPolicy {
    /// Rotate on success, start at the node that answered after a failover.
    #[default]
    Rotating,
    /// Start at the node that answered last.
    Sticky,
    /// Start one node further along for every call.
    RoundRobin,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Upper bound for `get_latest_blocks`; larger requests are rejected.
    pub max_latest_blocks: usize,
    /// Number of recent blocks sampled for the average block time.
    pub metrics_window: usize,
    pub failover: FailoverPolicy,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            max_latest_blocks: 100,
            metrics_window: 10,
            failover: FailoverPolicy::Rotating,
        }
    }
}

/// Read-only aggregation over a [`NodeSet`].
pub struct ChainReader {
    nodes: Arc<NodeSet>,
    config: ReaderConfig,
    cursor: AtomicUsize,
}

impl ChainReader {
    pub fn new(nodes: Arc<NodeSet>, config: ReaderConfig) -> Self {
        Self {
            nodes,
            config,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn nodes(&self) -> &Arc<NodeSet> {
        &self.nodes
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Index of the node the next read starts at.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Relaxed) % self.nodes.len()
    }

    fn start_index(&self) -> usize {
        match self.config.failover {
            FailoverPolicy::Rotating | FailoverPolicy::Sticky => self.cursor.load(Ordering::Relaxed),
            FailoverPolicy::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Move the cursor after node `index` answered on attempt `attempts`.
    fn answered(&self, index: usize, attempts: usize) {
        let next = match self.config.failover {
            FailoverPolicy::Rotating if attempts == 1 => (index + 1) % self.nodes.len(),
            FailoverPolicy::Rotating | FailoverPolicy::Sticky => index,
            FailoverPolicy::RoundRobin => return,
        };
        self.cursor.store(next, Ordering::Relaxed);
    }

    /// Run `op` against nodes in ring order until one answers.
    ///
    /// `Ok(None)` from a node means "this node does not have it"; the walk
    /// continues, and if no node has it the result is `Ok(None)`. Only when
    /// every node errored does the call fail.
    async fn with_failover<T, F, Fut>(&self, what: &'static str, op: F) -> Result<Option<T>, ClusterError>
    where
        F: Fn(Node) -> Fut,
        Fut: Future<Output = Result<Option<T>, UpstreamError>>,
    {
        let start = self.start_index();
        let mut attempts = 0;
        let mut not_found = false;
        let mut last_error = None;

        for node in self.nodes.ring_from(start) {
            attempts += 1;
            match op(node.clone()).await {
                Ok(Some(value)) => {
                    self.answered(node.index(), attempts);
                    return Ok(Some(value));
                }
                Ok(None) => {
                    debug!(node = node.index(), what, "not available on node");
                    not_found = true;
                }
                Err(e) => {
                    warn!(node = node.index(), what, error = %e, "upstream call failed, failing over");
                    last_error = Some(e);
                }
            }
        }

        if not_found {
            return Ok(None);
        }
        Err(ClusterError::Upstream {
            attempts,
            last: last_error.unwrap_or_else(|| UpstreamError::InvalidNodeSet("no nodes".into())),
        })
    }

    /// Current head number, asked of the primary first.
    pub async fn head_number(&self) -> Result<u64, ClusterError> {
        match self.nodes.primary().block_number().await {
            Ok(number) => Ok(number),
            Err(e) => {
                warn!(error = %e, "primary could not report head, asking the cluster");
                self.head_number_from_cluster().await
            }
        }
    }

    async fn head_number_from_cluster(&self) -> Result<u64, ClusterError> {
        let head = self
            .with_failover("eth_blockNumber", |node| async move {
                node.block_number().await.map(Some)
            })
            .await?;
        head.ok_or(ClusterError::Upstream {
            attempts: self.nodes.len(),
            last: UpstreamError::Decode("no node reported a head".into()),
        })
    }

    /// The `count` most recent blocks, newest first, contiguous.
    pub async fn get_latest_blocks(&self, count: usize) -> Result<Vec<Block>, ClusterError> {
        if count == 0 {
            return Err(ClusterError::InvalidArgument {
                field: "count",
                reason: "must be at least 1".into(),
            });
        }
        if count > self.config.max_latest_blocks {
            return Err(ClusterError::InvalidArgument {
                field: "count",
                reason: format!("must not exceed {}", self.config.max_latest_blocks),
            });
        }

        let head = self.head_number().await?;
        let mut blocks = Vec::with_capacity(count);
        for offset in 0..count as u64 {
            let Some(number) = head.checked_sub(offset) else {
                break;
            };
            match self.get_block_by_number(number).await {
                Ok(block) => blocks.push(block),
                Err(e) => {
                    warn!(number, error = %e, "latest-blocks walk stopped early");
                    break;
                }
            }
        }

        if blocks.len() < count {
            return Err(ClusterError::InsufficientData {
                requested: count,
                retrieved: blocks.len(),
            });
        }
        Ok(blocks)
    }

    /// One block by number, with fees and validator resolved.
    pub async fn get_block_by_number(&self, number: u64) -> Result<Block, ClusterError> {
        self.with_failover("eth_getBlockByNumber", move |node| async move {
            fetch_block(&node, number).await
        })
        .await?
        .ok_or(ClusterError::NotFound(number))
    }

    /// Active validators as reported by the first responding node.
    pub async fn get_validators(&self) -> Result<Vec<String>, ClusterError> {
        let validators = self
            .with_failover("clique_getSigners", |node| async move {
                node.validators().await.map(Some)
            })
            .await?;
        Ok(validators.unwrap_or_default())
    }

    /// Average block time over the configured window and primary latency.
    ///
    /// Blocks that cannot be retrieved are left out of the average rather
    /// than failing the call.
    pub async fn get_network_metrics(&self) -> Result<NetworkMetrics, ClusterError> {
        let started = Instant::now();
        let (head, latency) = match self.nodes.primary().block_number().await {
            Ok(head) => (head, Some(duration_ms(started.elapsed()))),
            Err(e) => {
                warn!(error = %e, "primary unreachable, latency unavailable");
                (self.head_number_from_cluster().await?, None)
            }
        };

        let window = self.config.metrics_window.max(1) as u64;
        let numbers: Vec<u64> = (0..window).filter_map(|o| head.checked_sub(o)).collect();
        let results = join_all(numbers.iter().map(|&n| self.block_timestamp(n))).await;

        let samples: Vec<(u64, i64)> = numbers
            .iter()
            .zip(results)
            .filter_map(|(&n, result)| match result {
                Ok(Some(ts)) => Some((n, ts)),
                Ok(None) => None,
                Err(e) => {
                    debug!(number = n, error = %e, "block left out of metrics");
                    None
                }
            })
            .collect();

        Ok(NetworkMetrics {
            average_block_time: average_block_time(&samples),
            network_latency: latency,
            latest_block: head,
            blocks_sampled: samples.len(),
            node_count: self.nodes.len(),
        })
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<i64>, ClusterError> {
        self.with_failover("eth_getBlockByNumber", move |node| async move {
            match node.block_by_number(number).await? {
                Some(raw) => Ok(Some(parse_timestamp(&raw.timestamp)?.timestamp())),
                None => Ok(None),
            }
        })
        .await
    }
}

/// Fetch and convert one block from one node.
async fn fetch_block(node: &Node, number: u64) -> Result<Option<Block>, UpstreamError> {
    let Some(raw) = node.block_by_number(number).await? else {
        return Ok(None);
    };
    let total_fees = block_fees(node, &raw, number).await?;
    let validator = resolve_validator(node, &raw, number).await;
    to_block(&raw, validator, total_fees).map(Some)
}

async fn block_fees(node: &Node, raw: &RpcBlock, number: u64) -> Result<u128, UpstreamError> {
    if raw.transactions.is_empty() {
        return Ok(0);
    }
    let exact = match node.block_receipts(number).await {
        Ok(receipts) if receipts.len() == raw.transactions.len() => exact_fees(&receipts)?,
        Ok(receipts) => {
            debug!(number, receipts = receipts.len(), "receipt count mismatch, approximating fees");
            None
        }
        Err(e) => {
            debug!(number, error = %e, "receipts unavailable, approximating fees");
            None
        }
    };
    match exact {
        Some(total) => Ok(total),
        None => {
            let base_fee = raw
                .base_fee_per_gas
                .as_deref()
                .map(parse_quantity_u128)
                .transpose()?;
            approximate_fees(&raw.transactions, base_fee, parse_quantity_u128(&raw.gas_used)?)
        }
    }
}

/// The block's coinbase, or the clique signer when the coinbase is zero.
async fn resolve_validator(node: &Node, raw: &RpcBlock, number: u64) -> String {
    if !raw.miner.eq_ignore_ascii_case(ZERO_ADDRESS) {
        return raw.miner.clone();
    }
    match node.block_signer(number).await {
        Ok(signer) => signer,
        Err(e) => {
            debug!(number, error = %e, "signer lookup failed, using coinbase");
            raw.miner.clone()
        }
    }
}
