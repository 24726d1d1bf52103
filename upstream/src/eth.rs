//! Typed chain, miner, and clique calls on a [`Node`].
//!
//! Response DTOs keep the node's hex encoding; conversion into domain
//! values happens in the cluster layer.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use ethws_types::{parse_quantity, to_quantity};

use crate::{Node, UpstreamError};

/// A block as returned by `eth_getBlockByNumber(n, true)`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    pub number: String,
    pub hash: String,
    pub parent_hash: String,
    pub sha3_uncles: String,
    pub transactions_root: String,
    pub state_root: String,
    pub timestamp: String,
    pub miner: String,
    pub size: String,
    pub gas_used: String,
    pub gas_limit: String,
    #[serde(default)]
    pub base_fee_per_gas: Option<String>,
    #[serde(default)]
    pub transactions: Vec<RpcTransaction>,
}

/// A full transaction object embedded in an [`RpcBlock`].
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: String,
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    pub value: String,
    pub gas: String,
    #[serde(default)]
    pub gas_price: Option<String>,
    #[serde(default)]
    pub max_fee_per_gas: Option<String>,
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<String>,
}

/// The fee-relevant part of a transaction receipt.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub transaction_hash: String,
    pub gas_used: String,
    #[serde(default)]
    pub effective_gas_price: Option<String>,
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, UpstreamError> {
    serde_json::from_value(value).map_err(UpstreamError::from)
}

fn expect_quantity(value: Value) -> Result<u64, UpstreamError> {
    match value {
        Value::String(s) => Ok(parse_quantity(&s)?),
        other => Err(UpstreamError::Decode(format!(
            "expected hex quantity, got {other}"
        ))),
    }
}

impl Node {
    /// `eth_blockNumber`
    pub async fn block_number(&self) -> Result<u64, UpstreamError> {
        expect_quantity(self.call("eth_blockNumber", json!([])).await?)
    }

    /// `eth_getBlockByNumber` with full transactions. `None` when the node
    /// does not know the block.
    pub async fn block_by_number(&self, number: u64) -> Result<Option<RpcBlock>, UpstreamError> {
        let value = self
            .call("eth_getBlockByNumber", json!([to_quantity(number), true]))
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        decode(value).map(Some)
    }

    /// `eth_getBlockReceipts`. Not every client implements it; callers treat
    /// an error as "receipts unavailable".
    pub async fn block_receipts(&self, number: u64) -> Result<Vec<RpcReceipt>, UpstreamError> {
        let value = self
            .call("eth_getBlockReceipts", json!([to_quantity(number)]))
            .await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        decode(value)
    }

    /// `clique_getSigners` at the latest block.
    pub async fn validators(&self) -> Result<Vec<String>, UpstreamError> {
        decode(self.call("clique_getSigners", json!([])).await?)
    }

    /// `clique_getSigner` for a block number: the sealing validator.
    pub async fn block_signer(&self, number: u64) -> Result<String, UpstreamError> {
        decode(self.call("clique_getSigner", json!([to_quantity(number)])).await?)
    }

    /// `miner_start`, optionally with a thread count.
    pub async fn start_mining(&self, threads: Option<u32>) -> Result<(), UpstreamError> {
        let params = match threads {
            Some(n) => json!([n]),
            None => json!([]),
        };
        self.call("miner_start", params).await.map(|_| ())
    }

    /// `miner_stop`
    pub async fn stop_mining(&self) -> Result<(), UpstreamError> {
        self.call("miner_stop", json!([])).await.map(|_| ())
    }

    /// `eth_mining`
    pub async fn is_mining(&self) -> Result<bool, UpstreamError> {
        match self.call("eth_mining", json!([])).await? {
            Value::Bool(b) => Ok(b),
            other => Err(UpstreamError::Decode(format!(
                "expected boolean, got {other}"
            ))),
        }
    }
}
