//! Nullable upstream node: an in-memory chain behind the RPC traits.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

use ethws_types::{parse_quantity, to_quantity};
use ethws_upstream::{HeadNotification, HeadStream, HeadSubscriber, RpcTransport, UpstreamError};

/// Timestamp of block 0 in every synthetic chain.
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

/// Gas used by every synthetic transaction.
pub const TX_GAS: u64 = 21_000;

/// Gas price of every synthetic transaction (1 gwei).
pub const TX_GAS_PRICE: u64 = 1_000_000_000;

/// Value of every synthetic transaction (1 ether).
pub const TX_VALUE_WEI: u128 = 1_000_000_000_000_000_000;

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

#[derive(Default)]
struct State {
    blocks: BTreeMap<u64, Value>,
    head: u64,
    block_time: u64,
    mining: bool,
    unreachable: bool,
    delay: Option<Duration>,
    missing: HashSet<u64>,
    failing_methods: HashSet<String>,
    receipts_supported: bool,
    validators: Vec<String>,
    calls: Vec<String>,
    subscribers: Vec<mpsc::Sender<HeadNotification>>,
}

/// A test node serving a synthetic chain.
///
/// Block `n` has hash `0xblock{n}`, parent `0xblock{n-1}`, timestamp
/// `GENESIS_TIMESTAMP + n * block_time`, and `n % 3` transactions.
pub struct NullNode {
    state: Mutex<State>,
}

fn lock(m: &Mutex<State>) -> MutexGuard<'_, State> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// JSON for block `number` as a node would return it with full transactions.
pub fn block_json(number: u64, block_time: u64) -> Value {
    let tx_count = number % 3;
    let transactions: Vec<Value> = (0..tx_count)
        .map(|i| {
            json!({
                "hash": format!("0xtx{number}_{i}"),
                "from": format!("0xsender{i}"),
                "to": if i == 1 { Value::Null } else { json!(format!("0xrecipient{i}")) },
                "value": format!("{TX_VALUE_WEI:#x}"),
                "gas": to_quantity(TX_GAS),
                "gasPrice": to_quantity(TX_GAS_PRICE),
            })
        })
        .collect();
    json!({
        "number": to_quantity(number),
        "hash": format!("0xblock{number}"),
        "parentHash": if number == 0 { "0x0".to_string() } else { format!("0xblock{}", number - 1) },
        "sha3Uncles": "0x1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347",
        "transactionsRoot": format!("0xtxroot{number}"),
        "stateRoot": format!("0xstate{number}"),
        "timestamp": to_quantity(GENESIS_TIMESTAMP + number * block_time),
        "miner": ZERO_ADDRESS,
        "size": to_quantity(600 + 110 * tx_count),
        "gasUsed": to_quantity(TX_GAS * tx_count),
        "gasLimit": to_quantity(30_000_000),
        "transactions": transactions,
    })
}

impl NullNode {
    /// A node with only the genesis block.
    pub fn new() -> Self {
        Self::with_chain(0, 15)
    }

    /// A node whose chain holds blocks `0..=head`, `block_time` seconds apart.
    pub fn with_chain(head: u64, block_time: u64) -> Self {
        let blocks = (0..=head).map(|n| (n, block_json(n, block_time))).collect();
        Self {
            state: Mutex::new(State {
                blocks,
                head,
                block_time,
                receipts_supported: true,
                validators: vec![
                    "0x00000000000000000000000000000000000000a1".to_string(),
                    "0x00000000000000000000000000000000000000a2".to_string(),
                ],
                ..Default::default()
            }),
        }
    }

    /// Append a block and announce it to every head subscriber.
    pub fn push_block(&self) -> u64 {
        let mut state = lock(&self.state);
        let number = state.head + 1;
        let block = block_json(number, state.block_time);
        state.blocks.insert(number, block);
        state.head = number;
        Self::announce(&mut state, number);
        number
    }

    /// Announce a head without adding a block (e.g. to simulate a node that
    /// notifies before serving the block).
    pub fn announce_head(&self, number: u64) {
        let mut state = lock(&self.state);
        Self::announce(&mut state, number);
    }

    fn announce(state: &mut State, number: u64) {
        let head = HeadNotification {
            number,
            hash: format!("0xblock{number}"),
        };
        state
            .subscribers
            .retain(|tx| tx.try_send(head.clone()).is_ok() || !tx.is_closed());
    }

    /// End every open head stream, as a dropped websocket would.
    pub fn drop_subscriptions(&self) {
        lock(&self.state).subscribers.clear();
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.state)
            .subscribers
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    /// Make every call fail with a transport error.
    pub fn set_unreachable(&self, unreachable: bool) {
        lock(&self.state).unreachable = unreachable;
    }

    /// Delay every call by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        lock(&self.state).delay = delay;
    }

    /// Make the node answer `null` for block `number`.
    pub fn remove_block(&self, number: u64) {
        lock(&self.state).missing.insert(number);
    }

    /// Make calls to `method` fail with a transport error.
    pub fn fail_method(&self, method: &str) {
        lock(&self.state).failing_methods.insert(method.to_string());
    }

    pub fn set_receipts_supported(&self, supported: bool) {
        lock(&self.state).receipts_supported = supported;
    }

    pub fn set_validators(&self, validators: Vec<String>) {
        lock(&self.state).validators = validators;
    }

    pub fn set_mining(&self, mining: bool) {
        lock(&self.state).mining = mining;
    }

    pub fn is_mining(&self) -> bool {
        lock(&self.state).mining
    }

    pub fn head(&self) -> u64 {
        lock(&self.state).head
    }

    /// Every method called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        lock(&self.state).calls.iter().filter(|m| *m == method).count()
    }

    fn answer(state: &mut State, method: &str, params: &Value) -> Result<Value, UpstreamError> {
        match method {
            "eth_blockNumber" => Ok(json!(to_quantity(state.head))),
            "eth_getBlockByNumber" => {
                let number = block_param(params, state.head)?;
                if state.missing.contains(&number) {
                    return Ok(Value::Null);
                }
                Ok(state.blocks.get(&number).cloned().unwrap_or(Value::Null))
            }
            "eth_getBlockReceipts" => {
                if !state.receipts_supported {
                    return Err(method_not_found(method));
                }
                let number = block_param(params, state.head)?;
                let Some(block) = state.blocks.get(&number) else {
                    return Ok(Value::Null);
                };
                let receipts: Vec<Value> = block["transactions"]
                    .as_array()
                    .map(|txs| {
                        txs.iter()
                            .map(|tx| {
                                json!({
                                    "transactionHash": tx["hash"],
                                    "gasUsed": to_quantity(TX_GAS),
                                    "effectiveGasPrice": tx["gasPrice"],
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(json!(receipts))
            }
            "clique_getSigners" => Ok(json!(state.validators)),
            "clique_getSigner" => {
                let number = block_param(params, state.head)?;
                if state.validators.is_empty() {
                    return Err(UpstreamError::Rpc {
                        code: -32000,
                        message: "no signers".into(),
                    });
                }
                let idx = (number as usize) % state.validators.len();
                Ok(json!(state.validators[idx]))
            }
            "miner_start" => {
                state.mining = true;
                Ok(Value::Null)
            }
            "miner_stop" => {
                state.mining = false;
                Ok(Value::Null)
            }
            "eth_mining" => Ok(json!(state.mining)),
            _ => Err(method_not_found(method)),
        }
    }
}

fn method_not_found(method: &str) -> UpstreamError {
    UpstreamError::Rpc {
        code: -32601,
        message: format!("the method {method} does not exist/is not available"),
    }
}

fn block_param(params: &Value, head: u64) -> Result<u64, UpstreamError> {
    match params.get(0).and_then(Value::as_str) {
        Some("latest") | Some("pending") => Ok(head),
        Some("earliest") => Ok(0),
        Some(q) => Ok(parse_quantity(q)?),
        None => Err(UpstreamError::Rpc {
            code: -32602,
            message: "missing block parameter".into(),
        }),
    }
}

impl Default for NullNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RpcTransport for NullNode {
    async fn request(&self, method: &str, params: Value) -> Result<Value, UpstreamError> {
        let delay = {
            let mut state = lock(&self.state);
            state.calls.push(method.to_string());
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = lock(&self.state);
        if state.unreachable {
            return Err(UpstreamError::Transport("null node unreachable".into()));
        }
        if state.failing_methods.contains(method) {
            return Err(UpstreamError::Transport(format!("{method} failed")));
        }
        Self::answer(&mut state, method, &params)
    }
}

#[async_trait]
impl HeadSubscriber for NullNode {
    async fn subscribe_new_heads(&self) -> Result<HeadStream, UpstreamError> {
        let mut state = lock(&self.state);
        if state.unreachable {
            return Err(UpstreamError::Transport("null node unreachable".into()));
        }
        let (tx, rx) = mpsc::channel(64);
        state.subscribers.push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_a_synthetic_chain() {
        let node = NullNode::with_chain(5, 12);
        let head = node.request("eth_blockNumber", json!([])).await.unwrap();
        assert_eq!(head, json!("0x5"));

        let block = node
            .request("eth_getBlockByNumber", json!(["0x4", true]))
            .await
            .unwrap();
        assert_eq!(block["hash"], "0xblock4");
        assert_eq!(block["parentHash"], "0xblock3");
        assert_eq!(block["transactions"].as_array().unwrap().len(), 1);
        assert_eq!(node.call_count("eth_getBlockByNumber"), 1);
    }

    #[tokio::test]
    async fn missing_blocks_read_as_null() {
        let node = NullNode::with_chain(3, 12);
        node.remove_block(2);
        let block = node
            .request("eth_getBlockByNumber", json!(["0x2", true]))
            .await
            .unwrap();
        assert!(block.is_null());
    }

    #[tokio::test]
    async fn unreachable_nodes_fail_transiently() {
        let node = NullNode::new();
        node.set_unreachable(true);
        let err = node.request("eth_mining", json!([])).await.unwrap_err();
        assert!(err.is_transient());
        assert!(node.subscribe_new_heads().await.is_err());
    }

    #[tokio::test]
    async fn pushed_blocks_reach_subscribers() {
        let node = NullNode::with_chain(1, 12);
        let mut heads = node.subscribe_new_heads().await.unwrap();
        assert_eq!(node.push_block(), 2);
        assert_eq!(heads.recv().await.unwrap().number, 2);
        node.drop_subscriptions();
        assert!(heads.recv().await.is_none());
    }

    #[tokio::test]
    async fn mining_flag_follows_start_and_stop() {
        let node = NullNode::new();
        node.request("miner_start", json!([])).await.unwrap();
        assert!(node.is_mining());
        node.request("miner_stop", json!([])).await.unwrap();
        assert_eq!(node.request("eth_mining", json!([])).await.unwrap(), json!(false));
    }
}
