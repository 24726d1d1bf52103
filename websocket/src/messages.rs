//! Wire protocol.
//!
//! Every frame is a JSON envelope `{"type": <string>, "payload": <value>}`.
//! Inbound frames decode into the closed [`ClientMessage`] set, with each
//! payload validated at decode time. Replies reuse the request's type; pushes
//! use `block_update`; failures use `error`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use ethws_types::{Block, NetworkMetrics};

/// A decoded client command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    GetLatestBlocks { count: usize },
    GetBlock { number: u64 },
    SubscribeBlocks,
    UnsubscribeBlocks,
    GetMiningStatus,
    ToggleMining { start: bool },
    GetValidators,
    GetNetworkMetrics,
    Ping,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Envelope(String),

    #[error("unknown message type `{0}`")]
    UnknownType(String),

    #[error("invalid payload field `{field}`: {reason}")]
    Field { field: &'static str, reason: String },
}

impl DecodeError {
    fn field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Field {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl ClientMessage {
    /// Decode one text frame. `max_count` bounds `get_latest_blocks`.
    pub fn decode(text: &str, max_count: usize) -> Result<Self, DecodeError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| DecodeError::Envelope(e.to_string()))?;
        let payload = payload_object(envelope.payload)?;

        match envelope.kind.as_str() {
            "get_latest_blocks" => {
                let count = required_u64(&payload, "count")?;
                if count == 0 {
                    return Err(DecodeError::field("count", "must be at least 1"));
                }
                if count > max_count as u64 {
                    return Err(DecodeError::field(
                        "count",
                        format!("must not exceed {max_count}"),
                    ));
                }
                Ok(Self::GetLatestBlocks {
                    count: count as usize,
                })
            }
            "get_block" => Ok(Self::GetBlock {
                number: required_u64(&payload, "number")?,
            }),
            "subscribe_blocks" => Ok(Self::SubscribeBlocks),
            "unsubscribe_blocks" => Ok(Self::UnsubscribeBlocks),
            "get_mining_status" => Ok(Self::GetMiningStatus),
            "toggle_mining" => match payload.get("start") {
                Some(Value::Bool(start)) => Ok(Self::ToggleMining { start: *start }),
                Some(_) => Err(DecodeError::field("start", "expected a boolean")),
                None => Err(DecodeError::field("start", "missing")),
            },
            "get_validators" => Ok(Self::GetValidators),
            "get_network_metrics" => Ok(Self::GetNetworkMetrics),
            "ping" => Ok(Self::Ping),
            other => Err(DecodeError::UnknownType(other.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::GetLatestBlocks { .. } => "get_latest_blocks",
            Self::GetBlock { .. } => "get_block",
            Self::SubscribeBlocks => "subscribe_blocks",
            Self::UnsubscribeBlocks => "unsubscribe_blocks",
            Self::GetMiningStatus => "get_mining_status",
            Self::ToggleMining { .. } => "toggle_mining",
            Self::GetValidators => "get_validators",
            Self::GetNetworkMetrics => "get_network_metrics",
            Self::Ping => "ping",
        }
    }
}

fn payload_object(payload: Value) -> Result<Map<String, Value>, DecodeError> {
    match payload {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        _ => Err(DecodeError::field("payload", "expected an object")),
    }
}

fn required_u64(payload: &Map<String, Value>, field: &'static str) -> Result<u64, DecodeError> {
    match payload.get(field) {
        Some(value) => value
            .as_u64()
            .ok_or_else(|| DecodeError::field(field, "expected a non-negative integer")),
        None => Err(DecodeError::field(field, "missing")),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Ack {
    pub ok: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// A frame sent to a client.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    GetLatestBlocks(Vec<Block>),
    GetBlock(Block),
    SubscribeBlocks(Ack),
    UnsubscribeBlocks(Ack),
    GetMiningStatus(Vec<bool>),
    ToggleMining(Vec<bool>),
    GetValidators(Vec<String>),
    GetNetworkMetrics(NetworkMetrics),
    Pong,
    BlockUpdate(Block),
    Error(ErrorPayload),
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }

    pub fn ack(subscribed: bool) -> Self {
        let ack = Ack { ok: true };
        if subscribed {
            Self::SubscribeBlocks(ack)
        } else {
            Self::UnsubscribeBlocks(ack)
        }
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> String {
        encode_frame(self)
    }

    /// Encode a `block_update` frame without copying `block`. Produces the
    /// same text as `ServerMessage::BlockUpdate(block.clone()).encode()`.
    pub fn encode_block_update(block: &Block) -> String {
        encode_frame(&BlockUpdateFrame {
            kind: "block_update",
            payload: block,
        })
    }
}

#[derive(Serialize)]
struct BlockUpdateFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    payload: &'a Block,
}

fn encode_frame<T: Serialize>(message: &T) -> String {
    serde_json::to_string(message).unwrap_or_else(|e| {
        warn!(error = %e, "failed to encode server message");
        r#"{"type":"error","payload":{"message":"internal encoding error"}}"#.to_string()
    })
}
