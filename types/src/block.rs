//! Block snapshots as delivered to websocket clients.
//!
//! A [`Block`] is built once per fetch from an upstream node and never
//! mutated afterwards. A broadcast serializes it once; every subscribed
//! connection then shares that one encoded frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single transaction summary embedded in a [`Block`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockTransaction {
    pub hash: String,
    pub from: String,
    /// Empty for contract creations.
    pub to: String,
    /// Transferred value in ether.
    pub value: f64,
}

/// Immutable snapshot of a chain block.
///
/// JSON field names are part of the wire protocol and must not change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub hash: String,
    #[serde(rename = "parentHash")]
    pub parent_hash: String,
    #[serde(rename = "sha3uncles")]
    pub sha3_uncles: String,
    #[serde(rename = "transactionRoot")]
    pub transaction_root: String,
    /// State root of the block. Carried for completeness, not on the wire.
    #[serde(skip)]
    pub state_root: String,
    pub timestamp: DateTime<Utc>,
    /// Identifier of the producing validator (signer or coinbase address).
    pub validator: String,
    pub size: u64,
    #[serde(rename = "gasUsed")]
    pub gas_used: u64,
    #[serde(rename = "gasLimit")]
    pub gas_limit: u64,
    pub transactions: Vec<BlockTransaction>,
    #[serde(rename = "transactionCount")]
    pub transaction_count: usize,
    /// Sum of fees paid by every transaction, in ether.
    #[serde(rename = "totalFees")]
    pub total_fees: f64,
}

impl Block {
    /// Block timestamp as Unix seconds.
    pub fn unix_timestamp(&self) -> i64 {
        self.timestamp.timestamp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Block {
        Block {
            number: 42,
            hash: "0xabc".into(),
            parent_hash: "0xabb".into(),
            sha3_uncles: "0x1dcc".into(),
            transaction_root: "0x56e8".into(),
            state_root: "0xd7f8".into(),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            validator: "0x0000000000000000000000000000000000000001".into(),
            size: 610,
            gas_used: 21_000,
            gas_limit: 30_000_000,
            transactions: vec![BlockTransaction {
                hash: "0xt1".into(),
                from: "0xf".into(),
                to: String::new(),
                value: 0.5,
            }],
            transaction_count: 1,
            total_fees: 0.000021,
        }
    }

    #[test]
    fn wire_field_names_are_fixed() {
        let json = serde_json::to_value(sample()).unwrap();
        let obj = json.as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "gasLimit",
                "gasUsed",
                "hash",
                "number",
                "parentHash",
                "sha3uncles",
                "size",
                "timestamp",
                "totalFees",
                "transactionCount",
                "transactionRoot",
                "transactions",
                "validator",
            ]
        );
        assert_eq!(obj["timestamp"], "2023-11-14T22:13:20Z");
    }

    #[test]
    fn unix_timestamp_matches_source_seconds() {
        assert_eq!(sample().unix_timestamp(), 1_700_000_000);
    }
}
