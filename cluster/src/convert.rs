//! Conversion of node responses into domain blocks.

use chrono::{DateTime, TimeZone, Utc};

use ethws_types::{parse_quantity, parse_quantity_u128, wei_to_ether, Block, BlockTransaction};
use ethws_upstream::{RpcBlock, RpcTransaction, UpstreamError};

/// Coinbase of clique-sealed blocks.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, UpstreamError> {
    let secs = parse_quantity(raw)?;
    i64::try_from(secs)
        .ok()
        .and_then(|s| Utc.timestamp_opt(s, 0).single())
        .ok_or_else(|| UpstreamError::Decode(format!("timestamp out of range: {raw}")))
}

fn convert_transaction(tx: &RpcTransaction) -> Result<BlockTransaction, UpstreamError> {
    Ok(BlockTransaction {
        hash: tx.hash.clone(),
        from: tx.from.clone(),
        to: tx.to.clone().unwrap_or_default(),
        value: wei_to_ether(parse_quantity_u128(&tx.value)?),
    })
}

/// Build a [`Block`] from a raw block, the resolved validator, and the
/// derived total fees in wei.
pub fn to_block(raw: &RpcBlock, validator: String, total_fees_wei: u128) -> Result<Block, UpstreamError> {
    let transactions = raw
        .transactions
        .iter()
        .map(convert_transaction)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Block {
        number: parse_quantity(&raw.number)?,
        hash: raw.hash.clone(),
        parent_hash: raw.parent_hash.clone(),
        sha3_uncles: raw.sha3_uncles.clone(),
        transaction_root: raw.transactions_root.clone(),
        state_root: raw.state_root.clone(),
        timestamp: parse_timestamp(&raw.timestamp)?,
        validator,
        size: parse_quantity(&raw.size)?,
        gas_used: parse_quantity(&raw.gas_used)?,
        gas_limit: parse_quantity(&raw.gas_limit)?,
        transaction_count: transactions.len(),
        transactions,
        total_fees: wei_to_ether(total_fees_wei),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RpcBlock {
        RpcBlock {
            number: "0x2".into(),
            hash: "0xh2".into(),
            parent_hash: "0xh1".into(),
            sha3_uncles: "0xu".into(),
            transactions_root: "0xt".into(),
            state_root: "0xs".into(),
            timestamp: "0x6553f100".into(),
            miner: ZERO_ADDRESS.into(),
            size: "0x100".into(),
            gas_used: "0x5208".into(),
            gas_limit: "0x1c9c380".into(),
            base_fee_per_gas: None,
            transactions: vec![RpcTransaction {
                hash: "0xtx".into(),
                from: "0xa".into(),
                to: None,
                value: "0xde0b6b3a7640000".into(),
                gas: "0x5208".into(),
                gas_price: Some("0x1".into()),
                max_fee_per_gas: None,
                max_priority_fee_per_gas: None,
            }],
        }
    }

    #[test]
    fn converts_every_field() {
        let block = to_block(&raw(), "0xsigner".into(), 21_000_000_000_000).unwrap();
        assert_eq!(block.number, 2);
        assert_eq!(block.timestamp.timestamp(), 0x6553f100);
        assert_eq!(block.size, 256);
        assert_eq!(block.gas_limit, 30_000_000);
        assert_eq!(block.transaction_count, 1);
        assert_eq!(block.transactions[0].to, "");
        assert!((block.transactions[0].value - 1.0).abs() < 1e-12);
        assert!((block.total_fees - 0.000021).abs() < 1e-15);
        assert_eq!(block.validator, "0xsigner");
    }

    #[test]
    fn malformed_quantity_is_a_decode_error() {
        let mut bad = raw();
        bad.gas_used = "5208".into();
        assert!(matches!(
            to_block(&bad, String::new(), 0),
            Err(UpstreamError::Decode(_))
        ));
    }
}
