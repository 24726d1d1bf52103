//! Total-fee derivation for a block.
//!
//! Exact when the node serves receipts (`gasUsed × effectiveGasPrice` per
//! transaction). Otherwise approximated from the transaction objects alone:
//! each transaction's gas limit times its effective price, scaled by the
//! ratio of the block's gas used to the summed gas limits.

use ethws_types::parse_quantity_u128;
use ethws_upstream::{RpcReceipt, RpcTransaction, UpstreamError};

/// Effective price per gas paid by `tx` given the block base fee.
pub fn effective_gas_price(
    tx: &RpcTransaction,
    base_fee: Option<u128>,
) -> Result<u128, UpstreamError> {
    if let Some(max_fee) = tx.max_fee_per_gas.as_deref() {
        let max_fee = parse_quantity_u128(max_fee)?;
        let priority = match tx.max_priority_fee_per_gas.as_deref() {
            Some(p) => parse_quantity_u128(p)?,
            None => 0,
        };
        let base = base_fee.unwrap_or(0);
        return Ok(max_fee.min(base.saturating_add(priority)));
    }
    match tx.gas_price.as_deref() {
        Some(price) => Ok(parse_quantity_u128(price)?),
        None => Ok(0),
    }
}

/// Exact fees from receipts. `None` when any receipt lacks an effective
/// gas price (pre-London nodes), in which case callers approximate.
pub fn exact_fees(receipts: &[RpcReceipt]) -> Result<Option<u128>, UpstreamError> {
    let mut total: u128 = 0;
    for receipt in receipts {
        let Some(price) = receipt.effective_gas_price.as_deref() else {
            return Ok(None);
        };
        let used = parse_quantity_u128(&receipt.gas_used)?;
        total = total.saturating_add(used.saturating_mul(parse_quantity_u128(price)?));
    }
    Ok(Some(total))
}

/// Approximate fees from transaction objects and the block's gas used.
pub fn approximate_fees(
    transactions: &[RpcTransaction],
    base_fee: Option<u128>,
    block_gas_used: u128,
) -> Result<u128, UpstreamError> {
    let mut weighted: u128 = 0;
    let mut gas_sum: u128 = 0;
    for tx in transactions {
        let gas = parse_quantity_u128(&tx.gas)?;
        gas_sum = gas_sum.saturating_add(gas);
        weighted = weighted.saturating_add(gas.saturating_mul(effective_gas_price(tx, base_fee)?));
    }
    if gas_sum == 0 {
        return Ok(0);
    }
    Ok(weighted.saturating_mul(block_gas_used) / gas_sum)
}
