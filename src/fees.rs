//! Fee-rate arithmetic, fix costs, and confirmation ETA estimates.
//!
//! All functions are pure. Fee rates are sat/vB, sizes are vbytes, fees are sats.

use serde::{Deserialize, Serialize};

use crate::core::{ChildSpendCandidate, MempoolBlock, MempoolInfo, Transaction};
use crate::error::{RescueError, RescueResult};

/// Approximate capacity of one block in vbytes.
const BLOCK_VSIZE: u64 = 1_000_000;

/// Blocks added past the projection window when a fee rate clears none of it.
const BEYOND_PROJECTION_PENALTY: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementCost {
    pub new_fee: u64,
    /// Always at least 1 sat, so the replacement strictly increases the fee.
    pub additional_fee: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChildSpendCost {
    pub child_fee: u64,
    pub child_vsize: u64,
    /// Fee rate the child itself pays.
    pub child_fee_rate: f64,
}

/// Effective fee rate of a transaction.
pub fn effective_fee_rate(tx: &Transaction) -> RescueResult<f64> {
    if tx.weight == 0 {
        return Err(RescueError::ConstructionFailed(
            "Transaction weight must be positive.".into(),
        ));
    }
    Ok(tx.fee as f64 / tx.vsize())
}

/// Cost of replacing `tx` with an otherwise identical transaction at `target_rate`.
pub fn replacement_cost(tx: &Transaction, target_rate: f64) -> ReplacementCost {
    let new_fee = (tx.vsize() * target_rate).ceil() as u64;
    let additional_fee = new_fee.saturating_sub(tx.fee).max(1);
    ReplacementCost {
        new_fee,
        additional_fee,
    }
}

/// Fee a 1-in-1-out child spending `candidate` must pay so that the parent
/// and child together reach `target_rate`.
///
/// Never less than 1 sat/vB of the child alone.
pub fn child_spend_cost(
    parent: &Transaction,
    candidate: &ChildSpendCandidate,
    target_rate: f64,
) -> ChildSpendCost {
    let child_vsize = candidate.script_kind.child_vsize();
    let package_vsize = parent.vsize() + child_vsize as f64;
    let required_package_fee = (package_vsize * target_rate).ceil() as u64;
    let child_fee = required_package_fee
        .saturating_sub(parent.fee)
        .max(child_vsize);
    ChildSpendCost {
        child_fee,
        child_vsize,
        child_fee_rate: child_fee as f64 / child_vsize as f64,
    }
}

/// 1-based index of the first projected block whose floor `fee_rate` clears.
///
/// With no projections the answer is 1. A block without a known floor is
/// never cleared. Clearing none of them yields `len + 6`.
pub fn blocks_to_confirm(fee_rate: f64, blocks: &[MempoolBlock]) -> u32 {
    if blocks.is_empty() {
        return 1;
    }
    blocks
        .iter()
        .position(|block| block.min_fee_rate().is_some_and(|floor| fee_rate >= floor))
        .map(|i| i as u32 + 1)
        .unwrap_or(blocks.len() as u32 + BEYOND_PROJECTION_PENALTY)
}

/// Vbytes of mempool paying strictly more than `fee_rate`.
pub fn vsize_ahead(fee_rate: f64, mempool: &MempoolInfo) -> u64 {
    mempool
        .fee_histogram
        .iter()
        .filter(|(rate, _)| *rate > fee_rate)
        .map(|(_, vsize)| *vsize)
        .sum()
}

/// Blocks until the backlog ahead of `fee_rate` clears, plus the block being mined.
pub fn blocks_from_position(fee_rate: f64, mempool: &MempoolInfo) -> u32 {
    let ahead = vsize_ahead(fee_rate, mempool);
    if ahead == 0 {
        return 1;
    }
    (ahead.div_ceil(BLOCK_VSIZE) + 1) as u32
}

/// Pessimistic ETA combining the block templates and the mempool backlog.
pub fn estimate_blocks(fee_rate: f64, blocks: &[MempoolBlock], mempool: &MempoolInfo) -> u32 {
    blocks_to_confirm(fee_rate, blocks).max(blocks_from_position(fee_rate, mempool))
}
