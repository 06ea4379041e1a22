//! Unsigned rescue transactions: fee-bumping replacements and child spends.
//!
//! Builders only assemble PSBTs. Nothing here touches keys or signs.

pub mod child;
pub mod replace;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bitcoin::psbt::Psbt;
use bitcoin::{OutPoint, Txid};
use std::str::FromStr;

use crate::core::tx::bytes_to_hex;
use crate::error::{RescueError, RescueResult};

pub use child::{ChildSpendPsbt, build_child_spend};
pub use replace::{ReplacementPsbt, build_replacement};

/// Serialized forms of one PSBT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPsbt {
    pub base64: String,
    pub hex: String,
}

impl EncodedPsbt {
    pub fn new(psbt: &Psbt) -> Self {
        let bytes = psbt.serialize();
        Self {
            base64: STANDARD.encode(&bytes),
            hex: bytes_to_hex(&bytes),
        }
    }
}

fn outpoint(txid: &str, vout: u32) -> RescueResult<OutPoint> {
    let txid = Txid::from_str(txid)
        .map_err(|e| RescueError::ConstructionFailed(format!("bad txid {txid}: {e}")))?;
    Ok(OutPoint::new(txid, vout))
}

fn psbt_from_unsigned(tx: bitcoin::Transaction) -> RescueResult<Psbt> {
    Psbt::from_unsigned_tx(tx).map_err(|e| RescueError::ConstructionFailed(e.to_string()))
}
