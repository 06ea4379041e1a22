use std::str::FromStr;

use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, Network, ScriptBuf, Sequence, TxIn, TxOut, Witness};
use tracing::debug;

use super::{EncodedPsbt, outpoint, psbt_from_unsigned};
use crate::core::tx::{RBF_MAX_SEQUENCE, hex_to_bytes, is_segwit_type};
use crate::core::{ChildSpendCandidate, Transaction};
use crate::error::{RescueError, RescueResult};
use crate::fees;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildSpendPsbt {
    pub base64: String,
    pub hex: String,
    pub child_fee: u64,
    pub output_value: u64,
}

/// Parse a destination address and check it belongs to `network`.
pub fn parse_destination(address: &str, network: Network) -> RescueResult<Address> {
    Address::from_str(address.trim())
        .and_then(|a| a.require_network(network))
        .map_err(|e| RescueError::InvalidInput(format!("Bad destination address: {e}")))
}

/// Build an unsigned 1-in-1-out child spending `candidate` so the parent and
/// child together pay `target_rate`.
///
/// `output_value + child_fee` always equals the candidate's value.
pub fn build_child_spend(
    parent: &Transaction,
    candidate: &ChildSpendCandidate,
    target_rate: f64,
    destination: &str,
    network: Network,
) -> RescueResult<ChildSpendPsbt> {
    let cost = fees::child_spend_cost(parent, candidate, target_rate);

    if !is_segwit_type(candidate.script_kind) {
        return Err(RescueError::UnsupportedScriptType(candidate.script_kind));
    }

    let limit = candidate.script_kind.dust_limit();
    let output_value = candidate.value as i64 - cost.child_fee as i64;
    if output_value < limit as i64 {
        return Err(RescueError::OutputBelowDust {
            value: output_value,
            limit,
        });
    }
    let output_value = output_value as u64;

    let destination = parse_destination(destination, network)?;
    let vout = u32::try_from(candidate.output_index)
        .map_err(|_| RescueError::ConstructionFailed("Output index out of range.".into()))?;

    let unsigned = bitcoin::Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: outpoint(&parent.txid, vout)?,
            script_sig: ScriptBuf::new(),
            sequence: Sequence(RBF_MAX_SEQUENCE),
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(output_value),
            script_pubkey: destination.script_pubkey(),
        }],
    };
    let mut psbt = psbt_from_unsigned(unsigned)?;
    psbt.inputs[0].witness_utxo = Some(TxOut {
        value: Amount::from_sat(candidate.value),
        script_pubkey: ScriptBuf::from_bytes(hex_to_bytes(&candidate.script_pubkey)?),
    });

    let encoded = EncodedPsbt::new(&psbt);
    debug!(
        parent = %parent.txid,
        output_index = candidate.output_index,
        child_fee = cost.child_fee,
        output_value,
        "child spend psbt built"
    );
    Ok(ChildSpendPsbt {
        base64: encoded.base64,
        hex: encoded.hex,
        child_fee: cost.child_fee,
        output_value,
    })
}
