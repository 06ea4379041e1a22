use std::collections::HashMap;

use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, ScriptBuf, Sequence, TxIn, TxOut, Witness};
use tracing::debug;

use super::{EncodedPsbt, outpoint, psbt_from_unsigned};
use crate::core::tx::{
    RBF_MAX_SEQUENCE, extract_redeem_script, hex_to_bytes, identify_change_output,
    is_segwit_input, is_wrapped_segwit_input, parse_raw_tx,
};
use crate::core::{Transaction, TxInput};
use crate::error::{RescueError, RescueResult};
use crate::fees;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementPsbt {
    pub base64: String,
    pub hex: String,
    pub new_fee: u64,
    pub additional_fee: u64,
    pub change_index: usize,
}

/// Build an unsigned replacement of `tx` paying `target_rate`.
///
/// The extra fee comes out of the change output. `previous_hexes` maps the
/// funding txid of every legacy input to its raw hex.
pub fn build_replacement(
    tx: &Transaction,
    previous_hexes: &HashMap<String, String>,
    target_rate: f64,
) -> RescueResult<ReplacementPsbt> {
    let cost = fees::replacement_cost(tx, target_rate);
    if cost.additional_fee == 0 {
        return Err(RescueError::ConstructionFailed(
            "New fee is not higher than original fee.".into(),
        ));
    }

    let change_index = identify_change_output(tx).ok_or_else(|| {
        RescueError::ConstructionFailed("Cannot identify change output for fee adjustment.".into())
    })?;
    let change = &tx.outputs[change_index];
    let limit = change.script_kind.dust_limit();
    let new_change_value = change.value as i64 - cost.additional_fee as i64;
    if new_change_value < limit as i64 {
        return Err(RescueError::OutputBelowDust {
            value: new_change_value,
            limit,
        });
    }

    let input = tx
        .inputs
        .iter()
        .map(|vin| -> RescueResult<TxIn> {
            Ok(TxIn {
                previous_output: outpoint(&vin.txid, vin.vout)?,
                script_sig: ScriptBuf::new(),
                sequence: Sequence(vin.sequence.min(RBF_MAX_SEQUENCE)),
                witness: Witness::new(),
            })
        })
        .collect::<RescueResult<Vec<_>>>()?;

    let output = tx
        .outputs
        .iter()
        .enumerate()
        .map(|(i, vout)| -> RescueResult<TxOut> {
            let value = if i == change_index {
                new_change_value as u64
            } else {
                vout.value
            };
            Ok(TxOut {
                value: Amount::from_sat(value),
                script_pubkey: ScriptBuf::from_bytes(hex_to_bytes(&vout.script_pubkey)?),
            })
        })
        .collect::<RescueResult<Vec<_>>>()?;

    let unsigned = bitcoin::Transaction {
        version: Version(tx.version),
        lock_time: LockTime::from_consensus(tx.locktime),
        input,
        output,
    };
    let mut psbt = psbt_from_unsigned(unsigned)?;

    for (slot, vin) in psbt.inputs.iter_mut().zip(&tx.inputs) {
        if is_segwit_input(vin) {
            slot.witness_utxo = Some(witness_utxo(vin)?);
        } else {
            slot.non_witness_utxo = Some(previous_transaction(vin, previous_hexes)?);
        }
        if is_wrapped_segwit_input(vin) {
            slot.redeem_script = Some(ScriptBuf::from_bytes(extract_redeem_script(
                &vin.script_sig,
            )?));
        }
    }

    let encoded = EncodedPsbt::new(&psbt);
    debug!(
        txid = %tx.txid,
        new_fee = tx.fee + cost.additional_fee,
        additional_fee = cost.additional_fee,
        change_index,
        "replacement psbt built"
    );
    Ok(ReplacementPsbt {
        base64: encoded.base64,
        hex: encoded.hex,
        new_fee: tx.fee + cost.additional_fee,
        additional_fee: cost.additional_fee,
        change_index,
    })
}

fn witness_utxo(vin: &TxInput) -> RescueResult<TxOut> {
    let prevout = vin.prevout.as_ref().ok_or_else(|| {
        RescueError::ConstructionFailed(format!("Missing prevout for input {}:{}", vin.txid, vin.vout))
    })?;
    Ok(TxOut {
        value: Amount::from_sat(prevout.value),
        script_pubkey: ScriptBuf::from_bytes(hex_to_bytes(&prevout.script_pubkey)?),
    })
}

/// Full funding transaction for a legacy input, checked against the outpoint.
fn previous_transaction(
    vin: &TxInput,
    previous_hexes: &HashMap<String, String>,
) -> RescueResult<bitcoin::Transaction> {
    let hex = previous_hexes.get(&vin.txid).ok_or_else(|| {
        RescueError::ConstructionFailed(format!(
            "Missing raw transaction hex for legacy input {}",
            vin.txid
        ))
    })?;
    let prev = parse_raw_tx(hex)?;
    let txid = prev.compute_txid().to_string();
    if txid != vin.txid {
        return Err(RescueError::ConstructionFailed(format!(
            "Raw transaction {txid} does not fund input {}",
            vin.txid
        )));
    }
    Ok(prev)
}
