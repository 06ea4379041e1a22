use bitcoin::consensus::deserialize;
use bitcoin::hex::{DisplayHex, FromHex};
use thiserror::Error;

use super::script::ScriptKind;
use super::{Transaction, TxInput};
use crate::error::RescueError;

/// Sequence numbers below this signal opt-in replaceability.
pub const RBF_SIGNAL_THRESHOLD: u32 = 0xffff_fffe;

/// Highest sequence that still signals replaceability.
pub const RBF_MAX_SEQUENCE: u32 = 0xffff_fffd;

const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("hex string must have even length, got {0} characters")]
    OddLength(usize),
    #[error("invalid hex character {character:?} at position {position}")]
    InvalidHexCharacter { character: char, position: usize },
    #[error("empty scriptsig")]
    EmptyScript,
    #[error("unexpected opcode 0x{opcode:02x} at offset {offset}")]
    UnexpectedOpcode { opcode: u8, offset: usize },
    #[error("push of {len} bytes at offset {offset} exceeds buffer of {available} bytes")]
    PushExceedsBuffer {
        len: usize,
        offset: usize,
        available: usize,
    },
    #[error("raw transaction does not deserialize: {0}")]
    BadTransaction(String),
}

impl From<CodecError> for RescueError {
    fn from(err: CodecError) -> Self {
        RescueError::ConstructionFailed(err.to_string())
    }
}

/// Decode a hex string. Upper and lower case are both accepted.
pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>, CodecError> {
    if hex.len() % 2 != 0 {
        return Err(CodecError::OddLength(hex.len()));
    }
    Vec::<u8>::from_hex(hex).map_err(|_| {
        let (position, character) = hex
            .char_indices()
            .find(|(_, c)| !c.is_ascii_hexdigit())
            .unwrap_or((0, '?'));
        CodecError::InvalidHexCharacter {
            character,
            position,
        }
    })
}

/// Encode bytes as lowercase hex.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.to_lower_hex_string()
}

/// Parse a raw transaction from hex.
pub fn parse_raw_tx(hex: &str) -> Result<bitcoin::Transaction, CodecError> {
    let raw = hex_to_bytes(hex.trim())?;
    deserialize(&raw).map_err(|e| CodecError::BadTransaction(e.to_string()))
}

/// Recover the last element pushed by a push-only scriptSig.
///
/// For a P2SH-wrapped witness spend this is the redeem script. Only direct
/// pushes (1-75 bytes), OP_PUSHDATA1 and OP_PUSHDATA2 are understood.
pub fn extract_redeem_script(script_sig_hex: &str) -> Result<Vec<u8>, CodecError> {
    let script = hex_to_bytes(script_sig_hex)?;
    if script.is_empty() {
        return Err(CodecError::EmptyScript);
    }

    let mut offset = 0;
    let mut last: &[u8] = &[];
    while offset < script.len() {
        let opcode = script[offset];
        let (len, header) = match opcode {
            0x01..=0x4b => (opcode as usize, 1),
            OP_PUSHDATA1 => {
                let len = *script.get(offset + 1).ok_or(CodecError::PushExceedsBuffer {
                    len: 1,
                    offset: offset + 1,
                    available: 0,
                })?;
                (len as usize, 2)
            }
            OP_PUSHDATA2 => {
                let bytes = script.get(offset + 1..offset + 3).ok_or(
                    CodecError::PushExceedsBuffer {
                        len: 2,
                        offset: offset + 1,
                        available: script.len() - offset - 1,
                    },
                )?;
                (u16::from_le_bytes([bytes[0], bytes[1]]) as usize, 3)
            }
            _ => return Err(CodecError::UnexpectedOpcode { opcode, offset }),
        };

        let start = offset + header;
        let available = script.len() - start;
        if len > available {
            return Err(CodecError::PushExceedsBuffer {
                len,
                offset: start,
                available,
            });
        }
        last = &script[start..start + len];
        offset = start + len;
    }

    Ok(last.to_vec())
}

/// Whether outputs of this kind are spent with witness data.
pub fn is_segwit_type(kind: ScriptKind) -> bool {
    kind.is_segwit()
}

/// Whether an input is a witness spend: a native witness program, or a
/// script-hash output spent with witness data (wrapped SegWit).
pub fn is_segwit_input(input: &TxInput) -> bool {
    match input.prevout_kind() {
        Some(kind) if kind.is_segwit() => true,
        Some(ScriptKind::P2sh) => input.has_witness(),
        _ => false,
    }
}

/// A P2SH output spent with witness data; its scriptSig carries the redeem script.
pub fn is_wrapped_segwit_input(input: &TxInput) -> bool {
    input.prevout_kind() == Some(ScriptKind::P2sh) && input.has_witness()
}

/// Check if any input signals RBF (sequence < 0xFFFFFFFE).
pub fn is_rbf_signaling(tx: &Transaction) -> bool {
    tx.inputs.iter().any(|inp| inp.sequence < RBF_SIGNAL_THRESHOLD)
}

/// Round amounts (whole thousands of sats) are usually payments; change is the remainder.
fn is_round_amount(value: u64) -> bool {
    value % 1_000 == 0
}

/// Guess which output returns change to the sender.
///
/// Outputs sharing a script type with any input are change candidates. With
/// several, the last non-round one wins, then the last candidate. Without any
/// type match, the last output that has an address is used.
pub fn identify_change_output(tx: &Transaction) -> Option<usize> {
    let input_kinds: Vec<ScriptKind> = tx.inputs.iter().filter_map(TxInput::prevout_kind).collect();

    let matching: Vec<usize> = tx
        .outputs
        .iter()
        .enumerate()
        .filter(|(_, out)| out.address.is_some() && input_kinds.contains(&out.script_kind))
        .map(|(i, _)| i)
        .collect();

    match matching.as_slice() {
        [] => tx.outputs.iter().rposition(|out| out.address.is_some()),
        [only] => Some(*only),
        several => several
            .iter()
            .rev()
            .find(|&&i| !is_round_amount(tx.outputs[i].value))
            .or(several.last())
            .copied(),
    }
}
