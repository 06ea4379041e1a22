use serde::{Deserialize, Serialize};
use std::fmt;

/// Dust limit for script kinds without a dedicated entry.
pub const DEFAULT_DUST_LIMIT: u64 = 546;

/// Estimated vsize of a 1-in-1-out child for script kinds without a dedicated entry.
pub const DEFAULT_CHILD_VSIZE: u64 = 150;

/// Output script kinds as labelled by mempool/esplora (`scriptpubkey_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScriptKind {
    #[serde(rename = "v0_p2wpkh")]
    P2wpkh,
    #[serde(rename = "v0_p2wsh")]
    P2wsh,
    #[serde(rename = "v1_p2tr")]
    P2tr,
    #[serde(rename = "p2pkh")]
    P2pkh,
    #[serde(rename = "p2sh")]
    P2sh,
    #[serde(rename = "p2pk")]
    P2pk,
    #[serde(rename = "multisig")]
    Multisig,
    #[serde(rename = "op_return")]
    OpReturn,
    #[serde(rename = "anchor")]
    Anchor,
    #[serde(other, rename = "unknown")]
    Unknown,
}

impl ScriptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScriptKind::P2wpkh => "v0_p2wpkh",
            ScriptKind::P2wsh => "v0_p2wsh",
            ScriptKind::P2tr => "v1_p2tr",
            ScriptKind::P2pkh => "p2pkh",
            ScriptKind::P2sh => "p2sh",
            ScriptKind::P2pk => "p2pk",
            ScriptKind::Multisig => "multisig",
            ScriptKind::OpReturn => "op_return",
            ScriptKind::Anchor => "anchor",
            ScriptKind::Unknown => "unknown",
        }
    }

    /// Minimum economically spendable value for an output of this kind.
    pub fn dust_limit(self) -> u64 {
        match self {
            ScriptKind::P2wpkh => 294,
            ScriptKind::P2wsh => 330,
            ScriptKind::P2tr => 294,
            ScriptKind::P2pkh => 546,
            ScriptKind::P2sh => 540,
            _ => DEFAULT_DUST_LIMIT,
        }
    }

    /// Estimated vsize of a child transaction spending one output of this kind
    /// into a single output.
    pub fn child_vsize(self) -> u64 {
        match self {
            ScriptKind::P2wpkh => 110,
            ScriptKind::P2tr => 111,
            ScriptKind::P2wsh => 140,
            ScriptKind::P2sh => 148,
            ScriptKind::P2pkh => 192,
            _ => DEFAULT_CHILD_VSIZE,
        }
    }

    /// Native witness v0/v1 program.
    pub fn is_segwit(self) -> bool {
        matches!(self, ScriptKind::P2wpkh | ScriptKind::P2wsh | ScriptKind::P2tr)
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dust_limits() {
        assert_eq!(ScriptKind::P2wpkh.dust_limit(), 294);
        assert_eq!(ScriptKind::P2wsh.dust_limit(), 330);
        assert_eq!(ScriptKind::P2tr.dust_limit(), 294);
        assert_eq!(ScriptKind::P2pkh.dust_limit(), 546);
        assert_eq!(ScriptKind::P2sh.dust_limit(), 540);
        assert_eq!(ScriptKind::Unknown.dust_limit(), DEFAULT_DUST_LIMIT);
        assert_eq!(ScriptKind::Multisig.dust_limit(), DEFAULT_DUST_LIMIT);
    }

    #[test]
    fn child_vsizes() {
        assert_eq!(ScriptKind::P2wpkh.child_vsize(), 110);
        assert_eq!(ScriptKind::P2tr.child_vsize(), 111);
        assert_eq!(ScriptKind::P2wsh.child_vsize(), 140);
        assert_eq!(ScriptKind::P2sh.child_vsize(), 148);
        assert_eq!(ScriptKind::P2pkh.child_vsize(), 192);
        assert_eq!(ScriptKind::OpReturn.child_vsize(), DEFAULT_CHILD_VSIZE);
    }

    #[test]
    fn segwit_families() {
        assert!(ScriptKind::P2wpkh.is_segwit());
        assert!(ScriptKind::P2wsh.is_segwit());
        assert!(ScriptKind::P2tr.is_segwit());
        assert!(!ScriptKind::P2pkh.is_segwit());
        assert!(!ScriptKind::P2sh.is_segwit());
    }

    #[test]
    fn parses_esplora_labels() {
        let kind: ScriptKind = serde_json::from_str("\"v1_p2tr\"").unwrap();
        assert_eq!(kind, ScriptKind::P2tr);
        let kind: ScriptKind = serde_json::from_str("\"nonstandard\"").unwrap();
        assert_eq!(kind, ScriptKind::Unknown);
    }
}
