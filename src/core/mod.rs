pub mod pipeline;
pub mod script;
pub mod tx;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use script::ScriptKind;

/// A transaction as returned by `GET /tx/{txid}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    pub version: i32,
    pub locktime: u32,
    pub size: u64,
    pub weight: u64,
    pub fee: u64,
    #[serde(rename = "vin")]
    pub inputs: Vec<TxInput>,
    #[serde(rename = "vout")]
    pub outputs: Vec<TxOutput>,
    pub status: TxStatus,
}

impl Transaction {
    /// Virtual size in vbytes (weight / 4, unrounded).
    pub fn vsize(&self) -> f64 {
        self.weight as f64 / 4.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxInput {
    /// Txid of the funding transaction.
    pub txid: String,
    pub vout: u32,
    /// The output being spent. Absent only for coinbase inputs.
    #[serde(default)]
    pub prevout: Option<TxOutput>,
    /// Hex-encoded scriptSig.
    #[serde(rename = "scriptsig", default)]
    pub script_sig: String,
    #[serde(default)]
    pub witness: Option<Vec<String>>,
    #[serde(default)]
    pub is_coinbase: bool,
    pub sequence: u32,
}

impl TxInput {
    pub fn has_witness(&self) -> bool {
        self.witness.as_ref().is_some_and(|w| !w.is_empty())
    }

    pub fn prevout_kind(&self) -> Option<ScriptKind> {
        self.prevout.as_ref().map(|p| p.script_kind)
    }
}

/// An output, also used for the prevout an input spends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Hex-encoded scriptPubKey.
    #[serde(rename = "scriptpubkey")]
    pub script_pubkey: String,
    #[serde(rename = "scriptpubkey_type")]
    pub script_kind: ScriptKind,
    /// Absent for unspendable outputs such as OP_RETURN.
    #[serde(rename = "scriptpubkey_address", default)]
    pub address: Option<String>,
    pub value: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStatus {
    pub confirmed: bool,
    #[serde(default)]
    pub block_height: Option<u32>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub block_time: Option<i64>,
}

/// Spend status of one output, from `GET /tx/{txid}/outspends`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutspendStatus {
    pub spent: bool,
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vin: Option<u32>,
    #[serde(default)]
    pub status: Option<TxStatus>,
}

/// Fee targets in sat/vB from `GET /v1/fees/recommended`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecommendedFees {
    #[serde(rename = "fastestFee")]
    pub fastest: f64,
    #[serde(rename = "halfHourFee")]
    pub half_hour: f64,
    #[serde(rename = "hourFee")]
    pub hour: f64,
    #[serde(rename = "economyFee")]
    pub economy: f64,
    #[serde(rename = "minimumFee")]
    pub minimum: f64,
}

/// One projected block from `GET /v1/fees/mempool-blocks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MempoolBlock {
    #[serde(rename = "blockSize", default)]
    pub block_size: u64,
    #[serde(rename = "blockVSize", default)]
    pub block_vsize: f64,
    #[serde(rename = "nTx", default)]
    pub tx_count: u64,
    #[serde(rename = "totalFees", default)]
    pub total_fees: u64,
    #[serde(rename = "medianFee", default)]
    pub median_fee: f64,
    /// Ascending; index 0 is the lowest fee rate accepted into the block.
    #[serde(rename = "feeRange", default)]
    pub fee_range: Vec<f64>,
}

impl MempoolBlock {
    /// Lowest fee rate accepted into the block, when the range is known.
    pub fn min_fee_rate(&self) -> Option<f64> {
        self.fee_range.first().copied()
    }
}

/// Mempool summary from `GET /mempool`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MempoolInfo {
    pub count: u64,
    pub vsize: u64,
    #[serde(default)]
    pub total_fee: f64,
    /// `(feerate, vsize)` pairs sorted by descending feerate.
    #[serde(default)]
    pub fee_histogram: Vec<(f64, u64)>,
}

/// An unspent output of the stuck transaction that a child could spend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSpendCandidate {
    pub output_index: usize,
    pub address: String,
    pub value: u64,
    pub script_pubkey: String,
    pub script_kind: ScriptKind,
}

/// Everything one diagnosis run reads, fetched together and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tx: Transaction,
    pub raw_hex: String,
    pub outspends: Vec<OutspendStatus>,
    pub fees: RecommendedFees,
    pub blocks: Vec<MempoolBlock>,
    pub mempool: MempoolInfo,
    /// BTC price in USD; 0 when unknown.
    pub btc_price: f64,
    pub fetched_at: DateTime<Utc>,
}

impl Snapshot {
    /// Next-block minimum fee rate: the first projected block's floor when
    /// it is known, otherwise the generic "fastest" target.
    pub fn next_block_target(&self) -> f64 {
        self.blocks
            .first()
            .and_then(MempoolBlock::min_fee_rate)
            .unwrap_or(self.fees.fastest)
    }
}

#[cfg(test)]
pub mod fixtures {
    //! Shared test builders mirroring typical mempool.space payloads.

    use super::*;

    pub fn make_input() -> TxInput {
        TxInput {
            txid: "a".repeat(64),
            vout: 0,
            prevout: Some(TxOutput {
                script_pubkey: format!("0014{}", "ab".repeat(20)),
                script_kind: ScriptKind::P2wpkh,
                address: Some("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4".into()),
                value: 100_000,
            }),
            script_sig: String::new(),
            witness: Some(vec!["30".repeat(71), "02".repeat(33)]),
            is_coinbase: false,
            sequence: 0xffff_fffd,
        }
    }

    pub fn make_legacy_input() -> TxInput {
        TxInput {
            prevout: Some(TxOutput {
                script_pubkey: format!("76a914{}88ac", "ab".repeat(20)),
                script_kind: ScriptKind::P2pkh,
                address: Some("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa".into()),
                value: 100_000,
            }),
            script_sig: format!("47{}21{}", "ab".repeat(71), "cd".repeat(33)),
            witness: None,
            ..make_input()
        }
    }

    pub fn make_output(value: u64) -> TxOutput {
        TxOutput {
            script_pubkey: format!("0014{}", "cd".repeat(20)),
            script_kind: ScriptKind::P2wpkh,
            address: Some(format!("bc1qtest{}", "0".repeat(32))),
            value,
        }
    }

    pub fn make_tx() -> Transaction {
        Transaction {
            txid: "b".repeat(64),
            version: 2,
            locktime: 0,
            size: 225,
            weight: 561,
            fee: 1_000,
            inputs: vec![make_input()],
            outputs: vec![
                make_output(49_000),
                TxOutput {
                    address: Some(format!("bc1qchange{}", "0".repeat(30))),
                    ..make_output(50_000)
                },
            ],
            status: TxStatus::default(),
        }
    }

    pub fn make_fees() -> RecommendedFees {
        RecommendedFees {
            fastest: 50.0,
            half_hour: 30.0,
            hour: 15.0,
            economy: 5.0,
            minimum: 1.0,
        }
    }

    pub fn make_blocks() -> Vec<MempoolBlock> {
        let block = |min: f64, median: f64, top: f64| MempoolBlock {
            block_size: 1_500_000,
            block_vsize: 1_000_000.0,
            tx_count: 3_000,
            total_fees: 50_000_000,
            median_fee: median,
            fee_range: vec![min, median, top],
        };
        vec![
            block(20.0, 30.0, 100.0),
            block(10.0, 15.0, 20.0),
            block(1.0, 5.0, 10.0),
        ]
    }

    pub fn make_mempool() -> MempoolInfo {
        MempoolInfo {
            count: 50_000,
            vsize: 200_000_000,
            total_fee: 500_000_000.0,
            fee_histogram: vec![
                (100.0, 500_000),
                (50.0, 2_000_000),
                (20.0, 10_000_000),
                (10.0, 50_000_000),
                (5.0, 80_000_000),
                (1.0, 57_500_000),
            ],
        }
    }

    pub fn make_snapshot(tx: Transaction) -> Snapshot {
        let outspends = vec![OutspendStatus::default(); tx.outputs.len()];
        Snapshot {
            tx,
            raw_hex: String::new(),
            outspends,
            fees: make_fees(),
            blocks: make_blocks(),
            mempool: make_mempool(),
            btc_price: 100_000.0,
            fetched_at: Utc::now(),
        }
    }
}
