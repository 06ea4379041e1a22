use serde::{Deserialize, Serialize};
use tracing::debug;

use super::CheckReport;
use crate::core::tx::identify_change_output;
use crate::core::{ChildSpendCandidate, Snapshot, Transaction};
use crate::fees::{self, ChildSpendCost};
use crate::format::{format_block_estimate, format_fee_rate, sats_to_fiat};

/// ETA (in blocks) at or below which an underpaying transaction is only slow.
const SLOW_MAX_BLOCKS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Stuck,
    Slow,
    Fine,
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixMethod {
    Replace,
    ChildSpend,
    Wait,
    Accelerator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub method: FixMethod,
    pub label: String,
    pub is_primary: bool,
    pub cost_sats: u64,
    pub cost_fiat: Option<f64>,
    pub estimated_time: String,
    pub target_fee_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub severity: Severity,
    pub headline: String,
    pub explanation: String,
    pub recommendations: Vec<Recommendation>,
    pub can_replace: bool,
    pub can_child_spend: bool,
    /// Set exactly when neither a replacement nor a child spend is available.
    pub accelerator_fallback: bool,
    pub current_fee_rate: f64,
    pub target_fee_rate: f64,
}

impl Verdict {
    pub fn primary(&self) -> Option<&Recommendation> {
        self.recommendations.iter().find(|r| r.is_primary)
    }
}

/// Candidate a child spend should use: the change output if it qualifies,
/// otherwise the largest SegWit candidate, otherwise the largest candidate.
pub fn preferred_child_candidate<'a>(
    tx: &Transaction,
    candidates: impl IntoIterator<Item = &'a ChildSpendCandidate>,
) -> Option<&'a ChildSpendCandidate> {
    let candidates: Vec<&ChildSpendCandidate> = candidates.into_iter().collect();
    let change = identify_change_output(tx);
    candidates
        .iter()
        .copied()
        .find(|c| Some(c.output_index) == change)
        .or_else(|| {
            candidates
                .iter()
                .copied()
                .filter(|c| c.script_kind.is_segwit())
                .max_by_key(|c| c.value)
        })
        .or_else(|| candidates.iter().copied().max_by_key(|c| c.value))
}

/// The preferred candidate among those that can pay the child fee at
/// `target_rate` and keep a non-dust output.
pub fn viable_child_spend<'a>(
    tx: &Transaction,
    candidates: &'a [ChildSpendCandidate],
    target_rate: f64,
) -> Option<(&'a ChildSpendCandidate, ChildSpendCost)> {
    let viable = candidates.iter().filter(|c| {
        let cost = fees::child_spend_cost(tx, c, target_rate);
        c.value
            .checked_sub(cost.child_fee)
            .is_some_and(|rest| rest >= c.script_kind.dust_limit())
    });
    preferred_child_candidate(tx, viable).map(|c| (c, fees::child_spend_cost(tx, c, target_rate)))
}

/// A replacement is possible when a change output can absorb the extra fee
/// and stay at or above its dust limit.
fn replacement_fee(tx: &Transaction, target_rate: f64) -> Option<u64> {
    let change = &tx.outputs[identify_change_output(tx)?];
    let cost = fees::replacement_cost(tx, target_rate);
    let remaining = change.value.checked_sub(cost.additional_fee)?;
    (remaining >= change.script_kind.dust_limit()).then_some(cost.additional_fee)
}

/// Combine check results and the fee model into a severity and ranked fixes.
pub fn synthesize(snapshot: &Snapshot, report: &CheckReport) -> Verdict {
    let tx = &snapshot.tx;
    let current = report.fee_rate;
    let target = report.target_rate;

    let mut verdict = Verdict {
        severity: Severity::Confirmed,
        headline: String::new(),
        explanation: String::new(),
        recommendations: Vec::new(),
        can_replace: false,
        can_child_spend: false,
        accelerator_fallback: false,
        current_fee_rate: current,
        target_fee_rate: target,
    };

    if tx.status.confirmed {
        verdict.headline = "Already confirmed".into();
        verdict.explanation = match tx.status.block_height {
            Some(h) => format!("This transaction was confirmed in block #{h}. No action needed."),
            None => "This transaction is already in a block. No action needed.".into(),
        };
        return verdict;
    }

    let fiat = |sats: u64| {
        (snapshot.btc_price > 0.0).then(|| {
            (sats_to_fiat(sats, snapshot.btc_price) * 100.0).round() / 100.0
        })
    };
    let eta_at_target = format_block_estimate(fees::estimate_blocks(
        target,
        &snapshot.blocks,
        &snapshot.mempool,
    ));

    let replace_fee = replacement_fee(tx, target);
    let child = viable_child_spend(tx, &report.candidates, target).map(|(_, cost)| cost);
    verdict.can_replace = replace_fee.is_some();
    verdict.can_child_spend = child.is_some();

    if current >= target {
        verdict.severity = Severity::Fine;
        verdict.headline = "Looking good - should confirm soon".into();
        verdict.explanation = format!(
            "Your transaction pays {}, which is sufficient for timely confirmation. No action needed.",
            format_fee_rate(current)
        );
        verdict.recommendations.push(Recommendation {
            method: FixMethod::Wait,
            label: "Wait".into(),
            is_primary: true,
            cost_sats: 0,
            cost_fiat: None,
            estimated_time: format_block_estimate(report.eta_blocks),
            target_fee_rate: current,
        });
        return verdict;
    }

    let eta_now = format_block_estimate(report.eta_blocks);
    let (severity, adjective) = if report.eta_blocks <= SLOW_MAX_BLOCKS {
        (Severity::Slow, "Slow")
    } else {
        (Severity::Stuck, "Stuck")
    };
    verdict.severity = severity;
    verdict.explanation = format!(
        "Your transaction pays {} but the mempool needs {} for next-block confirmation.",
        format_fee_rate(current),
        format_fee_rate(target)
    );

    if let Some(fee) = replace_fee {
        verdict.recommendations.push(Recommendation {
            method: FixMethod::Replace,
            label: "RBF Bump".into(),
            is_primary: false,
            cost_sats: fee,
            cost_fiat: fiat(fee),
            estimated_time: eta_at_target.clone(),
            target_fee_rate: target,
        });
    }
    if let Some(cost) = child {
        verdict.recommendations.push(Recommendation {
            method: FixMethod::ChildSpend,
            label: "CPFP Child".into(),
            is_primary: false,
            cost_sats: cost.child_fee,
            cost_fiat: fiat(cost.child_fee),
            estimated_time: eta_at_target.clone(),
            target_fee_rate: (cost.child_fee_rate * 10.0).round() / 10.0,
        });
    }

    // Cheapest fix is primary; the earlier (replacement) wins a tie.
    if let Some(cheapest) = verdict
        .recommendations
        .iter_mut()
        .reduce(|best, r| if r.cost_sats < best.cost_sats { r } else { best })
    {
        cheapest.is_primary = true;
        verdict.headline = format!("{adjective}, but fixable - {eta_now} at current rate");
    } else {
        verdict.accelerator_fallback = true;
        verdict.headline = format!("{adjective} - no self-service fix available");
        verdict.explanation.push_str(
            " Neither a replacement nor a child transaction is possible; a mining pool accelerator is the remaining option.",
        );
        verdict.recommendations.push(Recommendation {
            method: FixMethod::Accelerator,
            label: "Use Accelerator".into(),
            is_primary: true,
            cost_sats: 0,
            cost_fiat: None,
            estimated_time: "~10-30 min".into(),
            target_fee_rate: target,
        });
    }

    if severity == Severity::Slow {
        verdict.recommendations.push(Recommendation {
            method: FixMethod::Wait,
            label: "Wait".into(),
            is_primary: false,
            cost_sats: 0,
            cost_fiat: None,
            estimated_time: eta_now,
            target_fee_rate: current,
        });
    }

    debug!(
        txid = %tx.txid,
        severity = ?verdict.severity,
        can_replace = verdict.can_replace,
        can_child_spend = verdict.can_child_spend,
        "verdict synthesized"
    );
    verdict
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::{make_output, make_snapshot, make_tx};
    use crate::core::script::ScriptKind;
    use crate::core::{MempoolInfo, TxOutput, TxStatus};
    use crate::diagnosis::CheckPipeline;

    fn verdict_for(snapshot: &Snapshot) -> Verdict {
        let report = CheckPipeline::new().run(snapshot).unwrap();
        synthesize(snapshot, &report)
    }

    fn rated(fee: u64) -> Transaction {
        Transaction {
            weight: 400,
            fee,
            ..make_tx()
        }
    }

    #[test]
    fn confirmed_has_no_recommendations() {
        let mut tx = make_tx();
        tx.status = TxStatus {
            confirmed: true,
            block_height: Some(880_000),
            ..TxStatus::default()
        };
        let v = verdict_for(&make_snapshot(tx));
        assert_eq!(v.severity, Severity::Confirmed);
        assert!(v.recommendations.is_empty());
        assert!(v.explanation.contains("880000"));
    }

    #[test]
    fn fine_when_at_target() {
        // 20 sat/vB == block 0 floor
        let v = verdict_for(&make_snapshot(rated(2_000)));
        assert_eq!(v.severity, Severity::Fine);
        assert_eq!(v.recommendations.len(), 1);
        assert_eq!(v.recommendations[0].method, FixMethod::Wait);
        assert!(v.recommendations[0].is_primary);
    }

    #[test]
    fn slow_when_eta_within_six_blocks() {
        // 15 sat/vB: templates say 2, no backlog
        let mut snap = make_snapshot(rated(1_500));
        snap.mempool = MempoolInfo::default();
        let v = verdict_for(&snap);
        assert_eq!(v.severity, Severity::Slow);
        assert!(v.headline.starts_with("Slow, but fixable"));
        assert!(v.recommendations.iter().any(|r| r.method == FixMethod::Wait && !r.is_primary));
    }

    #[test]
    fn stuck_when_eta_beyond_six_blocks() {
        let v = verdict_for(&make_snapshot(rated(500)));
        assert_eq!(v.severity, Severity::Stuck);
        assert!(v.headline.starts_with("Stuck, but fixable"));
        assert!(!v.recommendations.iter().any(|r| r.method == FixMethod::Wait));
    }

    #[test]
    fn cheaper_fix_is_primary() {
        // replacement: ceil(100 * 20) - 500 = 1500
        // child: ceil(210 * 20) - 500 = 3700
        let v = verdict_for(&make_snapshot(rated(500)));
        assert!(v.can_replace && v.can_child_spend);
        let primary = v.primary().unwrap();
        assert_eq!(primary.method, FixMethod::Replace);
        assert_eq!(primary.cost_sats, 1_500);
        let child = v
            .recommendations
            .iter()
            .find(|r| r.method == FixMethod::ChildSpend)
            .unwrap();
        assert_eq!(child.cost_sats, 3_700);
        assert!(!child.is_primary);
        assert_eq!(child.target_fee_rate, 33.6);
        assert_eq!(primary.cost_fiat, Some(1.5));
        assert_eq!(v.recommendations.iter().filter(|r| r.is_primary).count(), 1);
    }

    #[test]
    fn child_only_when_change_too_small() {
        let mut tx = rated(500);
        // change matches the P2WPKH input but cannot absorb 1500 sats;
        // the P2TR output pays for a child
        tx.outputs = vec![
            make_output(1_000),
            TxOutput {
                script_kind: ScriptKind::P2tr,
                ..make_output(50_000)
            },
        ];
        let v = verdict_for(&make_snapshot(tx));
        assert!(!v.can_replace);
        assert!(v.can_child_spend);
        assert_eq!(v.primary().unwrap().method, FixMethod::ChildSpend);
        assert!(!v.accelerator_fallback);
    }

    #[test]
    fn child_not_offered_when_output_cannot_cover_fee() {
        // child needs 3700 sats, more than either output holds
        for value in [1_000, 1_700] {
            let mut tx = rated(500);
            tx.outputs = vec![make_output(value)];
            let v = verdict_for(&make_snapshot(tx));
            assert!(!v.can_replace, "value {value}");
            assert!(!v.can_child_spend, "value {value}");
            assert!(v.accelerator_fallback);
            assert_eq!(v.primary().unwrap().method, FixMethod::Accelerator);
        }
    }

    #[test]
    fn child_skips_candidate_left_below_dust() {
        let mut tx = rated(500);
        // 3700 + 293 leaves one sat under the P2WPKH dust limit
        tx.outputs = vec![make_output(3_993)];
        let cands = crate::diagnosis::checks::find_child_spend_candidates(&tx, &[]);
        assert!(viable_child_spend(&tx, &cands, 20.0).is_none());
        tx.outputs = vec![make_output(3_994)];
        let cands = crate::diagnosis::checks::find_child_spend_candidates(&tx, &[]);
        let (c, cost) = viable_child_spend(&tx, &cands, 20.0).unwrap();
        assert_eq!(c.output_index, 0);
        assert_eq!(cost.child_fee, 3_700);
    }

    #[test]
    fn empty_first_block_range_is_not_fine() {
        // 0.5 sat/vB; without a known floor the target is the fastest rate
        let mut snap = make_snapshot(rated(50));
        snap.blocks[0].fee_range.clear();
        let v = verdict_for(&snap);
        assert_eq!(v.target_fee_rate, 50.0);
        assert_ne!(v.severity, Severity::Fine);
        assert_ne!(v.primary().unwrap().method, FixMethod::Wait);
    }

    #[test]
    fn accelerator_when_nothing_works() {
        let mut tx = rated(500);
        tx.outputs = vec![TxOutput {
            address: None,
            script_kind: ScriptKind::OpReturn,
            ..make_output(0)
        }];
        let v = verdict_for(&make_snapshot(tx));
        assert!(!v.can_replace && !v.can_child_spend);
        assert!(v.accelerator_fallback);
        let primary = v.primary().unwrap();
        assert_eq!(primary.method, FixMethod::Accelerator);
        assert!(v.headline.contains("no self-service fix"));
    }

    #[test]
    fn no_fiat_without_price() {
        let mut snap = make_snapshot(rated(500));
        snap.btc_price = 0.0;
        let v = verdict_for(&snap);
        assert!(v.recommendations.iter().all(|r| r.cost_fiat.is_none()));
    }

    #[test]
    fn target_rate_matches_fee_check() {
        let mut snap = make_snapshot(rated(500));
        snap.blocks.clear();
        snap.mempool = MempoolInfo::default();
        let v = verdict_for(&snap);
        assert_eq!(v.target_fee_rate, 50.0);
        assert_eq!(v.current_fee_rate, 5.0);
        // no block data: ETA 1 but below target
        assert_eq!(v.severity, Severity::Slow);
    }

    #[test]
    fn preferred_candidate_is_change() {
        let tx = make_tx();
        let cands = crate::diagnosis::checks::find_child_spend_candidates(&tx, &[]);
        // outputs 49,000 and 50,000 are both round; change heuristic picks the last
        assert_eq!(preferred_child_candidate(&tx, &cands).unwrap().output_index, 1);
    }

    #[test]
    fn preferred_candidate_prefers_segwit_over_larger_legacy() {
        let mut tx = make_tx();
        tx.outputs = vec![];
        let cands = vec![
            ChildSpendCandidate {
                output_index: 0,
                address: "1abc".into(),
                value: 90_000,
                script_pubkey: String::new(),
                script_kind: ScriptKind::P2pkh,
            },
            ChildSpendCandidate {
                output_index: 1,
                address: "bc1q".into(),
                value: 10_000,
                script_pubkey: String::new(),
                script_kind: ScriptKind::P2wpkh,
            },
        ];
        assert_eq!(preferred_child_candidate(&tx, &cands).unwrap().output_index, 1);
        assert!(preferred_child_candidate(&tx, std::iter::empty()).is_none());
    }
}
