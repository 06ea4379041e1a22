use super::{CheckContext, CheckResult, CheckStatus};
use crate::core::tx::RBF_SIGNAL_THRESHOLD;
use crate::core::{ChildSpendCandidate, OutspendStatus, Transaction};
use crate::fees;
use crate::format::{format_block_estimate, format_fee_rate, group_thousands};

/// Vbytes of higher-paying transactions beyond which the position is a failure.
const CONGESTED_VSIZE_AHEAD: u64 = 4_000_000;

/// A single diagnostic over one snapshot.
pub trait Check {
    fn id(&self) -> &'static str;
    fn run(&self, ctx: &CheckContext<'_>) -> CheckResult;
}

/// The six checks, in the order they are reported.
pub fn default_checks() -> Vec<Box<dyn Check + Send + Sync>> {
    vec![
        Box::new(ConfirmationCheck),
        Box::new(ReplaceSignalCheck),
        Box::new(ChildSpendCheck),
        Box::new(FeeAdequacyCheck),
        Box::new(MempoolPositionCheck),
        Box::new(WaitEstimateCheck),
    ]
}

/// Unspent, addressable outputs worth at least their dust limit.
pub fn find_child_spend_candidates(
    tx: &Transaction,
    outspends: &[OutspendStatus],
) -> Vec<ChildSpendCandidate> {
    tx.outputs
        .iter()
        .enumerate()
        .filter(|(i, _)| !outspends.get(*i).is_some_and(|o| o.spent))
        .filter_map(|(i, out)| {
            let address = out.address.as_ref()?;
            (out.value >= out.script_kind.dust_limit()).then(|| ChildSpendCandidate {
                output_index: i,
                address: address.clone(),
                value: out.value,
                script_pubkey: out.script_pubkey.clone(),
                script_kind: out.script_kind,
            })
        })
        .collect()
}

// --- Individual Checks ---

struct ConfirmationCheck;
impl Check for ConfirmationCheck {
    fn id(&self) -> &'static str { "confirmation-status" }
    fn run(&self, ctx: &CheckContext<'_>) -> CheckResult {
        let status = &ctx.snapshot.tx.status;
        if status.confirmed {
            let detail = match status.block_height {
                Some(h) => format!("Block #{}", group_thousands(h as u64)),
                None => "Included in a block".to_string(),
            };
            CheckResult::new(self.id(), CheckStatus::Pass, "Transaction confirmed", detail)
        } else {
            CheckResult::new(
                self.id(),
                CheckStatus::Info,
                "Transaction found in mempool",
                "Unconfirmed - awaiting inclusion in a block",
            )
        }
    }
}

struct ReplaceSignalCheck;
impl Check for ReplaceSignalCheck {
    fn id(&self) -> &'static str { "rbf-signaling" }
    fn run(&self, ctx: &CheckContext<'_>) -> CheckResult {
        let inputs = &ctx.snapshot.tx.inputs;
        if inputs.is_empty() {
            return CheckResult::new(
                self.id(),
                CheckStatus::Warn,
                "No inputs to inspect",
                "Replaceability cannot be determined without inputs",
            );
        }
        match inputs.iter().find(|i| i.sequence < RBF_SIGNAL_THRESHOLD) {
            Some(input) => CheckResult::new(
                self.id(),
                CheckStatus::Pass,
                "RBF signaled",
                format!("sequence: 0x{:08x}", input.sequence),
            ),
            None => CheckResult::new(
                self.id(),
                CheckStatus::Warn,
                "RBF not explicitly signaled",
                "No input sequence below 0xfffffffe - full-RBF nodes may still relay a replacement",
            ),
        }
    }
}

struct ChildSpendCheck;
impl Check for ChildSpendCheck {
    fn id(&self) -> &'static str { "cpfp-feasibility" }
    fn run(&self, ctx: &CheckContext<'_>) -> CheckResult {
        match ctx.candidates.len() {
            0 => CheckResult::new(
                self.id(),
                CheckStatus::Warn,
                "No CPFP candidates",
                "All outputs already spent, unspendable, or below dust limit",
            ),
            n => CheckResult::new(
                self.id(),
                CheckStatus::Pass,
                "CPFP possible",
                format!(
                    "{n} unspent output{} available to spend",
                    if n > 1 { "s" } else { "" }
                ),
            ),
        }
    }
}

struct FeeAdequacyCheck;
impl Check for FeeAdequacyCheck {
    fn id(&self) -> &'static str { "fee-analysis" }
    fn run(&self, ctx: &CheckContext<'_>) -> CheckResult {
        let label = format!("Fee rate: {}", format_fee_rate(ctx.fee_rate));
        let target = format_fee_rate(ctx.target_rate);
        if ctx.fee_rate >= ctx.target_rate {
            CheckResult::new(
                self.id(),
                CheckStatus::Pass,
                label,
                format!("At or above next-block target ({target})"),
            )
        } else if ctx.fee_rate >= ctx.snapshot.fees.hour {
            CheckResult::new(
                self.id(),
                CheckStatus::Warn,
                label,
                format!("Below next-block target ({target}) but within hourly range"),
            )
        } else {
            CheckResult::new(
                self.id(),
                CheckStatus::Fail,
                label,
                format!("Well below next-block target of {target}"),
            )
        }
    }
}

struct MempoolPositionCheck;
impl Check for MempoolPositionCheck {
    fn id(&self) -> &'static str { "mempool-position" }
    fn run(&self, ctx: &CheckContext<'_>) -> CheckResult {
        let mempool = &ctx.snapshot.mempool;
        let ahead = fees::vsize_ahead(ctx.fee_rate, mempool);
        let total = mempool.count;

        if ahead == 0 {
            return CheckResult::new(
                self.id(),
                CheckStatus::Pass,
                "Near front of mempool",
                format!(
                    "Among the highest-fee transactions ({} total in mempool)",
                    group_thousands(total)
                ),
            );
        }

        // Rank by count, proportional to the share of vsize ahead.
        let position = if mempool.vsize > 0 {
            ((ahead as f64 / mempool.vsize as f64 * total as f64).round() as u64).min(total)
        } else {
            0
        };
        let status = if ahead > CONGESTED_VSIZE_AHEAD {
            CheckStatus::Fail
        } else {
            CheckStatus::Info
        };
        CheckResult::new(
            self.id(),
            status,
            format!(
                "Mempool position: ~{} of {}",
                group_thousands(position),
                group_thousands(total)
            ),
            format!(
                "{:.1} MvB of higher-fee transactions ahead",
                ahead as f64 / 1_000_000.0
            ),
        )
    }
}

struct WaitEstimateCheck;
impl Check for WaitEstimateCheck {
    fn id(&self) -> &'static str { "wait-estimate" }
    fn run(&self, ctx: &CheckContext<'_>) -> CheckResult {
        let blocks = ctx.eta_blocks;
        let label = format!("Estimated wait: {}", format_block_estimate(blocks));
        match blocks {
            0..=1 => CheckResult::new(
                self.id(),
                CheckStatus::Pass,
                label,
                "Should confirm in the next block",
            ),
            2..=6 => CheckResult::new(
                self.id(),
                CheckStatus::Warn,
                label,
                format!("~{blocks} blocks at current fee rate"),
            ),
            145.. => CheckResult::new(
                self.id(),
                CheckStatus::Fail,
                label,
                "Could take over a day at current fee rate",
            ),
            _ => CheckResult::new(
                self.id(),
                CheckStatus::Fail,
                label,
                format!("~{blocks} blocks at current fee rate"),
            ),
        }
    }
}
