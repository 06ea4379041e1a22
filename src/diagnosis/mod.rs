pub mod checks;
pub mod verdict;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{ChildSpendCandidate, Snapshot};
use crate::error::RescueResult;
use crate::fees;
use checks::Check;
use verdict::Verdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Info,
    /// Not finished yet; only shown while a diagnosis is in flight.
    Running,
}

impl CheckStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "✓",
            CheckStatus::Warn => "⚠",
            CheckStatus::Fail => "✗",
            CheckStatus::Info => "○",
            CheckStatus::Running => "⟳",
        }
    }
}

/// Outcome of one diagnostic check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: String,
    pub label: String,
    pub detail: String,
    pub status: CheckStatus,
}

impl CheckResult {
    pub fn new(
        id: &str,
        status: CheckStatus,
        label: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: id.to_string(),
            label: label.into(),
            detail: detail.into(),
            status,
        }
    }
}

/// Values derived once per snapshot and shared by every check.
#[derive(Debug, Clone)]
pub struct CheckContext<'a> {
    pub snapshot: &'a Snapshot,
    pub fee_rate: f64,
    pub target_rate: f64,
    pub eta_blocks: u32,
    pub candidates: Vec<ChildSpendCandidate>,
}

impl<'a> CheckContext<'a> {
    /// Fails only when the transaction weight is zero.
    pub fn new(snapshot: &'a Snapshot) -> RescueResult<Self> {
        let fee_rate = fees::effective_fee_rate(&snapshot.tx)?;
        Ok(Self {
            snapshot,
            fee_rate,
            target_rate: snapshot.next_block_target(),
            eta_blocks: fees::estimate_blocks(fee_rate, &snapshot.blocks, &snapshot.mempool),
            candidates: checks::find_child_spend_candidates(&snapshot.tx, &snapshot.outspends),
        })
    }
}

/// Results of running every check over one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    pub results: Vec<CheckResult>,
    pub candidates: Vec<ChildSpendCandidate>,
    pub fee_rate: f64,
    pub target_rate: f64,
    pub eta_blocks: u32,
}

/// Runs the fixed, ordered list of checks.
pub struct CheckPipeline {
    checks: Vec<Box<dyn Check + Send + Sync>>,
}

impl CheckPipeline {
    pub fn new() -> Self {
        Self {
            checks: checks::default_checks(),
        }
    }

    /// One running placeholder per check, in report order.
    pub fn pending(&self) -> Vec<CheckResult> {
        self.checks
            .iter()
            .map(|check| CheckResult::new(check.id(), CheckStatus::Running, check.id(), "Checking..."))
            .collect()
    }

    pub fn run(&self, snapshot: &Snapshot) -> RescueResult<CheckReport> {
        let ctx = CheckContext::new(snapshot)?;
        let results: Vec<CheckResult> = self
            .checks
            .iter()
            .map(|check| {
                let result = check.run(&ctx);
                debug!(check = check.id(), status = ?result.status, "{}", result.label);
                result
            })
            .collect();

        Ok(CheckReport {
            results,
            candidates: ctx.candidates,
            fee_rate: ctx.fee_rate,
            target_rate: ctx.target_rate,
            eta_blocks: ctx.eta_blocks,
        })
    }
}

impl Default for CheckPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Full result of one diagnosis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub txid: String,
    pub checks: Vec<CheckResult>,
    pub candidates: Vec<ChildSpendCandidate>,
    pub verdict: Verdict,
    pub fetched_at: DateTime<Utc>,
}

/// Run the checks and synthesize a verdict. Pure and synchronous.
pub fn diagnose(snapshot: &Snapshot) -> RescueResult<Diagnosis> {
    let report = CheckPipeline::new().run(snapshot)?;
    let verdict = verdict::synthesize(snapshot, &report);
    Ok(Diagnosis {
        txid: snapshot.tx.txid.clone(),
        checks: report.results,
        candidates: report.candidates,
        verdict,
        fetched_at: snapshot.fetched_at,
    })
}
