mod api;
mod config;
mod core;
mod diagnosis;
mod error;
mod fees;
mod format;
mod psbt;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::api::{MempoolClient, MempoolSource, validate_txid};
use crate::config::{Config, Network};
use crate::core::pipeline::{
    DiagnoseRequest, fetch_snapshot, legacy_previous_hexes, run_pipeline, track_confirmation,
};
use crate::core::Snapshot;
use crate::core::tx::is_rbf_signaling;
use crate::diagnosis::verdict::viable_child_spend;
use crate::diagnosis::{CheckPipeline, CheckStatus, Diagnosis, diagnose};
use crate::error::{RescueError, RescueResult};
use crate::format::{format_btc, format_fee_rate, format_sats, truncate_txid};
use crate::psbt::{build_child_spend, build_replacement};

#[derive(Parser)]
#[clap(
    name = "txrescue",
    about = "Diagnose stuck Bitcoin transactions and build unsigned rescue PSBTs",
    version
)]
pub struct Cli {
    /// Path to the TOML config file
    #[clap(long, global = true, default_value = "config.toml")]
    config: PathBuf,
    /// Override the configured network (mainnet, testnet4, signet)
    #[clap(long, global = true)]
    network: Option<Network>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[clap(about = "Explain why a transaction is not confirming and how to fix it")]
    Diagnose {
        txid: String,
        /// Print the full diagnosis as JSON
        #[clap(long)]
        json: bool,
    },
    #[clap(about = "Build an unsigned fee-bumping replacement (RBF) PSBT", alias = "rbf")]
    Replace {
        txid: String,
        /// Target fee rate in sat/vB; defaults to the next-block target
        #[clap(long, value_parser = parse_fee_rate)]
        fee_rate: Option<f64>,
    },
    #[clap(about = "Build an unsigned child-pays-for-parent (CPFP) PSBT", alias = "cpfp")]
    Child {
        txid: String,
        /// Address receiving the child's output
        #[clap(long)]
        to: String,
        /// Parent output to spend; defaults to the change output
        #[clap(long)]
        output: Option<usize>,
        /// Target fee rate in sat/vB for parent and child together
        #[clap(long, value_parser = parse_fee_rate)]
        fee_rate: Option<f64>,
    },
    #[clap(about = "Broadcast a signed raw transaction")]
    Broadcast { hex: String },
    #[clap(about = "Wait until a transaction confirms")]
    Track { txid: String },
}

fn parse_fee_rate(value: &str) -> Result<f64, String> {
    match value.parse::<f64>() {
        Ok(rate) if rate.is_finite() && rate > 0.0 => Ok(rate),
        _ => Err(format!("{value:?} is not a positive fee rate")),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("txrescue=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config);
    if let Some(network) = cli.network {
        config.network.network = network;
    }
    tracing::debug!("Config: {:?}", config);

    if let Err(e) = run(cli.command, config).await {
        tracing::debug!(code = e.kind().code(), "command failed");
        eprintln!("error: {}", e.user_message());
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: Config) -> RescueResult<()> {
    let base_url = config.network.api_base_url();
    let client = MempoolClient::new(
        base_url.as_str(),
        config.fetch.clone(),
        config.pricing.fallback_btc_usd,
    )?;
    tracing::info!("Using {} data source at {base_url}", config.network.network);

    match command {
        Commands::Diagnose { txid, json } => {
            if !json {
                let pending = CheckPipeline::new().pending();
                for check in &pending {
                    tracing::debug!(check = %check.id, "queued");
                }
                eprintln!("{} Running {} checks...", CheckStatus::Running.icon(), pending.len());
            }
            let diagnosis = diagnose_via_pipeline(Arc::new(client), &txid).await?;
            tracing::debug!(
                severity = ?diagnosis.verdict.severity,
                primary = ?diagnosis.verdict.primary().map(|r| r.method),
                "diagnosis complete"
            );
            if json {
                let out = serde_json::to_string_pretty(&diagnosis)
                    .map_err(|e| RescueError::ConstructionFailed(e.to_string()))?;
                println!("{out}");
            } else {
                print_diagnosis(&diagnosis);
            }
        }
        Commands::Replace { txid, fee_rate } => {
            let snapshot = unconfirmed_snapshot(&client, &txid).await?;
            let diagnosis = diagnose(&snapshot)?;
            let rate = fee_rate.unwrap_or(diagnosis.verdict.target_fee_rate);
            if !is_rbf_signaling(&snapshot.tx) {
                tracing::warn!("Original does not signal RBF; only full-RBF nodes will relay the replacement");
            }
            let hexes = legacy_previous_hexes(&client, &snapshot.tx).await?;
            let result = build_replacement(&snapshot.tx, &hexes, rate)?;

            println!("Replacement for {} at {}", truncate_txid(&snapshot.tx.txid, 8), format_fee_rate(rate));
            println!("  New fee:        {}", format_sats(result.new_fee));
            println!("  Additional fee: {}", format_sats(result.additional_fee));
            println!("  Change output:  #{}", result.change_index);
            println!("\nUnsigned PSBT (base64):\n{}", result.base64);
            println!("\nUnsigned PSBT (hex):\n{}", result.hex);
        }
        Commands::Child {
            txid,
            to,
            output,
            fee_rate,
        } => {
            let snapshot = unconfirmed_snapshot(&client, &txid).await?;
            let diagnosis = diagnose(&snapshot)?;
            let rate = fee_rate.unwrap_or(diagnosis.verdict.target_fee_rate);
            let candidate = match output {
                Some(index) => diagnosis
                    .candidates
                    .iter()
                    .find(|c| c.output_index == index)
                    .ok_or_else(|| {
                        RescueError::InvalidInput(format!(
                            "Output #{index} is spent, unspendable, or below dust."
                        ))
                    })?,
                None => viable_child_spend(&snapshot.tx, &diagnosis.candidates, rate)
                    .map(|(candidate, _)| candidate)
                    .ok_or(RescueError::NoFixPossible)?,
            };
            let result = build_child_spend(
                &snapshot.tx,
                candidate,
                rate,
                &to,
                config.network.network.bitcoin_network(),
            )?;

            println!(
                "Child of {} spending output #{} at {}",
                truncate_txid(&snapshot.tx.txid, 8),
                candidate.output_index,
                format_fee_rate(rate)
            );
            println!("  Child fee:    {}", format_sats(result.child_fee));
            println!("  Output value: {} ({})", format_sats(result.output_value), format_btc(result.output_value));
            println!("\nUnsigned PSBT (base64):\n{}", result.base64);
            println!("\nUnsigned PSBT (hex):\n{}", result.hex);
        }
        Commands::Broadcast { hex } => {
            let txid = client.broadcast(&hex).await?;
            println!("Broadcast accepted: {txid}");
        }
        Commands::Track { txid } => {
            let txid = validate_txid(&txid)?;
            let interval = Duration::from_secs(config.tracker.poll_interval_secs.max(1));
            println!("Tracking {} every {}s...", truncate_txid(txid, 8), interval.as_secs());
            let status = track_confirmation(&client, txid, interval, |status| {
                if !status.confirmed {
                    tracing::info!("still unconfirmed");
                }
            })
            .await?;
            match status.block_height {
                Some(height) => println!("Confirmed in block #{height}"),
                None => println!("Confirmed"),
            }
        }
    }
    Ok(())
}

/// Run one request through the pipeline and wait for its output.
async fn diagnose_via_pipeline<S: MempoolSource + 'static>(
    source: Arc<S>,
    txid: &str,
) -> RescueResult<Diagnosis> {
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let pipeline = tokio::spawn(run_pipeline(source, req_rx, out_tx));

    req_tx
        .send(DiagnoseRequest {
            txid: txid.to_string(),
        })
        .map_err(|_| RescueError::NetworkFailure(Some("pipeline stopped".into())))?;
    drop(req_tx);

    // the only request sent is generation 1
    let output = loop {
        let output = out_rx
            .recv()
            .await
            .ok_or_else(|| RescueError::NetworkFailure(Some("pipeline stopped".into())))?;
        if output.generation == 1 {
            break output;
        }
        tracing::debug!(generation = output.generation, "ignoring diagnosis from another request");
    };
    if let Err(e) = pipeline.await {
        tracing::warn!("Pipeline task ended abnormally: {e}");
    }
    output.result
}

async fn unconfirmed_snapshot(client: &MempoolClient, txid: &str) -> RescueResult<Snapshot> {
    let snapshot = fetch_snapshot(client, txid).await?;
    if snapshot.tx.status.confirmed {
        return Err(RescueError::AlreadyConfirmed);
    }
    Ok(snapshot)
}

fn print_diagnosis(diagnosis: &Diagnosis) {
    let verdict = &diagnosis.verdict;
    println!("Transaction {}", truncate_txid(&diagnosis.txid, 8));
    println!();
    for check in &diagnosis.checks {
        println!("  {} {}", check.status.icon(), check.label);
        println!("      {}", check.detail);
    }
    println!();
    println!("{}", verdict.headline);
    println!("{}", verdict.explanation);

    if verdict.recommendations.is_empty() {
        return;
    }
    println!();
    for rec in &verdict.recommendations {
        let marker = if rec.is_primary { "*" } else { " " };
        let fiat = rec
            .cost_fiat
            .map(|usd| format!(" (${usd:.2})"))
            .unwrap_or_default();
        println!(
            " {marker} {:<16} {:>14}{fiat}  {}  @ {}",
            rec.label,
            format_sats(rec.cost_sats),
            rec.estimated_time,
            format_fee_rate(rec.target_fee_rate)
        );
    }
}
