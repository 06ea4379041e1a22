use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::api::{MempoolSource, validate_txid};
use crate::core::tx::is_segwit_input;
use crate::core::{Snapshot, Transaction, TxStatus};
use crate::diagnosis::{Diagnosis, diagnose};
use crate::error::{ErrorKind, RescueResult};

/// Fetch everything one diagnosis needs, concurrently, as one snapshot.
///
/// Any failed read fails the whole snapshot; a partial one is never returned.
pub async fn fetch_snapshot<S: MempoolSource>(source: &S, txid: &str) -> RescueResult<Snapshot> {
    let txid = validate_txid(txid)?;
    let (mut tx, status, raw_hex, outspends, fees, blocks, mempool, btc_price) = tokio::try_join!(
        source.transaction(txid),
        source.status(txid),
        source.raw_hex(txid),
        source.outspends(txid),
        source.recommended_fees(),
        source.mempool_blocks(),
        source.mempool_info(),
        async { RescueResult::Ok(source.btc_price().await) },
    )?;
    tx.status = status;

    Ok(Snapshot {
        tx,
        raw_hex,
        outspends,
        fees,
        blocks,
        mempool,
        btc_price,
        fetched_at: Utc::now(),
    })
}

/// Raw hex of the funding transaction of every legacy input, keyed by txid.
pub async fn legacy_previous_hexes<S: MempoolSource>(
    source: &S,
    tx: &Transaction,
) -> RescueResult<HashMap<String, String>> {
    let mut hexes = HashMap::new();
    for input in tx.inputs.iter().filter(|i| !is_segwit_input(i)) {
        if hexes.contains_key(&input.txid) {
            continue;
        }
        let hex = source.raw_hex(&input.txid).await?;
        hexes.insert(input.txid.clone(), hex);
    }
    debug!(txid = %tx.txid, count = hexes.len(), "fetched legacy funding transactions");
    Ok(hexes)
}

/// Poll the confirmation status of `txid` until it confirms.
///
/// Transient source failures are logged and retried on the next tick.
/// `on_poll` sees every status that was fetched.
pub async fn track_confirmation<S: MempoolSource>(
    source: &S,
    txid: &str,
    interval: Duration,
    mut on_poll: impl FnMut(&TxStatus),
) -> RescueResult<TxStatus> {
    let txid = validate_txid(txid)?;
    loop {
        match source.status(txid).await {
            Ok(status) => {
                on_poll(&status);
                if status.confirmed {
                    info!(txid, height = ?status.block_height, "transaction confirmed");
                    return Ok(status);
                }
            }
            Err(e) => match e.kind() {
                ErrorKind::RateLimited | ErrorKind::SourceUnavailable | ErrorKind::NetworkFailure => {
                    warn!(txid, "status poll failed: {e}");
                }
                _ => return Err(e),
            },
        }
        tokio::time::sleep(interval).await;
    }
}

/// A request to diagnose one transaction.
#[derive(Debug, Clone)]
pub struct DiagnoseRequest {
    pub txid: String,
}

/// Messages from the pipeline to the presenter.
#[derive(Debug)]
pub struct PipelineOutput {
    pub generation: u64,
    pub txid: String,
    pub result: RescueResult<Diagnosis>,
}

/// Run the pipeline: receive diagnosis requests, fetch, diagnose, forward.
///
/// Every request supersedes the ones before it. Finished diagnoses come back
/// to this loop, which forwards only those of the latest accepted request;
/// pending requests are accepted before any finished diagnosis is checked.
pub async fn run_pipeline<S: MempoolSource + 'static>(
    source: Arc<S>,
    mut rx: mpsc::UnboundedReceiver<DiagnoseRequest>,
    out_tx: mpsc::UnboundedSender<PipelineOutput>,
) {
    let mut tasks: JoinSet<PipelineOutput> = JoinSet::new();
    let mut current: u64 = 0;
    let mut open = true;

    info!("Pipeline started, waiting for diagnosis requests...");

    while open || !tasks.is_empty() {
        tokio::select! {
            biased;
            request = rx.recv(), if open => {
                let Some(request) = request else {
                    open = false;
                    continue;
                };
                current += 1;
                let generation = current;
                debug!(generation, txid = %request.txid, "diagnosis requested");

                let source = Arc::clone(&source);
                tasks.spawn(async move {
                    let result = fetch_snapshot(source.as_ref(), &request.txid)
                        .await
                        .and_then(|snapshot| diagnose(&snapshot));
                    PipelineOutput {
                        generation,
                        txid: request.txid,
                        result,
                    }
                });
            }
            Some(joined) = tasks.join_next() => {
                let output = match joined {
                    Ok(output) => output,
                    Err(e) => {
                        warn!("Diagnosis task ended abnormally: {e}");
                        continue;
                    }
                };
                if output.generation != current {
                    debug!(generation = output.generation, txid = %output.txid, "dropping stale diagnosis");
                    continue;
                }
                if let Err(e) = &output.result {
                    warn!(txid = %output.txid, "diagnosis failed: {e}");
                }
                if out_tx.send(output).is_err() {
                    info!("Output channel closed, dropping diagnosis");
                }
            }
        }
    }

    info!("Pipeline shutting down after {current} requests");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::{
        make_blocks, make_fees, make_input, make_legacy_input, make_mempool, make_tx,
    };
    use crate::core::{MempoolBlock, MempoolInfo, OutspendStatus, RecommendedFees, TxInput};
    use crate::diagnosis::verdict::Severity;
    use crate::error::RescueError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// In-memory source. Transactions listed in `gates` block until notified.
    #[derive(Default)]
    struct FakeSource {
        txs: HashMap<String, Transaction>,
        hexes: HashMap<String, String>,
        gates: HashMap<String, Arc<Notify>>,
        statuses: Vec<RescueResult<TxStatus>>,
        status_calls: AtomicUsize,
        hex_calls: AtomicUsize,
    }

    impl FakeSource {
        fn with_tx(mut self, tx: Transaction) -> Self {
            self.txs.insert(tx.txid.clone(), tx);
            self
        }
    }

    impl MempoolSource for FakeSource {
        async fn transaction(&self, txid: &str) -> RescueResult<Transaction> {
            if let Some(gate) = self.gates.get(txid) {
                gate.notified().await;
            }
            self.txs.get(txid).cloned().ok_or(RescueError::TransactionNotFound)
        }

        async fn status(&self, txid: &str) -> RescueResult<TxStatus> {
            let n = self.status_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(scripted) = self.statuses.get(n) {
                return scripted.clone();
            }
            self.txs
                .get(txid)
                .map(|tx| tx.status.clone())
                .ok_or(RescueError::TransactionNotFound)
        }

        async fn raw_hex(&self, txid: &str) -> RescueResult<String> {
            self.hex_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.hexes.get(txid).cloned().unwrap_or_default())
        }

        async fn outspends(&self, txid: &str) -> RescueResult<Vec<OutspendStatus>> {
            let outputs = self.txs.get(txid).map_or(0, |tx| tx.outputs.len());
            Ok(vec![OutspendStatus::default(); outputs])
        }

        async fn recommended_fees(&self) -> RescueResult<RecommendedFees> {
            Ok(make_fees())
        }

        async fn mempool_blocks(&self) -> RescueResult<Vec<MempoolBlock>> {
            Ok(make_blocks())
        }

        async fn mempool_info(&self) -> RescueResult<MempoolInfo> {
            Ok(make_mempool())
        }

        async fn btc_price(&self) -> f64 {
            100_000.0
        }

        async fn broadcast(&self, _tx_hex: &str) -> RescueResult<String> {
            Ok("c".repeat(64))
        }
    }

    fn tx_with_id(c: char) -> Transaction {
        Transaction {
            txid: c.to_string().repeat(64),
            ..make_tx()
        }
    }

    #[tokio::test]
    async fn snapshot_uses_status_endpoint() {
        let tx = make_tx();
        let txid = tx.txid.clone();
        let source = FakeSource {
            statuses: vec![Ok(TxStatus {
                confirmed: true,
                block_height: Some(900_000),
                ..TxStatus::default()
            })],
            ..FakeSource::default()
        }
        .with_tx(tx);

        let snapshot = fetch_snapshot(&source, &txid).await.unwrap();
        assert!(snapshot.tx.status.confirmed);
        assert_eq!(snapshot.outspends.len(), 2);
        assert_eq!(snapshot.btc_price, 100_000.0);
        assert_eq!(snapshot.blocks.len(), 3);
    }

    #[tokio::test]
    async fn snapshot_fails_as_a_whole() {
        let source = FakeSource::default();
        let err = fetch_snapshot(&source, &"d".repeat(64)).await.unwrap_err();
        assert_eq!(err, RescueError::TransactionNotFound);
    }

    #[tokio::test]
    async fn snapshot_rejects_bad_txid_before_fetching() {
        let source = FakeSource::default();
        let err = fetch_snapshot(&source, "xyz").await.unwrap_err();
        assert!(matches!(err, RescueError::InvalidInput(_)));
        assert_eq!(source.status_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn legacy_hexes_are_fetched_once_per_funding_tx() {
        let mut tx = make_tx();
        tx.inputs = vec![
            make_legacy_input(),
            TxInput {
                vout: 1,
                ..make_legacy_input()
            },
            TxInput {
                txid: "e".repeat(64),
                ..make_input()
            },
        ];
        let source = FakeSource {
            hexes: HashMap::from([("a".repeat(64), "0200".to_string())]),
            ..FakeSource::default()
        };
        let hexes = legacy_previous_hexes(&source, &tx).await.unwrap();
        assert_eq!(hexes.len(), 1);
        assert_eq!(hexes[&"a".repeat(64)], "0200");
        assert_eq!(source.hex_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tracker_polls_until_confirmed() {
        let tx = make_tx();
        let txid = tx.txid.clone();
        let source = FakeSource {
            statuses: vec![
                Ok(TxStatus::default()),
                Err(RescueError::RateLimited),
                Ok(TxStatus::default()),
                Ok(TxStatus {
                    confirmed: true,
                    block_height: Some(1),
                    ..TxStatus::default()
                }),
            ],
            ..FakeSource::default()
        }
        .with_tx(tx);

        let mut seen = 0;
        let status = track_confirmation(&source, &txid, Duration::from_millis(1), |_| seen += 1)
            .await
            .unwrap();
        assert!(status.confirmed);
        assert_eq!(seen, 3);
        assert_eq!(source.status_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn tracker_stops_on_fatal_error() {
        let source = FakeSource::default();
        let err = track_confirmation(&source, &"d".repeat(64), Duration::from_millis(1), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err, RescueError::TransactionNotFound);
    }

    #[tokio::test]
    async fn pipeline_forwards_diagnosis() {
        let source = Arc::new(FakeSource::default().with_tx(make_tx()));
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_pipeline(source, req_rx, out_tx));

        req_tx
            .send(DiagnoseRequest { txid: "b".repeat(64) })
            .unwrap();
        let out = out_rx.recv().await.unwrap();
        assert_eq!(out.generation, 1);
        assert_eq!(out.result.unwrap().verdict.severity, Severity::Stuck);

        drop(req_tx);
        handle.await.unwrap();
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn pipeline_drops_superseded_results() {
        let gate = Arc::new(Notify::new());
        let slow = tx_with_id('1');
        let fast = tx_with_id('2');
        let source = Arc::new(
            FakeSource {
                gates: HashMap::from([(slow.txid.clone(), Arc::clone(&gate))]),
                ..FakeSource::default()
            }
            .with_tx(slow.clone())
            .with_tx(fast.clone()),
        );
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_pipeline(source, req_rx, out_tx));

        req_tx.send(DiagnoseRequest { txid: slow.txid.clone() }).unwrap();
        req_tx.send(DiagnoseRequest { txid: fast.txid.clone() }).unwrap();

        let out = out_rx.recv().await.unwrap();
        assert_eq!(out.generation, 2);
        assert_eq!(out.txid, fast.txid);

        // let the superseded fetch finish; its result must not surface
        gate.notify_one();
        drop(req_tx);
        handle.await.unwrap();
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn pipeline_drops_result_finished_after_newer_request() {
        let gate = Arc::new(Notify::new());
        let quick = tx_with_id('2');
        let gated = tx_with_id('1');
        let source = Arc::new(
            FakeSource {
                gates: HashMap::from([(gated.txid.clone(), Arc::clone(&gate))]),
                ..FakeSource::default()
            }
            .with_tx(quick.clone())
            .with_tx(gated.clone()),
        );
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();

        // both requests are queued before the pipeline runs, so the first
        // diagnosis finishes after the second request was accepted
        req_tx.send(DiagnoseRequest { txid: quick.txid.clone() }).unwrap();
        req_tx.send(DiagnoseRequest { txid: gated.txid.clone() }).unwrap();
        let handle = tokio::spawn(run_pipeline(source, req_rx, out_tx));

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(out_rx.try_recv().is_err());

        gate.notify_one();
        let out = out_rx.recv().await.unwrap();
        assert_eq!(out.generation, 2);
        assert_eq!(out.txid, gated.txid);

        drop(req_tx);
        handle.await.unwrap();
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn pipeline_reports_errors() {
        let source = Arc::new(FakeSource::default());
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_pipeline(source, req_rx, out_tx));

        req_tx.send(DiagnoseRequest { txid: "f".repeat(64) }).unwrap();
        drop(req_tx);
        let out = out_rx.recv().await.unwrap();
        assert_eq!(out.result.unwrap_err(), RescueError::TransactionNotFound);
        handle.await.unwrap();
    }
}
