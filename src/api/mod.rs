use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::core::{
    MempoolBlock, MempoolInfo, OutspendStatus, RecommendedFees, Transaction, TxStatus,
};
use crate::error::{RescueError, RescueResult};
use crate::format::is_valid_txid;

/// Read access to a mempool/esplora-style data source, plus broadcast.
///
/// Implementations classify upstream failures into [`RescueError`] once;
/// callers never retry.
pub trait MempoolSource: Send + Sync {
    fn transaction(&self, txid: &str) -> impl Future<Output = RescueResult<Transaction>> + Send;
    fn status(&self, txid: &str) -> impl Future<Output = RescueResult<TxStatus>> + Send;
    fn raw_hex(&self, txid: &str) -> impl Future<Output = RescueResult<String>> + Send;
    fn outspends(&self, txid: &str)
    -> impl Future<Output = RescueResult<Vec<OutspendStatus>>> + Send;
    fn recommended_fees(&self) -> impl Future<Output = RescueResult<RecommendedFees>> + Send;
    fn mempool_blocks(&self) -> impl Future<Output = RescueResult<Vec<MempoolBlock>>> + Send;
    fn mempool_info(&self) -> impl Future<Output = RescueResult<MempoolInfo>> + Send;
    /// BTC/USD price. Never fails; unknown prices fall back to a configured value.
    fn btc_price(&self) -> impl Future<Output = f64> + Send;
    /// Submit a signed transaction, returning its txid.
    fn broadcast(&self, tx_hex: &str) -> impl Future<Output = RescueResult<String>> + Send;
}

/// Reject anything that is not a 64-character hex txid.
pub fn validate_txid(txid: &str) -> RescueResult<&str> {
    let txid = txid.trim();
    if is_valid_txid(txid) {
        Ok(txid)
    } else {
        Err(RescueError::InvalidInput(format!("Got {txid:?}.")))
    }
}

/// What to do with an HTTP response status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Retry,
    Fail(RescueError),
}

pub fn classify_status(status: StatusCode) -> StatusClass {
    match status.as_u16() {
        200..=299 => StatusClass::Success,
        404 => StatusClass::Fail(RescueError::TransactionNotFound),
        429 => StatusClass::Fail(RescueError::RateLimited),
        500..=599 => StatusClass::Retry,
        code => StatusClass::Fail(RescueError::SourceUnavailable(Some(format!("HTTP {code}")))),
    }
}

/// mempool.space-compatible REST client.
pub struct MempoolClient {
    url: String,
    client: Client,
    fetch: FetchConfig,
    fallback_price: f64,
}

impl MempoolClient {
    pub fn new(
        base_url: impl Into<String>,
        fetch: FetchConfig,
        fallback_price: f64,
    ) -> RescueResult<Self> {
        let client = Client::builder()
            .timeout(fetch.timeout())
            .build()
            .map_err(|e| RescueError::NetworkFailure(Some(e.to_string())))?;
        Ok(Self {
            url: base_url.into().trim_end_matches('/').to_string(),
            client,
            fetch,
            fallback_price,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.url
    }

    /// GET with bounded retries on 5xx and transport errors.
    async fn get(&self, path: &str) -> RescueResult<Response> {
        let url = format!("{}{path}", self.url);
        let mut last_err = RescueError::NetworkFailure(None);

        for attempt in 0..=self.fetch.max_retries {
            match self.client.get(&url).send().await {
                Ok(resp) => match classify_status(resp.status()) {
                    StatusClass::Success => return Ok(resp),
                    StatusClass::Fail(err) => return Err(err),
                    StatusClass::Retry => {
                        last_err = RescueError::SourceUnavailable(Some(format!(
                            "HTTP {}",
                            resp.status().as_u16()
                        )));
                    }
                },
                Err(e) => last_err = RescueError::NetworkFailure(Some(e.to_string())),
            }

            if attempt < self.fetch.max_retries {
                let delay = self.fetch.retry_delay(attempt);
                warn!(
                    "GET {path} failed (attempt {}), retrying in {delay:?}: {last_err}",
                    attempt + 1
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(last_err)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> RescueResult<T> {
        let resp = self.get(path).await?;
        resp.json().await.map_err(|e| {
            debug!("GET {path} returned undecodable JSON: {e}");
            RescueError::SourceUnavailable(Some("Invalid JSON response".into()))
        })
    }

    async fn get_text(&self, path: &str) -> RescueResult<String> {
        let resp = self.get(path).await?;
        resp.text()
            .await
            .map(|s| s.trim().to_string())
            .map_err(|e| RescueError::NetworkFailure(Some(e.to_string())))
    }
}

impl MempoolSource for MempoolClient {
    async fn transaction(&self, txid: &str) -> RescueResult<Transaction> {
        self.get_json(&format!("/tx/{txid}")).await
    }

    async fn status(&self, txid: &str) -> RescueResult<TxStatus> {
        self.get_json(&format!("/tx/{txid}/status")).await
    }

    async fn raw_hex(&self, txid: &str) -> RescueResult<String> {
        self.get_text(&format!("/tx/{txid}/hex")).await
    }

    async fn outspends(&self, txid: &str) -> RescueResult<Vec<OutspendStatus>> {
        self.get_json(&format!("/tx/{txid}/outspends")).await
    }

    async fn recommended_fees(&self) -> RescueResult<RecommendedFees> {
        self.get_json("/v1/fees/recommended").await
    }

    async fn mempool_blocks(&self) -> RescueResult<Vec<MempoolBlock>> {
        self.get_json("/v1/fees/mempool-blocks").await
    }

    async fn mempool_info(&self) -> RescueResult<MempoolInfo> {
        self.get_json("/mempool").await
    }

    async fn btc_price(&self) -> f64 {
        match self.get_json::<Value>("/v1/prices").await {
            Ok(body) => parse_usd_price(&body).unwrap_or(self.fallback_price),
            Err(e) => {
                warn!("Price lookup failed, using fallback {}: {e}", self.fallback_price);
                self.fallback_price
            }
        }
    }

    async fn broadcast(&self, tx_hex: &str) -> RescueResult<String> {
        let resp = self
            .client
            .post(format!("{}/tx", self.url))
            .header("Content-Type", "text/plain")
            .body(tx_hex.trim().to_string())
            .send()
            .await
            .map_err(|e| RescueError::BroadcastFailed(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        match classify_status(status) {
            StatusClass::Success => Ok(body.trim().to_string()),
            StatusClass::Fail(RescueError::RateLimited) => Err(RescueError::RateLimited),
            _ if body.trim().is_empty() => Err(RescueError::BroadcastFailed(format!(
                "HTTP {}",
                status.as_u16()
            ))),
            _ => Err(RescueError::BroadcastFailed(body.trim().to_string())),
        }
    }
}

/// Parse the USD price out of a raw `/v1/prices` body.
pub fn parse_usd_price(body: &Value) -> Option<f64> {
    body.get("USD").and_then(Value::as_f64).filter(|p| *p > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(StatusCode::OK), StatusClass::Success);
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            StatusClass::Fail(RescueError::TransactionNotFound)
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            StatusClass::Fail(RescueError::RateLimited)
        );
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), StatusClass::Retry);
        assert_eq!(classify_status(StatusCode::INTERNAL_SERVER_ERROR), StatusClass::Retry);
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST),
            StatusClass::Fail(RescueError::SourceUnavailable(Some("HTTP 400".into())))
        );
    }

    #[test]
    fn txid_validation() {
        let txid = "ab".repeat(32);
        assert_eq!(validate_txid(&format!(" {txid}\n")).unwrap(), txid);
        assert!(matches!(
            validate_txid("not-a-txid"),
            Err(RescueError::InvalidInput(_))
        ));
        assert!(validate_txid(&"g".repeat(64)).is_err());
    }

    #[test]
    fn client_trims_base_url() {
        let client =
            MempoolClient::new("https://mempool.space/api/", FetchConfig::default(), 1.0).unwrap();
        assert_eq!(client.base_url(), "https://mempool.space/api");
    }

    #[test]
    fn usd_price_parsing() {
        assert_eq!(parse_usd_price(&json!({"time": 1, "USD": 97_000.5})), Some(97_000.5));
        assert_eq!(parse_usd_price(&json!({"USD": 0})), None);
        assert_eq!(parse_usd_price(&json!({"EUR": 90_000})), None);
    }
}
