use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub fetch: FetchConfig,
    pub tracker: TrackerConfig,
    pub pricing: PricingConfig,
}

/// Which chain to diagnose against.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet4,
    Signet,
}

impl Network {
    pub fn default_api_base_url(self) -> &'static str {
        match self {
            Network::Mainnet => "https://mempool.space/api",
            Network::Testnet4 => "https://mempool.space/testnet4/api",
            Network::Signet => "https://mempool.space/signet/api",
        }
    }

    /// Network used for address validation. Testnet4 and signet share the
    /// test address prefixes.
    pub fn bitcoin_network(self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet4 => bitcoin::Network::Testnet,
            Network::Signet => bitcoin::Network::Signet,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet4 => "testnet4",
            Network::Signet => "signet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "bitcoin" => Ok(Network::Mainnet),
            "testnet4" | "testnet" => Ok(Network::Testnet4),
            "signet" => Ok(Network::Signet),
            other => Err(format!("unknown network {other:?} (expected mainnet, testnet4 or signet)")),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct NetworkConfig {
    pub network: Network,
    pub api_base_url: Option<String>,
}

impl NetworkConfig {
    /// Configured base URL without a trailing slash, or the network default.
    pub fn api_base_url(&self) -> String {
        self.api_base_url
            .as_deref()
            .unwrap_or(self.network.default_api_base_url())
            .trim_end_matches('/')
            .to_string()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FetchConfig {
    pub max_retries: u32,
    pub retry_delays_ms: Vec<u64>,
    pub timeout_secs: u64,
}

impl FetchConfig {
    /// Delay before retry number `attempt` (0-based). The last configured
    /// delay repeats when there are more retries than delays.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let ms = self
            .retry_delays_ms
            .get(attempt as usize)
            .or(self.retry_delays_ms.last())
            .copied()
            .unwrap_or(1_000);
        Duration::from_millis(ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrackerConfig {
    pub poll_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PricingConfig {
    pub fallback_btc_usd: f64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delays_ms: vec![1_000, 2_000, 4_000],
            timeout_secs: 15,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            fallback_btc_usd: 100_000.0,
        }
    }
}

impl Config {
    /// Load config from a TOML file. Falls back to defaults if file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Config loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", path.display());
                Self::default()
            }
        }
    }
}
