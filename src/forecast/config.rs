//! Pipeline configuration
//!
//! Quantiles, classifier hyper-parameters, ensemble weights, allow-list and
//! external-call policies. Every section is optional in the TOML file.

use crate::forecast::clock::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Top-level pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub labels: LabelConfig,

    #[serde(default)]
    pub forest: ForestConfig,

    #[serde(default)]
    pub centrality: CentralityConfig,

    #[serde(default)]
    pub ensemble: EnsembleConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub backtest: BacktestConfig,
}

impl PipelineConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from environment or default path
    pub fn from_env() -> Self {
        let path =
            std::env::var("PIPELINE_CONFIG_PATH").unwrap_or_else(|_| "pipeline.toml".to_string());

        Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("Using default pipeline config ({}): {}", path, e);
            Self::default()
        })
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// SQLite busy timeout; doubles as the per-call timeout (ms)
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_db_path() -> String {
    "pipeline.db".to_string()
}
fn default_busy_timeout_ms() -> u64 {
    5_000
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    250
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }
}

// =============================================================================
// LABELS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    /// Quantile for absolute future activity
    #[serde(default = "default_activity_quantile")]
    pub activity_quantile: f64,

    /// Quantile for percentage growth
    #[serde(default = "default_growth_quantile")]
    pub growth_quantile: f64,

    /// Days of logs forming the forward window
    #[serde(default = "default_forward_days")]
    pub forward_days: u32,
}

fn default_activity_quantile() -> f64 {
    0.90
}
fn default_growth_quantile() -> f64 {
    0.80
}
fn default_forward_days() -> u32 {
    3
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            activity_quantile: default_activity_quantile(),
            growth_quantile: default_growth_quantile(),
            forward_days: default_forward_days(),
        }
    }
}

// =============================================================================
// FOREST
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestConfig {
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,

    /// `None` grows trees until leaves are pure
    #[serde(default)]
    pub max_depth: Option<usize>,

    #[serde(default = "default_min_samples_split")]
    pub min_samples_split: usize,

    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: usize,

    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Holdout fraction for the train/validation split
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
}

fn default_n_estimators() -> usize {
    200
}
fn default_min_samples_split() -> usize {
    2
}
fn default_min_samples_leaf() -> usize {
    1
}
fn default_seed() -> u64 {
    42
}
fn default_test_fraction() -> f64 {
    0.2
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: default_n_estimators(),
            max_depth: None,
            min_samples_split: default_min_samples_split(),
            min_samples_leaf: default_min_samples_leaf(),
            seed: default_seed(),
            test_fraction: default_test_fraction(),
        }
    }
}

// =============================================================================
// CENTRALITY
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentralityConfig {
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,

    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// Largest graph handed to the dense eigen-solver
    #[serde(default = "default_dense_node_limit")]
    pub dense_node_limit: usize,
}

fn default_max_iter() -> usize {
    1000
}
fn default_tolerance() -> f64 {
    1e-6
}
fn default_dense_node_limit() -> usize {
    2_000
}

impl Default for CentralityConfig {
    fn default() -> Self {
        Self {
            max_iter: default_max_iter(),
            tolerance: default_tolerance(),
            dense_node_limit: default_dense_node_limit(),
        }
    }
}

// =============================================================================
// ENSEMBLE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    /// Lookback tag -> weight. Weights need not sum to 1.
    #[serde(default = "default_weights")]
    pub weights: BTreeMap<String, f64>,

    /// Weight for windows missing from the table
    #[serde(default = "default_unknown_weight")]
    pub unknown_weight: f64,

    /// Windows used when the caller names none
    #[serde(default = "default_windows")]
    pub default_windows: Vec<String>,

    /// Accepted token symbols for the post-filter
    #[serde(default = "default_allowed_tokens")]
    pub allowed_tokens: Vec<String>,

    /// Filtering inspects at most `top_k * scan_multiplier` candidates
    #[serde(default = "default_scan_multiplier")]
    pub scan_multiplier: usize,
}

fn default_weights() -> BTreeMap<String, f64> {
    [("1D", 0.40), ("3D", 0.35), ("1W", 0.20), ("3W", 0.05), ("1M", 0.05)]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
fn default_unknown_weight() -> f64 {
    0.10
}
fn default_windows() -> Vec<String> {
    vec!["1D".to_string(), "3D".to_string(), "1W".to_string()]
}
fn default_allowed_tokens() -> Vec<String> {
    [
        "USDE", "MSUSD", "USDC", "PYUSD", "SUSDE", "DAI", "MIM", "EUSD", "USD3", "DOLA", "SDAI",
        "FRAXBP", "USDT", "3CRV", "USDM", "USDS", "frxUSD",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_scan_multiplier() -> usize {
    3
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            weights: default_weights(),
            unknown_weight: default_unknown_weight(),
            default_windows: default_windows(),
            allowed_tokens: default_allowed_tokens(),
            scan_multiplier: default_scan_multiplier(),
        }
    }
}

impl EnsembleConfig {
    pub fn weight_for(&self, tag: &str) -> f64 {
        self.weights
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(tag))
            .map(|(_, w)| *w)
            .unwrap_or(self.unknown_weight)
    }
}

// =============================================================================
// RESOLVER
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Explicit RPC url; overrides the key-derived url
    #[serde(default)]
    pub rpc_url: Option<String>,

    /// Env var holding the hosted-node API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_fallback_url")]
    pub fallback_url: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_api_key_env() -> String {
    "ALCHEMY_API_KEY".to_string()
}
fn default_fallback_url() -> String {
    "https://eth.llamarpc.com".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_min_interval_ms() -> u64 {
    100
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            api_key_env: default_api_key_env(),
            fallback_url: default_fallback_url(),
            request_timeout_secs: default_request_timeout_secs(),
            min_interval_ms: default_min_interval_ms(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl ResolverConfig {
    /// Explicit url, then the hosted node if its key is set, then the public node.
    pub fn endpoint(&self) -> String {
        if let Some(url) = &self.rpc_url {
            return url.clone();
        }
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => {
                format!("https://eth-mainnet.g.alchemy.com/v2/{}", key.trim())
            }
            _ => self.fallback_url.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }
}

// =============================================================================
// BACKTEST
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// ~12s blocks
    #[serde(default = "default_blocks_per_day")]
    pub blocks_per_day: u64,

    #[serde(default = "default_segments")]
    pub segments: usize,

    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_blocks_per_day() -> u64 {
    7_200
}
fn default_segments() -> usize {
    7
}
fn default_top_k() -> usize {
    20
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            blocks_per_day: default_blocks_per_day(),
            segments: default_segments(),
            top_k: default_top_k(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [labels]
            activity_quantile = 0.75

            [ensemble.weights]
            1D = 1.0
            "#,
        )
        .unwrap();

        assert_eq!(config.labels.activity_quantile, 0.75);
        assert_eq!(config.labels.growth_quantile, 0.80);
        assert_eq!(config.forest.n_estimators, 200);
        assert_eq!(config.ensemble.weight_for("1d"), 1.0);
        assert_eq!(config.ensemble.weight_for("3D"), 0.10);
        assert_eq!(config.backtest.blocks_per_day, 7_200);
    }

    #[test]
    fn test_default_weights() {
        let ensemble = EnsembleConfig::default();
        assert_eq!(ensemble.weight_for("1D"), 0.40);
        assert_eq!(ensemble.weight_for("3D"), 0.35);
        assert_eq!(ensemble.weight_for("1W"), 0.20);
        assert_eq!(ensemble.weight_for("3W"), 0.05);
        assert_eq!(ensemble.weight_for("6M"), 0.10);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        let mut config = PipelineConfig::default();
        config.backtest.top_k = 5;
        config.save(&path).unwrap();

        let loaded = PipelineConfig::load(&path).unwrap();
        assert_eq!(loaded.backtest.top_k, 5);
        assert_eq!(loaded.ensemble.allowed_tokens.len(), 17);
    }

    #[test]
    fn test_explicit_rpc_url_wins() {
        let config = ResolverConfig {
            rpc_url: Some("http://localhost:8545".to_string()),
            ..Default::default()
        };
        assert_eq!(config.endpoint(), "http://localhost:8545");
    }
}
