use serde::{Deserialize, Serialize};

use crate::error::ElevationError;

/// Parameters for one external elevation API tier (spec §6.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiTierConfig {
    pub key: String,
    pub base_url: String,
    #[serde(default = "default_api_rps")]
    pub rps: u32,
    #[serde(default)]
    pub daily: u64,
    #[serde(default = "default_api_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_api_max_attempts")]
    pub max_attempts: u32,
}

fn default_api_rps() -> u32 {
    10
}
fn default_api_timeout_ms() -> u64 {
    1_500
}
fn default_api_max_attempts() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    #[serde(default = "default_target_ms")]
    pub target_ms: f64,
    #[serde(default = "default_alert_ms")]
    pub alert_ms: f64,
}

fn default_target_ms() -> f64 {
    100.0
}
fn default_alert_ms() -> f64 {
    500.0
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { target_ms: default_target_ms(), alert_ms: default_alert_ms() }
    }
}

/// Top-level service configuration (spec §6.5). Loaded only from an
/// explicit TOML string or file; there is no environment-variable layer
/// (unlike the ingest config this crate's idioms are borrowed from) — the
/// upward HTTP/CLI layer that would own process bootstrap is out of scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub index_source: String,
    #[serde(default = "default_bucket_region")]
    pub bucket_region: String,
    #[serde(default = "default_dataset_cache_size")]
    pub dataset_cache_size: u64,
    #[serde(default = "default_max_concurrent_object_reads")]
    pub max_concurrent_object_reads: usize,
    #[serde(default = "default_max_queued_requests")]
    pub max_queued_requests: usize,
    #[serde(default = "default_request_deadline_ms")]
    pub request_deadline_ms: u64,
    #[serde(default = "default_grid_size")]
    pub grid_size: usize,
    pub tier_api_a: Option<ApiTierConfig>,
    pub tier_api_b: Option<ApiTierConfig>,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

fn default_bucket_region() -> String {
    "us-west-2".to_string()
}
fn default_dataset_cache_size() -> u64 {
    20
}
fn default_max_concurrent_object_reads() -> usize {
    64
}
fn default_max_queued_requests() -> usize {
    256
}
fn default_request_deadline_ms() -> u64 {
    3_000
}
fn default_grid_size() -> usize {
    50
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_source: String::new(),
            bucket_region: default_bucket_region(),
            dataset_cache_size: default_dataset_cache_size(),
            max_concurrent_object_reads: default_max_concurrent_object_reads(),
            max_queued_requests: default_max_queued_requests(),
            request_deadline_ms: default_request_deadline_ms(),
            grid_size: default_grid_size(),
            tier_api_a: None,
            tier_api_b: None,
            performance: PerformanceConfig::default(),
        }
    }
}

impl Config {
    /// Parses configuration from a TOML document. A configuration parse
    /// failure is fatal at startup (spec §7): callers should propagate
    /// this error up to process exit rather than fall back to defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ElevationError> {
        toml::from_str(s).map_err(|e| ElevationError::InvalidInput { reason: format!("config parse error: {e}") })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let cfg = Config::from_toml_str(r#"index_source = "s3://bucket/index.json""#).unwrap();
        assert_eq!(cfg.index_source, "s3://bucket/index.json");
        assert_eq!(cfg.dataset_cache_size, 20);
        assert_eq!(cfg.max_concurrent_object_reads, 64);
        assert_eq!(cfg.request_deadline_ms, 3_000);
        assert!(cfg.tier_api_a.is_none());
    }

    #[test]
    fn parses_full_config() {
        let toml = r#"
            index_source = "s3://bucket/index.json"
            bucket_region = "ap-southeast-2"
            dataset_cache_size = 30

            [tier_api_a]
            key = "secret"
            base_url = "https://api-a.example/elevation"
            rps = 5
            daily = 10000
            timeout_ms = 2000
            max_attempts = 3

            [performance]
            target_ms = 80
            alert_ms = 400
        "#;
        let cfg = Config::from_toml_str(toml).unwrap();
        assert_eq!(cfg.bucket_region, "ap-southeast-2");
        assert_eq!(cfg.dataset_cache_size, 30);
        let tier_a = cfg.tier_api_a.unwrap();
        assert_eq!(tier_a.rps, 5);
        assert_eq!(cfg.performance.target_ms, 80.0);
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(Config::from_toml_str("not valid toml [[[").is_err());
    }
}
