use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub acquisition: AcquisitionConfig,
    pub storage: StorageConfig,
    pub scan: ScanConfig,
    pub server: ServerConfig,
    pub universe: UniverseConfig,
}

/// Data-acquisition chain configuration. Outbound requests also honour the
/// standard proxy environment variables unless `respect_proxy_env` is false.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AcquisitionConfig {
    #[serde(default = "default_primary_base_url")]
    pub primary_base_url: String,

    /// Exchange qualifiers tried in order on the primary source; an empty
    /// string means the bare symbol.
    #[serde(default = "default_primary_exchanges")]
    pub primary_exchanges: Vec<String>,

    #[serde(default = "default_secondary_base_url")]
    pub secondary_base_url: String,

    /// Ticker suffixes tried in order on the secondary source.
    #[serde(default = "default_secondary_suffixes")]
    pub secondary_suffixes: Vec<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// Retries per HTTP request on transient failures; 0 disables.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Minimum sessions a primary result must carry to be accepted.
    #[serde(default = "default_primary_min_sessions")]
    pub primary_min_sessions: usize,

    /// Minimum sessions a secondary result must carry to be accepted.
    #[serde(default = "default_secondary_min_sessions")]
    pub secondary_min_sessions: usize,

    /// Months of daily history requested from remotes and generated by the
    /// synthetic source (~22 sessions per month).
    #[serde(default = "default_history_months")]
    pub history_months: u32,

    /// Skip remote sources entirely and serve synthetic data.
    #[serde(default)]
    pub offline: bool,

    #[serde(default = "default_true")]
    pub respect_proxy_env: bool,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Scan orchestration configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScanConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Reuse a symbol's recommendation when a completed scan already
    /// produced one today.
    #[serde(default = "default_true")]
    pub daily_skip: bool,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Symbol universe configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UniverseConfig {
    #[serde(default = "default_symbols_file")]
    pub symbols_file: PathBuf,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_primary_base_url() -> String {
    "https://www.google.com/finance/quote".to_string()
}
fn default_primary_exchanges() -> Vec<String> {
    vec!["NSE".to_string(), "BOM".to_string(), String::new()]
}
fn default_secondary_base_url() -> String {
    "https://query1.finance.yahoo.com".to_string()
}
fn default_secondary_suffixes() -> Vec<String> {
    vec![".NS".to_string(), ".BO".to_string(), String::new()]
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_probe_timeout_secs() -> u64 {
    5
}
fn default_request_delay_ms() -> u64 {
    150
}
fn default_jitter_ms() -> u64 {
    250
}
fn default_max_retries() -> u32 {
    1
}
fn default_retry_base_ms() -> u64 {
    100
}
fn default_user_agent() -> String {
    // Quote pages render differently for non-browser agents.
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0 Safari/537.36"
        .to_string()
}
fn default_primary_min_sessions() -> usize {
    60
}
fn default_secondary_min_sessions() -> usize {
    20
}
fn default_history_months() -> u32 {
    9
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/screener.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_concurrency() -> usize {
    8
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_symbols_file() -> PathBuf {
    PathBuf::from("data/symbols.txt")
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("SCREENER").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|e| {
            tracing::warn!("config did not deserialize ({e}); using defaults");
            AppConfig::default()
        });
        Ok(app_cfg)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            acquisition: AcquisitionConfig::default(),
            storage: StorageConfig::default(),
            scan: ScanConfig::default(),
            server: ServerConfig::default(),
            universe: UniverseConfig::default(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            primary_base_url: default_primary_base_url(),
            primary_exchanges: default_primary_exchanges(),
            secondary_base_url: default_secondary_base_url(),
            secondary_suffixes: default_secondary_suffixes(),
            timeout_secs: default_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            user_agent: default_user_agent(),
            primary_min_sessions: default_primary_min_sessions(),
            secondary_min_sessions: default_secondary_min_sessions(),
            history_months: default_history_months(),
            offline: false,
            respect_proxy_env: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            daily_skip: true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            symbols_file: default_symbols_file(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_runnable() {
        let cfg = AppConfig::default();
        assert!(cfg.acquisition.primary_base_url.starts_with("https://"));
        assert_eq!(cfg.acquisition.primary_exchanges.len(), 3);
        assert!(cfg.acquisition.primary_min_sessions > cfg.acquisition.secondary_min_sessions);
        assert!(cfg.scan.concurrency > 0);
        assert!(cfg.scan.daily_skip);
        assert_eq!(cfg.server.port, 8000);
        assert!(!cfg.acquisition.offline);
    }
}
