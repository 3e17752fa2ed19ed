//! Configuration management for Zero services.
//!
//! All Zero services share a unified configuration file at `~/.codecoder/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (ZERO_* prefix, plus provider keys)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `FINNHUB_API_KEY` → secrets.finnhub_api_key
//! - `ZERO_FUNDAMENTALS_HOST` → fundamentals.host
//! - `ZERO_FUNDAMENTALS_PORT` → fundamentals.port
//! - `ZERO_FUNDAMENTALS_DB` → fundamentals.db_path
//! - `ZERO_LOG_LEVEL` → observability.log_level
//! - `ZERO_LOG_FORMAT` → observability.log_format

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new()
        .map_or_else(
            || PathBuf::from(".codecoder"),
            |dirs| dirs.home_dir().join(".codecoder"),
        )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration shared by Zero services.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging settings
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// API keys for external providers
    #[serde(default)]
    pub secrets: SecretsConfig,

    /// Fundamentals service settings
    #[serde(default)]
    pub fundamentals: FundamentalsConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Falls back to defaults when no file exists. Environment overrides are
    /// always applied last.
    pub fn load() -> Result<Self> {
        let path = config_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            tracing::info!("Config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("FINNHUB_API_KEY") {
            if !key.trim().is_empty() {
                self.secrets.finnhub_api_key = Some(key);
            }
        }
        if let Ok(host) = std::env::var("ZERO_FUNDAMENTALS_HOST") {
            self.fundamentals.host = host;
        }
        if let Ok(port) = std::env::var("ZERO_FUNDAMENTALS_PORT") {
            if let Ok(p) = port.parse() {
                self.fundamentals.port = p;
            }
        }
        if let Ok(db) = std::env::var("ZERO_FUNDAMENTALS_DB") {
            self.fundamentals.db_path = Some(PathBuf::from(db));
        }
        if let Ok(level) = std::env::var("ZERO_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("ZERO_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Finnhub API key, if configured and non-empty.
    pub fn finnhub_api_key(&self) -> Option<String> {
        self.secrets
            .finnhub_api_key
            .as_ref()
            .filter(|k| !k.trim().is_empty())
            .cloned()
    }

    /// Resolved SQLite path for the fundamentals store.
    pub fn fundamentals_db_path(&self) -> PathBuf {
        self.fundamentals
            .db_path
            .clone()
            .unwrap_or_else(|| config_dir().join("data").join("fundamentals.db"))
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets pinned to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

// ============================================================================
// Secrets
// ============================================================================

/// Provider credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Finnhub API token
    #[serde(default)]
    pub finnhub_api_key: Option<String>,
}

// ============================================================================
// Fundamentals Service
// ============================================================================

/// Fundamentals service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundamentalsConfig {
    /// HTTP bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// SQLite database path (defaults to ~/.codecoder/data/fundamentals.db)
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Market data API base URL
    #[serde(default = "default_finnhub_base_url")]
    pub finnhub_base_url: String,

    /// Provider request budget
    #[serde(default = "default_rate_limit_rpm")]
    pub rate_limit_rpm: u32,

    /// Freshness window for cached periods and analyses
    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: i64,

    /// Annual periods requested for scoring
    #[serde(default = "default_analysis_years")]
    pub analysis_years: usize,

    /// Batch scanner settings
    #[serde(default)]
    pub scan: ScanSettings,

    /// DCF defaults
    #[serde(default)]
    pub valuation: ValuationSettings,
}

impl Default for FundamentalsConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db_path: None,
            finnhub_base_url: default_finnhub_base_url(),
            rate_limit_rpm: default_rate_limit_rpm(),
            cache_ttl_hours: default_cache_ttl_hours(),
            analysis_years: default_analysis_years(),
            scan: ScanSettings::default(),
            valuation: ValuationSettings::default(),
        }
    }
}

/// Batch scanner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Symbols per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Pause before the retry pass
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Persist progress every N processed symbols
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,

    /// A running job older than this is stuck
    #[serde(default = "default_stuck_after_hours")]
    pub stuck_after_hours: i64,

    /// A running job older than this with no progress is stuck
    #[serde(default = "default_stalled_after_minutes")]
    pub stalled_after_minutes: i64,

    /// Cron expression for the scheduled scan (6-field, seconds first)
    #[serde(default = "default_scan_schedule")]
    pub schedule: String,

    /// Enable the scheduled scan
    #[serde(default = "default_true")]
    pub schedule_enabled: bool,

    /// Curated universe; empty uses the built-in list
    #[serde(default)]
    pub curated_symbols: Vec<String>,

    /// Russell 2000 holdings CSV
    #[serde(default)]
    pub russell_csv_path: Option<PathBuf>,

    /// Max age of cached index constituents
    #[serde(default = "default_universe_cache_days")]
    pub universe_cache_days: i64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            progress_interval: default_progress_interval(),
            stuck_after_hours: default_stuck_after_hours(),
            stalled_after_minutes: default_stalled_after_minutes(),
            schedule: default_scan_schedule(),
            schedule_enabled: true,
            curated_symbols: Vec::new(),
            russell_csv_path: None,
            universe_cache_days: default_universe_cache_days(),
        }
    }
}

/// DCF defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationSettings {
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,

    #[serde(default = "default_market_risk_premium")]
    pub market_risk_premium: f64,

    #[serde(default = "default_terminal_growth")]
    pub terminal_growth: f64,

    #[serde(default = "default_projection_years")]
    pub projection_years: u32,
}

impl Default for ValuationSettings {
    fn default() -> Self {
        Self {
            risk_free_rate: default_risk_free_rate(),
            market_risk_premium: default_market_risk_premium(),
            terminal_growth: default_terminal_growth(),
            projection_years: default_projection_years(),
        }
    }
}

// ============================================================================
// Defaults
// ============================================================================

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}
fn default_true() -> bool {
    true
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    4436
}
fn default_finnhub_base_url() -> String {
    "https://finnhub.io/api/v1".into()
}
fn default_rate_limit_rpm() -> u32 {
    60
}
fn default_cache_ttl_hours() -> i64 {
    24
}
fn default_analysis_years() -> usize {
    5
}
fn default_batch_size() -> usize {
    10
}
fn default_batch_delay_ms() -> u64 {
    2000
}
fn default_retry_delay_ms() -> u64 {
    5000
}
fn default_progress_interval() -> usize {
    10
}
fn default_stuck_after_hours() -> i64 {
    6
}
fn default_stalled_after_minutes() -> i64 {
    60
}
fn default_scan_schedule() -> String {
    // 06:00 on Jan/Apr/Jul/Oct 1st
    "0 0 6 1 1,4,7,10 *".into()
}
fn default_universe_cache_days() -> i64 {
    7
}
fn default_risk_free_rate() -> f64 {
    0.042
}
fn default_market_risk_premium() -> f64 {
    0.055
}
fn default_terminal_growth() -> f64 {
    0.03
}
fn default_projection_years() -> u32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.fundamentals.port, 4436);
        assert_eq!(config.fundamentals.cache_ttl_hours, 24);
        assert_eq!(config.fundamentals.scan.batch_size, 10);
        assert_eq!(config.fundamentals.scan.batch_delay_ms, 2000);
        assert!((config.fundamentals.valuation.terminal_growth - 0.03).abs() < 1e-9);
        assert!(config.finnhub_api_key().is_none());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let json = r#"{
            "secrets": { "finnhub_api_key": "abc" },
            "fundamentals": { "port": 5000, "scan": { "batch_size": 25 } }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.fundamentals.port, 5000);
        assert_eq!(config.fundamentals.scan.batch_size, 25);
        assert_eq!(config.fundamentals.scan.progress_interval, 10);
        assert_eq!(config.fundamentals.scan.schedule, "0 0 6 1 1,4,7,10 *");
        assert_eq!(config.finnhub_api_key(), Some("abc".to_string()));
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_blank_api_key_is_ignored() {
        let mut config = Config::default();
        config.secrets.finnhub_api_key = Some("   ".into());
        assert!(config.finnhub_api_key().is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"observability": {"level": "debug", "format": "json"}}"#)
            .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn test_db_path_default_under_config_dir() {
        let config = Config::default();
        assert!(config.fundamentals_db_path().ends_with("data/fundamentals.db"));

        let mut config = Config::default();
        config.fundamentals.db_path = Some(PathBuf::from("/tmp/x.db"));
        assert_eq!(config.fundamentals_db_path(), PathBuf::from("/tmp/x.db"));
    }
}
