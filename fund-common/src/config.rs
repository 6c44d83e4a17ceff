//! Configuration management for the fund-manager tools.
//!
//! All tools share a configuration file at `~/.fundmanager/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Command-line flags (applied by the binaries)
//! 2. Environment variables (FUND_* prefix)
//! 3. Explicit config file values
//! 4. Default values
//!
//! # Environment Variable Mapping
//!
//! - `FUND_DB_PATH` → database.path
//! - `FUND_LOG_LEVEL` → observability.log_level
//! - `FUND_LOG_FORMAT` → observability.log_format
//! - `FUND_INITIAL_CAPITAL` → backtest.initial_capital
//! - `FUND_TOP_N` → backtest.top_n
//! - `FUND_UNIVERSE` → backtest.universe

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".fundmanager"),
        |dirs| dirs.home_dir().join(".fundmanager"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration shared by the fund-manager binaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Price database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Default backtest parameters
    #[serde(default)]
    pub backtest: BacktestSettings,

    /// Logging configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable fallbacks.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Values that fail to parse are logged and ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("FUND_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(level) = lookup("FUND_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("FUND_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Some(capital) = lookup("FUND_INITIAL_CAPITAL") {
            match capital.parse() {
                Ok(c) => self.backtest.initial_capital = c,
                Err(_) => tracing::warn!(value = %capital, "Ignoring invalid FUND_INITIAL_CAPITAL"),
            }
        }
        if let Some(top_n) = lookup("FUND_TOP_N") {
            match top_n.parse() {
                Ok(n) => self.backtest.top_n = n,
                Err(_) => tracing::warn!(value = %top_n, "Ignoring invalid FUND_TOP_N"),
            }
        }
        if let Some(universe) = lookup("FUND_UNIVERSE") {
            self.backtest.universe = universe;
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path())
    }

    /// Save configuration to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).with_context(|| {
                    format!("Failed to create config directory {}", dir.display())
                })?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Price database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Default parameters for a momentum backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSettings {
    /// First rebalance date
    #[serde(default = "default_start_date")]
    pub start_date: NaiveDate,

    /// Last date of the simulation horizon (inclusive)
    #[serde(default = "default_end_date")]
    pub end_date: NaiveDate,

    /// Number of slots in the portfolio
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Trailing return window used for ranking, in months
    #[serde(default = "default_trailing_months")]
    pub trailing_months: u32,

    /// Universe filter: "all" or comma-separated tiers ("mid,small")
    #[serde(default = "default_universe")]
    pub universe: String,

    /// Starting capital
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,

    /// Re-fetch price series to compute drawdown per closed position
    #[serde(default)]
    pub position_drawdown: bool,

    /// Where the trade log CSV is written
    #[serde(default = "default_trade_log_path")]
    pub trade_log_path: PathBuf,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            start_date: default_start_date(),
            end_date: default_end_date(),
            top_n: default_top_n(),
            trailing_months: default_trailing_months(),
            universe: default_universe(),
            initial_capital: default_initial_capital(),
            position_drawdown: false,
            trade_log_path: default_trade_log_path(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to set to `warn`.
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

fn default_db_path() -> PathBuf {
    config_dir().join("prices.db")
}
fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 2, 19).unwrap()
}
fn default_end_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 4, 30).unwrap()
}
fn default_top_n() -> usize {
    10
}
fn default_trailing_months() -> u32 {
    12
}
fn default_universe() -> String {
    "all".into()
}
fn default_initial_capital() -> f64 {
    1_000_000.0
}
fn default_trade_log_path() -> PathBuf {
    PathBuf::from("trade_logs.csv")
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}
