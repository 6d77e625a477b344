//! Configuration management
//!
//! Handles loading and parsing of the JSON configuration file with
//! environment variable overrides. Every field has a default, so running
//! without a config file reproduces the stock report and export.

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transfers::{
    DEFAULT_COOLDOWN, DEFAULT_PAGE_SIZE, DEFAULT_PROGRESS_EVERY, SOLSCAN_SPL_TRANSFERS_URL,
};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.apply_env();
        Ok(config)
    }

    /// Load from `path` if given, otherwise start from defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let mut config = Config::default();
                config.apply_env();
                Ok(config)
            }
        }
    }

    /// Override file values from the environment (after `.env` is loaded)
    pub fn apply_env(&mut self) {
        if let Ok(network) = std::env::var("DRIFT_NETWORK") {
            self.market.network = network;
        }
        if let Ok(snapshot) = std::env::var("DRIFT_SNAPSHOT") {
            self.market.snapshot_path = PathBuf::from(snapshot);
        }
        if let Ok(url) = std::env::var("SOLSCAN_API_URL") {
            self.export.endpoint = url;
        }
    }
}

/// Where market state comes from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Cluster the snapshot was taken from, used for labelling only
    pub network: String,
    /// JSON snapshot of the markets, trade history and funding rate history accounts.
    /// A leading `~/` is expanded to the home directory.
    pub snapshot_path: PathBuf,
}

impl Default for MarketConfig {
    fn default() -> Self {
        MarketConfig {
            network: "mainnet".to_string(),
            snapshot_path: PathBuf::from("snapshots/mainnet.json"),
        }
    }
}

impl MarketConfig {
    pub fn resolved_snapshot_path(&self) -> PathBuf {
        expand_home(&self.snapshot_path)
    }
}

/// Chart output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    pub images_dir: PathBuf,
    /// Decimals of the quote asset fees are paid in (USDC)
    pub quote_decimals: u32,
    pub chart_width: u32,
    pub chart_height: u32,
    /// Rows and columns of the funding rate panel grid
    pub funding_grid: (usize, usize),
}

impl Default for ReportConfig {
    fn default() -> Self {
        ReportConfig {
            images_dir: PathBuf::from("images"),
            quote_decimals: 6,
            chart_width: 1024,
            chart_height: 768,
            funding_grid: (4, 4),
        }
    }
}

/// A named wallet whose transfers get exported to `<name>.csv`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedAccount {
    pub name: String,
    pub account: String,
}

impl TrackedAccount {
    pub fn new(name: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            account: account.into(),
        }
    }
}

/// Transfer history export settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    pub endpoint: String,
    pub accounts: Vec<TrackedAccount>,
    /// Window start (YYYY-MM-DD, midnight UTC)
    pub from: String,
    /// Window end (YYYY-MM-DD, midnight UTC)
    pub to: String,
    pub page_size: u32,
    /// Wait after a 429 before retrying the same page
    pub cooldown_secs: u64,
    /// Log a progress line whenever the offset is a multiple of this
    pub progress_every: u32,
    pub request_timeout_secs: u64,
    pub output_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            endpoint: SOLSCAN_SPL_TRANSFERS_URL.to_string(),
            accounts: vec![
                TrackedAccount::new("orca", "JU8kmKzDHF9sXWsnoznaFDFezLsE5uomX2JkRMbmsQP"),
                TrackedAccount::new("raydium", "F8Vyqk3unwxkXukZFQeYyGmFfTG3CAX4v24iyrjEYBJV"),
            ],
            from: "2022-03-20".to_string(),
            to: "2022-03-21".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            cooldown_secs: DEFAULT_COOLDOWN.as_secs(),
            progress_every: DEFAULT_PROGRESS_EVERY,
            request_timeout_secs: 30,
            output_dir: PathBuf::from("."),
        }
    }
}

impl ExportConfig {
    /// Export window as unix seconds `(from, to)`
    pub fn window(&self) -> Result<(i64, i64)> {
        let from = parse_date_to_ts(&self.from)?;
        let to = parse_date_to_ts(&self.to)?;
        if to < from {
            anyhow::bail!("Export window ends ({}) before it starts ({})", self.to, self.from);
        }
        Ok((from, to))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Parse `YYYY-MM-DD` as midnight UTC in unix seconds
pub fn parse_date_to_ts(date: &str) -> Result<i64> {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", date))?;
    Ok(Utc
        .from_utc_datetime(&day.and_time(NaiveTime::MIN))
        .timestamp())
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_stock_export() {
        let config = ExportConfig::default();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.cooldown(), Duration::from_secs(31));
        assert_eq!(config.progress_every, 250);
        let names: Vec<&str> = config.accounts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["orca", "raydium"]);
    }

    #[test]
    fn test_window_is_one_day() {
        let config = ExportConfig::default();
        let (from, to) = config.window().unwrap();
        assert_eq!(from, 1_647_734_400);
        assert_eq!(to - from, 86_400);
    }

    #[test]
    fn test_window_rejects_reversed_dates() {
        let config = ExportConfig {
            from: "2022-03-21".to_string(),
            to: "2022-03-20".to_string(),
            ..ExportConfig::default()
        };
        assert!(config.window().is_err());
    }

    #[test]
    fn test_parse_date_rejects_garbage() {
        assert!(parse_date_to_ts("20/03/2022").is_err());
    }

    #[test]
    fn test_partial_config_file_uses_defaults() {
        let json = r#"{ "export": {
            "endpoint": "http://localhost:9000/transfers",
            "accounts": [{"name": "test", "account": "abc"}],
            "from": "2022-01-01", "to": "2022-01-02",
            "page_size": 10, "cooldown_secs": 0, "progress_every": 20,
            "request_timeout_secs": 5, "output_dir": "out"
        } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.export.page_size, 10);
        assert_eq!(config.report.quote_decimals, 6);
        assert_eq!(config.market.network, "mainnet");
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let config: Config = serde_json::from_str(include_str!("../configs/default.json")).unwrap();
        let defaults = ExportConfig::default();
        assert_eq!(config.export.accounts, defaults.accounts);
        assert_eq!(config.export.window().unwrap(), defaults.window().unwrap());
        assert_eq!(config.report.funding_grid, (4, 4));
    }

    #[test]
    fn test_expand_home_leaves_relative_paths() {
        let path = PathBuf::from("snapshots/mainnet.json");
        assert_eq!(expand_home(&path), path);
    }
}
