//! Runtime configuration.
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables (a `.env` file is honoured through `dotenv`):
//!
//! | variable           | field                    |
//! |--------------------|--------------------------|
//! | `BYBIT_API_KEY`    | `exchange.api_key`       |
//! | `BYBIT_API_SECRET` | `exchange.api_secret`    |
//! | `BYBIT_TESTNET`    | `exchange.testnet`       |
//! | `ORCA_DATA_DIR`    | `storage.data_dir`       |
//! | `LOG_LEVEL`        | `logging.level`          |
//!
//! Intervals are written as exchange codes, so `timeframe = "60"`, not `60`.

use crate::catalog::{CatalogError, PairCatalog};
use crate::collector::CollectionSettings;
use crate::data::{is_valid_key, AdvancePolicy, BybitSettings, Pacer, MAX_CANDLE_LIMIT};
use crate::domain::{Category, Interval};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "orca.toml";
/// Upper bound on `exchange.max_retries`.
pub const MAX_RETRIES: u32 = 10;
const REDACTED: &str = "***";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Bybit API credentials not configured (set BYBIT_API_KEY and BYBIT_API_SECRET)")]
    MissingCredentials,

    #[error("invalid position size {0}: must be in (0, 1]")]
    InvalidPositionSize(f64),

    #[error("invalid collection window: backtest_years must be positive")]
    InvalidWindow,

    #[error("invalid batch limit {0}: must be in 1..={MAX_CANDLE_LIMIT}")]
    InvalidBatchLimit(u32),

    #[error("invalid max_retries {0}: must be at most {MAX_RETRIES}")]
    InvalidRetries(u32),

    #[error("invalid timeframe {0:?}: expected an exchange interval code")]
    InvalidTimeframe(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub testnet: bool,
    pub category: Category,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub api_key: String,
    pub api_secret: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            testnet: true,
            category: Category::Linear,
            timeout_secs: 30,
            max_retries: 3,
            api_key: String::new(),
            api_secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    pub timeframe: Interval,
    pub backtest_years: u32,
    pub batch_limit: u32,
    pub page_delay_ms: u64,
    pub symbol_delay_ms: u64,
    pub quote_delay_ms: u64,
    pub quality_gate: bool,
    pub advance: AdvancePolicy,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            timeframe: Interval::HOURLY,
            backtest_years: 2,
            batch_limit: MAX_CANDLE_LIMIT,
            page_delay_ms: 100,
            symbol_delay_ms: 500,
            quote_delay_ms: 100,
            quality_gate: true,
            advance: AdvancePolicy::NextBucket,
        }
    }
}

/// Position sizing and risk parameters. Validated here; consumed downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub max_position_size: f64,
    pub max_leverage: u32,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub target_annual_return: f64,
    pub copula_confidence_level: f64,
    pub min_correlation_threshold: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            max_position_size: 0.10,
            max_leverage: 10,
            stop_loss_pct: 0.05,
            take_profit_pct: 0.10,
            target_annual_return: 0.10,
            copula_confidence_level: 0.95,
            min_correlation_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `orca_core=debug`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrcaConfig {
    /// Pair catalog TOML; the built-in catalog is used when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_file: Option<PathBuf>,
    pub exchange: ExchangeConfig,
    pub storage: StorageConfig,
    pub collection: CollectionConfig,
    pub trading: TradingConfig,
    pub logging: LoggingConfig,
}

impl OrcaConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// File (explicit path, else `orca.toml` if present, else defaults), then `.env`
    /// and process environment overrides. Does not validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        dotenv::dotenv().ok();
        config.apply_env_from(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from any key/value source.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("BYBIT_API_KEY") {
            self.exchange.api_key = v;
        }
        if let Some(v) = lookup("BYBIT_API_SECRET") {
            self.exchange.api_secret = v;
        }
        if let Some(v) = lookup("BYBIT_TESTNET") {
            self.exchange.testnet = v.trim().eq_ignore_ascii_case("true");
        }
        if let Some(v) = lookup("ORCA_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.logging.level = v.to_ascii_lowercase();
        }
    }

    /// Fatal misconfiguration, checked before any collection.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exchange.api_key.trim().is_empty() || self.exchange.api_secret.trim().is_empty() {
            return Err(ConfigError::MissingCredentials);
        }
        let size = self.trading.max_position_size;
        if !(size > 0.0 && size <= 1.0) {
            return Err(ConfigError::InvalidPositionSize(size));
        }
        if self.collection.backtest_years == 0 {
            return Err(ConfigError::InvalidWindow);
        }
        let limit = self.collection.batch_limit;
        if limit == 0 || limit > MAX_CANDLE_LIMIT {
            return Err(ConfigError::InvalidBatchLimit(limit));
        }
        if self.exchange.max_retries > MAX_RETRIES {
            return Err(ConfigError::InvalidRetries(self.exchange.max_retries));
        }
        let code = self.collection.timeframe.code();
        if !is_valid_key(&code) {
            return Err(ConfigError::InvalidTimeframe(code));
        }
        Ok(())
    }

    pub fn bybit_settings(&self) -> BybitSettings {
        let base = if self.exchange.testnet {
            BybitSettings::testnet()
        } else {
            BybitSettings::mainnet()
        };
        BybitSettings {
            timeout: Duration::from_secs(self.exchange.timeout_secs),
            max_retries: self.exchange.max_retries,
            ..base
        }
    }

    pub fn collection_settings(&self) -> CollectionSettings {
        let c = &self.collection;
        CollectionSettings {
            timeframe: c.timeframe.clone(),
            category: self.exchange.category,
            batch_limit: c.batch_limit,
            years: c.backtest_years,
            policy: c.advance,
            page_pacer: Pacer::from_millis(c.page_delay_ms),
            symbol_pacer: Pacer::from_millis(c.symbol_delay_ms),
            quote_pacer: Pacer::from_millis(c.quote_delay_ms),
            quality_gate: c.quality_gate,
        }
    }

    pub fn catalog(&self) -> Result<PairCatalog, CatalogError> {
        match &self.catalog_file {
            Some(path) => PairCatalog::from_file(path),
            None => Ok(PairCatalog::default_crypto()),
        }
    }

    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mask = |s: &str| {
            if s.is_empty() {
                String::new()
            } else {
                REDACTED.to_string()
            }
        };
        let mut copy = self.clone();
        copy.exchange.api_key = mask(&self.exchange.api_key);
        copy.exchange.api_secret = mask(&self.exchange.api_secret);
        copy
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
