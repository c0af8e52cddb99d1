//! Product categories and real-time market snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Exchange product kind. Validated at the boundary (config, CLI).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    Linear,
    Inverse,
    Spot,
    Option,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Linear => "linear",
            Category::Inverse => "inverse",
            Category::Spot => "spot",
            Category::Option => "option",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("unknown product category '{0}' (expected linear, inverse, spot, or option)")]
pub struct ParseCategoryError(pub String);

impl FromStr for Category {
    type Err = ParseCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(Category::Linear),
            "inverse" => Ok(Category::Inverse),
            "spot" => Ok(Category::Spot),
            "option" => Ok(Category::Option),
            other => Err(ParseCategoryError(other.to_string())),
        }
    }
}

/// Best bid/ask and last trade for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub volume_24h: f64,
    pub timestamp: DateTime<Utc>,
}

impl Ticker {
    /// Bid/ask midpoint; `None` when either side is missing.
    pub fn mid(&self) -> Option<f64> {
        (self.bid > 0.0 && self.ask > 0.0).then(|| (self.bid + self.ask) / 2.0)
    }

    /// Quoted spread in basis points of the midpoint.
    pub fn spread_bps(&self) -> Option<f64> {
        self.mid().map(|mid| (self.ask - self.bid) / mid * 10_000.0)
    }
}

/// One side level: (price, size).
pub type BookLevel = (f64, f64);

/// Order book snapshot, best levels first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub timestamp: DateTime<Utc>,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<BookLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<BookLevel> {
        self.asks.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parses_case_insensitively() {
        assert_eq!("Linear".parse::<Category>().unwrap(), Category::Linear);
        assert_eq!(" spot ".parse::<Category>().unwrap(), Category::Spot);
        assert!("futures".parse::<Category>().is_err());
    }

    #[test]
    fn category_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Category::Inverse).unwrap(), "\"inverse\"");
        let c: Category = serde_json::from_str("\"option\"").unwrap();
        assert_eq!(c, Category::Option);
    }

    #[test]
    fn ticker_spread() {
        let t = Ticker {
            symbol: "ETHUSDT".into(),
            bid: 99.0,
            ask: 101.0,
            last: 100.0,
            volume_24h: 5.0,
            timestamp: Utc::now(),
        };
        assert_eq!(t.mid(), Some(100.0));
        assert!((t.spread_bps().unwrap() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn ticker_without_quotes_has_no_mid() {
        let t = Ticker {
            symbol: "ETHUSDT".into(),
            bid: 0.0,
            ask: 101.0,
            last: 100.0,
            volume_24h: 5.0,
            timestamp: Utc::now(),
        };
        assert_eq!(t.mid(), None);
    }
}
