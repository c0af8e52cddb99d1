//! Run report: per-symbol outcome plus statistics of what is persisted.

use crate::domain::Candle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pipeline stage at which a symbol failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStage {
    Availability,
    Fetching,
    Storing,
}

/// Terminal state of one symbol in a collection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SymbolStatus {
    /// Not listed on the exchange; never fetched.
    Skipped,
    /// Exchange returned no rows for the window.
    NoData,
    /// Nothing survived cleaning, or the quality gate failed.
    Rejected { reasons: Vec<String> },
    Stored { records: usize, inserted: usize },
    Failed { stage: CollectionStage, error: String },
}

impl SymbolStatus {
    pub fn is_stored(&self) -> bool {
        matches!(self, SymbolStatus::Stored { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            SymbolStatus::Skipped => "SKIPPED",
            SymbolStatus::NoData => "NO_DATA",
            SymbolStatus::Rejected { .. } => "REJECTED",
            SymbolStatus::Stored { .. } => "STORED",
            SymbolStatus::Failed { .. } => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
    pub current: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeStats {
    pub mean: f64,
    pub max: f64,
    pub current: f64,
}

/// Statistics over a persisted series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub total_records: usize,
    /// Non-finite cells per column.
    pub missing_values: BTreeMap<String, usize>,
    pub price_range: PriceRange,
    pub volume_stats: VolumeStats,
}

impl SeriesStats {
    /// `None` for an empty series. Expects candles ascending by timestamp.
    pub fn from_candles(candles: &[Candle]) -> Option<Self> {
        let first = candles.first()?;
        let last = candles.last()?;

        let names = ["open", "high", "low", "close", "volume", "turnover"];
        let mut missing: BTreeMap<String, usize> = names.iter().map(|n| (n.to_string(), 0)).collect();
        for candle in candles {
            for (name, value) in names.iter().zip(candle.numeric_cells()) {
                if !value.is_finite() {
                    *missing.entry(name.to_string()).or_default() += 1;
                }
            }
        }

        let closes = candles.iter().map(|c| c.close).filter(|v| v.is_finite());
        let (min, max) = closes.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });

        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).filter(|v| v.is_finite()).collect();
        let mean = if volumes.is_empty() {
            0.0
        } else {
            volumes.iter().sum::<f64>() / volumes.len() as f64
        };
        let vol_max = volumes.iter().copied().fold(0.0, f64::max);

        Some(Self {
            start_date: first.timestamp,
            end_date: last.timestamp,
            total_records: candles.len(),
            missing_values: missing,
            price_range: PriceRange {
                min,
                max,
                current: last.close,
            },
            volume_stats: VolumeStats {
                mean,
                max: vol_max,
                current: last.volume,
            },
        })
    }
}

pub const NO_DATA_MESSAGE: &str = "No data available";

/// Persisted-data summary for one symbol: statistics, or why there are none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeriesSummary {
    Stats(SeriesStats),
    Error { error: String },
}

impl SeriesSummary {
    pub fn no_data() -> Self {
        SeriesSummary::Error {
            error: NO_DATA_MESSAGE.to_string(),
        }
    }

    pub fn stats(&self) -> Option<&SeriesStats> {
        match self {
            SeriesSummary::Stats(stats) => Some(stats),
            SeriesSummary::Error { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolReport {
    pub status: SymbolStatus,
    /// Pagination was cut short by a gateway error.
    pub incomplete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<SeriesStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SymbolReport {
    pub fn new(status: SymbolStatus, incomplete: bool, summary: SeriesSummary) -> Self {
        let (stats, error) = match summary {
            SeriesSummary::Stats(stats) => (Some(stats), None),
            SeriesSummary::Error { error } => (None, Some(error)),
        };
        Self {
            status,
            incomplete,
            stats,
            error,
        }
    }
}

/// Outcome of one pipeline run. Always produced, even when every symbol fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub collected_symbols: Vec<String>,
    pub available_pairs: Vec<String>,
    pub summary: BTreeMap<String, SymbolReport>,
}

impl RunReport {
    /// Symbols per status label.
    pub fn status_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for report in self.summary.values() {
            *counts.entry(report.status.label()).or_default() += 1;
        }
        counts
    }

    pub fn failed_symbols(&self) -> Vec<&str> {
        self.summary
            .iter()
            .filter(|(_, r)| matches!(r.status, SymbolStatus::Failed { .. }))
            .map(|(s, _)| s.as_str())
            .collect()
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
