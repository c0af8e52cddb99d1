//! Candle cleaning and data-quality validation.
//!
//! `clean` turns gateway rows into stored candles:
//! 1. dedupe by timestamp, first occurrence wins
//! 2. order by time, forward-fill then backward-fill null cells
//! 3. drop rows with a non-positive (or still missing) OHLC value
//! 4. drop rows with `high < low`
//! 5. drop rows whose high/low do not bracket open and close
//! 6. ascending by timestamp
//!
//! `validate_quality` is a separate gate applied to an already-cleaned series.

use crate::domain::{Candle, Interval, RawCandle};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Null-cell share above which a series is rejected.
pub const MAX_MISSING_RATIO: f64 = 0.10;
/// `max(close) / min(close)` above which a series is rejected.
pub const MAX_CLOSE_RANGE: f64 = 1000.0;
/// Zero-volume row share above which a series is rejected.
pub const MAX_ZERO_VOLUME_RATIO: f64 = 0.5;

/// Rows removed at each cleaning step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanReport {
    pub input: usize,
    pub duplicates: usize,
    pub filled_cells: usize,
    pub non_positive: usize,
    pub inverted: usize,
    pub inconsistent: usize,
    pub output: usize,
}

impl CleanReport {
    pub fn dropped(&self) -> usize {
        self.input - self.output
    }
}

/// Clean raw rows into candles. Pure and total: bad rows are dropped, never errors.
pub fn clean(symbol: &str, timeframe: &Interval, raw: &[RawCandle]) -> Vec<Candle> {
    clean_with_report(symbol, timeframe, raw).0
}

pub fn clean_with_report(
    symbol: &str,
    timeframe: &Interval,
    raw: &[RawCandle],
) -> (Vec<Candle>, CleanReport) {
    let mut report = CleanReport {
        input: raw.len(),
        ..Default::default()
    };

    let mut seen = HashSet::with_capacity(raw.len());
    let mut rows: Vec<RawCandle> = raw
        .iter()
        .filter(|r| seen.insert(r.timestamp))
        .cloned()
        .collect();
    report.duplicates = raw.len() - rows.len();

    rows.sort_by_key(|r| r.timestamp);
    report.filled_cells = fill_gaps(&mut rows);

    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        let (Some(open), Some(high), Some(low), Some(close)) = (row.open, row.high, row.low, row.close)
        else {
            report.non_positive += 1;
            continue;
        };
        let candle = Candle {
            symbol: symbol.to_string(),
            timestamp: row.timestamp,
            open,
            high,
            low,
            close,
            volume: row.volume.unwrap_or(0.0),
            turnover: row.turnover.unwrap_or(0.0),
            timeframe: timeframe.clone(),
        };
        if !candle.numeric_cells()[..4].iter().all(|v| v.is_finite()) || !candle.has_positive_prices() {
            report.non_positive += 1;
        } else if candle.high < candle.low {
            report.inverted += 1;
        } else if !candle.is_consistent() {
            report.inconsistent += 1;
        } else {
            candles.push(candle);
        }
    }

    report.output = candles.len();
    (candles, report)
}

fn cell_mut(row: &mut RawCandle, column: usize) -> &mut Option<f64> {
    match column {
        0 => &mut row.open,
        1 => &mut row.high,
        2 => &mut row.low,
        3 => &mut row.close,
        4 => &mut row.volume,
        _ => &mut row.turnover,
    }
}

/// Forward-fill then backward-fill each numeric column in place. Returns cells filled.
fn fill_gaps(rows: &mut [RawCandle]) -> usize {
    let mut filled = 0;
    for column in 0..Candle::NUMERIC_FIELDS {
        let mut last = None;
        for row in rows.iter_mut() {
            let cell = cell_mut(row, column);
            match *cell {
                Some(v) if v.is_finite() => last = Some(v),
                _ => {
                    *cell = last;
                    filled += usize::from(last.is_some());
                }
            }
        }
        let mut next = None;
        for row in rows.iter_mut().rev() {
            let cell = cell_mut(row, column);
            match *cell {
                Some(v) if v.is_finite() => next = Some(v),
                _ => {
                    *cell = next;
                    filled += usize::from(next.is_some());
                }
            }
        }
    }
    filled
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum QualityIssue {
    #[error("empty series")]
    Empty,
    #[error("too many missing values: {ratio:.4} of all cells")]
    TooManyMissing { ratio: f64 },
    #[error("{count} zero/negative prices")]
    NonPositivePrices { count: usize },
    #[error("suspicious close range: {ratio:.2}x")]
    SuspiciousPriceRange { ratio: f64 },
    #[error("too many zero-volume records: {count} of {total}")]
    TooManyZeroVolume { count: usize, total: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub records: usize,
    pub issues: Vec<QualityIssue>,
}

impl QualityReport {
    pub fn passed(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.issues.iter().map(ToString::to_string).collect()
    }
}

/// Run every quality check and collect all failures.
pub fn validate_quality(candles: &[Candle]) -> QualityReport {
    let records = candles.len();
    if records == 0 {
        return QualityReport {
            records,
            issues: vec![QualityIssue::Empty],
        };
    }

    let mut issues = Vec::new();

    let total_cells = records * Candle::NUMERIC_FIELDS;
    let missing = candles
        .iter()
        .flat_map(|c| c.numeric_cells())
        .filter(|v| !v.is_finite())
        .count();
    let ratio = missing as f64 / total_cells as f64;
    if ratio > MAX_MISSING_RATIO {
        issues.push(QualityIssue::TooManyMissing { ratio });
    }

    let non_positive: usize = candles
        .iter()
        .map(|c| {
            [c.open, c.high, c.low, c.close]
                .iter()
                .filter(|v| **v <= 0.0)
                .count()
        })
        .sum();
    if non_positive > 0 {
        issues.push(QualityIssue::NonPositivePrices { count: non_positive });
    }

    let closes = candles.iter().map(|c| c.close).filter(|v| v.is_finite());
    let (min, max) = closes.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if min > 0.0 && max.is_finite() && max / min > MAX_CLOSE_RANGE {
        issues.push(QualityIssue::SuspiciousPriceRange { ratio: max / min });
    }

    let zero_volume = candles.iter().filter(|c| c.volume == 0.0).count();
    if zero_volume as f64 > records as f64 * MAX_ZERO_VOLUME_RATIO {
        issues.push(QualityIssue::TooManyZeroVolume {
            count: zero_volume,
            total: records,
        });
    }

    QualityReport { records, issues }
}
