//! Candle storage trait and the in-memory store.
//!
//! Stores are idempotent on `(symbol, timestamp, timeframe)`: re-inserting a
//! key that is already present leaves the stored row untouched.

use crate::domain::{Candle, Interval, PairCategory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt partition {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("invalid storage key {0:?}: only ASCII letters and digits are allowed")]
    InvalidKey(String),

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("storage error: {0}")]
    Other(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Symbols and interval codes become path segments, so they are limited to
/// ASCII letters and digits.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_alphanumeric())
}

pub(crate) fn check_key(key: &str) -> Result<(), StorageError> {
    if is_valid_key(key) {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// Rows written vs. rows whose key already existed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub inserted: usize,
    pub unchanged: usize,
}

impl UpsertOutcome {
    pub fn total(&self) -> usize {
        self.inserted + self.unchanged
    }
}

/// Registry row for a tracked symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairRecord {
    pub symbol: String,
    pub category: PairCategory,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

pub trait CandleStore: Send + Sync {
    /// Insert candles whose key is absent; existing keys are left unchanged.
    fn upsert_candles(
        &self,
        symbol: &str,
        timeframe: &Interval,
        candles: &[Candle],
    ) -> Result<UpsertOutcome, StorageError>;

    /// Candles in `[start, end]` (either bound optional), ascending by timestamp.
    fn query_candles(
        &self,
        symbol: &str,
        timeframe: &Interval,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>, StorageError>;

    /// Insert or replace the registry row for `symbol`.
    fn upsert_pair(&self, symbol: &str, category: PairCategory) -> Result<(), StorageError>;

    /// Active registry rows, optionally filtered by category, sorted by symbol.
    fn pairs(&self, category: Option<PairCategory>) -> Result<Vec<PairRecord>, StorageError>;

    /// Most recent stored candle.
    fn latest_candle(&self, symbol: &str, timeframe: &Interval) -> Result<Option<Candle>, StorageError> {
        Ok(self.query_candles(symbol, timeframe, None, None)?.pop())
    }
}

pub(crate) fn in_range(ts: DateTime<Utc>, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> bool {
    start.map_or(true, |s| ts >= s) && end.map_or(true, |e| ts <= e)
}

/// Candle re-keyed to the series it is stored under.
pub(crate) fn keyed(candle: &Candle, symbol: &str, timeframe: &Interval) -> Candle {
    Candle {
        symbol: symbol.to_string(),
        timeframe: timeframe.clone(),
        ..candle.clone()
    }
}

type Series = BTreeMap<DateTime<Utc>, Candle>;

/// Process-local store. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    series: Mutex<HashMap<(String, Interval), Series>>,
    registry: Mutex<BTreeMap<String, PairRecord>>,
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, StorageError> {
    m.lock().map_err(|_| StorageError::LockPoisoned)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total rows across every series.
    pub fn record_count(&self) -> usize {
        self.series
            .lock()
            .map(|s| s.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }
}

impl CandleStore for MemoryStore {
    fn upsert_candles(
        &self,
        symbol: &str,
        timeframe: &Interval,
        candles: &[Candle],
    ) -> Result<UpsertOutcome, StorageError> {
        let mut all = lock(&self.series)?;
        let series = all
            .entry((symbol.to_string(), timeframe.clone()))
            .or_default();

        let mut outcome = UpsertOutcome::default();
        for candle in candles {
            if series.contains_key(&candle.timestamp) {
                outcome.unchanged += 1;
            } else {
                series.insert(candle.timestamp, keyed(candle, symbol, timeframe));
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }

    fn query_candles(
        &self,
        symbol: &str,
        timeframe: &Interval,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>, StorageError> {
        let all = lock(&self.series)?;
        Ok(all
            .get(&(symbol.to_string(), timeframe.clone()))
            .map(|series| {
                series
                    .values()
                    .filter(|c| in_range(c.timestamp, start, end))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn upsert_pair(&self, symbol: &str, category: PairCategory) -> Result<(), StorageError> {
        lock(&self.registry)?.insert(
            symbol.to_string(),
            PairRecord {
                symbol: symbol.to_string(),
                category,
                is_active: true,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn pairs(&self, category: Option<PairCategory>) -> Result<Vec<PairRecord>, StorageError> {
        Ok(lock(&self.registry)?
            .values()
            .filter(|r| r.is_active && category.map_or(true, |c| r.category == c))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn candle(h: i64, close: f64) -> Candle {
        Candle {
            symbol: "ETHUSDT".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(h),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1.0,
            turnover: close,
            timeframe: Interval::HOURLY,
        }
    }

    #[test]
    fn upsert_is_idempotent_and_keeps_first() {
        let store = MemoryStore::new();
        let tf = Interval::HOURLY;
        let first = store
            .upsert_candles("ETHUSDT", &tf, &[candle(0, 10.0), candle(1, 11.0)])
            .unwrap();
        assert_eq!(first, UpsertOutcome { inserted: 2, unchanged: 0 });

        let second = store
            .upsert_candles("ETHUSDT", &tf, &[candle(1, 99.0), candle(2, 12.0)])
            .unwrap();
        assert_eq!(second, UpsertOutcome { inserted: 1, unchanged: 1 });

        let rows = store.query_candles("ETHUSDT", &tf, None, None).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].close, 11.0);
        assert_eq!(store.record_count(), 3);
    }

    #[test]
    fn series_are_keyed_by_timeframe() {
        let store = MemoryStore::new();
        store
            .upsert_candles("ETHUSDT", &Interval::HOURLY, &[candle(0, 10.0)])
            .unwrap();
        assert!(store
            .query_candles("ETHUSDT", &Interval::Day, None, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn query_range_is_inclusive() {
        let store = MemoryStore::new();
        let tf = Interval::HOURLY;
        let rows: Vec<_> = (0..10).map(|h| candle(h, 10.0 + h as f64)).collect();
        store.upsert_candles("ETHUSDT", &tf, &rows).unwrap();

        let got = store
            .query_candles("ETHUSDT", &tf, Some(rows[2].timestamp), Some(rows[5].timestamp))
            .unwrap();
        assert_eq!(got.len(), 4);
        assert_eq!(store.latest_candle("ETHUSDT", &tf).unwrap().unwrap().close, 19.0);
    }

    #[test]
    fn registry_replaces_rows() {
        let store = MemoryStore::new();
        store.upsert_pair("ETHUSDT", PairCategory::Layer1).unwrap();
        store.upsert_pair("ETHUSDT", PairCategory::CrossEcosystem).unwrap();
        store.upsert_pair("UNIUSDT", PairCategory::Defi).unwrap();

        let all = store.pairs(None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].category, PairCategory::CrossEcosystem);
        assert_eq!(store.pairs(Some(PairCategory::Defi)).unwrap().len(), 1);
        assert!(store.pairs(Some(PairCategory::Layer1)).unwrap().is_empty());
    }

    #[test]
    fn storage_keys() {
        for ok in ["ETHUSDT", "1000PEPEUSDT", "60", "D"] {
            assert!(is_valid_key(ok), "{ok}");
        }
        for bad in ["", "../ETH", "ETH/USDT", "a b", "x.y", "ÉTH"] {
            assert!(!is_valid_key(bad), "{bad}");
        }
        assert!(matches!(check_key(".."), Err(StorageError::InvalidKey(_))));
    }
}
