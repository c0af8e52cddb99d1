//! Parquet candle store with Hive-style partitioning.
//!
//! Layout: `{root}/symbol={SYMBOL}/timeframe={TF}/{year}.parquet`
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Insert-or-ignore upserts keyed by timestamp within each partition
//! - Integrity validation on load (schema check, row count > 0)
//! - Quarantine for corrupt files ({filename}.quarantined) on the read path;
//!   an upsert over a corrupt partition fails instead of replacing it
//! - Symbols and interval codes restricted to ASCII letters and digits
//! - Metadata sidecar per series (hash, date range, record count)
//! - Symbol registry in `{root}/pairs.json`

use super::storage::{check_key, in_range, keyed, CandleStore, PairRecord, StorageError, UpsertOutcome};
use crate::domain::{Candle, Interval, PairCategory};
use chrono::{DateTime, Datelike, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

const COLUMNS: [&str; 7] = [
    "timestamp",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "turnover",
];
const META_FILE: &str = "meta.json";
const REGISTRY_FILE: &str = "pairs.json";

/// Metadata sidecar for one stored series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesMeta {
    pub symbol: String,
    pub timeframe: Interval,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub record_count: usize,
    pub data_hash: String,
    pub updated_at: DateTime<Utc>,
}

pub struct ParquetStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl ParquetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock_writes(&self) -> Result<MutexGuard<'_, ()>, StorageError> {
        self.write_lock.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// `{root}/symbol={SYMBOL}/timeframe={TF}/`
    fn series_dir(&self, symbol: &str, timeframe: &Interval) -> Result<PathBuf, StorageError> {
        let code = timeframe.code();
        check_key(symbol)?;
        check_key(&code)?;
        Ok(self
            .root
            .join(format!("symbol={symbol}"))
            .join(format!("timeframe={code}")))
    }

    fn meta_path(&self, symbol: &str, timeframe: &Interval) -> Result<PathBuf, StorageError> {
        Ok(self.series_dir(symbol, timeframe)?.join(META_FILE))
    }

    fn registry_path(&self) -> PathBuf {
        self.root.join(REGISTRY_FILE)
    }

    /// Sidecar for a series, if one has been written.
    pub fn meta(&self, symbol: &str, timeframe: &Interval) -> Option<SeriesMeta> {
        let content = fs::read_to_string(self.meta_path(symbol, timeframe).ok()?).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Symbols with a directory for `timeframe`, sorted.
    pub fn stored_symbols(&self, timeframe: &Interval) -> Result<Vec<String>, StorageError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.root).map_err(|e| StorageError::io(&self.root, e))?;
        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&self.root, e))?;
            let name = entry.file_name();
            let Some(symbol) = name.to_str().and_then(|n| n.strip_prefix("symbol=")) else {
                continue;
            };
            if self.series_dir(symbol, timeframe).is_ok_and(|dir| dir.is_dir()) {
                symbols.push(symbol.to_string());
            }
        }
        symbols.sort();
        Ok(symbols)
    }

    fn quarantine(&self, path: &Path, err: &StorageError) {
        let target = path.with_extension("parquet.quarantined");
        warn!(path = %path.display(), error = %err, "quarantining corrupt partition");
        if let Err(e) = fs::rename(path, &target) {
            warn!(path = %path.display(), error = %e, "failed to quarantine partition");
        }
    }

    /// Read path: corrupt partitions are quarantined and read as empty.
    /// I/O errors propagate.
    fn load_partition(&self, path: &Path, symbol: &str, timeframe: &Interval) -> Result<Vec<Candle>, StorageError> {
        match read_partition(path, symbol, timeframe) {
            Ok(rows) => Ok(rows),
            Err(e @ StorageError::Corrupt { .. }) => {
                self.quarantine(path, &e);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn refresh_meta(&self, symbol: &str, timeframe: &Interval) -> Result<(), StorageError> {
        let all = self.query_candles(symbol, timeframe, None, None)?;
        let (Some(first), Some(last)) = (all.first(), all.last()) else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(&all)
            .map_err(|e| StorageError::Serialization(format!("hash serialization: {e}")))?;
        let meta = SeriesMeta {
            symbol: symbol.to_string(),
            timeframe: timeframe.clone(),
            start: first.timestamp,
            end: last.timestamp,
            record_count: all.len(),
            data_hash: blake3::hash(&bytes).to_hex().to_string(),
            updated_at: Utc::now(),
        };
        write_json_atomic(&self.meta_path(symbol, timeframe)?, &meta)
    }

    fn read_registry(&self) -> Result<BTreeMap<String, PairRecord>, StorageError> {
        let path = self.registry_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&path).map_err(|e| StorageError::io(&path, e))?;
        let rows: Vec<PairRecord> = serde_json::from_str(&content)
            .map_err(|e| StorageError::Serialization(format!("{}: {e}", path.display())))?;
        Ok(rows.into_iter().map(|r| (r.symbol.clone(), r)).collect())
    }
}

impl CandleStore for ParquetStore {
    fn upsert_candles(
        &self,
        symbol: &str,
        timeframe: &Interval,
        candles: &[Candle],
    ) -> Result<UpsertOutcome, StorageError> {
        let mut outcome = UpsertOutcome::default();
        if candles.is_empty() {
            return Ok(outcome);
        }

        let dir = self.series_dir(symbol, timeframe)?;
        let _guard = self.lock_writes()?;
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;

        let mut by_year: BTreeMap<i32, Vec<&Candle>> = BTreeMap::new();
        for candle in candles {
            by_year.entry(candle.timestamp.year()).or_default().push(candle);
        }

        // Read every touched partition before writing any, so an unreadable
        // one leaves the series as it was.
        let mut partitions = Vec::with_capacity(by_year.len());
        for (year, incoming) in by_year {
            let path = dir.join(format!("{year}.parquet"));
            let existing = if path.exists() {
                read_partition(&path, symbol, timeframe)?
            } else {
                Vec::new()
            };
            partitions.push((year, path, existing, incoming));
        }

        for (year, path, existing, incoming) in partitions {
            let mut rows: BTreeMap<DateTime<Utc>, Candle> =
                existing.into_iter().map(|c| (c.timestamp, c)).collect();

            let mut inserted = 0;
            for candle in incoming {
                match rows.entry(candle.timestamp) {
                    Entry::Vacant(slot) => {
                        slot.insert(keyed(candle, symbol, timeframe));
                        inserted += 1;
                    }
                    Entry::Occupied(_) => outcome.unchanged += 1,
                }
            }

            if inserted > 0 {
                let rows: Vec<&Candle> = rows.values().collect();
                let mut df = candles_to_dataframe(&rows)?;
                write_parquet_atomic(&mut df, &path)?;
                debug!(symbol, year, inserted, rows = rows.len(), "partition written");
            }
            outcome.inserted += inserted;
        }

        if outcome.inserted > 0 || self.meta(symbol, timeframe).is_none() {
            self.refresh_meta(symbol, timeframe)?;
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
        let dir = self.series_dir(symbol, timeframe)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&dir).map_err(|e| StorageError::io(&dir, e))?;
        let mut out = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&dir, e))?;
            let path = entry.path();

            // Skip meta.json, .tmp, .quarantined
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }
            let year = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<i32>().ok());
            if let Some(year) = year {
                if start.is_some_and(|s| year < s.year()) || end.is_some_and(|e| year > e.year()) {
                    continue;
                }
            }

            out.extend(
                self.load_partition(&path, symbol, timeframe)?
                    .into_iter()
                    .filter(|c| in_range(c.timestamp, start, end)),
            );
        }

        out.sort_by_key(|c| c.timestamp);
        Ok(out)
    }

    fn upsert_pair(&self, symbol: &str, category: PairCategory) -> Result<(), StorageError> {
        let _guard = self.lock_writes()?;
        fs::create_dir_all(&self.root).map_err(|e| StorageError::io(&self.root, e))?;

        let mut registry = self.read_registry()?;
        registry.insert(
            symbol.to_string(),
            PairRecord {
                symbol: symbol.to_string(),
                category,
                is_active: true,
                updated_at: Utc::now(),
            },
        );
        let rows: Vec<&PairRecord> = registry.values().collect();
        write_json_atomic(&self.registry_path(), &rows)
    }

    fn pairs(&self, category: Option<PairCategory>) -> Result<Vec<PairRecord>, StorageError> {
        Ok(self
            .read_registry()?
            .into_values()
            .filter(|r| r.is_active && category.map_or(true, |c| r.category == c))
            .collect())
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn candles_to_dataframe(rows: &[&Candle]) -> Result<DataFrame, StorageError> {
    let timestamps: Vec<i64> = rows.iter().map(|c| c.timestamp.timestamp_millis()).collect();
    let column = |f: fn(&Candle) -> f64| rows.iter().map(|c| f(c)).collect::<Vec<f64>>();

    DataFrame::new(vec![
        Column::new("timestamp".into(), timestamps),
        Column::new("open".into(), column(|c| c.open)),
        Column::new("high".into(), column(|c| c.high)),
        Column::new("low".into(), column(|c| c.low)),
        Column::new("close".into(), column(|c| c.close)),
        Column::new("volume".into(), column(|c| c.volume)),
        Column::new("turnover".into(), column(|c| c.turnover)),
    ])
    .map_err(|e| StorageError::Parquet(format!("dataframe creation: {e}")))
}

fn write_parquet_atomic(df: &mut DataFrame, path: &Path) -> Result<(), StorageError> {
    let tmp_path = path.with_extension("parquet.tmp");
    let file = fs::File::create(&tmp_path).map_err(|e| StorageError::io(&tmp_path, e))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| StorageError::Parquet(format!("write {}: {e}", tmp_path.display())))?;

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StorageError::io(path, e)
    })
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StorageError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| StorageError::Serialization(format!("{}: {e}", path.display())))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json).map_err(|e| StorageError::io(&tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StorageError::io(path, e)
    })
}

/// Load a partition and validate its integrity.
fn read_partition(path: &Path, symbol: &str, timeframe: &Interval) -> Result<Vec<Candle>, StorageError> {
    let corrupt = |reason: String| StorageError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let file = fs::File::open(path).map_err(|e| StorageError::io(path, e))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| corrupt(format!("read: {e}")))?;

    if df.height() == 0 {
        return Err(corrupt("empty partition".into()));
    }
    for name in COLUMNS {
        if df.column(name).is_err() {
            return Err(corrupt(format!("missing column '{name}'")));
        }
    }

    let column_err = |e: PolarsError| corrupt(format!("column read: {e}"));
    let timestamps = df.column("timestamp").map_err(column_err)?.i64().map_err(column_err)?;
    let f64_column = |name: &str| -> Result<Vec<f64>, StorageError> {
        let ca = df.column(name).map_err(column_err)?.f64().map_err(column_err)?;
        Ok(ca.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    };
    let open = f64_column("open")?;
    let high = f64_column("high")?;
    let low = f64_column("low")?;
    let close = f64_column("close")?;
    let volume = f64_column("volume")?;
    let turnover = f64_column("turnover")?;

    let mut candles = Vec::with_capacity(df.height());
    for (i, ts) in timestamps.into_iter().enumerate() {
        let timestamp = ts
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| corrupt(format!("invalid timestamp at row {i}")))?;
        candles.push(Candle {
            symbol: symbol.to_string(),
            timestamp,
            open: open[i],
            high: high[i],
            low: low[i],
            close: close[i],
            volume: volume[i],
            turnover: turnover[i],
            timeframe: timeframe.clone(),
        });
    }
    Ok(candles)
}
