//! Orca Core: historical candle collection for pair-trading research.
//!
//! This crate contains the whole acquisition pipeline:
//! - Domain types (candles, intervals, trading pairs, tickers)
//! - Pair catalog and per-run symbol availability
//! - Exchange gateway trait and the Bybit v5 gateway
//! - Interval-aware pagination over long time ranges
//! - Cleaning and data-quality validation
//! - Idempotent candle storage (in-memory and Parquet)
//! - The collection orchestrator and its run report

pub mod catalog;
pub mod collector;
pub mod config;
pub mod data;
pub mod domain;
pub mod report;

pub use catalog::{CatalogError, PairCatalog, SymbolAvailability};
pub use collector::{
    CollectionProgress, CollectionResult, CollectionSettings, CollectionWindow, Collector,
    SymbolOutcome, TracingProgress,
};
pub use config::{ConfigError, OrcaConfig};
pub use report::{CollectionStage, RunReport, SeriesStats, SeriesSummary, SymbolReport, SymbolStatus};
