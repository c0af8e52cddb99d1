//! Collection orchestrator: availability gating, history fetch, cleaning,
//! quality gate and persistence, one symbol at a time.
//!
//! Per symbol:
//! `pending -> skipped | fetching -> no_data | cleaning -> rejected | stored`,
//! with `failed` possible at any stage. One symbol's failure never aborts the run.

use crate::catalog::{PairCatalog, SymbolAvailability};
use crate::data::{
    clean_with_report, fetch_history, validate_quality, AdvancePolicy, CandleStore, CleanReport,
    ExchangeGateway, GatewayError, HistoryRequest, Pacer, MAX_CANDLE_LIMIT,
};
use crate::domain::{Category, Interval, Ticker};
use crate::report::{
    CollectionStage, RunReport, SeriesStats, SeriesSummary, SymbolReport, SymbolStatus,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Knobs for a collection run.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSettings {
    pub timeframe: Interval,
    pub category: Category,
    pub batch_limit: u32,
    pub years: u32,
    pub policy: AdvancePolicy,
    /// Between pagination calls.
    pub page_pacer: Pacer,
    /// Between symbols.
    pub symbol_pacer: Pacer,
    /// Between ticker / availability calls.
    pub quote_pacer: Pacer,
    /// Reject series that fail `validate_quality`.
    pub quality_gate: bool,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            timeframe: Interval::HOURLY,
            category: Category::Linear,
            batch_limit: MAX_CANDLE_LIMIT,
            years: 2,
            policy: AdvancePolicy::NextBucket,
            page_pacer: Pacer::from_millis(100),
            symbol_pacer: Pacer::from_millis(500),
            quote_pacer: Pacer::from_millis(100),
            quality_gate: true,
        }
    }
}

impl CollectionSettings {
    /// Same settings with every delay removed.
    pub fn without_pacing(mut self) -> Self {
        self.page_pacer = Pacer::none();
        self.symbol_pacer = Pacer::none();
        self.quote_pacer = Pacer::none();
        self
    }
}

/// Closed-open time range to collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CollectionWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// `years × 365` days back from `now`.
    pub fn trailing_years(years: u32, now: DateTime<Utc>) -> Self {
        let start = now
            .checked_sub_signed(Duration::days(i64::from(years) * 365))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { start, end: now }
    }
}

/// What happened to one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolOutcome {
    pub symbol: String,
    pub status: SymbolStatus,
    pub incomplete: bool,
    pub clean: Option<CleanReport>,
}

impl SymbolOutcome {
    fn new(symbol: &str, status: SymbolStatus) -> Self {
        Self {
            symbol: symbol.to_string(),
            status,
            incomplete: false,
            clean: None,
        }
    }
}

/// Outcomes of `collect_historical`, in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionResult {
    pub outcomes: Vec<SymbolOutcome>,
}

impl CollectionResult {
    pub fn get(&self, symbol: &str) -> Option<&SymbolOutcome> {
        self.outcomes.iter().find(|o| o.symbol == symbol)
    }

    pub fn stored_symbols(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| o.status.is_stored())
            .map(|o| o.symbol.clone())
            .collect()
    }

    pub fn stored_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_stored()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, SymbolStatus::Failed { .. }))
            .count()
    }
}

/// Progress callback for multi-symbol collection.
pub trait CollectionProgress: Send + Sync {
    fn on_start(&self, symbol: &str, index: usize, total: usize);

    fn on_complete(&self, outcome: &SymbolOutcome, index: usize, total: usize);

    fn on_batch_complete(&self, result: &CollectionResult);
}

/// Reports progress through `tracing`.
pub struct TracingProgress;

impl CollectionProgress for TracingProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize) {
        info!(symbol, "[{}/{}] collecting", index + 1, total);
    }

    fn on_complete(&self, outcome: &SymbolOutcome, _index: usize, _total: usize) {
        match &outcome.status {
            SymbolStatus::Stored { records, inserted } => {
                info!(symbol = %outcome.symbol, records, inserted, incomplete = outcome.incomplete, "stored")
            }
            SymbolStatus::Failed { stage, error } => {
                warn!(symbol = %outcome.symbol, ?stage, error = %error, "failed")
            }
            other => info!(symbol = %outcome.symbol, status = other.label(), "done"),
        }
    }

    fn on_batch_complete(&self, result: &CollectionResult) {
        info!(
            total = result.outcomes.len(),
            stored = result.stored_count(),
            failed = result.failed_count(),
            "collection complete"
        );
    }
}

pub struct Collector {
    gateway: Arc<dyn ExchangeGateway>,
    store: Arc<dyn CandleStore>,
    settings: CollectionSettings,
    progress: Arc<dyn CollectionProgress>,
}

impl Collector {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        store: Arc<dyn CandleStore>,
        settings: CollectionSettings,
    ) -> Self {
        Self {
            gateway,
            store,
            settings,
            progress: Arc::new(TracingProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn CollectionProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn settings(&self) -> &CollectionSettings {
        &self.settings
    }

    /// Probe every symbol once. Errors are returned separately and count as unavailable.
    fn lookup_availability(&self, symbols: &[String]) -> (SymbolAvailability, BTreeMap<String, String>) {
        let mut availability = SymbolAvailability::new();
        let mut errors = BTreeMap::new();

        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 {
                self.settings.quote_pacer.pause();
            }
            match self.gateway.check_availability(symbol, self.settings.category) {
                Ok(available) => {
                    if !available {
                        warn!(symbol = %symbol, "symbol not available on exchange");
                    }
                    availability.insert(symbol.clone(), available);
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "availability check failed");
                    availability.insert(symbol.clone(), false);
                    errors.insert(symbol.clone(), e.to_string());
                }
            }
        }

        info!(
            available = availability.available_count(),
            total = symbols.len(),
            "availability checked"
        );
        (availability, errors)
    }

    /// Which symbols are listed. Gateway errors count as unavailable.
    pub fn check_availability(&self, symbols: &[String]) -> SymbolAvailability {
        self.lookup_availability(symbols).0
    }

    /// Fetch, clean, validate and store each symbol over `window`.
    pub fn collect_historical(
        &self,
        symbols: &[String],
        availability: &SymbolAvailability,
        window: CollectionWindow,
    ) -> CollectionResult {
        let total = symbols.len();
        let mut result = CollectionResult::default();
        let mut fetched_any = false;

        for (i, symbol) in symbols.iter().enumerate() {
            self.progress.on_start(symbol, i, total);

            let outcome = if !availability.is_available(symbol) {
                SymbolOutcome::new(symbol, SymbolStatus::Skipped)
            } else if !self.gateway.is_available() {
                SymbolOutcome::new(
                    symbol,
                    SymbolStatus::Failed {
                        stage: CollectionStage::Fetching,
                        error: GatewayError::CircuitBreakerTripped.to_string(),
                    },
                )
            } else {
                if fetched_any {
                    self.settings.symbol_pacer.pause();
                }
                fetched_any = true;
                self.collect_symbol(symbol, window)
            };

            self.progress.on_complete(&outcome, i, total);
            result.outcomes.push(outcome);
        }

        self.progress.on_batch_complete(&result);
        result
    }

    fn collect_symbol(&self, symbol: &str, window: CollectionWindow) -> SymbolOutcome {
        let settings = &self.settings;
        let request = HistoryRequest::new(symbol, settings.timeframe.clone(), window.start, window.end)
            .with_category(settings.category)
            .with_batch_limit(settings.batch_limit);

        let fetch = fetch_history(self.gateway.as_ref(), request, settings.page_pacer, settings.policy);
        let incomplete = !fetch.complete();

        if fetch.candles.is_empty() {
            let status = match fetch.error {
                Some(e) => SymbolStatus::Failed {
                    stage: CollectionStage::Fetching,
                    error: e.to_string(),
                },
                None => SymbolStatus::NoData,
            };
            return SymbolOutcome {
                incomplete,
                ..SymbolOutcome::new(symbol, status)
            };
        }

        let (candles, clean) = clean_with_report(symbol, &settings.timeframe, &fetch.candles);
        debug!(symbol, ?clean, "cleaned");

        let rejected = if candles.is_empty() {
            Some(vec!["no valid records after cleaning".to_string()])
        } else if settings.quality_gate {
            let quality = validate_quality(&candles);
            (!quality.passed()).then(|| quality.reasons())
        } else {
            None
        };

        let status = match rejected {
            Some(reasons) => {
                warn!(symbol, ?reasons, "series rejected");
                SymbolStatus::Rejected { reasons }
            }
            None => match self.store.upsert_candles(symbol, &settings.timeframe, &candles) {
                Ok(outcome) => SymbolStatus::Stored {
                    records: candles.len(),
                    inserted: outcome.inserted,
                },
                Err(e) => {
                    error!(symbol, error = %e, "failed to store candles");
                    SymbolStatus::Failed {
                        stage: CollectionStage::Storing,
                        error: e.to_string(),
                    }
                }
            },
        };

        SymbolOutcome {
            symbol: symbol.to_string(),
            status,
            incomplete,
            clean: Some(clean),
        }
    }

    /// Current ticker per symbol. Errors and empty replies are logged and skipped.
    pub fn collect_realtime(&self, symbols: &[String]) -> BTreeMap<String, Ticker> {
        let mut tickers = BTreeMap::new();
        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 {
                self.settings.quote_pacer.pause();
            }
            match self.gateway.get_ticker(symbol, self.settings.category) {
                Ok(Some(ticker)) => {
                    debug!(symbol = %symbol, last = ticker.last, "ticker");
                    tickers.insert(symbol.clone(), ticker);
                }
                Ok(None) => warn!(symbol = %symbol, "no ticker returned"),
                Err(e) => error!(symbol = %symbol, error = %e, "ticker request failed"),
            }
        }
        tickers
    }

    /// Register both symbols of every catalog pair. Returns registry writes.
    pub fn update_trading_pairs(&self, catalog: &PairCatalog) -> Result<usize, crate::data::StorageError> {
        let mut written = 0;
        for pair in catalog.all_pairs() {
            self.store.upsert_pair(&pair.symbol1, pair.category)?;
            self.store.upsert_pair(&pair.symbol2, pair.category)?;
            written += 2;
        }
        info!(pairs = catalog.len(), "trading pairs registered");
        Ok(written)
    }

    /// Statistics of what is persisted for each symbol at the configured timeframe.
    pub fn summarize(&self, symbols: &[String]) -> BTreeMap<String, SeriesSummary> {
        symbols
            .iter()
            .map(|symbol| {
                let summary = match self
                    .store
                    .query_candles(symbol, &self.settings.timeframe, None, None)
                {
                    Ok(candles) => SeriesStats::from_candles(&candles)
                        .map(SeriesSummary::Stats)
                        .unwrap_or_else(SeriesSummary::no_data),
                    Err(e) => SeriesSummary::Error {
                        error: e.to_string(),
                    },
                };
                (symbol.clone(), summary)
            })
            .collect()
    }

    /// Full run over the catalog: availability, pair registry, collection, summary.
    pub fn run_pipeline(&self, catalog: &PairCatalog) -> RunReport {
        self.run_pipeline_at(catalog, Utc::now())
    }

    /// As [`run_pipeline`](Self::run_pipeline), with the window ending at `now`.
    pub fn run_pipeline_at(&self, catalog: &PairCatalog, now: DateTime<Utc>) -> RunReport {
        let started_at = Utc::now();
        info!(gateway = self.gateway.name(), "starting collection pipeline");
        catalog.log_summary();

        let symbols = catalog.all_symbols();
        self.run_symbols(catalog, &symbols, now, started_at)
    }

    /// Pipeline restricted to `symbols` (which need not all be in the catalog).
    pub fn run_for_symbols(&self, catalog: &PairCatalog, symbols: &[String], now: DateTime<Utc>) -> RunReport {
        self.run_symbols(catalog, symbols, now, Utc::now())
    }

    fn run_symbols(
        &self,
        catalog: &PairCatalog,
        symbols: &[String],
        now: DateTime<Utc>,
        started_at: DateTime<Utc>,
    ) -> RunReport {
        let (availability, availability_errors) = self.lookup_availability(symbols);

        let available_pairs: Vec<String> = catalog
            .available_pairs(&availability)
            .iter()
            .map(|p| p.pair_name())
            .collect();
        info!(pairs = available_pairs.len(), "available pairs");

        if let Err(e) = self.update_trading_pairs(catalog) {
            error!(error = %e, "failed to update trading pair registry");
        }

        let window = CollectionWindow::trailing_years(self.settings.years, now);
        let collected = self.collect_historical(symbols, &availability, window);
        let mut summaries = self.summarize(symbols);

        let summary = collected
            .outcomes
            .iter()
            .map(|outcome| {
                let status = match availability_errors.get(&outcome.symbol) {
                    Some(error) => SymbolStatus::Failed {
                        stage: CollectionStage::Availability,
                        error: error.clone(),
                    },
                    None => outcome.status.clone(),
                };
                let series = summaries
                    .remove(&outcome.symbol)
                    .unwrap_or_else(SeriesSummary::no_data);
                (
                    outcome.symbol.clone(),
                    SymbolReport::new(status, outcome.incomplete, series),
                )
            })
            .collect();

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            collected_symbols: collected.stored_symbols(),
            available_pairs,
            summary,
        };
        info!(
            collected = report.collected_symbols.len(),
            symbols = symbols.len(),
            "collection pipeline finished"
        );
        report
    }
}
