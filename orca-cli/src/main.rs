//! Orca CLI: collection, catalog and store inspection commands.
//!
//! Commands:
//! - `collect`: run the collection pipeline and optionally write the run report
//! - `pairs`: show the pair catalog, optionally checked against the exchange
//! - `verify`: per-symbol record counts and ranges from the store
//! - `ticker`: real-time ticker (and optional order book) snapshot
//! - `config`: print the effective configuration with secrets redacted

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use orca_core::data::{
    BybitGateway, CandleStore, CircuitBreaker, ExchangeGateway, MemoryStore, ParquetStore,
};
use orca_core::domain::Interval;
use orca_core::report::SeriesStats;
use orca_core::{Collector, OrcaConfig, PairCatalog, RunReport, SymbolStatus};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "orca",
    version,
    about = "Orca, historical candle collection for pair trading"
)]
struct Cli {
    /// Path to a TOML config file. Defaults to ./orca.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check availability, fetch history, clean, validate and store.
    Collect {
        /// Restrict the run to these symbols (default: every catalog symbol).
        #[arg(long, num_args = 1..)]
        symbols: Vec<String>,

        /// Interval code, e.g. 60, 240, D.
        #[arg(long)]
        timeframe: Option<String>,

        /// Years of history to collect.
        #[arg(long)]
        years: Option<u32>,

        /// Keep results in memory instead of writing to the data directory.
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Write the run report as JSON to this file.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Show the pair catalog and its statistics.
    Pairs {
        /// Also check every symbol against the exchange.
        #[arg(long, default_value_t = false)]
        check: bool,
    },
    /// Report what the store holds for each symbol.
    Verify {
        /// Interval code. Defaults to the configured timeframe.
        #[arg(long)]
        timeframe: Option<String>,
    },
    /// Print current tickers.
    Ticker {
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Also print the top of the order book.
        #[arg(long, default_value_t = false)]
        book: bool,
    },
    /// Print the effective configuration (secrets redacted).
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = OrcaConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_logging(&config.logging.level);

    match cli.command {
        Commands::Collect {
            symbols,
            timeframe,
            years,
            dry_run,
            report,
        } => run_collect(config, symbols, timeframe, years, dry_run, report.as_deref()),
        Commands::Pairs { check } => run_pairs(&config, check),
        Commands::Verify { timeframe } => run_verify(&config, timeframe),
        Commands::Ticker { symbols, book } => run_ticker(&config, &symbols, book),
        Commands::Config => {
            print!("{}", config.redacted().to_toml()?);
            Ok(())
        }
    }
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build_gateway(config: &OrcaConfig) -> Result<Arc<dyn ExchangeGateway>> {
    let gateway = BybitGateway::new(config.bybit_settings(), Arc::new(CircuitBreaker::default()))?;
    Ok(Arc::new(gateway))
}

fn run_collect(
    mut config: OrcaConfig,
    symbols: Vec<String>,
    timeframe: Option<String>,
    years: Option<u32>,
    dry_run: bool,
    report_path: Option<&Path>,
) -> Result<()> {
    if let Some(code) = timeframe {
        config.collection.timeframe = Interval::from_code(&code);
    }
    if let Some(years) = years {
        config.collection.backtest_years = years;
    }
    config.validate()?;

    let catalog = config.catalog()?;
    let store: Arc<dyn CandleStore> = if dry_run {
        tracing::info!("dry run: results are kept in memory");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(ParquetStore::new(&config.storage.data_dir))
    };
    let collector = Collector::new(build_gateway(&config)?, store, config.collection_settings());

    let report = if symbols.is_empty() {
        collector.run_pipeline(&catalog)
    } else {
        collector.run_for_symbols(&catalog, &symbols, Utc::now())
    };

    print_report(&report);

    if let Some(path) = report_path {
        std::fs::write(path, report.to_json_pretty()?)
            .with_context(|| format!("writing report to {}", path.display()))?;
        println!("Report saved to: {}", path.display());
    }

    if !report.failed_symbols().is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!();
    println!("{:<12} {:<10} {:>9}  {}", "Symbol", "Status", "Records", "Detail");
    println!("{}", "-".repeat(72));
    for (symbol, entry) in &report.summary {
        let records = entry
            .stats
            .as_ref()
            .map(|s| s.total_records.to_string())
            .unwrap_or_else(|| "-".into());
        let mut detail = match &entry.status {
            SymbolStatus::Rejected { reasons } => reasons.join("; "),
            SymbolStatus::Failed { stage, error } => format!("{stage:?}: {error}"),
            SymbolStatus::Stored { inserted, .. } => format!("{inserted} new"),
            _ => entry.error.clone().unwrap_or_default(),
        };
        if entry.incomplete {
            detail.push_str(" (incomplete)");
        }
        println!(
            "{:<12} {:<10} {:>9}  {}",
            symbol,
            entry.status.label(),
            records,
            detail
        );
    }
    println!();
    println!(
        "Collected {} of {} symbols; {} pairs available: {}",
        report.collected_symbols.len(),
        report.summary.len(),
        report.available_pairs.len(),
        report.available_pairs.join(", ")
    );
}

fn run_pairs(config: &OrcaConfig, check: bool) -> Result<()> {
    let catalog = config.catalog()?;
    print_catalog(&catalog);

    if check {
        let collector = Collector::new(
            build_gateway(config)?,
            Arc::new(MemoryStore::new()),
            config.collection_settings(),
        );
        let availability = collector.check_availability(&catalog.all_symbols());
        println!();
        for (pair, ok) in catalog.validate_pair_availability(&availability) {
            println!("{:<22} {}", pair, if ok { "available" } else { "UNAVAILABLE" });
        }
    }
    Ok(())
}

fn print_catalog(catalog: &PairCatalog) {
    let stats = catalog.statistics();
    println!("Trading pairs: {}", stats.total_pairs);
    println!("Unique symbols: {}", stats.unique_symbols);
    for (category, count) in &stats.pairs_per_category {
        println!();
        println!("{} ({count})", category.title());
        for pair in catalog.pairs_by_category(*category) {
            println!("  {:<22} {}", pair.pair_name(), pair.description);
        }
    }
}

fn run_verify(config: &OrcaConfig, timeframe: Option<String>) -> Result<()> {
    let timeframe = timeframe
        .map(|c| Interval::from_code(&c))
        .unwrap_or_else(|| config.collection.timeframe.clone());
    let store = ParquetStore::new(&config.storage.data_dir);

    let mut symbols: BTreeSet<String> = config.catalog()?.all_symbols().into_iter().collect();
    symbols.extend(store.stored_symbols(&timeframe)?);

    println!("Store: {} (timeframe {timeframe})", store.root().display());
    println!(
        "{:<12} {:>9}  {:<20} {:<20} {:>12}",
        "Symbol", "Records", "First", "Last", "Last close"
    );
    println!("{}", "-".repeat(79));
    for symbol in &symbols {
        let candles = store.query_candles(symbol, &timeframe, None, None)?;
        match SeriesStats::from_candles(&candles) {
            Some(stats) => println!(
                "{:<12} {:>9}  {:<20} {:<20} {:>12.4}",
                symbol,
                stats.total_records,
                stats.start_date.format("%Y-%m-%d %H:%M"),
                stats.end_date.format("%Y-%m-%d %H:%M"),
                stats.price_range.current
            ),
            None => println!("{symbol:<12} {:>9}  (no data)", 0),
        }
    }

    let registry = store.pairs(None)?;
    println!();
    println!("Registered symbols: {}", registry.len());
    Ok(())
}

fn run_ticker(config: &OrcaConfig, symbols: &[String], book: bool) -> Result<()> {
    let gateway = build_gateway(config)?;
    let collector = Collector::new(
        gateway.clone(),
        Arc::new(MemoryStore::new()),
        config.collection_settings(),
    );

    let tickers = collector.collect_realtime(symbols);
    println!(
        "{:<12} {:>14} {:>14} {:>14} {:>9} {:>16}",
        "Symbol", "Bid", "Ask", "Last", "Spread", "Volume 24h"
    );
    for (symbol, t) in &tickers {
        let spread = t
            .spread_bps()
            .map(|bps| format!("{bps:.1}bp"))
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<12} {:>14} {:>14} {:>14} {:>9} {:>16.2}",
            symbol, t.bid, t.ask, t.last, spread, t.volume_24h
        );
    }

    if book {
        for symbol in symbols {
            match gateway.get_orderbook(symbol, config.exchange.category, 5)? {
                Some(snapshot) => {
                    println!();
                    println!("{symbol} order book @ {}", snapshot.timestamp);
                    let levels = snapshot.bids.iter().zip(&snapshot.asks);
                    for ((bid_px, bid_sz), (ask_px, ask_sz)) in levels {
                        println!("  {bid_sz:>12} {bid_px:>14} | {ask_px:<14} {ask_sz:<12}");
                    }
                }
                None => println!("{symbol}: empty order book"),
            }
        }
    }
    Ok(())
}
