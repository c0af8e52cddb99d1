//! Property tests for cleaning and pagination invariants.
//!
//! Uses proptest to verify:
//! 1. Cleaned output is strictly ascending with unique timestamps drawn from the input
//! 2. Every cleaned candle has positive, bracketed prices
//! 3. Cleaning is idempotent
//! 4. NextBucket pagination over a gap-free exchange yields every bucket exactly once
//! 5. Pagination crosses stretches without data of any length

use chrono::{DateTime, Duration, TimeZone, Utc};
use orca_core::data::{
    clean, clean_with_report, fetch_history, AdvancePolicy, CandleRequest, ExchangeGateway,
    GatewayError, HistoryRequest, Pacer, StopReason,
};
use orca_core::domain::{Candle, Category, Interval, OrderBookSnapshot, RawCandle, Ticker};
use proptest::prelude::*;
use std::collections::HashSet;

// ── Strategies (proptest) ────────────────────────────────────────────

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Mostly positive prices, with the occasional zero, negative or missing cell.
fn arb_cell() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![
        8 => (1.0..500.0_f64).prop_map(Some),
        1 => Just(None),
        1 => (-50.0..=0.0_f64).prop_map(Some),
    ]
}

fn arb_raw() -> impl Strategy<Value = RawCandle> {
    (0..200i64, arb_cell(), arb_cell(), arb_cell(), arb_cell(), arb_cell()).prop_map(
        |(hour, open, high, low, close, volume)| RawCandle {
            timestamp: base() + Duration::hours(hour),
            open,
            high,
            low,
            close,
            volume,
            turnover: None,
        },
    )
}

/// Well-formed rows: low ≤ open, close ≤ high, all positive.
fn arb_valid_raw() -> impl Strategy<Value = RawCandle> {
    (0..200i64, 10.0..100.0_f64, 0.0..1.0_f64, 0.0..1.0_f64, 0.0..5.0_f64).prop_map(
        |(hour, low, a, b, spread)| {
            let high = low + spread + 0.01;
            let open = low + a * (high - low);
            let close = low + b * (high - low);
            RawCandle::new(base() + Duration::hours(hour), open, high, low, close, 10.0, 10.0 * close)
        },
    )
}

fn as_raw(candles: &[Candle]) -> Vec<RawCandle> {
    candles
        .iter()
        .map(|c| RawCandle::new(c.timestamp, c.open, c.high, c.low, c.close, c.volume, c.turnover))
        .collect()
}

// ── 1–3. Cleaning ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn cleaned_timestamps_are_unique_ascending_and_from_input(
        raw in prop::collection::vec(arb_raw(), 0..120)
    ) {
        let candles = clean("ETHUSDT", &Interval::HOURLY, &raw);
        let input: HashSet<_> = raw.iter().map(|r| r.timestamp).collect();

        prop_assert!(candles.len() <= input.len());
        for pair in candles.windows(2) {
            prop_assert!(pair[0].timestamp < pair[1].timestamp);
        }
        for c in &candles {
            prop_assert!(input.contains(&c.timestamp));
            prop_assert_eq!(c.symbol.as_str(), "ETHUSDT");
            prop_assert_eq!(&c.timeframe, &Interval::HOURLY);
        }
    }

    #[test]
    fn cleaned_candles_have_sane_prices(raw in prop::collection::vec(arb_raw(), 0..120)) {
        for c in clean("ETHUSDT", &Interval::HOURLY, &raw) {
            prop_assert!(c.open > 0.0 && c.high > 0.0 && c.low > 0.0 && c.close > 0.0);
            prop_assert!(c.high >= c.low);
            prop_assert!(c.low <= c.open.min(c.close));
            prop_assert!(c.high >= c.open.max(c.close));
        }
    }

    #[test]
    fn cleaning_is_idempotent(raw in prop::collection::vec(arb_raw(), 0..120)) {
        let once = clean("ETHUSDT", &Interval::HOURLY, &raw);
        let twice = clean("ETHUSDT", &Interval::HOURLY, &as_raw(&once));
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn valid_rows_only_lose_duplicates(raw in prop::collection::vec(arb_valid_raw(), 1..120)) {
        let (candles, report) = clean_with_report("SOLUSDT", &Interval::HOURLY, &raw);
        let unique: HashSet<_> = raw.iter().map(|r| r.timestamp).collect();

        prop_assert_eq!(candles.len(), unique.len());
        prop_assert_eq!(report.duplicates, raw.len() - unique.len());
        prop_assert_eq!(report.dropped(), report.duplicates);
    }
}

// ── 4. Pagination coverage ───────────────────────────────────────────

/// One candle per bucket from `base()`, forever, except for buckets in
/// `missing` (indices from `base()`). Serves the oldest rows at or after the
/// requested start, up to `limit`.
struct GapFree {
    interval: Interval,
    missing: Option<std::ops::Range<u32>>,
}

impl GapFree {
    fn new(interval: Interval) -> Self {
        Self { interval, missing: None }
    }
}

impl ExchangeGateway for GapFree {
    fn name(&self) -> &str {
        "gap-free"
    }

    fn get_candles(&self, request: &CandleRequest) -> Result<Vec<RawCandle>, GatewayError> {
        let Some(start) = request.start else {
            return Err(GatewayError::InvalidRequest("start required".into()));
        };
        let mut bucket = 0u32;
        let mut ts = base();
        while ts < start {
            bucket += 1;
            ts = self.interval.advance(ts, 1);
        }
        let mut rows = Vec::new();
        while request.end.map_or(true, |end| ts <= end) && rows.len() < request.limit as usize {
            if !self.missing.as_ref().is_some_and(|m| m.contains(&bucket)) {
                rows.push(RawCandle::new(ts, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0));
            }
            bucket += 1;
            ts = self.interval.advance(ts, 1);
        }
        Ok(rows)
    }

    fn check_availability(&self, _symbol: &str, _category: Category) -> Result<bool, GatewayError> {
        Ok(true)
    }

    fn get_ticker(&self, _symbol: &str, _category: Category) -> Result<Option<Ticker>, GatewayError> {
        Ok(None)
    }

    fn get_orderbook(
        &self,
        _symbol: &str,
        _category: Category,
        _depth: u32,
    ) -> Result<Option<OrderBookSnapshot>, GatewayError> {
        Ok(None)
    }

    fn is_available(&self) -> bool {
        true
    }
}

proptest! {
    #[test]
    fn next_bucket_pagination_covers_every_bucket_once(
        buckets in 1u32..400,
        batch_limit in 1u32..150,
        four_hourly in any::<bool>(),
    ) {
        let interval = if four_hourly { Interval::Minutes(240) } else { Interval::HOURLY };
        let start = base();
        let end = interval.advance(start, buckets);
        let gateway = GapFree::new(interval.clone());

        let request = HistoryRequest::new("ETHUSDT", interval.clone(), start, end)
            .with_batch_limit(batch_limit);
        let fetch = fetch_history(&gateway, request, Pacer::none(), AdvancePolicy::NextBucket);

        // `end` itself is excluded.
        let expected = buckets as usize;
        let unique: HashSet<_> = fetch.candles.iter().map(|c| c.timestamp).collect();
        prop_assert_eq!(fetch.candles.len(), expected);
        prop_assert_eq!(unique.len(), expected);
        prop_assert!(fetch.complete());
        prop_assert_eq!(fetch.stop, StopReason::ReachedEnd);
    }
}

proptest! {
    #[test]
    fn pagination_crosses_gaps_of_any_length(
        buckets in 10u32..600,
        batch_limit in 1u32..80,
        gap_start in 0u32..600,
        gap_len in 1u32..400,
    ) {
        let interval = Interval::HOURLY;
        let start = base();
        let end = interval.advance(start, buckets);
        let gap_start = gap_start % buckets;
        let missing = gap_start..gap_start.saturating_add(gap_len);
        let gateway = GapFree { interval: interval.clone(), missing: Some(missing.clone()) };

        let request = HistoryRequest::new("ETHUSDT", interval.clone(), start, end)
            .with_batch_limit(batch_limit);
        let fetch = fetch_history(&gateway, request, Pacer::none(), AdvancePolicy::NextBucket);

        let expected: Vec<DateTime<Utc>> = (0..buckets)
            .filter(|b| !missing.contains(b))
            .map(|b| interval.advance(start, b))
            .collect();
        let got: Vec<DateTime<Utc>> = fetch.candles.iter().map(|c| c.timestamp).collect();
        prop_assert_eq!(got, expected);
        prop_assert!(fetch.complete());
        prop_assert_eq!(fetch.stop, StopReason::ReachedEnd);
    }
}
