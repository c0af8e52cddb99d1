//! Paginated history fetching.
//!
//! A [`Paginator`] walks a `[start, end)` range with open-ended requests: each
//! call asks for the oldest `batch_limit` rows at or after the cursor, so
//! stretches with no data (late listings, outages) are crossed by the gateway
//! rather than ending the walk. Rows at or past `end` are dropped. It stops when
//! the exchange returns an empty batch, when the cursor reaches `end`, when the
//! cursor fails to move forward, or on the first gateway error.

use super::gateway::{CandleRequest, ExchangeGateway, GatewayError, MAX_CANDLE_LIMIT};
use super::pacing::Pacer;
use crate::domain::{Category, Interval, RawCandle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// How far the cursor moves after a non-empty batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvancePolicy {
    /// One bucket past the last returned timestamp.
    #[default]
    NextBucket,
    /// `batch_len` buckets past the last returned timestamp. Skips ranges
    /// whenever the exchange returns fewer rows than the window holds.
    FullPage,
}

impl AdvancePolicy {
    pub fn next_cursor(&self, interval: &Interval, last: DateTime<Utc>, batch_len: usize) -> DateTime<Utc> {
        match self {
            AdvancePolicy::NextBucket => interval.advance(last, 1),
            AdvancePolicy::FullPage => {
                interval.advance(last, u32::try_from(batch_len).unwrap_or(u32::MAX))
            }
        }
    }
}

/// Why pagination stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Exchange returned an empty batch.
    Exhausted,
    /// Cursor reached the end of the range.
    ReachedEnd,
    /// Computed cursor did not move forward.
    Stalled,
    /// A gateway call failed; earlier batches are kept.
    GatewayFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRequest {
    pub symbol: String,
    pub interval: Interval,
    pub category: Category,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub batch_limit: u32,
}

impl HistoryRequest {
    pub fn new(symbol: impl Into<String>, interval: Interval, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            category: Category::default(),
            start,
            end,
            batch_limit: MAX_CANDLE_LIMIT,
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_batch_limit(mut self, limit: u32) -> Self {
        self.batch_limit = limit;
        self
    }
}

/// Lazy sequence of candle batches. Yields `Err` at most once, as its last item.
pub struct Paginator<'a> {
    gateway: &'a dyn ExchangeGateway,
    request: HistoryRequest,
    pacer: Pacer,
    policy: AdvancePolicy,
    cursor: DateTime<Utc>,
    calls: usize,
    stop: Option<StopReason>,
}

impl<'a> Paginator<'a> {
    pub fn new(
        gateway: &'a dyn ExchangeGateway,
        mut request: HistoryRequest,
        pacer: Pacer,
        policy: AdvancePolicy,
    ) -> Self {
        request.batch_limit = request.batch_limit.clamp(1, MAX_CANDLE_LIMIT);
        let cursor = request.start;
        Self {
            gateway,
            request,
            pacer,
            policy,
            cursor,
            calls: 0,
            stop: None,
        }
    }

    pub fn cursor(&self) -> DateTime<Utc> {
        self.cursor
    }

    /// `None` while more batches may follow.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }
}

impl Iterator for Paginator<'_> {
    type Item = Result<Vec<RawCandle>, GatewayError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stop.is_some() {
            return None;
        }
        if self.cursor >= self.request.end {
            self.stop = Some(StopReason::ReachedEnd);
            return None;
        }

        if self.calls > 0 {
            self.pacer.pause();
        }
        self.calls += 1;

        let call = CandleRequest::new(self.request.symbol.clone(), self.request.interval.clone())
            .with_category(self.request.category)
            .with_limit(self.request.batch_limit)
            .with_start(self.cursor);

        let batch = match self.gateway.get_candles(&call) {
            Ok(batch) => batch,
            Err(e) => {
                self.stop = Some(StopReason::GatewayFailed);
                return Some(Err(e));
            }
        };

        if batch.is_empty() {
            debug!(symbol = %self.request.symbol, cursor = %self.cursor, "no more data");
            self.stop = Some(StopReason::Exhausted);
            return None;
        }

        let end = self.request.end;
        let batch: Vec<RawCandle> = batch.into_iter().filter(|c| c.timestamp < end).collect();
        let Some(last) = batch.iter().map(|c| c.timestamp).max() else {
            debug!(symbol = %self.request.symbol, cursor = %self.cursor, "next data lies past the range end");
            self.stop = Some(StopReason::ReachedEnd);
            return None;
        };

        let next = self.policy.next_cursor(&self.request.interval, last, batch.len());
        if next <= self.cursor {
            warn!(symbol = %self.request.symbol, cursor = %self.cursor, "cursor did not advance, stopping");
            self.stop = Some(StopReason::Stalled);
        } else {
            self.cursor = next;
        }

        Some(Ok(batch))
    }
}

/// Accumulated pagination output.
#[derive(Debug)]
pub struct HistoryFetch {
    /// All batches concatenated in call order. Not deduplicated or sorted.
    pub candles: Vec<RawCandle>,
    pub batches: usize,
    pub stop: StopReason,
    pub error: Option<GatewayError>,
}

impl HistoryFetch {
    /// False when a gateway error cut the range short.
    pub fn complete(&self) -> bool {
        self.stop != StopReason::GatewayFailed
    }
}

/// Drive a [`Paginator`] to completion.
pub fn fetch_history(
    gateway: &dyn ExchangeGateway,
    request: HistoryRequest,
    pacer: Pacer,
    policy: AdvancePolicy,
) -> HistoryFetch {
    let symbol = request.symbol.clone();
    let mut pages = Paginator::new(gateway, request, pacer, policy);
    let mut candles = Vec::new();
    let mut batches = 0;
    let mut error = None;

    for page in pages.by_ref() {
        match page {
            Ok(batch) => {
                batches += 1;
                candles.extend(batch);
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, batches, "history fetch interrupted");
                error = Some(e);
            }
        }
    }

    let stop = pages.stop_reason().unwrap_or(StopReason::Exhausted);
    info!(symbol = %symbol, records = candles.len(), batches, ?stop, "history fetch finished");

    HistoryFetch {
        candles,
        batches,
        stop,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderBookSnapshot, Ticker};
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex;

    /// Serves one hourly candle per bucket from `listed_at` onward, except
    /// inside `outage`, honoring the start-only contract up to `limit` rows.
    /// Returns an empty batch on call `empty_on` (1-based).
    struct HourlyGateway {
        listed_at: DateTime<Utc>,
        outage: Option<(DateTime<Utc>, DateTime<Utc>)>,
        empty_on: Option<usize>,
        fail_on: Option<usize>,
        calls: Mutex<Vec<CandleRequest>>,
    }

    impl HourlyGateway {
        fn new() -> Self {
            Self {
                listed_at: Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
                outage: None,
                empty_on: None,
                fail_on: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn has_bucket(&self, ts: DateTime<Utc>) -> bool {
            ts >= self.listed_at && !self.outage.is_some_and(|(from, to)| ts >= from && ts < to)
        }

        fn calls(&self) -> Vec<CandleRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ExchangeGateway for HourlyGateway {
        fn name(&self) -> &str {
            "hourly"
        }

        fn get_candles(&self, request: &CandleRequest) -> Result<Vec<RawCandle>, GatewayError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            let n = calls.len();
            if self.fail_on == Some(n) {
                return Err(GatewayError::NetworkUnreachable("down".into()));
            }
            if self.empty_on == Some(n) {
                return Ok(vec![]);
            }
            let mut out = Vec::new();
            let mut ts = request.start.unwrap().max(self.listed_at);
            while request.end.map_or(true, |end| ts <= end) && out.len() < request.limit as usize {
                if self.has_bucket(ts) {
                    out.push(RawCandle::new(ts, 10.0, 11.0, 9.0, 10.5, 1.0, 10.0));
                }
                ts = request.interval.advance(ts, 1);
            }
            Ok(out)
        }

        fn check_availability(&self, _: &str, _: Category) -> Result<bool, GatewayError> {
            Ok(true)
        }

        fn get_ticker(&self, _: &str, _: Category) -> Result<Option<Ticker>, GatewayError> {
            Ok(None)
        }

        fn get_orderbook(&self, _: &str, _: Category, _: u32) -> Result<Option<OrderBookSnapshot>, GatewayError> {
            Ok(None)
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn request(hours: i64, limit: u32) -> HistoryRequest {
        HistoryRequest::new("ETHUSDT", Interval::HOURLY, t0(), t0() + Duration::hours(hours))
            .with_batch_limit(limit)
    }

    #[test]
    fn walks_range_without_gaps_or_overlap() {
        let gw = HourlyGateway::new();
        let fetch = fetch_history(&gw, request(25, 10), Pacer::none(), AdvancePolicy::NextBucket);
        assert!(fetch.complete());
        assert_eq!(fetch.stop, StopReason::ReachedEnd);
        assert_eq!(fetch.batches, 3);
        assert_eq!(fetch.candles.len(), 25);
        let mut ts: Vec<_> = fetch.candles.iter().map(|c| c.timestamp).collect();
        ts.dedup();
        assert_eq!(ts.len(), 25);
        assert_eq!(ts.last(), Some(&(t0() + Duration::hours(24))));
    }

    #[test]
    fn requests_start_at_the_cursor_and_rows_past_end_are_dropped() {
        let gw = HourlyGateway::new();
        let fetch = fetch_history(&gw, request(15, 10), Pacer::none(), AdvancePolicy::NextBucket);
        let calls = gw.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].start, Some(t0()));
        assert_eq!(calls[1].start, Some(t0() + Duration::hours(10)));
        assert!(calls.iter().all(|c| c.end.is_none() && c.limit == 10));
        assert_eq!(fetch.candles.len(), 15);
        assert!(fetch.candles.iter().all(|c| c.timestamp < t0() + Duration::hours(15)));
        assert_eq!(fetch.stop, StopReason::ReachedEnd);
    }

    #[test]
    fn late_listing_is_fetched_in_full() {
        // No data for the first 35 windows of 10 buckets.
        let listed_at = t0() + Duration::hours(350);
        let gw = HourlyGateway {
            listed_at,
            ..HourlyGateway::new()
        };
        let fetch = fetch_history(&gw, request(400, 10), Pacer::none(), AdvancePolicy::NextBucket);
        assert_eq!(fetch.stop, StopReason::ReachedEnd);
        assert_eq!(fetch.candles.len(), 50);
        assert_eq!(fetch.candles.first().map(|c| c.timestamp), Some(listed_at));
        assert_eq!(fetch.batches, 5);
    }

    #[test]
    fn outage_longer_than_a_window_is_crossed() {
        let outage = (t0() + Duration::hours(20), t0() + Duration::hours(75));
        let gw = HourlyGateway {
            outage: Some(outage),
            ..HourlyGateway::new()
        };
        let fetch = fetch_history(&gw, request(100, 10), Pacer::none(), AdvancePolicy::NextBucket);
        assert_eq!(fetch.stop, StopReason::ReachedEnd);
        assert_eq!(fetch.candles.len(), 100 - 55);
        assert!(fetch.candles.iter().all(|c| c.timestamp < outage.0 || c.timestamp >= outage.1));
        assert!(fetch
            .candles
            .iter()
            .any(|c| c.timestamp == t0() + Duration::hours(99)));
    }

    #[test]
    fn data_only_after_end_stops_without_rows() {
        let gw = HourlyGateway {
            listed_at: t0() + Duration::hours(500),
            ..HourlyGateway::new()
        };
        let fetch = fetch_history(&gw, request(100, 10), Pacer::none(), AdvancePolicy::NextBucket);
        assert_eq!(fetch.stop, StopReason::ReachedEnd);
        assert!(fetch.candles.is_empty());
        assert_eq!(gw.calls().len(), 1);
    }

    #[test]
    fn empty_batch_on_nth_call_keeps_first_n_minus_one() {
        let gw = HourlyGateway {
            empty_on: Some(3),
            ..HourlyGateway::new()
        };
        let fetch = fetch_history(&gw, request(100, 10), Pacer::none(), AdvancePolicy::NextBucket);
        assert_eq!(fetch.stop, StopReason::Exhausted);
        assert_eq!(fetch.batches, 2);
        assert_eq!(fetch.candles.len(), 20);
        assert_eq!(gw.calls().len(), 3);
        assert!(fetch.complete());
    }

    #[test]
    fn gateway_error_returns_partial_result() {
        let gw = HourlyGateway {
            fail_on: Some(2),
            ..HourlyGateway::new()
        };
        let fetch = fetch_history(&gw, request(100, 10), Pacer::none(), AdvancePolicy::NextBucket);
        assert_eq!(fetch.stop, StopReason::GatewayFailed);
        assert!(!fetch.complete());
        assert_eq!(fetch.candles.len(), 10);
        assert!(matches!(fetch.error, Some(GatewayError::NetworkUnreachable(_))));
    }

    #[test]
    fn start_at_or_after_end_makes_no_calls() {
        let gw = HourlyGateway::new();
        let fetch = fetch_history(&gw, request(0, 10), Pacer::none(), AdvancePolicy::NextBucket);
        assert_eq!(fetch.stop, StopReason::ReachedEnd);
        assert_eq!(fetch.batches, 0);
        assert!(gw.calls().is_empty());
    }

    #[test]
    fn full_page_policy_skips_ahead() {
        let gw = HourlyGateway::new();
        let fetch = fetch_history(&gw, request(100, 10), Pacer::none(), AdvancePolicy::FullPage);
        let calls = gw.calls();
        // last = t0+9h, advanced by 10 buckets
        assert_eq!(calls[1].start, Some(t0() + Duration::hours(19)));
        assert!(fetch.candles.len() < 101);
    }

    #[test]
    fn batch_limit_is_clamped() {
        let gw = HourlyGateway::new();
        let mut pages = Paginator::new(&gw, request(5000, 5000), Pacer::none(), AdvancePolicy::NextBucket);
        let first = pages.next().unwrap().unwrap();
        assert_eq!(first.len(), 1000);
        assert_eq!(gw.calls()[0].limit, 1000);
    }

    #[test]
    fn stalled_cursor_stops() {
        struct Stuck;
        impl ExchangeGateway for Stuck {
            fn name(&self) -> &str {
                "stuck"
            }
            fn get_candles(&self, _: &CandleRequest) -> Result<Vec<RawCandle>, GatewayError> {
                // Always answers with a candle from before the range
                let old = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
                Ok(vec![RawCandle::new(old, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0)])
            }
            fn check_availability(&self, _: &str, _: Category) -> Result<bool, GatewayError> {
                Ok(true)
            }
            fn get_ticker(&self, _: &str, _: Category) -> Result<Option<Ticker>, GatewayError> {
                Ok(None)
            }
            fn get_orderbook(&self, _: &str, _: Category, _: u32) -> Result<Option<OrderBookSnapshot>, GatewayError> {
                Ok(None)
            }
            fn is_available(&self) -> bool {
                true
            }
        }

        let fetch = fetch_history(&Stuck, request(100, 10), Pacer::none(), AdvancePolicy::NextBucket);
        assert_eq!(fetch.stop, StopReason::Stalled);
        assert_eq!(fetch.batches, 1);
    }

    #[test]
    fn daily_range_uses_day_steps() {
        let gw = HourlyGateway::new();
        let req = HistoryRequest::new("ETHUSDT", Interval::Day, t0(), t0() + Duration::days(30))
            .with_batch_limit(7);
        let fetch = fetch_history(&gw, req, Pacer::none(), AdvancePolicy::NextBucket);
        assert_eq!(fetch.candles.len(), 30);
        assert_eq!(gw.calls()[1].start, Some(t0() + Duration::days(7)));
    }
}
