//! Exchange gateway trait and structured error types.
//!
//! The ExchangeGateway trait abstracts over the exchange transport so the
//! pagination engine and the collector can run against the live Bybit API or
//! against in-process fakes in tests.

use crate::domain::{Category, Interval, OrderBookSnapshot, RawCandle, Ticker};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Upper bound on rows per candle request.
pub const MAX_CANDLE_LIMIT: u32 = 1000;

/// Structured error types for gateway calls.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by exchange (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("exchange rejected request (code {code}): {message}")]
    Api { code: i64, message: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("hard stop: exchange has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("gateway error: {0}")]
    Other(String),
}

/// One candle request: at most `limit` rows from `start`, optionally
/// bounded by an inclusive `end`.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleRequest {
    pub symbol: String,
    pub interval: Interval,
    pub category: Category,
    pub limit: u32,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl CandleRequest {
    pub fn new(symbol: impl Into<String>, interval: Interval) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            category: Category::default(),
            limit: MAX_CANDLE_LIMIT,
            start: None,
            end: None,
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Open-ended request: the oldest rows at or after `start`.
    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = None;
        self
    }

    pub fn with_window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    /// Reject limits outside `1..=1000` and inverted windows.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.limit == 0 || self.limit > MAX_CANDLE_LIMIT {
            return Err(GatewayError::InvalidRequest(format!(
                "limit {} outside 1..={MAX_CANDLE_LIMIT}",
                self.limit
            )));
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(GatewayError::InvalidRequest(format!(
                    "start {start} is after end {end}"
                )));
            }
        }
        Ok(())
    }
}

/// Trait for exchange gateways.
///
/// Implementations own transport concerns (timeouts, retries, rate-limit
/// handling). Callers only see rows, booleans, and `GatewayError`.
pub trait ExchangeGateway: Send + Sync {
    /// Human-readable name of this gateway.
    fn name(&self) -> &str;

    /// Candle rows, ascending by timestamp.
    ///
    /// With `start` and no `end`, returns up to `limit` of the oldest rows at
    /// or after `start`, skipping over any stretch the exchange has no data
    /// for. An empty vector then means nothing exists at or after `start`.
    /// With both bounds, returns rows inside `[start, end]` only.
    fn get_candles(&self, request: &CandleRequest) -> Result<Vec<RawCandle>, GatewayError>;

    /// Whether the symbol is listed for the category.
    fn check_availability(&self, symbol: &str, category: Category) -> Result<bool, GatewayError>;

    /// Current ticker, or `None` when the exchange returns nothing.
    fn get_ticker(&self, symbol: &str, category: Category) -> Result<Option<Ticker>, GatewayError>;

    /// Order book snapshot with up to `depth` levels per side.
    fn get_orderbook(
        &self,
        symbol: &str,
        category: Category,
        depth: u32,
    ) -> Result<Option<OrderBookSnapshot>, GatewayError>;

    /// False while the gateway refuses to send requests (e.g. after a ban).
    fn is_available(&self) -> bool;
}
