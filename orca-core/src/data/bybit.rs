//! Bybit v5 market-data gateway.
//!
//! Fetches klines, tickers and order books from the public v5 REST API.
//! Handles rate limiting, retries with exponential backoff, response parsing,
//! and the circuit breaker.

use super::circuit_breaker::CircuitBreaker;
use super::gateway::{CandleRequest, ExchangeGateway, GatewayError};
use crate::domain::{BookLevel, Category, OrderBookSnapshot, RawCandle, Ticker};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const MAINNET_URL: &str = "https://api.bybit.com";
pub const TESTNET_URL: &str = "https://api-testnet.bybit.com";

/// Exchange-side rate limit.
const RET_RATE_LIMITED: i64 = 10006;
/// Request parameter error, returned for unlisted symbols.
const RET_INVALID_PARAMS: i64 = 10001;
/// Longest single pause between retries.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Common v5 response envelope. `result` is decoded per endpoint once
/// `retCode` has been checked, since error replies carry an empty object.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct KlineResult {
    #[serde(default)]
    list: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TickerResult {
    #[serde(default)]
    list: Vec<TickerRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerRow {
    symbol: String,
    #[serde(default)]
    bid1_price: String,
    #[serde(default)]
    ask1_price: String,
    #[serde(default)]
    last_price: String,
    #[serde(default, rename = "volume24h")]
    volume_24h: String,
}

#[derive(Debug, Deserialize)]
struct OrderBookResult {
    #[serde(default)]
    s: String,
    #[serde(default)]
    b: Vec<Vec<String>>,
    #[serde(default)]
    a: Vec<Vec<String>>,
    #[serde(default)]
    ts: Option<i64>,
}

/// Connection settings for [`BybitGateway`].
#[derive(Debug, Clone)]
pub struct BybitSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl BybitSettings {
    pub fn mainnet() -> Self {
        Self {
            base_url: MAINNET_URL.to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }

    pub fn testnet() -> Self {
        Self {
            base_url: TESTNET_URL.to_string(),
            ..Self::mainnet()
        }
    }
}

impl Default for BybitSettings {
    fn default() -> Self {
        Self::mainnet()
    }
}

pub struct BybitGateway {
    client: reqwest::blocking::Client,
    settings: BybitSettings,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl BybitGateway {
    pub fn new(
        settings: BybitSettings,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("orca/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            settings,
            circuit_breaker,
        })
    }

    pub fn settings(&self) -> &BybitSettings {
        &self.settings
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    /// One kline call, passed through as requested.
    fn fetch_klines(&self, request: &CandleRequest) -> Result<Vec<RawCandle>, GatewayError> {
        let mut query = vec![
            ("category", request.category.as_str().to_string()),
            ("symbol", request.symbol.clone()),
            ("interval", request.interval.code()),
            ("limit", request.limit.to_string()),
        ];
        if let Some(start) = request.start {
            query.push(("start", start.timestamp_millis().to_string()));
        }
        if let Some(end) = request.end {
            query.push(("end", end.timestamp_millis().to_string()));
        }

        let (result, _) = self.get::<KlineResult>("/v5/market/kline", &query)?;
        let candles = parse_klines(&request.symbol, result);
        debug!(symbol = %request.symbol, rows = candles.len(), "kline batch received");
        Ok(candles)
    }

    /// Execute a GET with retry and circuit breaker logic. Returns the
    /// decoded `result` object and the server time.
    fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<(T, Option<i64>), GatewayError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(GatewayError::CircuitBreakerTripped);
        }

        let url = self.url(path);
        let mut last_error = None;

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(self.settings.base_delay, attempt);
                debug!(path, attempt, delay_ms = delay.as_millis() as u64, "retrying");
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(GatewayError::CircuitBreakerTripped);
            }

            let resp = match self.client.get(&url).query(query).send() {
                Ok(resp) => resp,
                Err(e) => {
                    self.circuit_breaker.record_failure();
                    if e.is_connect() || e.is_timeout() {
                        last_error = Some(GatewayError::NetworkUnreachable(e.to_string()));
                        continue;
                    }
                    return Err(GatewayError::NetworkUnreachable(e.to_string()));
                }
            };

            let status = resp.status();

            if status == reqwest::StatusCode::FORBIDDEN {
                self.circuit_breaker.trip();
                return Err(GatewayError::CircuitBreakerTripped);
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                self.circuit_breaker.record_failure();
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                last_error = Some(GatewayError::RateLimited {
                    retry_after_secs: retry_after,
                });
                continue;
            }

            if !status.is_success() {
                self.circuit_breaker.record_failure();
                last_error = Some(GatewayError::Other(format!("HTTP {status} for {path}")));
                continue;
            }

            let envelope: Envelope = resp.json().map_err(|e| {
                GatewayError::ResponseFormatChanged(format!("failed to parse {path} response: {e}"))
            })?;

            if envelope.ret_code == RET_RATE_LIMITED {
                self.circuit_breaker.record_failure();
                last_error = Some(GatewayError::RateLimited { retry_after_secs: 1 });
                continue;
            }

            self.circuit_breaker.record_success();
            return decode_envelope(envelope);
        }

        Err(last_error.unwrap_or_else(|| GatewayError::Other("max retries exceeded".into())))
    }
}

/// `base * 2^(attempt - 1)`, saturating and capped at [`MAX_BACKOFF`].
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

/// Oldest rows at or after `start`.
///
/// Bybit answers a kline request without `end` with the newest rows, so the
/// oldest ones are looked up through bounded windows of `limit` buckets. When
/// the first window is empty, one open-ended call shows whether anything
/// follows and where the forward scan can stop.
fn oldest_from<F>(request: &CandleRequest, start: DateTime<Utc>, mut fetch: F) -> Result<Vec<RawCandle>, GatewayError>
where
    F: FnMut(&CandleRequest) -> Result<Vec<RawCandle>, GatewayError>,
{
    let window = |from: DateTime<Utc>| {
        let to = request
            .interval
            .advance(from, request.limit)
            .checked_sub_signed(chrono::Duration::milliseconds(1))
            .unwrap_or(from)
            .max(from);
        request.clone().with_window(from, to)
    };

    let first = fetch(&window(start))?;
    if !first.is_empty() {
        return Ok(first);
    }

    let latest = fetch(request)?;
    let Some(oldest_seen) = latest.first().map(|c| c.timestamp) else {
        return Ok(latest);
    };
    if latest.len() < request.limit as usize {
        return Ok(latest);
    }

    let mut from = request.interval.advance(start, request.limit);
    while from <= oldest_seen {
        let batch = fetch(&window(from))?;
        if !batch.is_empty() {
            debug!(symbol = %request.symbol, %start, resumed_at = %from, "skipped range without data");
            return Ok(batch);
        }
        from = request.interval.advance(from, request.limit);
    }
    Ok(latest)
}

fn decode_envelope<T: DeserializeOwned>(envelope: Envelope) -> Result<(T, Option<i64>), GatewayError> {
    if envelope.ret_code != 0 {
        return Err(GatewayError::Api {
            code: envelope.ret_code,
            message: envelope.ret_msg,
        });
    }
    let result = serde_json::from_value(envelope.result)
        .map_err(|e| GatewayError::ResponseFormatChanged(format!("unexpected result shape: {e}")))?;
    Ok((result, envelope.time))
}

fn millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

fn cell(row: &[String], idx: usize) -> Option<f64> {
    row.get(idx)
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Kline rows arrive newest-first as `[start, open, high, low, close, volume, turnover]`.
/// Unparsable numeric cells become nulls; rows without a usable start time are dropped.
fn parse_klines(symbol: &str, result: KlineResult) -> Vec<RawCandle> {
    let mut candles: Vec<RawCandle> = result
        .list
        .iter()
        .filter_map(|row| {
            let timestamp = row
                .first()
                .and_then(|s| s.parse::<i64>().ok())
                .and_then(millis);
            let Some(timestamp) = timestamp else {
                warn!(symbol, ?row, "dropping kline row without a valid start time");
                return None;
            };
            Some(RawCandle {
                timestamp,
                open: cell(row, 1),
                high: cell(row, 2),
                low: cell(row, 3),
                close: cell(row, 4),
                volume: cell(row, 5),
                turnover: cell(row, 6),
            })
        })
        .collect();
    candles.reverse();
    candles
}

fn parse_ticker(result: TickerResult, time: Option<i64>) -> Option<Ticker> {
    let row = result.list.into_iter().next()?;
    let num = |s: &str| s.parse::<f64>().unwrap_or(0.0);
    Some(Ticker {
        bid: num(&row.bid1_price),
        ask: num(&row.ask1_price),
        last: num(&row.last_price),
        volume_24h: num(&row.volume_24h),
        symbol: row.symbol,
        timestamp: time.and_then(millis).unwrap_or_else(Utc::now),
    })
}

fn parse_levels(levels: &[Vec<String>]) -> Vec<BookLevel> {
    levels
        .iter()
        .filter_map(|lvl| Some((cell(lvl, 0)?, cell(lvl, 1)?)))
        .collect()
}

fn parse_orderbook(symbol: &str, result: OrderBookResult) -> Option<OrderBookSnapshot> {
    if result.b.is_empty() && result.a.is_empty() {
        return None;
    }
    Some(OrderBookSnapshot {
        symbol: if result.s.is_empty() {
            symbol.to_string()
        } else {
            result.s
        },
        bids: parse_levels(&result.b),
        asks: parse_levels(&result.a),
        timestamp: result.ts.and_then(millis).unwrap_or_else(Utc::now),
    })
}

fn is_unknown_symbol(err: &GatewayError) -> bool {
    matches!(err, GatewayError::Api { code, .. } if *code == RET_INVALID_PARAMS)
}

impl ExchangeGateway for BybitGateway {
    fn name(&self) -> &str {
        "bybit"
    }

    fn get_candles(&self, request: &CandleRequest) -> Result<Vec<RawCandle>, GatewayError> {
        request.validate()?;
        match (request.start, request.end) {
            (Some(start), None) => oldest_from(request, start, |r| self.fetch_klines(r)),
            _ => self.fetch_klines(request),
        }
    }

    fn check_availability(&self, symbol: &str, category: Category) -> Result<bool, GatewayError> {
        match self.get_ticker(symbol, category) {
            Ok(ticker) => Ok(ticker.is_some()),
            Err(e) if is_unknown_symbol(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn get_ticker(&self, symbol: &str, category: Category) -> Result<Option<Ticker>, GatewayError> {
        let query = [
            ("category", category.as_str().to_string()),
            ("symbol", symbol.to_string()),
        ];
        let (result, time) = self.get::<TickerResult>("/v5/market/tickers", &query)?;
        Ok(parse_ticker(result, time))
    }

    fn get_orderbook(
        &self,
        symbol: &str,
        category: Category,
        depth: u32,
    ) -> Result<Option<OrderBookSnapshot>, GatewayError> {
        let query = [
            ("category", category.as_str().to_string()),
            ("symbol", symbol.to_string()),
            ("limit", depth.max(1).to_string()),
        ];
        let (result, _) = self.get::<OrderBookResult>("/v5/market/orderbook", &query)?;
        Ok(parse_orderbook(symbol, result))
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}
