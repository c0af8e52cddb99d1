//! Candle: the fundamental market data unit, plus the interval it is bucketed by.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bucket width of a candle series, expressed with the exchange's interval codes.
///
/// Numeric codes are minutes (`"1"`, `"60"`, `"240"`, ...), `"D"`/`"W"`/`"M"` are
/// day, week and month. Anything else is kept verbatim as `Other` so callers can
/// still request it; time arithmetic on `Other` falls back to hourly steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Interval {
    Minutes(u32),
    Day,
    Week,
    Month,
    Other(String),
}

impl Interval {
    /// One hour, the default collection timeframe.
    pub const HOURLY: Interval = Interval::Minutes(60);

    /// Parse an exchange interval code. Never fails: unknown codes become `Other`.
    pub fn from_code(code: &str) -> Self {
        let code = code.trim();
        match code {
            "D" => Interval::Day,
            "W" => Interval::Week,
            "M" => Interval::Month,
            _ => match code.parse::<u32>() {
                Ok(minutes) if minutes > 0 => Interval::Minutes(minutes),
                _ => Interval::Other(code.to_string()),
            },
        }
    }

    /// The exchange interval code.
    pub fn code(&self) -> String {
        match self {
            Interval::Minutes(m) => m.to_string(),
            Interval::Day => "D".into(),
            Interval::Week => "W".into(),
            Interval::Month => "M".into(),
            Interval::Other(code) => code.clone(),
        }
    }

    /// Whether this is one of the interval units with a dedicated step rule.
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Interval::Other(_))
    }

    /// Move `from` forward by `buckets` intervals.
    ///
    /// Minutes, days and weeks are fixed durations; months are calendar months.
    /// Unrecognized intervals step by one hour per bucket. Saturates at the
    /// maximum representable instant instead of overflowing.
    pub fn advance(&self, from: DateTime<Utc>, buckets: u32) -> DateTime<Utc> {
        let n = i64::from(buckets);
        let shifted = match self {
            Interval::Minutes(m) => from.checked_add_signed(Duration::minutes(i64::from(*m) * n)),
            Interval::Day => from.checked_add_signed(Duration::days(n)),
            Interval::Week => from.checked_add_signed(Duration::weeks(n)),
            Interval::Month => from.checked_add_months(Months::new(buckets)),
            Interval::Other(_) => from.checked_add_signed(Duration::hours(n)),
        };
        shifted.unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for Interval {
    fn default() -> Self {
        Interval::HOURLY
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

impl From<String> for Interval {
    fn from(code: String) -> Self {
        Interval::from_code(&code)
    }
}

impl From<&str> for Interval {
    fn from(code: &str) -> Self {
        Interval::from_code(code)
    }
}

impl From<Interval> for String {
    fn from(interval: Interval) -> Self {
        interval.code()
    }
}

/// A candle row as delivered by the exchange, before cleaning.
///
/// Any numeric cell can be missing (absent or unparsable in the response).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCandle {
    pub timestamp: DateTime<Utc>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub turnover: Option<f64>,
}

impl RawCandle {
    /// Fully populated row.
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        turnover: f64,
    ) -> Self {
        Self {
            timestamp,
            open: Some(open),
            high: Some(high),
            low: Some(low),
            close: Some(close),
            volume: Some(volume),
            turnover: Some(turnover),
        }
    }

    /// Number of missing numeric cells in this row.
    pub fn null_cells(&self) -> usize {
        [
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
            self.turnover,
        ]
        .iter()
        .filter(|v| v.is_none())
        .count()
    }
}

/// OHLCV candle for one symbol and one time bucket.
///
/// Uniquely keyed by `(symbol, timestamp, timeframe)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub turnover: f64,
    pub timeframe: Interval,
}

impl Candle {
    /// Numeric cells per candle (open, high, low, close, volume, turnover).
    pub const NUMERIC_FIELDS: usize = 6;

    /// Storage key.
    pub fn key(&self) -> (&str, DateTime<Utc>, &Interval) {
        (&self.symbol, self.timestamp, &self.timeframe)
    }

    /// Numeric cells in column order.
    pub fn numeric_cells(&self) -> [f64; Self::NUMERIC_FIELDS] {
        [
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
            self.turnover,
        ]
    }

    /// All OHLC values strictly positive.
    pub fn has_positive_prices(&self) -> bool {
        self.open > 0.0 && self.high > 0.0 && self.low > 0.0 && self.close > 0.0
    }

    /// High/low bracket open and close, and high >= low.
    pub fn is_consistent(&self) -> bool {
        self.high >= self.low
            && self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
    }

    /// Positive prices and a consistent OHLC bracket.
    pub fn is_sane(&self) -> bool {
        self.has_positive_prices() && self.is_consistent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 31, h, 0, 0).unwrap()
    }

    fn sample_candle() -> Candle {
        Candle {
            symbol: "ETHUSDT".into(),
            timestamp: ts(0),
            open: 2300.0,
            high: 2310.0,
            low: 2290.0,
            close: 2305.0,
            volume: 1200.0,
            turnover: 2_760_000.0,
            timeframe: Interval::HOURLY,
        }
    }

    #[test]
    fn parses_exchange_codes() {
        assert_eq!(Interval::from_code("60"), Interval::Minutes(60));
        assert_eq!(Interval::from_code("1"), Interval::Minutes(1));
        assert_eq!(Interval::from_code("D"), Interval::Day);
        assert_eq!(Interval::from_code("W"), Interval::Week);
        assert_eq!(Interval::from_code("M"), Interval::Month);
        assert_eq!(Interval::from_code("1h"), Interval::Other("1h".into()));
        assert_eq!(Interval::from_code("0"), Interval::Other("0".into()));
    }

    #[test]
    fn code_roundtrips() {
        for code in ["1", "15", "240", "D", "W", "M", "weird"] {
            assert_eq!(Interval::from_code(code).code(), code);
        }
    }

    #[test]
    fn advance_per_unit() {
        let start = ts(0);
        assert_eq!(Interval::Minutes(15).advance(start, 4), ts(1));
        assert_eq!(Interval::Day.advance(start, 1), start + Duration::days(1));
        assert_eq!(Interval::Week.advance(start, 2), start + Duration::days(14));
        assert_eq!(Interval::Other("x".into()).advance(start, 3), ts(3));
    }

    #[test]
    fn month_advance_is_calendar_aware() {
        // Jan 31 + 1 month clamps to Feb 29 in a leap year
        let next = Interval::Month.advance(ts(0), 1);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap());
    }

    #[test]
    fn advance_saturates() {
        let near_max = DateTime::<Utc>::MAX_UTC - Duration::minutes(1);
        assert_eq!(Interval::Week.advance(near_max, 10), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn interval_serializes_as_code() {
        let json = serde_json::to_string(&Interval::Day).unwrap();
        assert_eq!(json, "\"D\"");
        let parsed: Interval = serde_json::from_str("\"60\"").unwrap();
        assert_eq!(parsed, Interval::HOURLY);
    }

    #[test]
    fn candle_is_sane() {
        assert!(sample_candle().is_sane());
    }

    #[test]
    fn candle_detects_inverted_high_low() {
        let mut c = sample_candle();
        c.high = 2280.0;
        assert!(!c.is_consistent());
        assert!(!c.is_sane());
    }

    #[test]
    fn candle_detects_non_positive_price() {
        let mut c = sample_candle();
        c.open = 0.0;
        assert!(!c.has_positive_prices());
    }

    #[test]
    fn raw_candle_counts_nulls() {
        let mut raw = RawCandle::new(ts(0), 1.0, 2.0, 0.5, 1.5, 10.0, 15.0);
        assert_eq!(raw.null_cells(), 0);
        raw.volume = None;
        raw.close = None;
        assert_eq!(raw.null_cells(), 2);
    }
}
