//! Domain types for Orca

pub mod candle;
pub mod market;
pub mod pair;

pub use candle::{Candle, Interval, RawCandle};
pub use market::{BookLevel, Category, OrderBookSnapshot, ParseCategoryError, Ticker};
pub use pair::{PairCategory, TradingPair};
