//! Exchange access, pagination, cleaning and storage

pub mod bybit;
pub mod circuit_breaker;
pub mod cleaning;
pub mod gateway;
pub mod pacing;
pub mod pagination;
pub mod parquet_store;
pub mod storage;

pub use bybit::{BybitGateway, BybitSettings};
pub use circuit_breaker::CircuitBreaker;
pub use cleaning::{clean, clean_with_report, validate_quality, CleanReport, QualityIssue, QualityReport};
pub use gateway::{CandleRequest, ExchangeGateway, GatewayError, MAX_CANDLE_LIMIT};
pub use pacing::Pacer;
pub use pagination::{fetch_history, AdvancePolicy, HistoryFetch, HistoryRequest, Paginator, StopReason};
pub use parquet_store::{ParquetStore, SeriesMeta};
pub use storage::{is_valid_key, CandleStore, MemoryStore, PairRecord, StorageError, UpsertOutcome};
