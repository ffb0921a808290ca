//! Trade Executor Service Library
//!
//! Exposes the execution engine and its safeguard components for testing.

pub mod audit;
pub mod client_cache;
pub mod config;
pub mod engine;
pub mod fills;
pub mod rate_limiter;
pub mod sizing;
pub mod store;

// Re-export commonly used types
pub use audit::{AuditEventType, AuditLogEntry, AuditLogger};
pub use client_cache::{ClientCache, ExchangeApi, ExecutionContext};
pub use config::ExecutorConfig;
pub use engine::{
    CredentialStore, EnvCredentialStore, ExchangeMarketMetadata, ExchangePortfolio,
    MarketMetadata, PortfolioState, TradeExecutor,
};
pub use fills::{FillListener, FillStreamEvent, OrderOutcome};
pub use rate_limiter::{CredentialRateLimiter, SharedTokenBucket, TokenBucket};
pub use sizing::{size_order, SizingConfig, SizingError};
pub use store::{MemoryRecordStore, RecordStore, RedisRecordStore};
