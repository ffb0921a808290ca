//! Predict Core - shared library for the trade execution services.
//!
//! This module provides:
//! - Signed exchange REST client (RSA-PSS authentication)
//! - Orderbook snapshots with derived ask views
//! - Domain models (intents, orders, fills, execution records)
//! - Wire price normalization (integer cents / decimal strings)
//! - Redis bus for pub/sub and transactional connections
//! - Bounded retry for idempotent exchange reads

pub mod clients;
pub mod error;
pub mod models;
pub mod orderbook;
pub mod redis;
pub mod retry;

pub use clients::{ExchangeClient, MarketInfo, OrderSubmission, RequestSigner, SignatureHeaders};
pub use error::ExchangeError;
pub use models::{
    Action, Credential, Fill, LimitApplied, Order, OrderSizingResult, OrderStatus, OrderType,
    Side, TradeExecutionRecord, TradeIntent,
};
pub use orderbook::{OrderbookLevel, OrderbookSnapshot};
