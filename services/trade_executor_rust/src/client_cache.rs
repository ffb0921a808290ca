//! Per-credential exchange access, cached.
//!
//! Constructing a client parses an RSA key; doing that per attempt would be
//! wasted work, and each credential must share one rate-limit budget across
//! concurrent attempts. The cache is an explicit structure owned by the
//! process, keyed by credential id, with an eviction hook for credential
//! rotation. Never a global.

use crate::config::ExecutorConfig;
use crate::fills::{FillListener, FillStreamEvent};
use crate::rate_limiter::CredentialRateLimiter;
use async_trait::async_trait;
use parking_lot::RwLock;
use predict_rust_core::clients::{ExchangeClient, MarketInfo, OrderSubmission};
use predict_rust_core::error::ExchangeError;
use predict_rust_core::models::{Credential, Order};
use predict_rust_core::orderbook::OrderbookSnapshot;
use predict_rust_core::redis::RedisBus;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Exchange operations the executor needs. The live implementation wraps
/// the REST client and the fill listener; tests substitute a scripted one.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn orderbook(&self, ticker: &str) -> Result<OrderbookSnapshot, ExchangeError>;
    async fn market(&self, ticker: &str) -> Result<MarketInfo, ExchangeError>;
    async fn balance(&self) -> Result<f64, ExchangeError>;
    async fn place_order(&self, submission: &OrderSubmission) -> Result<Order, ExchangeError>;
    /// Open the authenticated fill/order event stream.
    async fn fill_events(&self) -> Result<mpsc::Receiver<FillStreamEvent>, ExchangeError>;
}

struct LiveExchange {
    client: ExchangeClient,
    listener: FillListener,
}

#[async_trait]
impl ExchangeApi for LiveExchange {
    async fn orderbook(&self, ticker: &str) -> Result<OrderbookSnapshot, ExchangeError> {
        self.client.get_orderbook(ticker).await
    }

    async fn market(&self, ticker: &str) -> Result<MarketInfo, ExchangeError> {
        self.client.get_market(ticker).await
    }

    async fn balance(&self) -> Result<f64, ExchangeError> {
        self.client.get_balance().await
    }

    async fn place_order(&self, submission: &OrderSubmission) -> Result<Order, ExchangeError> {
        self.client.place_order(submission).await
    }

    async fn fill_events(&self) -> Result<mpsc::Receiver<FillStreamEvent>, ExchangeError> {
        self.listener.open().await
    }
}

/// Everything one attempt needs for its credential.
pub struct ExecutionContext {
    pub api: Arc<dyn ExchangeApi>,
    pub limiter: Arc<CredentialRateLimiter>,
}

pub struct ClientCache {
    base_url: String,
    ws_url: String,
    read_capacity: f64,
    write_capacity: f64,
    limiter_redis: Option<RedisBus>,
    entries: RwLock<HashMap<String, Arc<ExecutionContext>>>,
}

impl ClientCache {
    pub fn new(config: &ExecutorConfig, limiter_redis: Option<RedisBus>) -> Self {
        Self {
            base_url: config.exchange_base_url.clone(),
            ws_url: config.exchange_ws_url.clone(),
            read_capacity: config.read_rate_capacity,
            write_capacity: config.write_rate_capacity,
            limiter_redis,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Get or build the context for a credential. Construction failures are
    /// authentication failures (bad PEM) and are not cached.
    pub fn context(&self, credential: &Credential) -> Result<Arc<ExecutionContext>, ExchangeError> {
        if let Some(ctx) = self.entries.read().get(&credential.key_id) {
            return Ok(Arc::clone(ctx));
        }

        let client = ExchangeClient::new(
            &self.base_url,
            &credential.key_id,
            &credential.private_key_pem,
        )?;
        let listener = FillListener::new(&self.ws_url, client.signer());
        let limiter = CredentialRateLimiter::new(
            &credential.key_id,
            self.read_capacity,
            self.write_capacity,
            self.limiter_redis.clone(),
        );
        let ctx = Arc::new(ExecutionContext {
            api: Arc::new(LiveExchange { client, listener }),
            limiter: Arc::new(limiter),
        });

        let mut entries = self.entries.write();
        // A racing builder may have gotten here first; keep its entry so
        // every attempt shares one limiter.
        let entry = entries
            .entry(credential.key_id.clone())
            .or_insert_with(|| Arc::clone(&ctx));
        Ok(Arc::clone(entry))
    }

    /// Seed a context directly, e.g. a scripted exchange in tests.
    pub fn insert(&self, key_id: impl Into<String>, ctx: Arc<ExecutionContext>) {
        self.entries.write().insert(key_id.into(), ctx);
    }

    /// Drop a cached context, e.g. after credential rotation. In-flight
    /// attempts keep their Arc until they finish.
    pub fn evict(&self, key_id: &str) -> bool {
        self.entries.write().remove(key_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
