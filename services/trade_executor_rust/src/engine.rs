//! Execution engine: one attempt from intent to durable record.
//!
//! Every attempt produces exactly one TradeExecutionRecord, success or not.
//! Business rejections (sizing constraints, insufficient balance, paused
//! markets) close the record with `success=false` and a message; they are
//! never surfaced as errors past this module. Transport and authentication
//! failures are captured the same way but logged at error severity.

use crate::audit::{AuditEventType, AuditLogger};
use crate::client_cache::{ClientCache, ExecutionContext};
use crate::config::ExecutorConfig;
use crate::fills::{await_order_outcome, outcome_deadline, OrderOutcome};
use crate::sizing::{size_order, SizingConfig};
use crate::store::RecordStore;
use async_trait::async_trait;
use chrono::Utc;
use log::{error, info, warn};
use predict_rust_core::clients::OrderSubmission;
use predict_rust_core::error::ExchangeError;
use predict_rust_core::models::{
    Credential, Fill, OrderStatus, TradeExecutionRecord, TradeIntent,
};
use predict_rust_core::retry::execute_with_retry;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use tokio::time::Duration;
use uuid::Uuid;

// ============================================================================
// External collaborators
// ============================================================================

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn credential(&self, user_id: &str) -> Result<Credential, ExchangeError>;
}

/// Current portfolio state. Always re-read immediately before placement;
/// concurrent attempts may have spent the budget since the intent was built.
#[async_trait]
pub trait PortfolioState: Send + Sync {
    async fn available_cash(&self, user_id: &str) -> Result<f64, ExchangeError>;
}

#[async_trait]
pub trait MarketMetadata: Send + Sync {
    async fn open_interest(&self, ticker: &str) -> Result<u64, ExchangeError>;
}

// ============================================================================
// Executor
// ============================================================================

pub struct TradeExecutor {
    credentials: Arc<dyn CredentialStore>,
    portfolio: Arc<dyn PortfolioState>,
    metadata: Arc<dyn MarketMetadata>,
    records: Arc<dyn RecordStore>,
    clients: Arc<ClientCache>,
    audit: Arc<AuditLogger>,
    config: ExecutorConfig,
}

impl TradeExecutor {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        portfolio: Arc<dyn PortfolioState>,
        metadata: Arc<dyn MarketMetadata>,
        records: Arc<dyn RecordStore>,
        clients: Arc<ClientCache>,
        audit: Arc<AuditLogger>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            credentials,
            portfolio,
            metadata,
            records,
            clients,
            audit,
            config,
        }
    }

    /// Run one execution attempt to completion. Never returns an error:
    /// whatever happens is in the record.
    pub async fn execute(&self, intent: TradeIntent) -> TradeExecutionRecord {
        self.execute_gated(intent, true).await
    }

    /// Run a batch for admission as a unit: the write bucket is charged for
    /// the whole batch before the first order goes out, so a batch is never
    /// partially admitted by rate limiting.
    pub async fn execute_batch(&self, intents: Vec<TradeIntent>) -> Vec<TradeExecutionRecord> {
        let mut per_user: HashMap<String, u32> = HashMap::new();
        for intent in &intents {
            *per_user.entry(intent.user_id.clone()).or_insert(0) += 1;
        }
        for (user_id, count) in per_user {
            if let Ok(credential) = self.credentials.credential(&user_id).await {
                if let Ok(ctx) = self.clients.context(&credential) {
                    ctx.limiter.acquire_write(count).await;
                }
            }
            // Credential problems surface per-attempt below
        }

        let mut results = Vec::with_capacity(intents.len());
        for intent in intents {
            results.push(self.execute_gated(intent, false).await);
        }
        results
    }

    async fn execute_gated(
        &self,
        intent: TradeIntent,
        gate_write: bool,
    ) -> TradeExecutionRecord {
        let trade_id = Uuid::new_v4().to_string();
        let mut record = TradeExecutionRecord::open(&trade_id, &intent);

        self.audit.log_requested(&trade_id, &intent).await;
        if let Err(e) = self.records.create(&record).await {
            // The attempt still runs; the finalize write will try again.
            error!("Failed to open execution record {}: {}", trade_id, e);
        }

        // Credential and per-credential context.
        let credential = match self.credentials.credential(&intent.user_id).await {
            Ok(c) => c,
            Err(e) => {
                error!("Credential unavailable for {}: {}", intent.user_id, e);
                record.finish_failed(format!("credential unavailable: {}", e));
                return self
                    .finalize(record, AuditEventType::AuthenticationFailed)
                    .await;
            }
        };
        let ctx = match self.clients.context(&credential) {
            Ok(ctx) => ctx,
            Err(e) => {
                error!("Exchange client construction failed: {}", e);
                record.finish_failed(format!("client construction failed: {}", e));
                return self
                    .finalize(record, AuditEventType::AuthenticationFailed)
                    .await;
            }
        };

        // Fresh orderbook, rate-gated, retried on transport failures.
        let book = {
            let api = Arc::clone(&ctx.api);
            let limiter = Arc::clone(&ctx.limiter);
            let ticker = intent.ticker.clone();
            execute_with_retry(
                || {
                    let api = Arc::clone(&api);
                    let limiter = Arc::clone(&limiter);
                    let ticker = ticker.clone();
                    async move {
                        limiter.acquire_read().await;
                        api.orderbook(&ticker).await
                    }
                },
                self.config.read_retry_attempts,
            )
            .await
        };
        let book = match book {
            Ok(b) => b,
            Err(e) => return self.fail_exchange(record, "orderbook fetch failed", e).await,
        };
        record.orderbook_fetched_at = Some(book.fetched_at);

        let open_interest = match self.metadata.open_interest(&intent.ticker).await {
            Ok(oi) => oi,
            Err(e) => {
                return self
                    .fail_exchange(record, "open interest fetch failed", e)
                    .await
            }
        };

        // Portfolio re-read, immediately before sizing and placement. Never
        // a cached value.
        let cash = match self.portfolio.available_cash(&intent.user_id).await {
            Ok(c) => c,
            Err(e) => return self.fail_exchange(record, "portfolio read failed", e).await,
        };
        if cash <= 0.0 {
            info!("Rejecting {}: no available cash", trade_id);
            record.finish_failed("insufficient balance: no available cash".to_string());
            return self.finalize(record, AuditEventType::OrderRejected).await;
        }
        let mut sized_intent = intent.clone();
        let budget_clamped = cash < intent.max_dollar_amount;
        if budget_clamped {
            sized_intent.max_dollar_amount = cash;
        }

        let sizing_cfg = SizingConfig {
            exit_liquidity_threshold: self.config.exit_liquidity_threshold,
            open_interest_limit_pct: self.config.open_interest_limit_pct,
        };
        let mut sizing = match size_order(&sized_intent, &book, open_interest, &sizing_cfg) {
            Ok(s) => s,
            Err(e) => {
                info!("Rejecting {}: {}", trade_id, e);
                record.finish_failed(e.to_string());
                return self.finalize(record, AuditEventType::OrderRejected).await;
            }
        };
        if budget_clamped {
            sizing.reduction_reasons.insert(
                0,
                format!(
                    "available cash ${:.2} below requested budget ${:.2}",
                    cash, intent.max_dollar_amount
                ),
            );
        }
        record.sizing = Some(sizing.clone());

        // Placement. One write token, one order, no automatic retry: the
        // client order id lets the exchange deduplicate, not us.
        if gate_write {
            ctx.limiter.acquire_write(1).await;
        }
        let submission = OrderSubmission {
            ticker: intent.ticker.clone(),
            side: intent.side,
            action: intent.action,
            order_type: intent.order_type,
            count: sizing.contract_count,
            price: intent.max_price,
            client_order_id: Uuid::new_v4().to_string(),
            expiration_ts: None,
        };
        record.placed_at = Some(Utc::now());
        let order = match ctx.api.place_order(&submission).await {
            Ok(o) => o,
            Err(e) if e.is_business_rejection() => {
                info!("Order rejected by exchange for {}: {}", trade_id, e);
                record.finish_failed(e.to_string());
                return self.finalize(record, AuditEventType::OrderRejected).await;
            }
            Err(e) => return self.fail_exchange(record, "order placement failed", e).await,
        };
        record.order = Some(order.clone());
        self.audit
            .log_record(AuditEventType::OrderPlaced, &record)
            .await;

        // Fast path: fully executed at placement. Synthesize the single fill
        // from the response; no stream subscription is opened.
        if order.status == OrderStatus::Executed && order.remaining_count == 0 {
            let count = if order.filled_count > 0 {
                order.filled_count
            } else {
                sizing.contract_count
            };
            record.fills.push(Fill {
                order_id: order.order_id.clone(),
                fill_id: format!("{}-placement", order.order_id),
                ticker: intent.ticker.clone(),
                side: intent.side,
                action: intent.action,
                count,
                price: order.price_for(intent.side),
                created_at: order.created_at,
            });
            record.finish_succeeded();
            return self.finalize(record, AuditEventType::OrderFilled).await;
        }

        // Resting or pending: confirm fills over the stream.
        let deadline = outcome_deadline(
            Duration::from_secs(self.config.fill_wait_secs),
            order.expiration_time,
            Duration::from_secs(self.config.fill_deadline_margin_secs),
        );
        let mut events = match ctx.api.fill_events().await {
            Ok(rx) => rx,
            Err(e) => {
                // The order is live on the exchange but unconfirmable.
                error!(
                    "Fill stream unavailable for order {}: {}",
                    order.order_id, e
                );
                record.finish_failed(format!(
                    "order {} placed but fill stream unavailable: {}",
                    order.order_id, e
                ));
                return self.finalize(record, AuditEventType::OrderFailed).await;
            }
        };

        let outcome = await_order_outcome(&mut events, &order.order_id, deadline).await;
        match outcome {
            OrderOutcome::Terminal { status, fills } => {
                record.fills = fills;
                if let Some(o) = record.order.as_mut() {
                    o.status = status;
                }
                match status {
                    OrderStatus::Executed => {
                        record.finish_succeeded();
                        self.finalize(record, AuditEventType::OrderFilled).await
                    }
                    _ => {
                        // Canceled or expired by the exchange. Whatever
                        // filled before that still counts.
                        if record.total_filled() > 0 {
                            record.finish_succeeded();
                            self.finalize(record, AuditEventType::OrderPartialFill).await
                        } else {
                            record.finish_failed(format!(
                                "order {} closed as {:?} before any fill",
                                order.order_id, status
                            ));
                            self.finalize(record, AuditEventType::OrderCanceled).await
                        }
                    }
                }
            }
            OrderOutcome::TimedOutPartial { fills } => {
                record.fills = fills;
                // Timing out is a normal outcome. We detach from the stream
                // and leave the order alone; cancellation is the exchange's.
                if record.total_filled() > 0 {
                    warn!(
                        "Fill wait for order {} timed out with {} contracts confirmed",
                        order.order_id,
                        record.total_filled()
                    );
                    record.finish_succeeded();
                    self.finalize(record, AuditEventType::OrderPartialFill).await
                } else {
                    record.finish_failed(format!(
                        "order {} placed but unfilled at deadline",
                        order.order_id
                    ));
                    self.finalize(record, AuditEventType::FillTimeout).await
                }
            }
        }
    }

    /// Transport/auth failure path: capture in the record at error severity.
    async fn fail_exchange(
        &self,
        mut record: TradeExecutionRecord,
        stage: &str,
        e: ExchangeError,
    ) -> TradeExecutionRecord {
        error!("{} for {}: {}", stage, record.trade_id, e);
        let event = match e {
            ExchangeError::Authentication(_) => AuditEventType::AuthenticationFailed,
            _ => AuditEventType::OrderFailed,
        };
        record.finish_failed(format!("{}: {}", stage, e));
        self.finalize(record, event).await
    }

    async fn finalize(
        &self,
        record: TradeExecutionRecord,
        event: AuditEventType,
    ) -> TradeExecutionRecord {
        self.audit.log_record(event, &record).await;
        if let Err(e) = self.records.finalize(&record).await {
            error!(
                "Failed to persist execution record {}: {}",
                record.trade_id, e
            );
        }
        record
    }
}

// ============================================================================
// Live collaborator implementations
// ============================================================================

/// Single-tenant credential store fed from the environment, for deployments
/// where the service runs one account.
pub struct EnvCredentialStore {
    credential: Credential,
}

impl EnvCredentialStore {
    /// Looks for:
    /// - EXCHANGE_API_KEY_ID: the key id
    /// - EXCHANGE_PRIVATE_KEY: RSA private key PEM (newlines may be escaped)
    /// - EXCHANGE_PRIVATE_KEY_PATH: path to a PEM file (alternative)
    pub fn from_env() -> anyhow::Result<Self> {
        let key_id = env::var("EXCHANGE_API_KEY_ID")
            .map_err(|_| anyhow::anyhow!("EXCHANGE_API_KEY_ID is not set"))?;
        let private_key_pem = if let Ok(key) = env::var("EXCHANGE_PRIVATE_KEY") {
            key.replace("\\n", "\n")
        } else if let Ok(path) = env::var("EXCHANGE_PRIVATE_KEY_PATH") {
            std::fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path, e))?
        } else {
            anyhow::bail!("neither EXCHANGE_PRIVATE_KEY nor EXCHANGE_PRIVATE_KEY_PATH is set");
        };
        Ok(Self {
            credential: Credential {
                key_id,
                private_key_pem,
            },
        })
    }
}

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    async fn credential(&self, _user_id: &str) -> Result<Credential, ExchangeError> {
        Ok(self.credential.clone())
    }
}

/// Portfolio state read from the exchange balance endpoint, rate-gated
/// through the credential's read bucket.
pub struct ExchangePortfolio {
    credentials: Arc<dyn CredentialStore>,
    clients: Arc<ClientCache>,
}

impl ExchangePortfolio {
    pub fn new(credentials: Arc<dyn CredentialStore>, clients: Arc<ClientCache>) -> Self {
        Self {
            credentials,
            clients,
        }
    }

    async fn context(&self, user_id: &str) -> Result<Arc<ExecutionContext>, ExchangeError> {
        let credential = self.credentials.credential(user_id).await?;
        self.clients.context(&credential)
    }
}

#[async_trait]
impl PortfolioState for ExchangePortfolio {
    async fn available_cash(&self, user_id: &str) -> Result<f64, ExchangeError> {
        let ctx = self.context(user_id).await?;
        ctx.limiter.acquire_read().await;
        ctx.api.balance().await
    }
}

/// Market metadata read from the exchange, using a designated credential's
/// read budget (metadata is not per-user).
pub struct ExchangeMarketMetadata {
    credentials: Arc<dyn CredentialStore>,
    clients: Arc<ClientCache>,
    reader_user_id: String,
}

impl ExchangeMarketMetadata {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        clients: Arc<ClientCache>,
        reader_user_id: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            clients,
            reader_user_id: reader_user_id.into(),
        }
    }
}

#[async_trait]
impl MarketMetadata for ExchangeMarketMetadata {
    async fn open_interest(&self, ticker: &str) -> Result<u64, ExchangeError> {
        let credential = self.credentials.credential(&self.reader_user_id).await?;
        let ctx = self.clients.context(&credential)?;
        ctx.limiter.acquire_read().await;
        Ok(ctx.api.market(ticker).await?.open_interest)
    }
}
