//! End-to-end engine tests over a scripted exchange.
//!
//! Every scenario asserts the same contract: one attempt in, one durable
//! record out, with business rejections recorded rather than raised.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use predict_rust_core::clients::{MarketInfo, OrderSubmission};
use predict_rust_core::error::ExchangeError;
use predict_rust_core::models::{
    Action, Credential, Order, OrderStatus, OrderType, Side, TradeIntent,
};
use predict_rust_core::orderbook::{OrderbookLevel, OrderbookSnapshot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use trade_executor_rust::audit::AuditLogger;
use trade_executor_rust::client_cache::{ClientCache, ExchangeApi, ExecutionContext};
use trade_executor_rust::config::ExecutorConfig;
use trade_executor_rust::engine::{
    CredentialStore, MarketMetadata, PortfolioState, TradeExecutor,
};
use trade_executor_rust::fills::FillStreamEvent;
use trade_executor_rust::rate_limiter::CredentialRateLimiter;
use trade_executor_rust::store::MemoryRecordStore;

const KEY_ID: &str = "test-key";

// ============================================================================
// Scripted collaborators
// ============================================================================

#[derive(Default)]
struct MockExchange {
    book: Mutex<Option<OrderbookSnapshot>>,
    place_response: Mutex<Option<Result<Order, ExchangeError>>>,
    stream_events: Mutex<Vec<FillStreamEvent>>,
    /// Keep the stream open after the scripted events so the engine has to
    /// run out its deadline instead of seeing channel closure.
    hold_stream_open: AtomicBool,
    held_senders: Mutex<Vec<mpsc::Sender<FillStreamEvent>>>,
    placed: Mutex<Vec<OrderSubmission>>,
    stream_opened: AtomicBool,
}

impl MockExchange {
    fn placed_orders(&self) -> Vec<OrderSubmission> {
        self.placed.lock().clone()
    }

    fn stream_was_opened(&self) -> bool {
        self.stream_opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExchangeApi for MockExchange {
    async fn orderbook(&self, _ticker: &str) -> Result<OrderbookSnapshot, ExchangeError> {
        self.book
            .lock()
            .clone()
            .ok_or_else(|| ExchangeError::Transport("no orderbook scripted".to_string()))
    }

    async fn market(&self, _ticker: &str) -> Result<MarketInfo, ExchangeError> {
        Err(ExchangeError::Malformed(
            "market lookup not scripted".to_string(),
        ))
    }

    async fn balance(&self) -> Result<f64, ExchangeError> {
        Err(ExchangeError::Malformed(
            "balance lookup not scripted".to_string(),
        ))
    }

    async fn place_order(&self, submission: &OrderSubmission) -> Result<Order, ExchangeError> {
        self.placed.lock().push(submission.clone());
        self.place_response
            .lock()
            .take()
            .unwrap_or_else(|| Err(ExchangeError::Malformed("unexpected placement".to_string())))
    }

    async fn fill_events(&self) -> Result<mpsc::Receiver<FillStreamEvent>, ExchangeError> {
        self.stream_opened.store(true, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(64);
        for event in self.stream_events.lock().drain(..) {
            let _ = tx.try_send(event);
        }
        if self.hold_stream_open.load(Ordering::SeqCst) {
            self.held_senders.lock().push(tx);
        }
        Ok(rx)
    }
}

struct StaticCredentials;

#[async_trait]
impl CredentialStore for StaticCredentials {
    async fn credential(&self, _user_id: &str) -> Result<Credential, ExchangeError> {
        Ok(Credential {
            key_id: KEY_ID.to_string(),
            private_key_pem: String::new(),
        })
    }
}

struct FixedCash(f64);

#[async_trait]
impl PortfolioState for FixedCash {
    async fn available_cash(&self, _user_id: &str) -> Result<f64, ExchangeError> {
        Ok(self.0)
    }
}

struct FixedOpenInterest(u64);

#[async_trait]
impl MarketMetadata for FixedOpenInterest {
    async fn open_interest(&self, _ticker: &str) -> Result<u64, ExchangeError> {
        Ok(self.0)
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    executor: TradeExecutor,
    exchange: Arc<MockExchange>,
    store: Arc<MemoryRecordStore>,
}

fn harness(cash: f64, open_interest: u64) -> Harness {
    let config = ExecutorConfig::from_env();
    let exchange = Arc::new(MockExchange::default());
    let store = Arc::new(MemoryRecordStore::new());

    // Seed the cache with the scripted exchange so no live client is built.
    let clients = Arc::new(ClientCache::new(&config, None));
    clients.insert(
        KEY_ID,
        Arc::new(ExecutionContext {
            api: exchange.clone(),
            limiter: Arc::new(CredentialRateLimiter::new(KEY_ID, 100.0, 100.0, None)),
        }),
    );

    let executor = TradeExecutor::new(
        Arc::new(StaticCredentials),
        Arc::new(FixedCash(cash)),
        Arc::new(FixedOpenInterest(open_interest)),
        store.clone(),
        clients,
        Arc::new(AuditLogger::new(None, false)),
        config,
    );

    Harness {
        executor,
        exchange,
        store,
    }
}

fn levels(raw: &[(f64, u32)]) -> Vec<OrderbookLevel> {
    raw.iter().map(|&(p, q)| OrderbookLevel::new(p, q)).collect()
}

fn book(yes: &[(f64, u32)], no: &[(f64, u32)]) -> OrderbookSnapshot {
    OrderbookSnapshot::new("TEST", levels(yes), levels(no))
}

fn intent(max_dollar_amount: f64, max_price: f64, order_type: OrderType) -> TradeIntent {
    TradeIntent {
        ticker: "TEST".to_string(),
        side: Side::Yes,
        action: Action::Buy,
        max_dollar_amount,
        max_price,
        order_type,
        use_bid_based_pricing: false,
        user_id: "u1".to_string(),
        idea_id: Some("idea-1".to_string()),
        idea_version: Some(1),
    }
}

fn order(order_id: &str, status: OrderStatus, filled: u32, remaining: u32, yes_price: f64) -> Order {
    Order {
        order_id: order_id.to_string(),
        client_order_id: "c-1".to_string(),
        ticker: "TEST".to_string(),
        status,
        remaining_count: remaining,
        filled_count: filled,
        yes_price,
        no_price: 1.0 - yes_price,
        created_at: Utc::now(),
        expiration_time: None,
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_exit_liquidity_rejection_is_a_failed_record_not_an_error() {
    let h = harness(1000.0, 1_000_000);
    *h.exchange.book.lock() = Some(book(&[(0.97, 50)], &[(0.02, 80)]));

    let record = h.executor.execute(intent(100.0, 0.98, OrderType::Market)).await;

    assert!(!record.success);
    let message = record.error_message.as_deref().unwrap_or("");
    assert!(message.contains("exit"), "unexpected message: {}", message);
    assert!(record.sizing.is_none());
    assert!(record.fills.is_empty());

    // Nothing went to the exchange.
    assert!(h.exchange.placed_orders().is_empty());
    assert!(!h.exchange.stream_was_opened());

    // The record was opened and finalized in the store.
    let stored = h.store.get(&record.trade_id).unwrap();
    assert!(!stored.success);
    assert!(stored.completed_at.is_some());
    assert_eq!(h.store.created_ids(), vec![record.trade_id.clone()]);
}

#[tokio::test(start_paused = true)]
async fn test_fully_executed_placement_synthesizes_fill_without_stream() {
    let h = harness(1000.0, 1_000_000);
    *h.exchange.book.lock() = Some(book(&[(0.50, 200)], &[(0.45, 200)]));
    // 1 - 0.45 = 0.55 ask; budget 10 contracts at 0.60.
    *h.exchange.place_response.lock() =
        Some(Ok(order("ord-1", OrderStatus::Executed, 10, 0, 0.55)));

    let record = h.executor.execute(intent(6.0, 0.60, OrderType::Market)).await;

    assert!(record.success, "message: {:?}", record.error_message);
    assert!(!h.exchange.stream_was_opened());
    assert_eq!(record.fills.len(), 1);
    assert_eq!(record.fills[0].count, 10);
    assert_eq!(record.fills[0].fill_id, "ord-1-placement");
    assert!((record.fills[0].price - 0.55).abs() < 1e-9);
    assert_eq!(record.total_filled(), 10);
    assert!(record.average_fill_price().is_some());

    let placed = h.exchange.placed_orders();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].count, 10);
    assert!((placed[0].price - 0.60).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_resting_order_with_no_fills_times_out_as_failure() {
    let h = harness(1000.0, 1_000_000);
    *h.exchange.book.lock() = Some(book(&[(0.50, 200)], &[(0.45, 200)]));
    *h.exchange.place_response.lock() =
        Some(Ok(order("ord-2", OrderStatus::Resting, 0, 12, 0.55)));
    h.exchange.hold_stream_open.store(true, Ordering::SeqCst);

    let record = h.executor.execute(intent(8.0, 0.60, OrderType::Limit)).await;

    assert!(!record.success);
    assert!(record.fills.is_empty());
    let message = record.error_message.as_deref().unwrap_or("");
    assert!(message.contains("unfilled"), "unexpected message: {}", message);
    assert!(h.exchange.stream_was_opened());

    let stored = h.store.get(&record.trade_id).unwrap();
    assert!(!stored.success);
}

#[tokio::test(start_paused = true)]
async fn test_streamed_fills_to_terminal_status_succeed_with_vwap() {
    let h = harness(1000.0, 1_000_000);
    *h.exchange.book.lock() = Some(book(&[(0.50, 200)], &[(0.45, 200)]));
    *h.exchange.place_response.lock() =
        Some(Ok(order("ord-3", OrderStatus::Pending, 0, 15, 0.55)));

    let fill = |fill_id: &str, count: u32, price: f64| {
        FillStreamEvent::Fill(predict_rust_core::models::Fill {
            order_id: "ord-3".to_string(),
            fill_id: fill_id.to_string(),
            ticker: "TEST".to_string(),
            side: Side::Yes,
            action: Action::Buy,
            count,
            price,
            created_at: Utc::now(),
        })
    };
    *h.exchange.stream_events.lock() = vec![
        fill("f1", 10, 0.55),
        // Redelivered frame, must not double-count
        fill("f1", 10, 0.55),
        fill("f2", 5, 0.60),
        FillStreamEvent::OrderUpdate {
            order_id: "ord-3".to_string(),
            status: OrderStatus::Executed,
        },
    ];

    let record = h.executor.execute(intent(9.0, 0.60, OrderType::Market)).await;

    assert!(record.success);
    assert_eq!(record.total_filled(), 15);
    let vwap = record.average_fill_price().unwrap();
    // (10*0.55 + 5*0.60) / 15
    assert!((vwap - 8.5 / 15.0).abs() < 1e-9);
    assert_eq!(
        record.order.as_ref().map(|o| o.status),
        Some(OrderStatus::Executed)
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_after_partial_fill_keeps_the_fills() {
    let h = harness(1000.0, 1_000_000);
    *h.exchange.book.lock() = Some(book(&[(0.50, 200)], &[(0.45, 200)]));
    *h.exchange.place_response.lock() =
        Some(Ok(order("ord-4", OrderStatus::Resting, 0, 20, 0.55)));
    *h.exchange.stream_events.lock() = vec![
        FillStreamEvent::Fill(predict_rust_core::models::Fill {
            order_id: "ord-4".to_string(),
            fill_id: "f1".to_string(),
            ticker: "TEST".to_string(),
            side: Side::Yes,
            action: Action::Buy,
            count: 12,
            price: 0.55,
            created_at: Utc::now(),
        }),
        FillStreamEvent::OrderUpdate {
            order_id: "ord-4".to_string(),
            status: OrderStatus::Canceled,
        },
    ];

    let record = h.executor.execute(intent(12.0, 0.60, OrderType::Market)).await;

    assert!(record.success);
    assert_eq!(record.total_filled(), 12);
    assert_eq!(
        record.order.as_ref().map(|o| o.status),
        Some(OrderStatus::Canceled)
    );
}

#[tokio::test(start_paused = true)]
async fn test_exchange_business_rejection_becomes_failed_record() {
    let h = harness(1000.0, 1_000_000);
    *h.exchange.book.lock() = Some(book(&[(0.50, 200)], &[(0.45, 200)]));
    *h.exchange.place_response.lock() = Some(Err(ExchangeError::Api {
        status: 400,
        message: "insufficient balance".to_string(),
    }));

    let record = h.executor.execute(intent(6.0, 0.60, OrderType::Market)).await;

    assert!(!record.success);
    let message = record.error_message.as_deref().unwrap_or("");
    assert!(
        message.contains("insufficient balance"),
        "unexpected message: {}",
        message
    );
    assert!(!h.exchange.stream_was_opened());
}

#[tokio::test(start_paused = true)]
async fn test_budget_is_clamped_to_available_cash() {
    // Cash covers 5 contracts at 0.60; the intent asked for 100 dollars.
    // 5 < 10 minimum, so the attempt is rejected for size, proving the
    // clamped budget (not the requested one) drove sizing.
    let h = harness(3.0, 1_000_000);
    *h.exchange.book.lock() = Some(book(&[(0.50, 200)], &[(0.45, 200)]));

    let record = h.executor.execute(intent(100.0, 0.60, OrderType::Market)).await;

    assert!(!record.success);
    assert!(h.exchange.placed_orders().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_clamp_reason_is_prepended_when_order_still_goes_out() {
    let h = harness(9.0, 1_000_000);
    *h.exchange.book.lock() = Some(book(&[(0.50, 200)], &[(0.45, 200)]));
    *h.exchange.place_response.lock() =
        Some(Ok(order("ord-5", OrderStatus::Executed, 16, 0, 0.55)));

    // Requested 30 dollars, cash allows 16 contracts at the 0.55 ask.
    let record = h.executor.execute(intent(30.0, 0.60, OrderType::Market)).await;

    assert!(record.success);
    let sizing = record.sizing.as_ref().unwrap();
    assert_eq!(sizing.contract_count, 16);
    assert!(
        sizing.reduction_reasons[0].contains("available cash"),
        "reasons: {:?}",
        sizing.reduction_reasons
    );
}

#[tokio::test(start_paused = true)]
async fn test_zero_cash_rejects_before_placement() {
    let h = harness(0.0, 1_000_000);
    *h.exchange.book.lock() = Some(book(&[(0.50, 200)], &[(0.45, 200)]));

    let record = h.executor.execute(intent(50.0, 0.60, OrderType::Market)).await;

    assert!(!record.success);
    let message = record.error_message.as_deref().unwrap_or("");
    assert!(message.contains("insufficient balance"));
    assert!(h.exchange.placed_orders().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_orderbook_transport_failure_is_captured_in_record() {
    let h = harness(1000.0, 1_000_000);
    // No orderbook scripted: every fetch fails, retries included.

    let record = h.executor.execute(intent(50.0, 0.60, OrderType::Market)).await;

    assert!(!record.success);
    let message = record.error_message.as_deref().unwrap_or("");
    assert!(message.contains("orderbook fetch failed"));
    assert!(h.exchange.placed_orders().is_empty());
    // Opened and finalized even though nothing got past the first read.
    assert!(h.store.get(&record.trade_id).is_some());
}
