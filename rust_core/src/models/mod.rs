// Shared models for the trade execution services
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod price;

// ============================================================================
// Sides & Order Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "yes",
            Side::No => "no",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Resting,
    Pending,
    Executed,
    Canceled,
    Expired,
}

impl OrderStatus {
    /// Terminal statuses end the fill wait; resting/pending keep it open.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Executed | OrderStatus::Canceled | OrderStatus::Expired
        )
    }
}

// ============================================================================
// Trade Intent
// ============================================================================

/// Caller-supplied request for one execution attempt. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeIntent {
    pub ticker: String,
    pub side: Side,
    #[serde(default = "default_action")]
    pub action: Action,
    /// Budget ceiling in dollars, > 0.
    pub max_dollar_amount: f64,
    /// Worst acceptable price in (0, 1].
    pub max_price: f64,
    pub order_type: OrderType,
    /// Maker-style pricing: rest at our own price instead of taking the ask.
    #[serde(default)]
    pub use_bid_based_pricing: bool,
    pub user_id: String,
    #[serde(default)]
    pub idea_id: Option<String>,
    #[serde(default)]
    pub idea_version: Option<u32>,
}

fn default_action() -> Action {
    Action::Buy
}

impl TradeIntent {
    /// Maker intents rest in the book and do not consume visible liquidity.
    pub fn is_maker(&self) -> bool {
        self.order_type == OrderType::Limit || self.use_bid_based_pricing
    }
}

// ============================================================================
// Orders & Fills
// ============================================================================

/// Local snapshot of an exchange order; never a live object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub client_order_id: String,
    pub ticker: String,
    pub status: OrderStatus,
    pub remaining_count: u32,
    pub filled_count: u32,
    pub yes_price: f64,
    pub no_price: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expiration_time: Option<DateTime<Utc>>,
}

impl Order {
    pub fn price_for(&self, side: Side) -> f64 {
        match side {
            Side::Yes => self.yes_price,
            Side::No => self.no_price,
        }
    }
}

/// One fill event. Immutable once received; deduplicated by `fill_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub fill_id: String,
    pub ticker: String,
    pub side: Side,
    pub action: Action,
    pub count: u32,
    pub price: f64,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Sizing Result
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitApplied {
    OrderbookLiquidity,
    Budget,
    ExitLiquidity,
    OpenInterest,
}

/// Output of the sizing pass. Produced once per attempt, read-only after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSizingResult {
    pub contract_count: u32,
    /// Worst-case order price (the intent's max price).
    pub price: f64,
    /// Conservative cost ceiling: `contract_count * price`.
    pub total_cost: f64,
    pub limit_applied: LimitApplied,
    /// Human-readable reasons, in the order the reductions happened.
    pub reduction_reasons: Vec<String>,
}

// ============================================================================
// Execution Record
// ============================================================================

/// The durable audit artifact for one execution attempt. Created at attempt
/// start, progressively filled in, immutable once the attempt terminates.
/// Never partially discarded, even on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeExecutionRecord {
    pub trade_id: String,
    pub user_id: String,
    pub idea_id: Option<String>,
    pub idea_version: Option<u32>,
    pub ticker: String,
    pub side: Side,
    pub action: Action,
    pub budget: f64,
    pub max_price: f64,
    pub order_type: OrderType,

    pub orderbook_fetched_at: Option<DateTime<Utc>>,
    pub sizing: Option<OrderSizingResult>,
    pub order: Option<Order>,
    pub fills: Vec<Fill>,

    pub placed_at: Option<DateTime<Utc>>,
    pub success: bool,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TradeExecutionRecord {
    /// Open a fresh record for an intent. `success` starts false and is only
    /// flipped once fills confirm.
    pub fn open(trade_id: impl Into<String>, intent: &TradeIntent) -> Self {
        Self {
            trade_id: trade_id.into(),
            user_id: intent.user_id.clone(),
            idea_id: intent.idea_id.clone(),
            idea_version: intent.idea_version,
            ticker: intent.ticker.clone(),
            side: intent.side,
            action: intent.action,
            budget: intent.max_dollar_amount,
            max_price: intent.max_price,
            order_type: intent.order_type,
            orderbook_fetched_at: None,
            sizing: None,
            order: None,
            fills: Vec::new(),
            placed_at: None,
            success: false,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn total_filled(&self) -> u32 {
        self.fills.iter().map(|f| f.count).sum()
    }

    /// Quantity-weighted average fill price. The one and only definition of
    /// "average fill price" in this codebase.
    pub fn average_fill_price(&self) -> Option<f64> {
        let total: u32 = self.total_filled();
        if total == 0 {
            return None;
        }
        let weighted: f64 = self
            .fills
            .iter()
            .map(|f| f64::from(f.count) * f.price)
            .sum();
        Some(weighted / f64::from(total))
    }

    /// Close the record as a failure with a message.
    pub fn finish_failed(&mut self, message: impl Into<String>) {
        self.success = false;
        self.error_message = Some(message.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn finish_succeeded(&mut self) {
        self.success = true;
        self.completed_at = Some(Utc::now());
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Exchange API credential for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub key_id: String,
    pub private_key_pem: String,
}

// ============================================================================
// Redis Channel Names
// ============================================================================

pub mod channels {
    pub const EXECUTION_REQUESTS: &str = "execution:requests";
    pub const EXECUTION_RECORDS: &str = "execution:records";
    pub const AUDIT_EVENTS: &str = "audit:execution";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(count: u32, price: f64) -> Fill {
        Fill {
            order_id: "ord-1".to_string(),
            fill_id: format!("f-{}-{}", count, price),
            ticker: "TEST".to_string(),
            side: Side::Yes,
            action: Action::Buy,
            count,
            price,
            created_at: Utc::now(),
        }
    }

    fn intent() -> TradeIntent {
        TradeIntent {
            ticker: "TEST".to_string(),
            side: Side::Yes,
            action: Action::Buy,
            max_dollar_amount: 100.0,
            max_price: 0.60,
            order_type: OrderType::Market,
            use_bid_based_pricing: false,
            user_id: "u1".to_string(),
            idea_id: None,
            idea_version: None,
        }
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Yes.opposite(), Side::No);
        assert_eq!(Side::No.opposite(), Side::Yes);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Executed.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(!OrderStatus::Resting.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
    }

    #[test]
    fn test_average_fill_price_is_quantity_weighted() {
        let mut record = TradeExecutionRecord::open("t1", &intent());
        record.fills.push(fill(10, 0.50));
        record.fills.push(fill(30, 0.60));
        // (10*0.50 + 30*0.60) / 40 = 0.575, not the unweighted 0.55
        let vwap = record.average_fill_price().unwrap();
        assert!((vwap - 0.575).abs() < 1e-9);
    }

    #[test]
    fn test_average_fill_price_empty() {
        let record = TradeExecutionRecord::open("t1", &intent());
        assert!(record.average_fill_price().is_none());
        assert_eq!(record.total_filled(), 0);
    }

    #[test]
    fn test_intent_maker_detection() {
        let mut i = intent();
        assert!(!i.is_maker());
        i.order_type = OrderType::Limit;
        assert!(i.is_maker());
        i.order_type = OrderType::Market;
        i.use_bid_based_pricing = true;
        assert!(i.is_maker());
    }

    #[test]
    fn test_record_json_round_trip() {
        let mut record = TradeExecutionRecord::open("t1", &intent());
        record.fills.push(fill(10, 0.55));
        record.finish_succeeded();
        let json = serde_json::to_string(&record).unwrap();
        let back: TradeExecutionRecord = serde_json::from_str(&json).unwrap();
        assert!(back.success);
        assert_eq!(back.fills.len(), 1);
        assert_eq!(back.ticker, "TEST");
    }
}
