//! Point-in-time orderbook snapshot for a binary prediction market.
//!
//! Two bid ladders (yes/no), best bid first. Asks are derived, not stored:
//! a resting no bid at price p is the counterparty for a yes taker at 1 - p,
//! so `best_ask(side) = 1.0 - best_bid(opposite)`.

use crate::models::Side;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One price level on a bid ladder. Price is dollars in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderbookLevel {
    pub price: f64,
    pub quantity: u32,
}

impl OrderbookLevel {
    pub fn new(price: f64, quantity: u32) -> Self {
        Self { price, quantity }
    }
}

/// Immutable snapshot of one market's two-sided bid ladder.
///
/// Created fresh per execution attempt and never mutated; the constructor
/// sorts both ladders descending so downstream walks can rely on
/// best-bid-first ordering regardless of wire order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderbookSnapshot {
    pub ticker: String,
    pub yes_bids: Vec<OrderbookLevel>,
    pub no_bids: Vec<OrderbookLevel>,
    pub fetched_at: DateTime<Utc>,
}

impl OrderbookSnapshot {
    pub fn new(
        ticker: impl Into<String>,
        mut yes_bids: Vec<OrderbookLevel>,
        mut no_bids: Vec<OrderbookLevel>,
    ) -> Self {
        let desc = |a: &OrderbookLevel, b: &OrderbookLevel| {
            b.price.partial_cmp(&a.price).unwrap_or(std::cmp::Ordering::Equal)
        };
        yes_bids.sort_by(desc);
        no_bids.sort_by(desc);
        Self {
            ticker: ticker.into(),
            yes_bids,
            no_bids,
            fetched_at: Utc::now(),
        }
    }

    pub fn bids(&self, side: Side) -> &[OrderbookLevel] {
        match side {
            Side::Yes => &self.yes_bids,
            Side::No => &self.no_bids,
        }
    }

    /// Best (highest) bid price on the given side, if any.
    pub fn best_bid(&self, side: Side) -> Option<f64> {
        self.bids(side).first().map(|l| l.price)
    }

    /// Derived ask for the given side: `1.0 - best_bid(opposite)`.
    /// `None` when the opposite ladder is empty (no counterparty, no ask).
    pub fn best_ask(&self, side: Side) -> Option<f64> {
        self.best_bid(side.opposite()).map(|bid| 1.0 - bid)
    }

    /// Total contracts resting at or below `max_price` on the given ladder.
    pub fn quantity_at_or_below(&self, side: Side, max_price: f64) -> u32 {
        self.bids(side)
            .iter()
            .filter(|l| l.price <= max_price + f64::EPSILON)
            .map(|l| l.quantity)
            .sum()
    }

    /// Dollar value recoverable by unwinding `count` contracts of a position
    /// on `side`. The unwind crosses with the opposing bid queue, so this
    /// walks the opposite ladder best bid first, covering at most `count`
    /// contracts; a shallow ladder yields whatever value is actually there.
    pub fn exit_value(&self, side: Side, count: u32) -> f64 {
        let mut remaining = count;
        let mut value = 0.0;
        for level in self.bids(side.opposite()) {
            if remaining == 0 {
                break;
            }
            let taken = remaining.min(level.quantity);
            value += f64::from(taken) * level.price;
            remaining -= taken;
        }
        value
    }

    pub fn is_empty(&self) -> bool {
        self.yes_bids.is_empty() && self.no_bids.is_empty()
    }
}
