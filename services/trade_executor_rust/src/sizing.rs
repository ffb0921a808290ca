//! Order sizing: the largest contract count that simultaneously satisfies
//! liquidity, budget, exit-liquidity, and open-interest constraints.
//!
//! Pure function of its inputs; all exchange reads happen before this runs.
//! Each constraint that reduces the size appends a human-readable reason, so
//! the execution record explains exactly why a smaller order went out.

use predict_rust_core::models::{LimitApplied, OrderSizingResult, TradeIntent};
use predict_rust_core::orderbook::OrderbookSnapshot;
use thiserror::Error;

/// Orders below this count are not worth the fees and book noise.
pub const MIN_CONTRACTS: u32 = 10;

const PRICE_EPS: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct SizingConfig {
    /// Minimum exit-value / entry-cost ratio.
    pub exit_liquidity_threshold: f64,
    /// Cap as a fraction of the market's open interest.
    pub open_interest_limit_pct: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            exit_liquidity_threshold: 0.5,
            open_interest_limit_pct: 0.01,
        }
    }
}

#[derive(Debug, Error)]
pub enum SizingError {
    #[error("insufficient liquidity: {0}")]
    InsufficientLiquidity(String),
    #[error("budget too small: {0}")]
    BudgetTooSmall(String),
    #[error("exit liquidity below threshold: {0}")]
    ExitLiquidity(String),
    #[error("open interest exhausted: {0}")]
    OpenInterestExhausted(String),
    #[error("order size too small: {0}")]
    SizeTooSmall(String),
}

/// Size one order against a snapshot. Constraints apply in a fixed order:
/// entry price, book liquidity, budget, exit liquidity, open interest,
/// minimum size.
pub fn size_order(
    intent: &TradeIntent,
    book: &OrderbookSnapshot,
    open_interest: u64,
    cfg: &SizingConfig,
) -> Result<OrderSizingResult, SizingError> {
    let mut reasons: Vec<String> = Vec::new();

    // 1. Entry price. Takers pay the derived ask; makers rest at their own
    // price and consume nothing.
    let entry_price = if intent.is_maker() {
        intent.max_price
    } else {
        book.best_ask(intent.side).ok_or_else(|| {
            SizingError::InsufficientLiquidity(format!(
                "no {} ask available on {} (opposite ladder is empty)",
                intent.side.as_str(),
                book.ticker
            ))
        })?
    };
    if entry_price > intent.max_price + PRICE_EPS {
        return Err(SizingError::InsufficientLiquidity(format!(
            "best {} ask {:.2} exceeds max price {:.2}",
            intent.side.as_str(),
            entry_price,
            intent.max_price
        )));
    }
    if entry_price <= PRICE_EPS {
        return Err(SizingError::InsufficientLiquidity(
            "entry price is zero".to_string(),
        ));
    }

    // 2. Book liquidity at or below the max price. Makers are unbounded
    // here; they add liquidity instead of consuming it.
    let limit_liquidity = if intent.is_maker() {
        u32::MAX
    } else {
        book.quantity_at_or_below(intent.side, intent.max_price)
    };
    if limit_liquidity == 0 {
        return Err(SizingError::InsufficientLiquidity(format!(
            "no contracts resting at or below {:.2} on the {} ladder",
            intent.max_price,
            intent.side.as_str()
        )));
    }

    // 3. Budget.
    let limit_budget = (intent.max_dollar_amount / entry_price).floor() as u32;
    if limit_budget == 0 {
        return Err(SizingError::BudgetTooSmall(format!(
            "${:.2} buys zero contracts at {:.2}",
            intent.max_dollar_amount, entry_price
        )));
    }

    let mut count;
    let mut limit_applied;
    if limit_liquidity < limit_budget {
        count = limit_liquidity;
        limit_applied = LimitApplied::OrderbookLiquidity;
        reasons.push(format!(
            "orderbook liquidity caps size at {} contracts at or below {:.2}",
            limit_liquidity, intent.max_price
        ));
    } else {
        count = limit_budget;
        limit_applied = LimitApplied::Budget;
        reasons.push(format!(
            "budget ${:.2} buys at most {} contracts at {:.2}",
            intent.max_dollar_amount, limit_budget, entry_price
        ));
    }

    // 4. Exit liquidity: if we had to unwind immediately, the opposing bid
    // queue must recover at least the threshold fraction of the entry cost.
    let ratio_holds = |c: u32| -> bool {
        let exit_value = book.exit_value(intent.side, c);
        exit_value / (f64::from(c) * entry_price) + PRICE_EPS >= cfg.exit_liquidity_threshold
    };
    if !ratio_holds(count) {
        match largest_count_satisfying(count, ratio_holds) {
            Some(reduced) => {
                reasons.push(format!(
                    "exit liquidity ratio below {:.2} at {} contracts; reduced to {}",
                    cfg.exit_liquidity_threshold, count, reduced
                ));
                count = reduced;
                limit_applied = LimitApplied::ExitLiquidity;
            }
            None => {
                return Err(SizingError::ExitLiquidity(format!(
                    "no contract count in [1, {}] clears the {:.2} exit liquidity floor",
                    count, cfg.exit_liquidity_threshold
                )));
            }
        }
    }

    // 5. Open interest cap, to bound market impact.
    let oi_cap = (open_interest as f64 * cfg.open_interest_limit_pct).floor() as u32;
    if oi_cap == 0 {
        return Err(SizingError::OpenInterestExhausted(format!(
            "{:.1}% of open interest {} caps size at zero",
            cfg.open_interest_limit_pct * 100.0,
            open_interest
        )));
    }
    if count > oi_cap {
        reasons.push(format!(
            "open interest cap ({:.1}% of {}) reduces size to {}",
            cfg.open_interest_limit_pct * 100.0,
            open_interest,
            oi_cap
        ));
        count = oi_cap;
        limit_applied = LimitApplied::OpenInterest;
    }

    // 6. Minimum viable size.
    if count < MIN_CONTRACTS {
        return Err(SizingError::SizeTooSmall(format!(
            "final count {} is below the minimum of {}",
            count, MIN_CONTRACTS
        )));
    }

    Ok(OrderSizingResult {
        contract_count: count,
        price: intent.max_price,
        // Conservative upper bound; actual cost is set by fills.
        total_cost: f64::from(count) * intent.max_price,
        limit_applied,
        reduction_reasons: reasons,
    })
}

/// Largest count in `[1, max]` satisfying a monotone predicate, or `None`
/// if even 1 fails. Pure so it can be tested without an orderbook.
fn largest_count_satisfying(max: u32, holds: impl Fn(u32) -> bool) -> Option<u32> {
    if !holds(1) {
        return None;
    }
    let mut lo = 1u32;
    let mut hi = max;
    while lo < hi {
        let mid = lo + (hi - lo).div_ceil(2);
        if holds(mid) {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    Some(lo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use predict_rust_core::models::{Action, OrderType, Side};
    use predict_rust_core::orderbook::OrderbookLevel;

    fn book(yes: &[(f64, u32)], no: &[(f64, u32)]) -> OrderbookSnapshot {
        OrderbookSnapshot::new(
            "TEST-MKT",
            yes.iter().map(|&(p, q)| OrderbookLevel::new(p, q)).collect(),
            no.iter().map(|&(p, q)| OrderbookLevel::new(p, q)).collect(),
        )
    }

    fn intent(budget: f64, max_price: f64) -> TradeIntent {
        TradeIntent {
            ticker: "TEST-MKT".to_string(),
            side: Side::Yes,
            action: Action::Buy,
            max_dollar_amount: budget,
            max_price,
            order_type: OrderType::Market,
            use_bid_based_pricing: false,
            user_id: "u1".to_string(),
            idea_id: None,
            idea_version: None,
        }
    }

    const OI: u64 = 1_000_000;

    #[test]
    fn test_budget_bound_happy_path() {
        let b = book(&[(0.55, 500)], &[(0.40, 500)]);
        let result = size_order(&intent(30.0, 0.60), &b, OI, &SizingConfig::default()).unwrap();
        // Entry at the 0.60 ask, floor(30/0.60) = 50
        assert_eq!(result.contract_count, 50);
        assert_eq!(result.limit_applied, LimitApplied::Budget);
        assert!((result.price - 0.60).abs() < 1e-9);
        assert!((result.total_cost - 30.0).abs() < 1e-9);
        assert_eq!(result.reduction_reasons.len(), 1);
    }

    #[test]
    fn test_orderbook_liquidity_bound() {
        let b = book(&[(0.55, 40)], &[(0.40, 500)]);
        let result = size_order(&intent(300.0, 0.60), &b, OI, &SizingConfig::default()).unwrap();
        assert_eq!(result.contract_count, 40);
        assert_eq!(result.limit_applied, LimitApplied::OrderbookLiquidity);
    }

    #[test]
    fn test_ask_above_max_price_rejects() {
        // Best no bid 0.30 -> yes ask 0.70 > 0.60
        let b = book(&[(0.55, 500)], &[(0.30, 500)]);
        let err = size_order(&intent(30.0, 0.60), &b, OI, &SizingConfig::default()).unwrap_err();
        assert!(matches!(err, SizingError::InsufficientLiquidity(_)));
    }

    #[test]
    fn test_no_opposing_bids_means_no_ask() {
        let b = book(&[(0.55, 500)], &[]);
        let err = size_order(&intent(30.0, 0.60), &b, OI, &SizingConfig::default()).unwrap_err();
        assert!(matches!(err, SizingError::InsufficientLiquidity(_)));
    }

    #[test]
    fn test_budget_too_small() {
        let b = book(&[(0.55, 500)], &[(0.40, 500)]);
        let err = size_order(&intent(0.50, 0.60), &b, OI, &SizingConfig::default()).unwrap_err();
        assert!(matches!(err, SizingError::BudgetTooSmall(_)));
    }

    #[test]
    fn test_exit_liquidity_fails_entirely() {
        // The worked case: deep enough to enter at 0.98, but an exit only
        // recovers 0.02 per contract. Ratio ~0.02 at every count.
        let b = book(&[(0.97, 50)], &[(0.02, 80)]);
        let err = size_order(&intent(100.0, 0.98), &b, OI, &SizingConfig::default()).unwrap_err();
        assert!(matches!(err, SizingError::ExitLiquidity(_)));
    }

    #[test]
    fn test_exit_liquidity_binary_search_reduces() {
        // Exit value past 20 contracts decays: ratio clears 0.5 only up to 30.
        let b = book(&[(0.59, 1000)], &[(0.40, 20), (0.10, 1000)]);
        let result = size_order(&intent(60.0, 0.60), &b, OI, &SizingConfig::default()).unwrap();
        assert_eq!(result.contract_count, 30);
        assert_eq!(result.limit_applied, LimitApplied::ExitLiquidity);
        assert_eq!(result.reduction_reasons.len(), 2);
        assert!(result.reduction_reasons[1].contains("exit liquidity"));
    }

    #[test]
    fn test_open_interest_cap() {
        let b = book(&[(0.55, 500)], &[(0.40, 500)]);
        // 1% of 2000 = 20 < budget limit of 50
        let result = size_order(&intent(30.0, 0.60), &b, 2_000, &SizingConfig::default()).unwrap();
        assert_eq!(result.contract_count, 20);
        assert_eq!(result.limit_applied, LimitApplied::OpenInterest);
    }

    #[test]
    fn test_open_interest_exhausted() {
        let b = book(&[(0.55, 500)], &[(0.40, 500)]);
        let err = size_order(&intent(30.0, 0.60), &b, 50, &SizingConfig::default()).unwrap_err();
        assert!(matches!(err, SizingError::OpenInterestExhausted(_)));
    }

    #[test]
    fn test_minimum_size() {
        let b = book(&[(0.55, 500)], &[(0.40, 500)]);
        // floor(5/0.60) = 8 < 10
        let err = size_order(&intent(5.0, 0.60), &b, OI, &SizingConfig::default()).unwrap_err();
        assert!(matches!(err, SizingError::SizeTooSmall(_)));
    }

    #[test]
    fn test_maker_orders_skip_book_liquidity() {
        // Empty ladders would reject a taker, but a limit order rests.
        let b = book(&[], &[(0.40, 500)]);
        let mut i = intent(30.0, 0.60);
        i.order_type = OrderType::Limit;
        let result = size_order(&i, &b, OI, &SizingConfig::default()).unwrap();
        assert_eq!(result.contract_count, 50);
        assert_eq!(result.limit_applied, LimitApplied::Budget);
    }

    #[test]
    fn test_monotonic_in_budget() {
        let b = book(&[(0.59, 1000)], &[(0.40, 2000)]);
        let cfg = SizingConfig::default();
        let mut last = u32::MAX;
        for budget in [600.0, 300.0, 120.0, 60.0, 12.0] {
            let count = size_order(&intent(budget, 0.60), &b, OI, &cfg)
                .map(|r| r.contract_count)
                .unwrap_or(0);
            assert!(count <= last, "budget {} gave {} > {}", budget, count, last);
            last = count;
        }
    }

    #[test]
    fn test_monotonic_in_exit_threshold() {
        let b = book(&[(0.59, 1000)], &[(0.40, 20), (0.10, 1000)]);
        let strict = SizingConfig {
            exit_liquidity_threshold: 0.5,
            ..SizingConfig::default()
        };
        let lax = SizingConfig {
            exit_liquidity_threshold: 0.3,
            ..SizingConfig::default()
        };
        let i = intent(60.0, 0.60);
        let strict_count = size_order(&i, &b, OI, &strict).unwrap().contract_count;
        let lax_count = size_order(&i, &b, OI, &lax).unwrap().contract_count;
        assert!(lax_count >= strict_count);
    }

    #[test]
    fn test_largest_count_satisfying() {
        assert_eq!(largest_count_satisfying(100, |c| c <= 37), Some(37));
        assert_eq!(largest_count_satisfying(100, |_| true), Some(100));
        assert_eq!(largest_count_satisfying(100, |c| c <= 1), Some(1));
        assert_eq!(largest_count_satisfying(100, |_| false), None);
        assert_eq!(largest_count_satisfying(1, |_| true), Some(1));
    }
}
