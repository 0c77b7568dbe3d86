use chrono::Utc;

use crate::config::RiskConfig;
use crate::models::order::OrderIntent;
use crate::models::position::RiskBook;

/// Strict-order risk gate: capacity, cash, single-order cap, market-exposure
/// cap, then rate limit. Mirrors the teacher's `check_order` sequential-bail
/// shape, but as a pure decision function over an explicit `RiskBook` rather
/// than a kill-switch watchdog — this domain gates individual orders rather
/// than halting the whole strategy on drawdown.
#[derive(Clone)]
pub struct RiskManager {
    config: RiskConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Approved { size_usdc: f64 },
    Rejected { reason: String },
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn check_order(
        &self,
        order: &OrderIntent,
        book: &RiskBook,
        market_has_position: bool,
        active_position_count: usize,
        market_exposure: f64,
    ) -> RiskDecision {
        if order.is_exit {
            // Exits bypass the cash/capacity/exposure checks entirely — they
            // always reduce risk, never add to it.
            return RiskDecision::Approved { size_usdc: order.size_usdc };
        }

        // 1. Capacity.
        if !market_has_position && active_position_count >= self.config.max_active_positions {
            return RiskDecision::Rejected { reason: "capacity: max_active_positions reached".into() };
        }

        // 2. Cash.
        if order.size_usdc > book.cash_balance {
            return RiskDecision::Rejected { reason: format!("insufficient cash: need {} have {}", order.size_usdc, book.cash_balance) };
        }

        // 3. Single-order cap — adjust down rather than reject.
        let single_order_cap = book.bankroll * self.config.max_single_order_pct;
        let mut approved_size = order.size_usdc.min(single_order_cap);
        if approved_size < order.size_usdc {
            tracing::warn!(
                market = %order.market_id,
                requested = order.size_usdc,
                capped = approved_size,
                "order exceeds max_single_order_pct, capping"
            );
        }

        // 4. Market exposure cap.
        let max_exposure = book.bankroll * self.config.max_market_exposure_pct;
        let remaining_room = max_exposure - market_exposure;
        if remaining_room <= 0.0 {
            return RiskDecision::Rejected { reason: "market exposure cap reached".into() };
        }
        if approved_size > remaining_room {
            approved_size = remaining_room;
        }

        // 5. Rate limit.
        let window = chrono::Duration::seconds(self.config.rate_limit_window_seconds as i64);
        let recent = book.orders_in_window(&order.market_id, Utc::now(), window);
        if recent >= self.config.rate_limit_max_orders {
            return RiskDecision::Rejected { reason: "rate limit exceeded".into() };
        }

        RiskDecision::Approved { size_usdc: approved_size }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::market::Side;
    use crate::models::order::{OrderIntent, StrategyTag};

    fn cfg() -> RiskConfig {
        RiskConfig {
            max_active_positions: 30,
            max_market_exposure_pct: 0.02,
            max_single_order_pct: 0.0025,
            rate_limit_max_orders: 5,
            rate_limit_window_seconds: 60,
        }
    }

    #[test]
    fn exits_always_approved() {
        let mgr = RiskManager::new(cfg());
        let book = RiskBook::new(1000.0);
        let order = OrderIntent::exit("m", Side::Yes, 0.8, 1.0, StrategyTag::Resolution);
        assert!(matches!(mgr.check_order(&order, &book, true, 0, 0.0), RiskDecision::Approved { .. }));
    }

    #[test]
    fn rejects_when_cash_insufficient() {
        let mgr = RiskManager::new(cfg());
        let mut book = RiskBook::new(1000.0);
        book.cash_balance = 1.0;
        let order = OrderIntent::entry("m", Side::Yes, 0.65, 2.0, StrategyTag::Ladder);
        assert!(matches!(mgr.check_order(&order, &book, false, 0, 0.0), RiskDecision::Rejected { .. }));
    }

    #[test]
    fn caps_single_order_to_pct() {
        let mgr = RiskManager::new(cfg());
        let book = RiskBook::new(1000.0);
        let order = OrderIntent::entry("m", Side::Yes, 0.65, 10.0, StrategyTag::Ladder);
        match mgr.check_order(&order, &book, false, 0, 0.0) {
            RiskDecision::Approved { size_usdc } => assert!((size_usdc - 2.5).abs() < 1e-9),
            _ => panic!("expected approval with cap"),
        }
    }

    #[test]
    fn rejects_at_capacity() {
        let mgr = RiskManager::new(cfg());
        let book = RiskBook::new(1000.0);
        let order = OrderIntent::entry("m", Side::Yes, 0.65, 2.0, StrategyTag::Ladder);
        assert!(matches!(mgr.check_order(&order, &book, false, 30, 0.0), RiskDecision::Rejected { .. }));
    }

    #[test]
    fn rejects_past_rate_limit() {
        let mgr = RiskManager::new(cfg());
        let mut book = RiskBook::new(1000.0);
        let now = Utc::now();
        for _ in 0..5 {
            book.record_order_timestamp("m", now);
        }
        let order = OrderIntent::entry("m", Side::Yes, 0.65, 2.0, StrategyTag::Ladder);
        assert!(matches!(mgr.check_order(&order, &book, true, 1, 0.0), RiskDecision::Rejected { .. }));
    }
}
