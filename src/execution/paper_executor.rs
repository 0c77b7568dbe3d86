use chrono::Utc;
use uuid::Uuid;

use crate::models::order::{OrderIntent, OrderStatus, Trade};

/// Paper-mode fill simulator. Fills are never rejected and never slip: every
/// approved order fills in full at its requested price. This is a simplifying
/// choice for a paper-trading engine (no real order book depth to model
/// against), not an attempt to model execution risk.
#[derive(Debug, Clone, Copy, Default)]
pub struct PaperExecutor;

impl PaperExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Simulate submitting `intent`. Entries fill `intent.size_usdc` worth of
    /// shares at `intent.price`; exits fill `shares` (already resolved by the
    /// caller from the position's held size and the order's exit fraction).
    pub fn simulate(&self, intent: &OrderIntent, shares: f64) -> Option<Trade> {
        let (size_usdc, filled_shares) = if intent.is_exit {
            (intent.price * shares, shares)
        } else {
            (intent.size_usdc, intent.size_usdc / intent.price)
        };

        Some(Trade {
            id: Uuid::new_v4().to_string(),
            market_id: intent.market_id.clone(),
            side: intent.side,
            price: intent.price,
            size_usdc,
            shares: filled_shares,
            strategy: intent.strategy,
            strategy_detail: intent.strategy_detail.clone(),
            is_exit: intent.is_exit,
            status: OrderStatus::Filled,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::market::Side;
    use crate::models::order::StrategyTag;

    #[test]
    fn entry_fills_in_full_at_requested_price() {
        let exec = PaperExecutor::new();
        let intent = OrderIntent::entry("m", Side::Yes, 0.60, 2.0, StrategyTag::Ladder);
        let trade = exec.simulate(&intent, 0.0).unwrap();
        assert_eq!(trade.status, OrderStatus::Filled);
        assert!((trade.price - 0.60).abs() < 1e-9);
        assert!((trade.size_usdc - 2.0).abs() < 1e-9);
        assert!((trade.shares - (2.0 / 0.60)).abs() < 1e-9);
    }

    #[test]
    fn exit_fills_requested_shares_at_requested_price() {
        let exec = PaperExecutor::new();
        let intent = OrderIntent::exit("m", Side::Yes, 0.82, 0.75, StrategyTag::ProfitTake);
        let trade = exec.simulate(&intent, 10.0).unwrap();
        assert_eq!(trade.status, OrderStatus::Filled);
        assert!((trade.price - 0.82).abs() < 1e-9);
        assert!((trade.shares - 10.0).abs() < 1e-9);
        assert!((trade.size_usdc - 8.2).abs() < 1e-9);
    }
}
