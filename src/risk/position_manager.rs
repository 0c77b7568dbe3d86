use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::info;

use crate::models::market::Side;
use crate::models::position::{Position, RiskBook};

/// Tracks the per-market position book and the process-wide cash ledger.
///
/// Positions live in a `DashMap` for lock-free concurrent access per market;
/// the shared cash/protected-profits ledger is a single `RwLock<RiskBook>`
/// since every fill touches it.
pub struct PositionManager {
    positions: DashMap<String, Position>,
    book: Arc<RwLock<RiskBook>>,
}

impl PositionManager {
    pub fn new(bankroll: f64) -> Self {
        Self {
            positions: DashMap::new(),
            book: Arc::new(RwLock::new(RiskBook::new(bankroll))),
        }
    }

    pub fn book_handle(&self) -> Arc<RwLock<RiskBook>> {
        self.book.clone()
    }

    pub async fn tradeable_bankroll(&self) -> f64 {
        let book = self.book.read().await;
        book.bankroll - book.protected_profits
    }

    pub async fn cash_balance(&self) -> f64 {
        self.book.read().await.cash_balance
    }

    pub async fn protected_profits(&self) -> f64 {
        self.book.read().await.protected_profits
    }

    pub fn market_exposure(&self, market_id: &str) -> f64 {
        self.positions
            .get(market_id)
            .map(|p| p.cost_basis_yes + p.cost_basis_no)
            .unwrap_or(0.0)
    }

    pub fn has_position(&self, market_id: &str) -> bool {
        self.positions
            .get(market_id)
            .map(|p| !p.is_flat())
            .unwrap_or(false)
    }

    pub fn active_position_count(&self) -> usize {
        self.positions.iter().filter(|p| !p.is_flat()).count()
    }

    pub fn position_snapshot(&self, market_id: &str) -> Position {
        self.positions
            .get(market_id)
            .map(|p| p.clone())
            .unwrap_or_else(|| Position::new(market_id.to_string()))
    }

    /// Record a buy fill: deducts cash, grows the position's cost basis.
    pub async fn record_buy(&self, market_id: &str, side: Side, usdc: f64, shares: f64) {
        {
            let mut book = self.book.write().await;
            book.cash_balance -= usdc;
        }
        self.positions
            .entry(market_id.to_string())
            .or_insert_with(|| Position::new(market_id.to_string()))
            .record_buy(side, usdc, shares);
    }

    /// Record a sell fill. Only the removed cost basis (the principal that
    /// funded the shares just sold) returns to `cashBalance`; any surplus
    /// over that cost basis routes to `protectedProfits` instead — capital
    /// preservation means profits are walled off rather than reinvested into
    /// sizing. `cashBalance + Σ costBasis` is conserved at the bankroll by
    /// construction (§8 cash-conservation invariant). Returns
    /// `(realized_pnl_delta, cost_basis_removed)` — the caller needs the
    /// latter to shrink its own exposure bookkeeping by the same amount.
    pub async fn record_sell(&self, market_id: &str, side: Side, usdc: f64, shares: f64) -> (f64, f64) {
        let (realized_delta, cost_basis_removed) = {
            let mut entry = self
                .positions
                .entry(market_id.to_string())
                .or_insert_with(|| Position::new(market_id.to_string()));
            entry.record_sell(side, usdc, shares)
        };

        let mut book = self.book.write().await;
        book.cash_balance += cost_basis_removed;
        if realized_delta > 0.0 {
            book.protected_profits += realized_delta;
        }

        info!(market_id, realized_delta, cost_basis_removed, "sell recorded");
        (realized_delta, cost_basis_removed)
    }

    /// Settle a resolved market: winning side pays $1/share, losing side pays $0.
    /// Only the remaining cost basis across both sides returns to
    /// `cashBalance`; any pnl surplus over that routes to `protectedProfits`,
    /// same capital-preservation rule as a partial sell.
    pub async fn settle_resolution(&self, market_id: &str, winning_side: Side) -> (f64, f64) {
        let (pnl, cash_credit) = {
            let mut entry = self
                .positions
                .entry(market_id.to_string())
                .or_insert_with(|| Position::new(market_id.to_string()));
            entry.settle_resolution(winning_side)
        };

        let mut book = self.book.write().await;
        book.cash_balance += cash_credit;
        if pnl > 0.0 {
            book.protected_profits += pnl;
        }

        info!(market_id, pnl, cash_credit, "resolution settled");
        (pnl, cash_credit)
    }

    pub async fn record_order_timestamp(&self, market_id: &str, at: chrono::DateTime<chrono::Utc>) {
        self.book.write().await.record_order_timestamp(market_id, at);
    }

    pub async fn orders_in_window(&self, market_id: &str, now: chrono::DateTime<chrono::Utc>, window: chrono::Duration) -> usize {
        self.book.read().await.orders_in_window(market_id, now, window)
    }

    pub fn remove_resolved(&self, market_id: &str) {
        self.positions.remove(market_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buy_then_partial_sell_routes_surplus_to_protected_profits() {
        let mgr = PositionManager::new(1000.0);
        mgr.record_buy("m", Side::Yes, 70.0, 100.0).await;
        mgr.record_sell("m", Side::Yes, 61.50, 75.0).await;

        let book = mgr.book.read().await;
        assert!((book.protected_profits - 9.0).abs() < 1e-9);
        // Only the $52.50 cost basis behind the 75 sold shares returns to
        // cash; the $9.00 surplus is walled off into protected_profits, not
        // reinvested — this is what keeps cash + cost_basis pinned at the
        // bankroll (§8 cash-conservation invariant).
        assert!((book.cash_balance - (1000.0 - 70.0 + 52.50)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn resolution_settlement_credits_cash_and_protected_profits() {
        let mgr = PositionManager::new(1000.0);
        mgr.record_buy("m", Side::Yes, 30.0, 50.0).await;
        let (pnl, cash_credited) = mgr.settle_resolution("m", Side::Yes).await;
        assert!((pnl - 20.0).abs() < 1e-9);
        assert!((cash_credited - 30.0).abs() < 1e-9);

        let book = mgr.book.read().await;
        assert!((book.protected_profits - 20.0).abs() < 1e-9);
        assert!((book.cash_balance - 1000.0).abs() < 1e-9);
        assert!(!mgr.has_position("m"));
    }

    #[tokio::test]
    async fn tradeable_bankroll_excludes_protected_profits() {
        let mgr = PositionManager::new(1000.0);
        mgr.record_buy("m", Side::Yes, 30.0, 50.0).await;
        mgr.settle_resolution("m", Side::Yes).await;
        assert!((mgr.tradeable_bankroll().await - 980.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cash_plus_cost_basis_holds_at_bankroll_through_a_profitable_round_trip() {
        let mgr = PositionManager::new(1000.0);
        mgr.record_buy("m", Side::Yes, 70.0, 100.0).await;
        mgr.record_sell("m", Side::Yes, 61.50, 75.0).await;

        let position = mgr.position_snapshot("m");
        let book = mgr.book.read().await;
        assert!((book.cash_balance + position.cost_basis_yes - 1000.0).abs() < 1e-9);
    }
}
