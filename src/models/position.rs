use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const POSITION_EPSILON: f64 = 1e-4;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Position {
    pub market_id: String,
    pub shares_yes: f64,
    pub shares_no: f64,
    pub cost_basis_yes: f64,
    pub cost_basis_no: f64,
    pub realized_pnl: f64,
    pub opened_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn new(market_id: String) -> Self {
        Self {
            market_id,
            ..Default::default()
        }
    }

    pub fn avg_entry_yes(&self) -> Option<f64> {
        (self.shares_yes > POSITION_EPSILON).then(|| self.cost_basis_yes / self.shares_yes)
    }

    pub fn avg_entry_no(&self) -> Option<f64> {
        (self.shares_no > POSITION_EPSILON).then(|| self.cost_basis_no / self.shares_no)
    }

    pub fn is_flat(&self) -> bool {
        self.shares_yes < POSITION_EPSILON && self.shares_no < POSITION_EPSILON
    }

    pub fn unrealized_pnl(&self, price_yes: f64, price_no: f64) -> f64 {
        let mark_yes = self.shares_yes * price_yes - self.cost_basis_yes;
        let mark_no = self.shares_no * price_no - self.cost_basis_no;
        mark_yes + mark_no
    }

    /// Record a buy fill: shares added, cost basis grows, average entry recomputed.
    pub fn record_buy(&mut self, side: crate::models::market::Side, usdc: f64, shares: f64) {
        use crate::models::market::Side;
        if self.opened_at.is_none() {
            self.opened_at = Some(Utc::now());
        }
        match side {
            Side::Yes => {
                self.shares_yes += shares;
                self.cost_basis_yes += usdc;
            }
            Side::No => {
                self.shares_no += shares;
                self.cost_basis_no += usdc;
            }
        }
    }

    /// Record a sell fill. Returns (realized_pnl_delta, cost_basis_removed).
    pub fn record_sell(&mut self, side: crate::models::market::Side, usdc: f64, shares: f64) -> (f64, f64) {
        use crate::models::market::Side;
        let (shares_ref, cost_ref) = match side {
            Side::Yes => (&mut self.shares_yes, &mut self.cost_basis_yes),
            Side::No => (&mut self.shares_no, &mut self.cost_basis_no),
        };
        let pct_sold = if *shares_ref > POSITION_EPSILON {
            (shares / *shares_ref).min(1.0)
        } else {
            1.0
        };
        let cost_basis_removed = *cost_ref * pct_sold;
        let realized_delta = usdc - cost_basis_removed;

        *shares_ref = (*shares_ref - shares).max(0.0);
        *cost_ref = (*cost_ref - cost_basis_removed).max(0.0);
        self.realized_pnl += realized_delta;

        if *shares_ref < POSITION_EPSILON {
            *shares_ref = 0.0;
            *cost_ref = 0.0;
        }

        (realized_delta, cost_basis_removed)
    }

    /// Settle at resolution: the winning side pays $1/share, the losing side pays $0.
    /// Returns (realized_pnl_delta, cash_credited) — `cash_credited` is the
    /// remaining cost basis across both sides (the principal unwound), not
    /// the raw payout; the profit on top is routed to protected profits by
    /// the caller, same capital-preservation rule as a partial sell.
    pub fn settle_resolution(&mut self, winning_side: crate::models::market::Side) -> (f64, f64) {
        use crate::models::market::Side;
        let (win_shares, win_cost, lose_cost) = match winning_side {
            Side::Yes => (self.shares_yes, self.cost_basis_yes, self.cost_basis_no),
            Side::No => (self.shares_no, self.cost_basis_no, self.cost_basis_yes),
        };
        let payout = win_shares;
        let pnl = (payout - win_cost) - lose_cost;
        let cash_credited = win_cost + lose_cost;
        self.realized_pnl += pnl;
        self.shares_yes = 0.0;
        self.shares_no = 0.0;
        self.cost_basis_yes = 0.0;
        self.cost_basis_no = 0.0;
        (pnl, cash_credited)
    }
}

/// Process-wide risk book: tradeable cash, locked-in realized surplus, and the
/// rolling per-market order timestamps used by the rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskBook {
    pub bankroll: f64,
    pub cash_balance: f64,
    pub protected_profits: f64,
    #[serde(skip)]
    pub recent_orders: std::collections::HashMap<String, VecDeque<DateTime<Utc>>>,
}

impl RiskBook {
    pub fn new(bankroll: f64) -> Self {
        Self {
            bankroll,
            cash_balance: bankroll,
            protected_profits: 0.0,
            recent_orders: std::collections::HashMap::new(),
        }
    }

    pub fn record_order_timestamp(&mut self, market_id: &str, at: DateTime<Utc>) {
        self.recent_orders
            .entry(market_id.to_string())
            .or_default()
            .push_back(at);
    }

    pub fn orders_in_window(&self, market_id: &str, now: DateTime<Utc>, window: chrono::Duration) -> usize {
        self.recent_orders
            .get(market_id)
            .map(|q| q.iter().filter(|&&t| now - t <= window).count())
            .unwrap_or(0)
    }
}
