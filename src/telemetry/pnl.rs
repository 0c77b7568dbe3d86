//! Periodic portfolio summary logging, mirroring the teacher's `PnlTracker`
//! summary line but adapted to the two-sided cash/protected-profits ledger
//! this domain uses instead of a single `Portfolio` struct.

use tracing::info;

/// Log one structured summary line for a P&L snapshot. Called by the
/// orchestrator's snapshot timer right after it persists the row.
pub fn log_snapshot(cash_balance: f64, protected_profits: f64, positions_value: f64, unrealized_pnl: f64, realized_pnl: f64) {
    let total_value = cash_balance + protected_profits + positions_value;
    info!(
        cash_balance,
        protected_profits,
        positions_value,
        unrealized_pnl,
        realized_pnl,
        total_value,
        "portfolio snapshot"
    );
}
