use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::market::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Filled,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyTag {
    Ladder,
    Dca,
    TailInsurance,
    PreGameStop,
    ConsensusBreakStop,
    ProfitTake,
    MoonBagExit,
    Resolution,
}

impl StrategyTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyTag::Ladder => "LADDER",
            StrategyTag::Dca => "DCA",
            StrategyTag::TailInsurance => "TAIL_INSURANCE",
            StrategyTag::PreGameStop => "PRE_GAME_STOP",
            StrategyTag::ConsensusBreakStop => "CONSENSUS_BREAK_STOP",
            StrategyTag::ProfitTake => "PROFIT_TAKE",
            StrategyTag::MoonBagExit => "MOON_BAG_EXIT",
            StrategyTag::Resolution => "RESOLUTION",
        }
    }
}

/// A proposed order, produced by a strategy and consumed by the risk gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub market_id: String,
    pub side: Side,
    pub price: f64,
    pub size_usdc: f64,
    pub is_exit: bool,
    /// For exits, the fraction of the held side to liquidate (1.0 = full exit).
    pub exit_fraction: f64,
    pub strategy: StrategyTag,
    pub strategy_detail: Option<String>,
    /// For ladder entries, the rung index this order fills — lets the
    /// orchestrator mark `ladderFilled` without re-parsing `strategy_detail`.
    pub ladder_rung: Option<usize>,
}

impl OrderIntent {
    pub fn entry(market_id: impl Into<String>, side: Side, price: f64, size_usdc: f64, strategy: StrategyTag) -> Self {
        Self {
            market_id: market_id.into(),
            side,
            price,
            size_usdc,
            is_exit: false,
            exit_fraction: 0.0,
            strategy,
            strategy_detail: None,
            ladder_rung: None,
        }
    }

    pub fn exit(market_id: impl Into<String>, side: Side, price: f64, exit_fraction: f64, strategy: StrategyTag) -> Self {
        Self {
            market_id: market_id.into(),
            side,
            price,
            size_usdc: 0.0,
            is_exit: true,
            exit_fraction,
            strategy,
            strategy_detail: None,
            ladder_rung: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.strategy_detail = Some(detail.into());
        self
    }

    pub fn with_rung(mut self, rung: usize) -> Self {
        self.ladder_rung = Some(rung);
        self
    }
}

/// Immutable audit row for a simulated fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub market_id: String,
    pub side: Side,
    pub price: f64,
    pub size_usdc: f64,
    pub shares: f64,
    pub strategy: StrategyTag,
    pub strategy_detail: Option<String>,
    pub is_exit: bool,
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
}
