use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CopyStrategyType {
    Standard,
    Lottery,
}

/// A signal derived from a tracked wallet's trade landing inside a configured
/// price band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopySignal {
    pub trader: String,
    pub market_id: String,
    pub market_slug: String,
    pub token_id: String,
    pub outcome_index: usize,
    pub outcome_label: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub strategy_type: CopyStrategyType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackedStatus {
    Watching,
    InRange,
    Executed,
}

/// Persisted watch record for a copy-trade signal, promoted through
/// WATCHING -> IN_RANGE -> EXECUTED as its price moves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedMarket {
    pub condition_id: String,
    pub slug: String,
    pub token_id: Option<String>,
    pub outcome_index: Option<usize>,
    pub outcome: String,
    pub title: String,
    pub trader_name: String,
    pub trader_wallet: String,
    pub tracked_price: f64,
    pub current_price: f64,
    pub status: TrackedStatus,
    pub signal_time: DateTime<Utc>,
    pub entered_range_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl TrackedMarket {
    pub fn promote_to_in_range(&mut self, current_price: f64) {
        self.current_price = current_price;
        if self.status == TrackedStatus::Watching {
            self.status = TrackedStatus::InRange;
            self.entered_range_at = Some(Utc::now());
        }
    }

    pub fn mark_executed(&mut self) {
        self.status = TrackedStatus::Executed;
        self.executed_at = Some(Utc::now());
    }
}

/// Classify a copy-trade price into a strategy band, if it falls in one at all.
pub fn classify_band(price: f64, standard_min: f64, standard_max: f64, lottery_max: f64) -> Option<CopyStrategyType> {
    if price > 0.0 && price >= standard_min && price <= standard_max {
        Some(CopyStrategyType::Standard)
    } else if price > 0.0 && price <= lottery_max {
        Some(CopyStrategyType::Lottery)
    } else {
        None
    }
}
