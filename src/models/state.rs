use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::market::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    EarlyUncertain,
    MidConsensus,
    LateCompressed,
    HighVolatility,
}

impl Regime {
    pub fn is_significant_transition(from: Regime, to: Regime) -> bool {
        from != to && (from == Regime::HighVolatility || to == Regime::HighVolatility || to == Regime::LateCompressed)
    }
}

/// One sampled price, used to feed the regime classifier's volatility window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceSample {
    pub price_yes: f64,
    pub timestamp: DateTime<Utc>,
}

/// Per-market trading state machine. Mutated only by the orchestrator while
/// holding this market's lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketState {
    pub market_id: String,
    pub regime: Regime,
    pub last_price_yes: f64,
    pub last_price_no: f64,
    pub price_history: Vec<PriceSample>,
    pub ladder_filled: BTreeSet<usize>,
    pub exposure_yes: f64,
    pub exposure_no: f64,
    pub tail_active: bool,
    pub consensus_break_start: Option<DateTime<Utc>>,
    pub consensus_break_confirmed: bool,
    pub moon_bag_active: bool,
    pub moon_bag_price_at_activation: Option<f64>,
    pub stop_loss_triggered_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub active_trade_side: Option<Side>,
    pub dca_count: u32,
    pub last_processed: DateTime<Utc>,
}

impl MarketState {
    pub fn new(market_id: String) -> Self {
        let now = Utc::now();
        Self {
            market_id,
            regime: Regime::EarlyUncertain,
            last_price_yes: 0.5,
            last_price_no: 0.5,
            price_history: Vec::new(),
            ladder_filled: BTreeSet::new(),
            exposure_yes: 0.0,
            exposure_no: 0.0,
            tail_active: false,
            consensus_break_start: None,
            consensus_break_confirmed: false,
            moon_bag_active: false,
            moon_bag_price_at_activation: None,
            stop_loss_triggered_at: None,
            cooldown_until: None,
            active_trade_side: None,
            dca_count: 0,
            last_processed: now,
        }
    }

    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.map(|t| now < t).unwrap_or(false)
    }

    /// Push a sample, trimming anything older than `window` behind the newest sample.
    pub fn push_sample(&mut self, sample: PriceSample, window: chrono::Duration) {
        self.price_history.push(sample);
        let cutoff = sample.timestamp - window;
        self.price_history.retain(|s| s.timestamp >= cutoff);
    }

    pub fn held_side_price(&self) -> Option<f64> {
        match self.active_trade_side {
            Some(Side::Yes) => Some(self.last_price_yes),
            Some(Side::No) => Some(self.last_price_no),
            None => None,
        }
    }

    pub fn has_position(&self) -> bool {
        self.exposure_yes > 1e-9 || self.exposure_no > 1e-9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_respects_now() {
        let mut s = MarketState::new("m".into());
        s.cooldown_until = Some(Utc::now() + chrono::Duration::seconds(30));
        assert!(s.in_cooldown(Utc::now()));
        assert!(!s.in_cooldown(Utc::now() + chrono::Duration::seconds(31)));
    }

    #[test]
    fn push_sample_trims_window() {
        let mut s = MarketState::new("m".into());
        let base = Utc::now();
        s.push_sample(PriceSample { price_yes: 0.5, timestamp: base - chrono::Duration::minutes(10) }, chrono::Duration::minutes(5));
        s.push_sample(PriceSample { price_yes: 0.55, timestamp: base }, chrono::Duration::minutes(5));
        assert_eq!(s.price_history.len(), 1);
    }
}
