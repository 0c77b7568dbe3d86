//! Averaging-down on the committed side. Strict preconditions keep this from
//! fighting the ladder or firing after the thesis has already broken.

use chrono::Utc;

use crate::config::{DcaConfig, LadderConfig};
use crate::models::order::{OrderIntent, StrategyTag};
use crate::models::position::Position;
use crate::models::state::{MarketState, Regime};

pub fn evaluate(
    state: &MarketState,
    position: &Position,
    game_start_time: Option<chrono::DateTime<Utc>>,
    ladder: &LadderConfig,
    config: &DcaConfig,
    bankroll: f64,
    max_market_exposure_pct: f64,
) -> Option<OrderIntent> {
    let side = state.active_trade_side?;
    if !state.has_position() {
        return None;
    }
    if !game_start_in_future(game_start_time) {
        return None;
    }
    if state.regime == Regime::EarlyUncertain {
        return None;
    }
    if state.dca_count >= config.max_dca_buys {
        return None;
    }
    let first_level = *ladder.levels.first()?;

    let (current_price, avg_entry) = match side {
        crate::models::market::Side::Yes => (state.last_price_yes, position.avg_entry_yes()?),
        crate::models::market::Side::No => (state.last_price_no, position.avg_entry_no()?),
    };

    if current_price < first_level {
        return None;
    }
    if avg_entry <= 0.0 {
        return None;
    }
    let drawdown_pct = (avg_entry - current_price) / avg_entry;
    if drawdown_pct < config.min_drawdown_pct {
        return None;
    }

    let size_usdc = bankroll * max_market_exposure_pct * config.dca_size_pct;
    Some(
        OrderIntent::entry(state.market_id.clone(), side, current_price, size_usdc, StrategyTag::Dca)
            .with_detail(format!("dca#{} drawdown={:.3}", state.dca_count + 1, drawdown_pct)),
    )
}

/// Game-start gate, separated out because `MarketState` doesn't carry the
/// market's `game_start_time` directly — the caller supplies it.
pub fn game_start_in_future(game_start_time: Option<chrono::DateTime<Utc>>) -> bool {
    game_start_time.map(|t| Utc::now() < t).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::market::Side;

    fn ladder_cfg() -> LadderConfig {
        LadderConfig {
            levels: vec![0.60, 0.70, 0.80, 0.90, 0.95],
            weights: vec![0.10, 0.15, 0.25, 0.25, 0.25],
            max_buy_price: 0.92,
            resolution_threshold: 0.95,
        }
    }

    fn dca_cfg() -> DcaConfig {
        DcaConfig {
            max_dca_buys: 2,
            dca_size_pct: 0.15,
            min_drawdown_pct: 0.05,
        }
    }

    #[test]
    fn fires_when_drawdown_exceeds_threshold() {
        let mut s = MarketState::new("m".into());
        s.active_trade_side = Some(Side::Yes);
        s.exposure_yes = 70.0;
        s.last_price_yes = 0.60;
        let mut pos = Position::new("m".into());
        pos.record_buy(Side::Yes, 70.0, 100.0); // avg 0.70
        let order = evaluate(&s, &pos, None, &ladder_cfg(), &dca_cfg(), 1000.0, 0.02);
        assert!(order.is_some());
    }

    #[test]
    fn skips_when_drawdown_too_small() {
        let mut s = MarketState::new("m".into());
        s.active_trade_side = Some(Side::Yes);
        s.last_price_yes = 0.69;
        let mut pos = Position::new("m".into());
        pos.record_buy(Side::Yes, 70.0, 100.0);
        let order = evaluate(&s, &pos, None, &ladder_cfg(), &dca_cfg(), 1000.0, 0.02);
        assert!(order.is_none());
    }

    #[test]
    fn skips_when_dca_count_exhausted() {
        let mut s = MarketState::new("m".into());
        s.active_trade_side = Some(Side::Yes);
        s.last_price_yes = 0.50;
        s.dca_count = 2;
        let mut pos = Position::new("m".into());
        pos.record_buy(Side::Yes, 70.0, 100.0);
        let order = evaluate(&s, &pos, None, &ladder_cfg(), &dca_cfg(), 1000.0, 0.02);
        assert!(order.is_none());
    }
}
