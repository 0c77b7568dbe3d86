//! Confidence-weighted ladder entry: as price climbs through configured
//! rungs, release proportionally larger tranches of the bankroll.

use crate::config::LadderConfig;
use crate::models::market::Side;
use crate::models::order::{OrderIntent, StrategyTag};
use crate::models::state::MarketState;

/// Determine which side the ladder should trade, honoring the side lock.
/// Returns `None` if neither side qualifies or the committed side has flipped.
fn resolve_side(state: &MarketState, config: &LadderConfig) -> Option<Side> {
    if let Some(committed) = state.active_trade_side {
        return Some(committed);
    }
    let first_level = *config.levels.first()?;
    if state.last_price_yes >= first_level && state.last_price_yes <= config.max_buy_price {
        Some(Side::Yes)
    } else if state.last_price_no >= first_level && state.last_price_no <= config.max_buy_price {
        Some(Side::No)
    } else {
        None
    }
}

/// Evaluate the ladder for one tick.
///
/// `bankroll` is the tradeable bankroll (excludes protected profits);
/// `max_market_exposure_pct` comes from `RiskConfig` and caps each tranche's
/// share of the bankroll, per rung, by `weight[i]`.
pub fn evaluate(state: &MarketState, config: &LadderConfig, bankroll: f64, max_market_exposure_pct: f64) -> Vec<OrderIntent> {
    let Some(side) = resolve_side(state, config) else {
        return Vec::new();
    };

    let price = match side {
        Side::Yes => state.last_price_yes,
        Side::No => state.last_price_no,
    };

    if price > config.max_buy_price {
        return Vec::new();
    }

    let mut orders = Vec::new();
    for (i, &level) in config.levels.iter().enumerate() {
        if state.ladder_filled.contains(&i) {
            continue;
        }
        if price >= level {
            let weight = config.weights.get(i).copied().unwrap_or(0.0);
            let size_usdc = bankroll * max_market_exposure_pct * weight;
            orders.push(
                OrderIntent::entry(state.market_id.clone(), side, price, size_usdc, StrategyTag::Ladder)
                    .with_detail(format!("rung {i} @ {level}"))
                    .with_rung(i),
            );
        }
    }
    orders
}
