//! Exit precedence chain: pre-game stop, consensus-break tracking, then
//! profit-take / moon-bag / resolution / thesis-stop. Exactly one exit order
//! (or none) is produced per tick; exits always supersede entries.

use chrono::{DateTime, Utc};

use crate::config::{ExitConfig, LadderConfig};
use crate::models::order::{OrderIntent, StrategyTag};
use crate::models::state::MarketState;

pub enum ExitOutcome {
    None,
    Exit(OrderIntent),
}

/// Mutations the exit check wants applied to state. Kept separate from the
/// `MarketState` reference so this stays a pure read -> decision step; the
/// caller applies `StateEffects` under the per-market lock.
#[derive(Debug, Default, Clone)]
pub struct StateEffects {
    pub set_cooldown_until: Option<DateTime<Utc>>,
    pub set_consensus_break_start: Option<Option<DateTime<Utc>>>,
    pub set_consensus_break_confirmed: Option<bool>,
    pub set_moon_bag_active: Option<bool>,
    pub set_moon_bag_price: Option<Option<f64>>,
    pub set_stop_loss_triggered_at: Option<Option<DateTime<Utc>>>,
}

/// `avg_entry` is the held side's average entry price from the `Position`
/// book — the exit strategy is a pure function of `MarketState` plus this one
/// external fact, since `MarketState` itself tracks no cost basis.
pub fn evaluate(
    state: &MarketState,
    ladder: &LadderConfig,
    config: &ExitConfig,
    game_start_time: Option<DateTime<Utc>>,
    avg_entry: Option<f64>,
) -> (ExitOutcome, StateEffects) {
    let mut effects = StateEffects::default();
    let now = Utc::now();

    let Some(side) = state.active_trade_side else {
        return (ExitOutcome::None, effects);
    };
    if !state.has_position() {
        return (ExitOutcome::None, effects);
    }
    let Some(held_price) = state.held_side_price() else {
        return (ExitOutcome::None, effects);
    };
    let first_level = *ladder.levels.first().unwrap_or(&0.0);
    let pre_game = game_start_time.map(|t| now < t).unwrap_or(false);

    // 1. Pre-game stop.
    if pre_game {
        if state.in_cooldown(now) {
            return (ExitOutcome::None, effects);
        }
        if held_price < first_level {
            effects.set_cooldown_until = Some(now + chrono::Duration::seconds(config.pre_game_cooldown_seconds as i64));
            effects.set_stop_loss_triggered_at = Some(Some(now));
            let order = OrderIntent::exit(state.market_id.clone(), side, held_price, 1.0, StrategyTag::PreGameStop)
                .with_detail("pre-game stop: price fell below first ladder level");
            return (ExitOutcome::Exit(order), effects);
        }
    }

    // 2. Consensus-break tracking.
    if held_price < first_level {
        if state.consensus_break_start.is_none() {
            effects.set_consensus_break_start = Some(Some(now));
        }
        let started = state.consensus_break_start.unwrap_or(now);
        let confirmation_window = chrono::Duration::seconds(config.consensus_break_confirmation_seconds as i64);
        if !state.consensus_break_confirmed && now - started >= confirmation_window {
            effects.set_consensus_break_confirmed = Some(true);
        }
    } else if state.consensus_break_start.is_some() || state.consensus_break_confirmed {
        effects.set_consensus_break_start = Some(None);
        effects.set_consensus_break_confirmed = Some(false);
    }

    let confirmed_after_this_tick = state.consensus_break_confirmed || effects.set_consensus_break_confirmed == Some(true);

    // 3. Profit take / resolution / moon-bag.
    if held_price >= ladder.resolution_threshold {
        let order = OrderIntent::exit(state.market_id.clone(), side, held_price, 1.0, StrategyTag::Resolution)
            .with_detail("price crossed resolution threshold");
        return (ExitOutcome::Exit(order), effects);
    }

    if !state.moon_bag_active {
        if let Some(avg) = avg_entry {
            if avg > 0.0 {
                let profit_pct = (held_price - avg) / avg;
                if profit_pct >= config.take_profit_pct {
                    effects.set_moon_bag_active = Some(true);
                    effects.set_moon_bag_price = Some(Some(held_price));
                    let order = OrderIntent::exit(
                        state.market_id.clone(),
                        side,
                        held_price,
                        config.partial_exit_fraction,
                        StrategyTag::ProfitTake,
                    )
                    .with_detail(format!("profit take at {profit_pct:.3}"));
                    return (ExitOutcome::Exit(order), effects);
                }
            }
        }
    } else if let Some(activation_price) = state.moon_bag_price_at_activation {
        let drop_trigger = activation_price * (1.0 - config.moon_bag_drop_pct);
        if held_price < drop_trigger {
            let order = OrderIntent::exit(state.market_id.clone(), side, held_price, 1.0, StrategyTag::MoonBagExit)
                .with_detail("moon bag trailing stop hit");
            return (ExitOutcome::Exit(order), effects);
        }
    }

    if confirmed_after_this_tick {
        let order = OrderIntent::exit(state.market_id.clone(), side, held_price, 1.0, StrategyTag::ConsensusBreakStop)
            .with_detail("consensus break confirmed");
        return (ExitOutcome::Exit(order), effects);
    }

    (ExitOutcome::None, effects)
}
