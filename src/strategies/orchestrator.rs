use crate::config::Config;
use crate::models::market::Market;
use crate::models::order::{OrderIntent, StrategyTag};
use crate::models::position::Position;
use crate::models::state::{MarketState, Regime};
use crate::regime;
use crate::strategies::{dca, exit, ladder, selection};

/// Everything the per-market pipeline (steps 2-6 of the orchestrator's
/// decision pipeline) produced for one tick: the regime this tick settled
/// on, the proposed orders (already exit-precedence resolved), and the state
/// effects the caller must apply before persisting.
pub struct TickDecision {
    pub regime: Regime,
    pub regime_transitioned_significantly: bool,
    pub orders: Vec<OrderIntent>,
    pub exit_effects: exit::StateEffects,
}

/// Runs strategy selection, ladder/DCA/tail entries, and the exit precedence
/// chain for a single market on a single tick.
///
/// Grounded on the teacher's `StrategyOrchestrator::evaluate` — a priority
/// list evaluated under a capital budget — generalized from a five-engine
/// vol-regime dispatch table to the regime -> {ladder, dca, tail, exit}
/// pipeline this system specifies. Exits always take precedence: if the exit
/// chain fires, it replaces every proposed entry for this tick.
pub fn evaluate_tick(
    state: &MarketState,
    position: &Position,
    market: &Market,
    config: &Config,
    tradeable_bankroll: f64,
) -> TickDecision {
    let new_regime = regime::classify(
        &config.regime,
        market.time_to_resolution(),
        state.last_price_yes,
        &state.price_history,
    );
    let transitioned = Regime::is_significant_transition(state.regime, new_regime);

    let mut orders = Vec::new();

    match selection::select(new_regime) {
        selection::Strategy::Ladder => {
            orders.extend(ladder::evaluate(
                state,
                &config.ladder,
                tradeable_bankroll,
                config.risk.max_market_exposure_pct,
            ));
        }
        selection::Strategy::VolatilityAbsorption | selection::Strategy::None => {}
    }

    if config.tail.enabled {
        if let Some(side) = state.active_trade_side {
            let (opposite_price, favored_exposure) = match side {
                crate::models::market::Side::Yes => (state.last_price_no, state.exposure_yes),
                crate::models::market::Side::No => (state.last_price_yes, state.exposure_no),
            };
            if selection::tail_insurance_eligible(
                opposite_price,
                favored_exposure,
                config.tail.price_threshold,
                config.tail.min_favored_exposure,
                state.tail_active,
            ) {
                let size_usdc = tradeable_bankroll * config.tail.exposure_pct;
                orders.push(
                    OrderIntent::entry(state.market_id.clone(), side.opposite(), opposite_price, size_usdc, StrategyTag::TailInsurance)
                        .with_detail("tail insurance on cheap opposite side"),
                );
            }
        }
    }

    if state.active_trade_side.is_some() {
        if let Some(order) = dca::evaluate(
            state,
            position,
            market.game_start_time,
            &config.ladder,
            &config.dca,
            tradeable_bankroll,
            config.risk.max_market_exposure_pct,
        ) {
            orders.push(order);
        }
    }

    let avg_entry = state.active_trade_side.and_then(|side| match side {
        crate::models::market::Side::Yes => position.avg_entry_yes(),
        crate::models::market::Side::No => position.avg_entry_no(),
    });
    let (exit_outcome, exit_effects) = exit::evaluate(
        state,
        &config.ladder,
        &config.exit,
        market.game_start_time,
        avg_entry,
    );

    if let exit::ExitOutcome::Exit(exit_order) = exit_outcome {
        orders = vec![exit_order];
    }

    TickDecision {
        regime: new_regime,
        regime_transitioned_significantly: transitioned,
        orders,
        exit_effects,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::market::Side;
    use chrono::Utc;

    fn market() -> Market {
        Market {
            id: "m1".into(),
            question: "q".into(),
            category: "other".into(),
            outcomes: ["No".into(), "Yes".into()],
            token_ids: ["t-no".into(), "t-yes".into()],
            end_time: Utc::now() + chrono::Duration::days(3),
            game_start_time: None,
            volume_24h: 10_000.0,
            liquidity: 2_000.0,
            active: true,
            closed: false,
            event_group_id: None,
        }
    }

    #[test]
    fn ladder_ignition_end_to_end() {
        let config = Config::default();
        let mut state = MarketState::new("m1".into());
        state.last_price_yes = 0.65;
        state.last_price_no = 0.35;
        let position = Position::new("m1".into());
        let decision = evaluate_tick(&state, &position, &market(), &config, 1000.0);
        assert_eq!(decision.orders.len(), 1);
        assert_eq!(decision.orders[0].side, Side::Yes);
        assert!((decision.orders[0].size_usdc - 2.0).abs() < 1e-9);
    }

    #[test]
    fn exit_overrides_entries_on_same_tick() {
        let config = Config::default();
        let mut state = MarketState::new("m1".into());
        state.active_trade_side = Some(Side::Yes);
        state.ladder_filled.insert(0);
        state.last_price_yes = 0.97;
        state.last_price_no = 0.03;
        state.exposure_yes = 50.0;
        let mut position = Position::new("m1".into());
        position.record_buy(Side::Yes, 50.0, 70.0);
        let decision = evaluate_tick(&state, &position, &market(), &config, 1000.0);
        assert_eq!(decision.orders.len(), 1);
        assert!(decision.orders[0].is_exit);
    }
}
