//! Maps a market's regime to the strategy family eligible to run this tick.

use crate::models::state::Regime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Ladder,
    VolatilityAbsorption,
    None,
}

pub fn select(regime: Regime) -> Strategy {
    match regime {
        Regime::LateCompressed | Regime::MidConsensus => Strategy::Ladder,
        Regime::HighVolatility => Strategy::VolatilityAbsorption,
        Regime::EarlyUncertain => Strategy::None,
    }
}

/// Tail-insurance eligibility is independent of the primary strategy: small
/// opposite-side stakes are worth taking whenever the opposite price is very
/// cheap and we already have meaningful exposure on the favored side.
pub fn tail_insurance_eligible(
    opposite_price: f64,
    favored_exposure: f64,
    price_threshold: f64,
    min_favored_exposure: f64,
    tail_already_active: bool,
) -> bool {
    !tail_already_active && opposite_price > 0.0 && opposite_price <= price_threshold && favored_exposure >= min_favored_exposure
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_is_total() {
        for regime in [
            Regime::EarlyUncertain,
            Regime::MidConsensus,
            Regime::LateCompressed,
            Regime::HighVolatility,
        ] {
            let _ = select(regime);
        }
    }

    #[test]
    fn high_volatility_maps_to_absorption() {
        assert_eq!(select(Regime::HighVolatility), Strategy::VolatilityAbsorption);
    }

    #[test]
    fn tail_insurance_requires_cheap_opposite_and_exposure() {
        assert!(tail_insurance_eligible(0.03, 5.0, 0.05, 2.0, false));
        assert!(!tail_insurance_eligible(0.03, 1.0, 0.05, 2.0, false));
        assert!(!tail_insurance_eligible(0.03, 5.0, 0.05, 2.0, true));
    }
}
