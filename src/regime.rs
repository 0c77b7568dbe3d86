//! Pure classification of a market's behavioral regime from its current prices
//! and recent price history. No I/O, no state beyond its arguments — safe to
//! unit test exhaustively and to call from both the live pipeline and replay.

use crate::config::RegimeConfig;
use crate::models::state::{PriceSample, Regime};

/// Population standard deviation of the sampled YES prices, mirroring the
/// `IndicatorEngine::bbw` windowed-variance computation.
fn population_std_dev(samples: &[PriceSample]) -> Option<f64> {
    if samples.len() < 3 {
        return None;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|s| s.price_yes).sum::<f64>() / n;
    let variance = samples.iter().map(|s| (s.price_yes - mean).powi(2)).sum::<f64>() / n;
    Some(variance.sqrt())
}

pub fn classify(
    config: &RegimeConfig,
    time_to_resolution: chrono::Duration,
    price_yes: f64,
    samples: &[PriceSample],
) -> Regime {
    let price_no = 1.0 - price_yes;
    let late_window = chrono::Duration::hours(config.late_resolution_hours as i64);

    if time_to_resolution < late_window
        && price_yes.max(price_no) > config.late_compressed_price_threshold
    {
        return Regime::LateCompressed;
    }

    if let Some(std_dev) = population_std_dev(samples) {
        if std_dev > config.volatility_threshold {
            return Regime::HighVolatility;
        }
    }

    if price_yes >= config.early_uncertain_price_min && price_yes <= config.early_uncertain_price_max {
        return Regime::EarlyUncertain;
    }

    Regime::MidConsensus
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn cfg() -> RegimeConfig {
        RegimeConfig {
            volatility_window_minutes: 10,
            volatility_threshold: 0.05,
            late_resolution_hours: 1,
            late_compressed_price_threshold: 0.90,
            early_uncertain_price_min: 0.45,
            early_uncertain_price_max: 0.55,
        }
    }

    fn samples(prices: &[f64]) -> Vec<PriceSample> {
        let now = Utc::now();
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| PriceSample {
                price_yes: p,
                timestamp: now - chrono::Duration::seconds((prices.len() - i) as i64),
            })
            .collect()
    }

    #[test]
    fn classifier_is_total() {
        let c = cfg();
        for price in [0.01, 0.30, 0.50, 0.70, 0.99] {
            let r = classify(&c, chrono::Duration::hours(5), price, &samples(&[0.5, 0.5, 0.5]));
            // just assert it returns without panicking and is one of the four tags
            match r {
                Regime::EarlyUncertain
                | Regime::MidConsensus
                | Regime::LateCompressed
                | Regime::HighVolatility => {}
            }
        }
    }

    #[test]
    fn late_compressed_takes_priority() {
        let c = cfg();
        let r = classify(&c, chrono::Duration::minutes(30), 0.95, &samples(&[0.5, 0.5, 0.5]));
        assert_eq!(r, Regime::LateCompressed);
    }

    #[test]
    fn high_volatility_detected_from_spread_samples() {
        let c = cfg();
        let r = classify(&c, chrono::Duration::hours(10), 0.60, &samples(&[0.30, 0.70, 0.35, 0.75]));
        assert_eq!(r, Regime::HighVolatility);
    }

    #[test]
    fn early_uncertain_band() {
        let c = cfg();
        let r = classify(&c, chrono::Duration::hours(10), 0.50, &samples(&[0.50, 0.51, 0.49]));
        assert_eq!(r, Regime::EarlyUncertain);
    }

    #[test]
    fn mid_consensus_default() {
        let c = cfg();
        let r = classify(&c, chrono::Duration::hours(10), 0.70, &samples(&[0.69, 0.70, 0.71]));
        assert_eq!(r, Regime::MidConsensus);
    }
}
