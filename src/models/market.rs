use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Side::Yes => "Yes",
            Side::No => "No",
        }
    }
}

/// A binary market as reported by the catalog API: two complementary outcome
/// tokens whose labels and token ids are parallel arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub question: String,
    pub category: String,
    pub outcomes: [String; 2],
    pub token_ids: [String; 2],
    pub end_time: DateTime<Utc>,
    pub game_start_time: Option<DateTime<Utc>>,
    pub volume_24h: f64,
    pub liquidity: f64,
    pub active: bool,
    pub closed: bool,
    /// Mutually-exclusive event group id, if this market belongs to one.
    pub event_group_id: Option<String>,
}

impl Market {
    /// Resolve which index in `outcomes`/`token_ids` corresponds to YES.
    /// Falls back to index 0 with a warning if no label matches case-insensitively.
    pub fn yes_index(&self) -> usize {
        self.outcomes
            .iter()
            .position(|o| o.eq_ignore_ascii_case("yes"))
            .unwrap_or_else(|| {
                tracing::warn!(market = %self.id, "no outcome labeled Yes; assuming index 0");
                0
            })
    }

    pub fn yes_token_id(&self) -> &str {
        &self.token_ids[self.yes_index()]
    }

    pub fn no_token_id(&self) -> &str {
        &self.token_ids[1 - self.yes_index()]
    }

    pub fn token_side(&self, token_id: &str) -> Option<Side> {
        if token_id == self.yes_token_id() {
            Some(Side::Yes)
        } else if token_id == self.no_token_id() {
            Some(Side::No)
        } else {
            None
        }
    }

    pub fn time_to_resolution(&self) -> chrono::Duration {
        self.end_time - Utc::now()
    }

    pub fn is_pre_game(&self) -> bool {
        self.game_start_time
            .map(|t| Utc::now() < t)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub token_id: String,
    // price (in 1e-6 fixed-point key space to keep BTreeMap ordering stable) -> size
    pub bids: BTreeMap<u64, f64>,
    pub asks: BTreeMap<u64, f64>,
    pub timestamp: DateTime<Utc>,
}

fn price_key(price: f64) -> u64 {
    (price * 1_000_000.0).round() as u64
}

fn key_price(key: u64) -> f64 {
    key as f64 / 1_000_000.0
}

impl OrderBook {
    pub fn new(token_id: String) -> Self {
        Self {
            token_id,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn set_bid(&mut self, price: f64, size: f64) {
        if size <= 0.0 {
            self.bids.remove(&price_key(price));
        } else {
            self.bids.insert(price_key(price), size);
        }
    }

    pub fn set_ask(&mut self, price: f64, size: f64) {
        if size <= 0.0 {
            self.asks.remove(&price_key(price));
        } else {
            self.asks.insert(price_key(price), size);
        }
    }

    pub fn best_bid(&self) -> Option<(f64, f64)> {
        self.bids.iter().next_back().map(|(&p, &s)| (key_price(p), s))
    }

    pub fn best_ask(&self) -> Option<(f64, f64)> {
        self.asks.iter().next().map(|(&p, &s)| (key_price(p), s))
    }

    pub fn midpoint(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some((bid + ask) / 2.0),
            (Some((bid, _)), None) => Some(bid),
            (None, Some((ask, _))) => Some(ask),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some(ask - bid),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yes_index_resolves_case_insensitively() {
        let m = Market {
            id: "m1".into(),
            question: "q".into(),
            category: "politics".into(),
            outcomes: ["NO".into(), "YES".into()],
            token_ids: ["t-no".into(), "t-yes".into()],
            end_time: Utc::now(),
            game_start_time: None,
            volume_24h: 0.0,
            liquidity: 0.0,
            active: true,
            closed: false,
            event_group_id: None,
        };
        assert_eq!(m.yes_index(), 1);
        assert_eq!(m.yes_token_id(), "t-yes");
        assert_eq!(m.no_token_id(), "t-no");
        assert_eq!(m.token_side("t-yes"), Some(Side::Yes));
        assert_eq!(m.token_side("t-no"), Some(Side::No));
    }

    #[test]
    fn order_book_midpoint_and_spread() {
        let mut book = OrderBook::new("tok".into());
        book.set_bid(0.60, 100.0);
        book.set_ask(0.62, 50.0);
        assert_eq!(book.best_bid(), Some((0.60, 100.0)));
        assert_eq!(book.best_ask(), Some((0.62, 50.0)));
        assert!((book.midpoint().unwrap() - 0.61).abs() < 1e-9);
        assert!((book.spread().unwrap() - 0.02).abs() < 1e-9);
    }
}
