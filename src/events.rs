use chrono::{DateTime, Utc};

use crate::models::market::Market;
use crate::models::order::Trade;
use crate::models::signal::CopySignal;
use crate::models::state::Regime;

/// Typed event carried on the in-process bus. Every producer publishes one of
/// these variants; every consumer matches on the subset it cares about.
#[derive(Debug, Clone)]
pub enum Event {
    PriceUpdate {
        market_id: String,
        token_id: String,
        price_yes: f64,
        price_no: f64,
        timestamp: DateTime<Utc>,
    },
    CopySignal(CopySignal),
    MarketFiltered {
        markets: Vec<Market>,
    },
    WsStatus(WsStatus),
    PortfolioUpdate {
        cash_balance: f64,
        protected_profits: f64,
        unrealized_pnl: f64,
        realized_pnl: f64,
        timestamp: DateTime<Utc>,
    },
    StrategyEvent {
        market_id: String,
        regime: Regime,
        action: String,
        details: String,
        timestamp: DateTime<Utc>,
    },
    ExecutionResult(Trade),
}

#[derive(Debug, Clone)]
pub enum WsStatus {
    Connected,
    Disconnected,
    ReconnectFailedPermanently,
}

/// Thin wrapper over a `tokio::sync::broadcast` channel, matching the
/// teacher's single-channel shutdown-signal pattern but generalized to a
/// typed multi-producer, multi-consumer bus.
#[derive(Clone)]
pub struct EventBus {
    sender: tokio::sync::broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: Event) {
        // A broadcast send only fails when there are zero receivers; that's a
        // normal startup/shutdown race, not an error worth propagating.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
