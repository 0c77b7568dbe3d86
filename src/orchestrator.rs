//! The central per-market state map, per-market serialization lock, and the
//! periodic timers and decision pipeline that tie every other module
//! together. Grounded on `main.rs`'s task-spawning / `tokio::select!`
//! shutdown-broadcast pattern, generalized from a flat set of independent
//! feed tasks into one shared pipeline keyed by market id.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::events::{Event, EventBus};
use crate::execution::paper_executor::PaperExecutor;
use crate::feeds::copy_trade::CopyTradeDetector;
use crate::feeds::market_loader::MarketLoader;
use crate::feeds::price_feed::PriceFeed;
use crate::models::market::{Market, Side};
use crate::models::order::{OrderStatus, StrategyTag};
use crate::models::state::{MarketState, PriceSample};
use crate::risk::position_manager::PositionManager;
use crate::risk::risk_manager::{RiskDecision, RiskManager};
use crate::store::Store;
use crate::strategies::exit::StateEffects;
use crate::strategies::orchestrator as pipeline;

type SharedStore = Arc<std::sync::Mutex<Store>>;

/// A market's identity plus its lock-guarded mutable trading state. Owning
/// both behind one `Arc` means a dropped-tick try-lock failure never needs
/// to touch the catalog map itself.
struct MarketSlot {
    market: Market,
    state: AsyncMutex<MarketState>,
}

/// Everything the price-update pipeline needs, cloned into each spawned task.
/// Every field is cheap to clone (`Arc`, or a small `Clone` config struct).
#[derive(Clone)]
struct PipelineCtx {
    config: Config,
    bus: EventBus,
    store: SharedStore,
    position_mgr: Arc<PositionManager>,
    risk_mgr: RiskManager,
    executor: PaperExecutor,
    markets: Arc<DashMap<String, Arc<MarketSlot>>>,
    price_feed: Arc<PriceFeed>,
}

pub struct Orchestrator {
    ctx: PipelineCtx,
    market_loader: Arc<MarketLoader>,
    copy_trade: Arc<CopyTradeDetector>,
    catalog_host: String,
    http: reqwest::Client,
}

impl Orchestrator {
    pub fn new(config: Config, store: Store) -> Self {
        let bus = EventBus::default();
        let position_mgr = Arc::new(PositionManager::new(config.bankroll.starting_bankroll));
        let risk_mgr = RiskManager::new(config.risk.clone());
        let executor = PaperExecutor::new();
        let price_feed = Arc::new(PriceFeed::new(config.catalog.clone(), config.intervals.clone(), bus.clone()));
        let market_loader = Arc::new(MarketLoader::new(config.catalog.clone(), config.loader.clone(), config.intervals.http_timeout_ms));
        let shared_store: SharedStore = Arc::new(std::sync::Mutex::new(store));
        let copy_trade = Arc::new(CopyTradeDetector::new(
            config.catalog.clone(),
            config.copy_trade.clone(),
            config.ladder.levels.first().copied().unwrap_or(0.0),
            config.intervals.http_timeout_ms,
            bus.clone(),
            price_feed.clone(),
            shared_store.clone(),
        ));
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.intervals.http_timeout_ms))
            .build()
            .expect("failed to build orchestrator HTTP client");

        Self {
            ctx: PipelineCtx {
                config: config.clone(),
                bus,
                store: shared_store,
                position_mgr,
                risk_mgr,
                executor,
                markets: Arc::new(DashMap::new()),
                price_feed,
            },
            market_loader,
            copy_trade,
            catalog_host: config.catalog.catalog_host,
            http,
        }
    }

    pub fn event_bus(&self) -> EventBus {
        self.ctx.bus.clone()
    }

    /// Run the loader once and subscribe every surviving market.
    pub async fn bootstrap(&self) -> anyhow::Result<()> {
        let markets = self.market_loader.load_top_markets().await?;
        info!(count = markets.len(), "bootstrap loaded markets");
        for market in markets {
            self.register_market(market)?;
        }
        Ok(())
    }

    fn register_market(&self, market: Market) -> anyhow::Result<()> {
        {
            let store = self.ctx.store.lock().unwrap();
            store.upsert_market(&market)?;
        }
        self.ctx.price_feed.track(&market);
        let state = MarketState::new(market.id.clone());
        self.ctx.markets.insert(market.id.clone(), Arc::new(MarketSlot { market, state: AsyncMutex::new(state) }));
        Ok(())
    }

    /// Spawn every producer and the consumer loops. Returns immediately;
    /// everything runs until `shutdown_tx` fires.
    pub fn start(self: &Arc<Self>, shutdown_tx: &broadcast::Sender<()>) {
        self.ctx.price_feed.start(shutdown_tx);
        self.copy_trade.start(shutdown_tx);
        self.spawn_price_update_consumer(shutdown_tx.subscribe());
        self.spawn_resolution_check(shutdown_tx.subscribe());
        self.spawn_pnl_snapshot(shutdown_tx.subscribe());
        self.spawn_market_refresh(shutdown_tx.subscribe());
    }

    fn spawn_price_update_consumer(&self, mut shutdown: broadcast::Receiver<()>) {
        let ctx = self.ctx.clone();
        let mut rx = ctx.bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = rx.recv() => {
                        match msg {
                            Ok(Event::PriceUpdate { market_id, price_yes, price_no, timestamp, .. }) => {
                                process_price_update(&ctx, &market_id, price_yes, price_no, timestamp).await;
                            }
                            Ok(_) => {}
                            Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "price update consumer lagged"),
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    fn spawn_resolution_check(&self, mut shutdown: broadcast::Receiver<()>) {
        let ctx = self.ctx.clone();
        let catalog_host = self.catalog_host.clone();
        let http = self.http.clone();
        let interval_ms = self.ctx.config.intervals.resolution_check_ms;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            loop {
                tokio::select! {
                    _ = interval.tick() => check_resolutions(&ctx, &http, &catalog_host).await,
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    fn spawn_pnl_snapshot(&self, mut shutdown: broadcast::Receiver<()>) {
        let ctx = self.ctx.clone();
        let interval_ms = self.ctx.config.intervals.pnl_snapshot_ms;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            loop {
                tokio::select! {
                    _ = interval.tick() => snapshot_pnl(&ctx).await,
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    fn spawn_market_refresh(&self, mut shutdown: broadcast::Receiver<()>) {
        let ctx = self.ctx.clone();
        let loader = self.market_loader.clone();
        let interval_ms = self.ctx.config.intervals.market_refresh_ms;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            loop {
                tokio::select! {
                    _ = interval.tick() => refresh_markets(&ctx, &loader).await,
                    _ = shutdown.recv() => break,
                }
            }
        });
    }
}

async fn refresh_markets(ctx: &PipelineCtx, loader: &MarketLoader) {
    let markets = match loader.load_top_markets().await {
        Ok(m) => m,
        Err(e) => {
            debug!("market refresh failed: {e}");
            return;
        }
    };
    let mut fresh = Vec::new();
    for market in markets {
        if ctx.markets.contains_key(&market.id) {
            continue;
        }
        {
            let store = ctx.store.lock().unwrap();
            if let Err(e) = store.upsert_market(&market) {
                warn!("failed to persist refreshed market: {e}");
                continue;
            }
        }
        ctx.price_feed.track(&market);
        let state = MarketState::new(market.id.clone());
        ctx.markets.insert(market.id.clone(), Arc::new(MarketSlot { market: market.clone(), state: AsyncMutex::new(state) }));
        fresh.push(market);
    }
    if !fresh.is_empty() {
        info!(count = fresh.len(), "market refresh surfaced new markets");
        ctx.bus.publish(Event::MarketFiltered { markets: fresh });
    }
}

async fn snapshot_pnl(ctx: &PipelineCtx) {
    let mut positions_value = 0.0;
    let mut unrealized_pnl = 0.0;
    let mut realized_pnl = 0.0;

    for entry in ctx.markets.iter() {
        let market_id = entry.key().clone();
        let slot = entry.value().clone();
        let position = ctx.position_mgr.position_snapshot(&market_id);
        let state = slot.state.lock().await;
        positions_value += position.shares_yes * state.last_price_yes + position.shares_no * state.last_price_no;
        unrealized_pnl += position.unrealized_pnl(state.last_price_yes, state.last_price_no);
        realized_pnl += position.realized_pnl;
    }

    let cash_balance = ctx.position_mgr.cash_balance().await;
    let protected_profits = ctx.position_mgr.protected_profits().await;
    let timestamp = Utc::now();
    let total_value = cash_balance + protected_profits + positions_value;

    {
        let store = ctx.store.lock().unwrap();
        if let Err(e) = store.insert_pnl_snapshot(total_value, cash_balance, positions_value, unrealized_pnl, realized_pnl, timestamp) {
            warn!("failed to persist pnl snapshot: {e}");
        }
    }

    crate::telemetry::pnl::log_snapshot(cash_balance, protected_profits, positions_value, unrealized_pnl, realized_pnl);

    ctx.bus.publish(Event::PortfolioUpdate {
        cash_balance,
        protected_profits,
        unrealized_pnl,
        realized_pnl,
        timestamp,
    });
}

#[derive(Debug, Deserialize)]
struct MarketByIdRecord {
    #[serde(default)]
    closed: bool,
    #[serde(rename = "outcomePrices", default)]
    outcome_prices: Option<String>,
}

async fn check_resolutions(ctx: &PipelineCtx, http: &reqwest::Client, catalog_host: &str) {
    let market_ids: Vec<String> = ctx.markets.iter().filter(|e| ctx.position_mgr.has_position(e.key())).map(|e| e.key().clone()).collect();

    for market_id in market_ids {
        match fetch_resolution(http, catalog_host, &market_id).await {
            Ok(Some(prices)) => settle_market(ctx, &market_id, prices).await,
            Ok(None) => {}
            Err(e) => debug!(market_id, "resolution check failed: {e}"),
        }
    }
}

async fn fetch_resolution(http: &reqwest::Client, catalog_host: &str, market_id: &str) -> anyhow::Result<Option<[f64; 2]>> {
    let url = format!("{catalog_host}/markets/{market_id}");
    let resp = http.get(&url).send().await?;
    if !resp.status().is_success() {
        return Ok(None);
    }
    let record: MarketByIdRecord = resp.json().await?;
    if !record.closed {
        return Ok(None);
    }
    let prices: Vec<f64> = record
        .outcome_prices
        .as_deref()
        .and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
        .map(|v| v.into_iter().filter_map(|s| s.parse().ok()).collect())
        .unwrap_or_default();
    if prices.len() != 2 {
        return Ok(None);
    }
    Ok(Some([prices[0], prices[1]]))
}

async fn settle_market(ctx: &PipelineCtx, market_id: &str, outcome_prices: [f64; 2]) {
    let Some(slot_entry) = ctx.markets.get(market_id) else { return };
    let slot = slot_entry.value().clone();
    drop(slot_entry);

    let winning_side = if outcome_prices[slot.market.yes_index()] >= outcome_prices[1 - slot.market.yes_index()] {
        Side::Yes
    } else {
        Side::No
    };

    let (pnl, cash_credited) = ctx.position_mgr.settle_resolution(market_id, winning_side).await;
    info!(market_id, pnl, cash_credited, "market resolved and settled");

    {
        let store = ctx.store.lock().unwrap();
        let _ = store.remove_position(market_id);
    }

    ctx.position_mgr.remove_resolved(market_id);
    ctx.price_feed.untrack(&slot.market);
    ctx.markets.remove(market_id);
}

fn apply_exit_effects(state: &mut MarketState, effects: &StateEffects) {
    if let Some(v) = effects.set_cooldown_until {
        state.cooldown_until = Some(v);
    }
    if let Some(v) = effects.set_consensus_break_start {
        state.consensus_break_start = v;
    }
    if let Some(v) = effects.set_consensus_break_confirmed {
        state.consensus_break_confirmed = v;
    }
    if let Some(v) = effects.set_moon_bag_active {
        state.moon_bag_active = v;
    }
    if let Some(v) = effects.set_moon_bag_price {
        state.moon_bag_price_at_activation = v;
    }
    if let Some(v) = effects.set_stop_loss_triggered_at {
        state.stop_loss_triggered_at = v;
    }
}

/// Steps 1-9 of the decision pipeline for a single `PriceUpdate`. Dropped
/// (not queued) if this market's lock is already held — the next tick
/// supersedes it.
async fn process_price_update(ctx: &PipelineCtx, market_id: &str, price_yes: f64, price_no: f64, timestamp: DateTime<Utc>) {
    let Some(slot_entry) = ctx.markets.get(market_id) else { return };
    let slot = slot_entry.value().clone();
    drop(slot_entry);

    let Ok(mut state) = slot.state.try_lock() else {
        debug!(market_id, "price update dropped: market locked");
        return;
    };

    let window = chrono::Duration::minutes(ctx.config.regime.volatility_window_minutes as i64);
    state.push_sample(PriceSample { price_yes, timestamp }, window);
    state.last_price_yes = price_yes;
    state.last_price_no = price_no;

    let position = ctx.position_mgr.position_snapshot(market_id);
    let tradeable_bankroll = ctx.position_mgr.tradeable_bankroll().await;
    let decision = pipeline::evaluate_tick(&state, &position, &slot.market, &ctx.config, tradeable_bankroll);

    if decision.regime_transitioned_significantly {
        let from = state.regime;
        ctx.bus.publish(Event::StrategyEvent {
            market_id: market_id.to_string(),
            regime: decision.regime,
            action: "regime_transition".into(),
            details: format!("{from:?} -> {:?}", decision.regime),
            timestamp,
        });
        let store = ctx.store.lock().unwrap();
        let _ = store.insert_strategy_event(
            market_id,
            decision.regime,
            "ORCHESTRATOR",
            "REGIME_TRANSITION",
            price_yes,
            price_no,
            &serde_json::json!({ "from": format!("{from:?}"), "to": format!("{:?}", decision.regime) }),
            timestamp,
        );
    }
    state.regime = decision.regime;

    apply_exit_effects(&mut state, &decision.exit_effects);

    let mut position_closed = false;

    for order in &decision.orders {
        let market_has_position = ctx.position_mgr.has_position(market_id);
        let active_count = ctx.position_mgr.active_position_count();
        let market_exposure = ctx.position_mgr.market_exposure(market_id);

        let approved_size = {
            let book_handle = ctx.position_mgr.book_handle();
            let book = book_handle.read().await;
            match ctx.risk_mgr.check_order(order, &book, market_has_position, active_count, market_exposure) {
                RiskDecision::Approved { size_usdc } => size_usdc,
                RiskDecision::Rejected { reason } => {
                    debug!(market_id, reason, "order rejected by risk gate");
                    continue;
                }
            }
        };

        let exit_shares = if order.is_exit {
            let held = match order.side {
                Side::Yes => position.shares_yes,
                Side::No => position.shares_no,
            };
            held * order.exit_fraction
        } else {
            0.0
        };

        let mut intent = order.clone();
        if !order.is_exit {
            intent.size_usdc = approved_size;
        }

        let Some(trade) = ctx.executor.simulate(&intent, exit_shares) else { continue };
        if trade.status != OrderStatus::Filled {
            continue;
        }

        ctx.position_mgr.record_order_timestamp(market_id, trade.timestamp).await;

        if order.is_exit {
            let (_, cost_basis_removed) = ctx.position_mgr.record_sell(market_id, order.side, trade.size_usdc, trade.shares).await;
            match order.side {
                Side::Yes => state.exposure_yes = (state.exposure_yes - cost_basis_removed).max(0.0),
                Side::No => state.exposure_no = (state.exposure_no - cost_basis_removed).max(0.0),
            }
        } else {
            ctx.position_mgr.record_buy(market_id, order.side, trade.size_usdc, trade.shares).await;
            state.active_trade_side.get_or_insert(order.side);
            match order.strategy {
                StrategyTag::Ladder => {
                    if let Some(rung) = order.ladder_rung {
                        state.ladder_filled.insert(rung);
                    }
                }
                StrategyTag::Dca => state.dca_count += 1,
                StrategyTag::TailInsurance => state.tail_active = true,
                _ => {}
            }
            match order.side {
                Side::Yes => state.exposure_yes += trade.size_usdc,
                Side::No => state.exposure_no += trade.size_usdc,
            }
        }

        {
            let store = ctx.store.lock().unwrap();
            let _ = store.insert_trade(&trade);
        }
        ctx.bus.publish(Event::ExecutionResult(trade));

        if order.is_exit {
            let updated = ctx.position_mgr.position_snapshot(market_id);
            if updated.is_flat() {
                position_closed = true;
            }
        }
    }

    state.last_processed = timestamp;

    {
        let store = ctx.store.lock().unwrap();
        let _ = store.upsert_market_state(&state);
        let position = ctx.position_mgr.position_snapshot(market_id);
        let _ = store.upsert_position(&position);
    }

    if position_closed {
        ctx.price_feed.untrack(&slot.market);
        drop(state);
        ctx.markets.remove(market_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::market::Side;
    use crate::store::Store;

    fn test_market(id: &str) -> Market {
        Market {
            id: id.into(),
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

    fn test_ctx() -> PipelineCtx {
        let config = Config::default();
        let bus = EventBus::default();
        let store = Store::open(":memory:").unwrap();
        PipelineCtx {
            position_mgr: Arc::new(PositionManager::new(config.bankroll.starting_bankroll)),
            risk_mgr: RiskManager::new(config.risk.clone()),
            executor: PaperExecutor::new(),
            markets: Arc::new(DashMap::new()),
            price_feed: Arc::new(PriceFeed::new(config.catalog.clone(), config.intervals.clone(), bus.clone())),
            config,
            bus,
            store: Arc::new(std::sync::Mutex::new(store)),
        }
    }

    fn insert_market(ctx: &PipelineCtx, market: Market) {
        let state = MarketState::new(market.id.clone());
        ctx.markets.insert(market.id.clone(), Arc::new(MarketSlot { market, state: AsyncMutex::new(state) }));
    }

    #[tokio::test]
    async fn ladder_ignition_fills_first_rung_and_locks_side() {
        let ctx = test_ctx();
        insert_market(&ctx, test_market("m1"));

        process_price_update(&ctx, "m1", 0.65, 0.35, Utc::now()).await;

        assert!(ctx.position_mgr.has_position("m1"));
        let position = ctx.position_mgr.position_snapshot("m1");
        assert!((position.cost_basis_yes - 2.0).abs() < 1e-6);

        let slot = ctx.markets.get("m1").unwrap().value().clone();
        let state = slot.state.lock().await;
        assert_eq!(state.active_trade_side, Some(Side::Yes));
        assert!(state.ladder_filled.contains(&0));
    }

    #[tokio::test]
    async fn gap_through_fills_both_rungs_with_exact_sizing() {
        let ctx = test_ctx();
        insert_market(&ctx, test_market("m1"));

        process_price_update(&ctx, "m1", 0.75, 0.25, Utc::now()).await;

        let position = ctx.position_mgr.position_snapshot("m1");
        assert!((position.cost_basis_yes - 5.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn side_lock_prevents_opposite_side_entry_after_ignition() {
        let ctx = test_ctx();
        insert_market(&ctx, test_market("m1"));

        process_price_update(&ctx, "m1", 0.65, 0.35, Utc::now()).await;
        process_price_update(&ctx, "m1", 0.35, 0.65, Utc::now()).await;

        let position = ctx.position_mgr.position_snapshot("m1");
        assert!((position.cost_basis_no - 0.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn profit_take_exits_partial_position_into_moon_bag() {
        let ctx = test_ctx();
        insert_market(&ctx, test_market("m1"));
        ctx.position_mgr.record_buy("m1", Side::Yes, 70.0, 100.0).await;

        {
            let slot = ctx.markets.get("m1").unwrap().value().clone();
            let mut state = slot.state.lock().await;
            state.active_trade_side = Some(Side::Yes);
            state.ladder_filled.insert(0);
            state.exposure_yes = 70.0;
        }

        process_price_update(&ctx, "m1", 0.82, 0.18, Utc::now()).await;

        let position = ctx.position_mgr.position_snapshot("m1");
        assert!((position.shares_yes - 25.0).abs() < 1e-6);
        assert!((position.realized_pnl - 9.0).abs() < 1e-6);

        let slot = ctx.markets.get("m1").unwrap().value().clone();
        let state = slot.state.lock().await;
        assert!(state.moon_bag_active);
        // 70.0 cost basis minus the 52.50 removed by the partial sell.
        assert!((state.exposure_yes - 17.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn resolution_settles_position_and_removes_market() {
        let ctx = test_ctx();
        let market = test_market("m1");
        insert_market(&ctx, market.clone());
        ctx.position_mgr.record_buy("m1", Side::Yes, 30.0, 50.0).await;

        settle_market(&ctx, "m1", [0.0, 1.0]).await;

        assert!(!ctx.position_mgr.has_position("m1"));
        assert!(ctx.markets.get("m1").is_none());
    }
}
