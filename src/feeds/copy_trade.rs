//! Copy-trade detector: polls tracked wallets' recent activity, bands each new
//! buy by current price, and promotes watched rows into range as price moves.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::{CatalogConfig, CopyTradeConfig};
use crate::events::{Event, EventBus};
use crate::feeds::price_feed::PriceFeed;
use crate::models::signal::{classify_band, CopySignal, TrackedMarket, TrackedStatus};
use crate::store::Store;

#[derive(Debug, Deserialize)]
struct ActivityRecord {
    #[serde(rename = "type")]
    kind: String,
    side: Option<String>,
    asset: Option<String>,
    price: Option<f64>,
    #[serde(rename = "conditionId")]
    condition_id: Option<String>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    outcome: Option<String>,
    #[serde(rename = "outcomeIndex", default)]
    outcome_index: Option<usize>,
    #[serde(default)]
    name: Option<String>,
    timestamp: Option<i64>,
}

pub struct CopyTradeDetector {
    data_host: String,
    http: reqwest::Client,
    config: CopyTradeConfig,
    /// Lower bound of the STANDARD band — tracks `ladder.levels[0]` rather
    /// than an independent tunable, per the config surface.
    standard_min_price: f64,
    bus: EventBus,
    price_feed: Arc<PriceFeed>,
    store: Arc<std::sync::Mutex<Store>>,
    last_seen: DashMap<String, DateTime<Utc>>,
    tracked: DashMap<String, TrackedMarket>,
}

impl CopyTradeDetector {
    pub fn new(
        catalog: CatalogConfig,
        config: CopyTradeConfig,
        standard_min_price: f64,
        http_timeout_ms: u64,
        bus: EventBus,
        price_feed: Arc<PriceFeed>,
        store: Arc<std::sync::Mutex<Store>>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(http_timeout_ms))
            .build()
            .expect("failed to build copy trade HTTP client");
        Self {
            data_host: catalog.data_host,
            http,
            config,
            standard_min_price,
            bus,
            price_feed,
            store,
            last_seen: DashMap::new(),
            tracked: DashMap::new(),
        }
    }

    pub fn start(self: &Arc<Self>, shutdown_tx: &broadcast::Sender<()>) {
        if !self.config.enabled || self.config.tracked_wallets.is_empty() {
            return;
        }
        let this = self.clone();
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(this.config.poll_interval_seconds as u64));
            loop {
                tokio::select! {
                    _ = interval.tick() => this.poll_once().await,
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    async fn poll_once(&self) {
        for wallet in &self.config.tracked_wallets {
            if let Err(e) = self.poll_wallet(wallet).await {
                debug!(wallet, "copy trade poll failed: {e}");
            }
        }
        self.reprice_watching().await;
    }

    async fn poll_wallet(&self, wallet: &str) -> anyhow::Result<()> {
        let since = self.last_seen.get(wallet).map(|t| *t).unwrap_or_else(|| Utc::now() - chrono::Duration::hours(24));
        let start_ts = since.timestamp();
        let url = format!("{}/activity?user={}&limit=50&startTs={}", self.data_host, wallet, start_ts);
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Ok(());
        }
        let records: Vec<ActivityRecord> = resp.json().await.unwrap_or_default();

        let mut newest = since;
        for rec in records.into_iter().filter(|r| r.kind == "TRADE" && r.side.as_deref() == Some("BUY")) {
            let Some(ts) = rec.timestamp else { continue };
            let Some(ts_utc) = Utc.timestamp_opt(ts, 0).single() else { continue };
            if ts_utc <= since {
                continue;
            }
            newest = newest.max(ts_utc);

            let (Some(token_id), Some(condition_id)) = (rec.asset.clone(), rec.condition_id.clone()) else { continue };
            let tracked_price = rec.price.unwrap_or(0.0);
            // No live book yields no classifiable price, not a fallback to the
            // trade's own recorded price — the row stays WATCHING until a book
            // appears, matching `reprice_watching`.
            let live_price = self.price_feed.current_price(&token_id);
            let current_price = live_price.unwrap_or(tracked_price);

            let lottery_max = if self.config.lottery_enabled { self.config.lottery_max_price } else { 0.0 };
            let band = live_price
                .and_then(|p| classify_band(p, self.standard_min_price, self.config.standard_max_price, lottery_max));

            let mut row = TrackedMarket {
                condition_id: condition_id.clone(),
                slug: rec.slug.clone().unwrap_or_default(),
                token_id: Some(token_id.clone()),
                outcome_index: rec.outcome_index,
                outcome: rec.outcome.clone().unwrap_or_default(),
                title: rec.title.clone().unwrap_or_default(),
                trader_name: rec.name.clone().unwrap_or_else(|| wallet.to_string()),
                trader_wallet: wallet.to_string(),
                tracked_price,
                current_price,
                status: TrackedStatus::Watching,
                signal_time: ts_utc,
                entered_range_at: None,
                executed_at: None,
            };

            if let Some(strategy_type) = band {
                row.promote_to_in_range(current_price);
                self.emit_signal(&row, strategy_type, ts_utc);
            }

            self.persist(&row);
            self.tracked.insert(condition_id, row);
        }

        self.last_seen.insert(wallet.to_string(), newest);
        Ok(())
    }

    /// Re-price rows still in WATCHING and promote any that entered a band.
    async fn reprice_watching(&self) {
        let watching: Vec<String> = self
            .tracked
            .iter()
            .filter(|e| e.value().status == TrackedStatus::Watching)
            .map(|e| e.key().clone())
            .collect();

        for condition_id in watching {
            let Some(mut entry) = self.tracked.get_mut(&condition_id) else { continue };
            let Some(token_id) = entry.token_id.clone() else { continue };
            let Some(price) = self.price_feed.current_price(&token_id) else { continue };

            let lottery_max = if self.config.lottery_enabled { self.config.lottery_max_price } else { 0.0 };
            let Some(strategy_type) = classify_band(price, self.standard_min_price, self.config.standard_max_price, lottery_max) else {
                entry.current_price = price;
                continue;
            };

            entry.promote_to_in_range(price);
            self.emit_signal(&entry, strategy_type, Utc::now());
            self.persist(&entry);
        }
    }

    fn emit_signal(&self, row: &TrackedMarket, strategy_type: crate::models::signal::CopyStrategyType, timestamp: DateTime<Utc>) {
        self.bus.publish(Event::CopySignal(CopySignal {
            trader: row.trader_wallet.clone(),
            market_id: row.condition_id.clone(),
            market_slug: row.slug.clone(),
            token_id: row.token_id.clone().unwrap_or_default(),
            outcome_index: row.outcome_index.unwrap_or(0),
            outcome_label: row.outcome.clone(),
            price: row.current_price,
            timestamp,
            strategy_type,
        }));
    }

    fn persist(&self, row: &TrackedMarket) {
        let store = self.store.lock().unwrap();
        if let Err(e) = store.upsert_tracked_market(row) {
            warn!("failed to persist tracked market row: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_record_parses_minimal_trade_payload() {
        let json = r#"{"type":"TRADE","side":"BUY","asset":"tok1","price":0.65,"conditionId":"c1","timestamp":1700000000}"#;
        let rec: ActivityRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.kind, "TRADE");
        assert_eq!(rec.side.as_deref(), Some("BUY"));
        assert_eq!(rec.asset.as_deref(), Some("tok1"));
    }
}
