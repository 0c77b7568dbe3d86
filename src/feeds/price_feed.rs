use std::sync::Arc;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::config::{CatalogConfig, IntervalConfig};
use crate::events::{Event, EventBus, WsStatus};
use crate::models::market::{Market, OrderBook, Side};

/// Live price feed: a WebSocket subscriber with HTTP snapshot-poll fallback.
/// Both paths normalize into YES/NO polarity (the upstream book is keyed by
/// raw token id, which can be either outcome) and publish `Event::PriceUpdate`.
pub struct PriceFeed {
    catalog: CatalogConfig,
    intervals: IntervalConfig,
    http: reqwest::Client,
    bus: EventBus,
    books: Arc<DashMap<String, OrderBook>>,
    /// token_id -> (market_id, side)
    token_index: Arc<DashMap<String, (String, Side)>>,
}

/// Exponential backoff with a 60s cap, doubling per attempt.
fn reconnect_delay_ms(base_delay_ms: u64, attempt: u32) -> u64 {
    base_delay_ms.saturating_mul(1u64 << attempt.min(10)).min(60_000)
}

#[derive(Debug, Deserialize)]
struct BookResponse {
    bids: Option<Vec<BookLevel>>,
    asks: Option<Vec<BookLevel>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BookLevel {
    price: String,
    size: String,
}

#[derive(Debug, Deserialize)]
struct WsBookUpdate {
    asset_id: Option<String>,
    bids: Option<Vec<BookLevel>>,
    asks: Option<Vec<BookLevel>>,
}

impl PriceFeed {
    pub fn new(catalog: CatalogConfig, intervals: IntervalConfig, bus: EventBus) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(intervals.http_timeout_ms))
            .pool_max_idle_per_host(4)
            .build()
            .expect("failed to build price feed HTTP client");

        Self {
            catalog,
            intervals,
            http,
            bus,
            books: Arc::new(DashMap::new()),
            token_index: Arc::new(DashMap::new()),
        }
    }

    /// Register a market's two tokens for subscription/polling.
    pub fn track(&self, market: &Market) {
        self.token_index.insert(market.yes_token_id().to_string(), (market.id.clone(), Side::Yes));
        self.token_index.insert(market.no_token_id().to_string(), (market.id.clone(), Side::No));
    }

    /// Current mid price for a token, if we have a book for it. Used by the
    /// copy-trade detector, which has no book of its own.
    pub fn current_price(&self, token_id: &str) -> Option<f64> {
        self.books.get(token_id).and_then(|b| b.midpoint())
    }

    pub fn untrack(&self, market: &Market) {
        self.token_index.remove(market.yes_token_id());
        self.token_index.remove(market.no_token_id());
        self.books.remove(market.yes_token_id());
        self.books.remove(market.no_token_id());
    }

    pub fn start(&self, shutdown_tx: &broadcast::Sender<()>) {
        self.spawn_ws(shutdown_tx.subscribe());
        self.spawn_http_poll(shutdown_tx.subscribe());
    }

    fn spawn_ws(&self, mut shutdown: broadcast::Receiver<()>) {
        let ws_host = self.catalog.ws_host.clone();
        let books = self.books.clone();
        let token_index = self.token_index.clone();
        let bus = self.bus.clone();
        let max_attempts = self.intervals.ws_reconnect_max_attempts;
        let base_delay_ms = self.intervals.ws_reconnect_delay_ms;

        tokio::spawn(async move {
            let mut attempt: u32 = 0;

            loop {
                if max_attempts > 0 && attempt >= max_attempts {
                    error!("price feed WS reconnect attempts exhausted, giving up on WS");
                    bus.publish(Event::WsStatus(WsStatus::ReconnectFailedPermanently));
                    return;
                }

                info!(url = %ws_host, "connecting to price feed WS");
                let conn = tokio::select! {
                    result = connect_async(&ws_host) => result,
                    _ = shutdown.recv() => return,
                };

                match conn {
                    Ok((ws_stream, _)) => {
                        info!("price feed WS connected");
                        attempt = 0;
                        bus.publish(Event::WsStatus(WsStatus::Connected));

                        let (mut write, mut read) = ws_stream.split();

                        let tokens: Vec<String> = token_index.iter().map(|e| e.key().clone()).collect();
                        if !tokens.is_empty() {
                            let sub = serde_json::json!({ "type": "subscribe", "assets_ids": tokens });
                            if let Ok(text) = serde_json::to_string(&sub) {
                                let _ = write.send(tokio_tungstenite::tungstenite::Message::Text(text)).await;
                            }
                        }

                        let mut ping_interval = tokio::time::interval(std::time::Duration::from_secs(30));
                        loop {
                            let msg = tokio::select! {
                                msg = read.next() => msg,
                                _ = ping_interval.tick() => {
                                    if write.send(tokio_tungstenite::tungstenite::Message::Ping(Vec::new())).await.is_err() {
                                        break;
                                    }
                                    continue;
                                }
                                _ = shutdown.recv() => return,
                            };

                            match msg {
                                Some(Ok(tokio_tungstenite::tungstenite::Message::Text(text))) => {
                                    Self::handle_ws_message(&text, &books, &token_index, &bus);
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    warn!("price feed WS error: {e}");
                                    break;
                                }
                                None => {
                                    warn!("price feed WS stream ended");
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("price feed WS connection failed: {e}");
                    }
                }

                bus.publish(Event::WsStatus(WsStatus::Disconnected));
                attempt += 1;
                let delay = reconnect_delay_ms(base_delay_ms, attempt);
                warn!(delay_ms = delay, attempt, "price feed WS reconnecting");
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }
        });
    }

    fn spawn_http_poll(&self, mut shutdown: broadcast::Receiver<()>) {
        let http = self.http.clone();
        let clob_host = self.catalog.clob_host.clone();
        let books = self.books.clone();
        let token_index = self.token_index.clone();
        let bus = self.bus.clone();
        let poll_ms = self.intervals.live_price_poll_ms;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(poll_ms));

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let tokens: Vec<String> = token_index.iter().map(|e| e.key().clone()).collect();
                        for token_id in tokens {
                            match Self::fetch_book(&http, &clob_host, &token_id).await {
                                Ok(Some(book)) => {
                                    books.insert(token_id.clone(), book);
                                    Self::publish_pair(&token_id, &books, &token_index, &bus);
                                }
                                Ok(None) => debug!(token_id = %token_id, "no book (market closed)"),
                                Err(e) => debug!(token_id = %token_id, "book poll failed: {e}"),
                            }
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    async fn fetch_book(http: &reqwest::Client, clob_host: &str, token_id: &str) -> anyhow::Result<Option<OrderBook>> {
        let url = format!("{clob_host}/book?token_id={token_id}");
        let resp = http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let parsed: BookResponse = resp.json().await?;
        if parsed.error.is_some() {
            return Ok(None);
        }

        let mut book = OrderBook::new(token_id.to_string());
        for level in parsed.bids.unwrap_or_default() {
            if let (Ok(price), Ok(size)) = (level.price.parse(), level.size.parse()) {
                book.set_bid(price, size);
            }
        }
        for level in parsed.asks.unwrap_or_default() {
            if let (Ok(price), Ok(size)) = (level.price.parse(), level.size.parse()) {
                book.set_ask(price, size);
            }
        }
        Ok(Some(book))
    }

    fn handle_ws_message(
        text: &str,
        books: &Arc<DashMap<String, OrderBook>>,
        token_index: &Arc<DashMap<String, (String, Side)>>,
        bus: &EventBus,
    ) {
        let updates: Vec<WsBookUpdate> = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => match serde_json::from_str::<WsBookUpdate>(text) {
                Ok(single) => vec![single],
                Err(_) => return,
            },
        };

        for update in updates {
            let Some(asset_id) = update.asset_id else { continue };
            let mut book = books.entry(asset_id.clone()).or_insert_with(|| OrderBook::new(asset_id.clone()));
            for level in update.bids.unwrap_or_default() {
                if let (Ok(price), Ok(size)) = (level.price.parse(), level.size.parse()) {
                    book.set_bid(price, size);
                }
            }
            for level in update.asks.unwrap_or_default() {
                if let (Ok(price), Ok(size)) = (level.price.parse(), level.size.parse()) {
                    book.set_ask(price, size);
                }
            }
            drop(book);
            Self::publish_pair(&asset_id, books, token_index, bus);
        }
    }

    /// A price update for one token implies its complement's price too
    /// (priceYes + priceNo == 1 at the midpoint), so every book tick
    /// publishes the full YES/NO pair for the market it belongs to.
    fn publish_pair(
        token_id: &str,
        books: &Arc<DashMap<String, OrderBook>>,
        token_index: &Arc<DashMap<String, (String, Side)>>,
        bus: &EventBus,
    ) {
        let Some(entry) = token_index.get(token_id) else { return };
        let (market_id, side) = entry.value().clone();
        drop(entry);

        let Some(book) = books.get(token_id) else { return };
        let Some(mid) = book.midpoint() else { return };
        drop(book);

        let (price_yes, price_no) = match side {
            Side::Yes => (mid, 1.0 - mid),
            Side::No => (1.0 - mid, mid),
        };

        bus.publish(Event::PriceUpdate {
            market_id,
            token_id: token_id.to_string(),
            price_yes,
            price_no,
            timestamp: chrono::Utc::now(),
        });
    }
}
