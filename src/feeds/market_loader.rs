//! Paginated catalog discovery: fetch, filter, dedup mutually-exclusive event
//! groups, score, and truncate to the top N markets worth tracking.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{CatalogConfig, LoaderConfig};
use crate::models::market::Market;

/// Raw catalog record. Gamma API encodes `outcomes`/`clobTokenIds` as
/// JSON-string arrays rather than native JSON arrays — same quirk the
/// upstream feed parses, handled here the same way.
#[derive(Debug, Deserialize)]
struct CatalogRecord {
    id: String,
    question: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(rename = "endDate")]
    end_date: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "gameStartTime")]
    game_start_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(rename = "volume24hr", default)]
    volume_24h: f64,
    #[serde(default)]
    liquidity: f64,
    #[serde(default)]
    outcomes: Option<String>,
    #[serde(rename = "clobTokenIds", default)]
    clob_token_ids: Option<String>,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    closed: bool,
    #[serde(rename = "enableOrderBook", default)]
    enable_order_book: bool,
    #[serde(rename = "bestBid", default)]
    best_bid: Option<f64>,
    #[serde(rename = "bestAsk", default)]
    best_ask: Option<f64>,
    #[serde(rename = "eventId", default)]
    event_id: Option<String>,
}

/// A candidate market plus the extra catalog-only signal (spread, last
/// traded mid) needed for scoring, which `Market` itself doesn't carry.
struct Candidate {
    market: Market,
    mid_price: Option<f64>,
    spread: Option<f64>,
}

/// Fetches the catalog, applies the static filter and event-group dedup, and
/// returns the scored top-N set. Stateless aside from its HTTP client — the
/// orchestrator owns persistence and subscription.
pub struct MarketLoader {
    catalog: CatalogConfig,
    config: LoaderConfig,
    http: reqwest::Client,
}

impl MarketLoader {
    pub fn new(catalog: CatalogConfig, config: LoaderConfig, http_timeout_ms: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(http_timeout_ms))
            .build()
            .expect("failed to build market loader HTTP client");
        Self { catalog, config, http }
    }

    /// Fetch, filter, dedup, score, and truncate to `topNMarkets`.
    pub async fn load_top_markets(&self) -> anyhow::Result<Vec<Market>> {
        let raw = self.fetch_all_pages().await?;
        debug!(fetched = raw.len(), "market loader fetched catalog page set");

        let candidates: Vec<Candidate> = raw.into_iter().filter_map(|record| self.to_candidate(record)).collect();
        let deduped = dedup_event_groups(candidates);

        let mut scored: Vec<(f64, Market)> = deduped.into_iter().map(|c| (score_market(&c.market), c.market)).collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.config.top_n_markets);

        Ok(scored.into_iter().map(|(_, m)| m).collect())
    }

    async fn fetch_all_pages(&self) -> anyhow::Result<Vec<CatalogRecord>> {
        let mut out = Vec::new();
        let mut offset = 0usize;

        loop {
            if offset >= self.config.safety_cap {
                warn!(offset, "market loader hit safety cap, stopping pagination");
                break;
            }

            let url = format!(
                "{}/markets?closed=false&active=true&enableOrderBook=true&limit={}&offset={}&order=volume24hr&ascending=false",
                self.catalog.catalog_host, self.config.page_size, offset
            );
            let resp = self.http.get(&url).send().await?;
            if !resp.status().is_success() {
                break;
            }
            let page: Vec<CatalogRecord> = resp.json().await.unwrap_or_default();
            let fetched = page.len();
            out.extend(page);

            if fetched < self.config.page_size {
                break;
            }
            offset += self.config.page_size;
        }

        Ok(out)
    }

    fn to_candidate(&self, record: CatalogRecord) -> Option<Candidate> {
        if !record.enable_order_book || !record.active || record.closed {
            return None;
        }
        let now = chrono::Utc::now();
        if record.end_date <= now {
            return None;
        }
        let max_window = chrono::Duration::hours(self.config.max_time_to_resolution_hours as i64);
        if record.end_date - now > max_window {
            return None;
        }

        let category = record.category.clone().unwrap_or_else(|| "other".into());
        if !self.config.allowed_categories.is_empty() && !self.config.allowed_categories.iter().any(|c| c.eq_ignore_ascii_case(&category)) {
            return None;
        }
        if self.config.excluded_categories.iter().any(|c| c.eq_ignore_ascii_case(&category)) {
            return None;
        }
        let haystack = format!("{} {}", record.question, category).to_lowercase();
        if self.config.sports_keywords.iter().any(|kw| haystack.contains(&kw.to_lowercase())) {
            return None;
        }

        if record.volume_24h < self.config.min_volume_24h || record.liquidity < self.config.min_liquidity {
            return None;
        }

        let outcomes: Vec<String> = record.outcomes.as_deref().and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default();
        let token_ids: Vec<String> = record.clob_token_ids.as_deref().and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default();
        if outcomes.len() != 2 || token_ids.len() != 2 {
            return None;
        }

        let spread = match (record.best_bid, record.best_ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        };
        let mid_price = match (record.best_bid, record.best_ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            (Some(bid), None) => Some(bid),
            (None, Some(ask)) => Some(ask),
            _ => None,
        };

        let market = Market {
            id: record.id,
            question: record.question,
            category,
            outcomes: [outcomes[0].clone(), outcomes[1].clone()],
            token_ids: [token_ids[0].clone(), token_ids[1].clone()],
            end_time: record.end_date,
            game_start_time: record.game_start_time,
            volume_24h: record.volume_24h,
            liquidity: record.liquidity,
            active: record.active,
            closed: record.closed,
            event_group_id: record.event_id,
        };

        Some(Candidate { market, mid_price, spread })
    }
}

/// Weighted score used to pick one representative per mutually-exclusive
/// event group: volume, tight spread, liquidity, and proximity of price to
/// the ~0.775 "expected value" center where ladder markets trade best.
fn group_representative_score(candidate: &Candidate) -> f64 {
    let tightness = match candidate.spread {
        Some(s) => 1.0 / (1.0 + s.max(0.0)),
        None => 0.0,
    };
    let proximity = match candidate.mid_price {
        Some(p) => 1.0 - (p - 0.775).abs(),
        None => 0.0,
    };
    candidate.market.volume_24h.ln_1p() * 0.35
        + candidate.market.liquidity.ln_1p() * 0.25
        + tightness * 0.2
        + proximity * 0.2
}

fn dedup_event_groups(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut groups: HashMap<String, Vec<Candidate>> = HashMap::new();
    let mut standalone = Vec::new();

    for c in candidates {
        match &c.market.event_group_id {
            Some(gid) => groups.entry(gid.clone()).or_default().push(c),
            None => standalone.push(c),
        }
    }

    let mut out = standalone;
    for (_, members) in groups {
        if let Some(winner) = members
            .into_iter()
            .max_by(|a, b| group_representative_score(a).partial_cmp(&group_representative_score(b)).unwrap_or(std::cmp::Ordering::Equal))
        {
            out.push(winner);
        }
    }
    out
}

/// Final ranking score: time-to-resolution bucket, volume, liquidity, and
/// volume/liquidity turnover.
fn score_market(market: &Market) -> f64 {
    let ttr_hours = market.time_to_resolution().num_hours().max(0) as f64;
    let bucket_score = 1.0 / (1.0 + ttr_hours / 24.0);
    let turnover = if market.liquidity > 0.0 { market.volume_24h / market.liquidity } else { 0.0 };
    bucket_score * 0.3 + market.volume_24h.ln_1p() * 0.3 + market.liquidity.ln_1p() * 0.25 + turnover.ln_1p() * 0.15
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn market(id: &str, volume: f64, liquidity: f64, hours: i64) -> Market {
        Market {
            id: id.into(),
            question: "q".into(),
            category: "politics".into(),
            outcomes: ["No".into(), "Yes".into()],
            token_ids: ["t-no".into(), "t-yes".into()],
            end_time: Utc::now() + chrono::Duration::hours(hours),
            game_start_time: None,
            volume_24h: volume,
            liquidity,
            active: true,
            closed: false,
            event_group_id: None,
        }
    }

    fn candidate(m: Market, mid: Option<f64>, spread: Option<f64>) -> Candidate {
        Candidate { market: m, mid_price: mid, spread }
    }

    #[test]
    fn dedup_keeps_higher_scoring_member_per_event_group() {
        let mut a = market("a", 1000.0, 500.0, 48);
        let mut b = market("b", 2000.0, 500.0, 48);
        a.event_group_id = Some("g1".into());
        b.event_group_id = Some("g1".into());
        let out = dedup_event_groups(vec![candidate(a, Some(0.775), Some(0.01)), candidate(b, Some(0.775), Some(0.01))]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].market.id, "b");
    }

    #[test]
    fn standalone_markets_survive_dedup_untouched() {
        let out = dedup_event_groups(vec![
            candidate(market("a", 10.0, 10.0, 24), None, None),
            candidate(market("b", 20.0, 20.0, 24), None, None),
        ]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn higher_volume_and_tighter_resolution_scores_higher() {
        let near = market("near", 10_000.0, 5_000.0, 12);
        let far = market("far", 10_000.0, 5_000.0, 24 * 30);
        assert!(score_market(&near) > score_market(&far));
    }
}
