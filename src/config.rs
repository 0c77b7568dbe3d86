use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Paper,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mode: Mode,
    pub catalog: CatalogConfig,
    pub bankroll: BankrollConfig,
    pub loader: LoaderConfig,
    pub regime: RegimeConfig,
    pub ladder: LadderConfig,
    pub dca: DcaConfig,
    pub exit: ExitConfig,
    pub tail: TailConfig,
    pub risk: RiskConfig,
    pub copy_trade: CopyTradeConfig,
    pub intervals: IntervalConfig,
    pub store_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub catalog_host: String,
    pub clob_host: String,
    pub data_host: String,
    pub ws_host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankrollConfig {
    pub starting_bankroll: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub top_n_markets: usize,
    pub page_size: usize,
    pub safety_cap: usize,
    pub allowed_categories: Vec<String>,
    pub excluded_categories: Vec<String>,
    pub sports_keywords: Vec<String>,
    pub min_volume_24h: f64,
    pub min_liquidity: f64,
    pub max_time_to_resolution_hours: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    pub volatility_window_minutes: u32,
    pub volatility_threshold: f64,
    pub late_resolution_hours: u32,
    pub late_compressed_price_threshold: f64,
    pub early_uncertain_price_min: f64,
    pub early_uncertain_price_max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LadderConfig {
    pub levels: Vec<f64>,
    pub weights: Vec<f64>,
    pub max_buy_price: f64,
    pub resolution_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcaConfig {
    pub max_dca_buys: u32,
    pub dca_size_pct: f64,
    pub min_drawdown_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    pub take_profit_pct: f64,
    pub partial_exit_fraction: f64,
    pub moon_bag_drop_pct: f64,
    pub consensus_break_confirmation_seconds: u32,
    pub pre_game_cooldown_seconds: u32,
    /// Part of the closed config surface; accepted and validated but not yet
    /// consulted by any exit check (no exit-precedence rule in this
    /// implementation gates on time-in-position) — same carve-out as
    /// `mode = LIVE`.
    pub min_hold_time_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailConfig {
    pub enabled: bool,
    pub price_threshold: f64,
    pub exposure_pct: f64,
    pub min_favored_exposure: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub max_active_positions: usize,
    pub max_market_exposure_pct: f64,
    pub max_single_order_pct: f64,
    pub rate_limit_max_orders: usize,
    pub rate_limit_window_seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyTradeConfig {
    pub enabled: bool,
    pub tracked_wallets: Vec<String>,
    // The STANDARD band's lower bound is the ladder's first level, not an
    // independent field — see `CopyTradeDetector`'s callers.
    pub standard_max_price: f64,
    pub lottery_enabled: bool,
    pub lottery_max_price: f64,
    pub poll_interval_seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalConfig {
    pub live_price_poll_ms: u64,
    pub pnl_snapshot_ms: u64,
    pub market_refresh_ms: u64,
    pub resolution_check_ms: u64,
    pub ws_reconnect_delay_ms: u64,
    pub ws_reconnect_max_attempts: u32,
    pub http_timeout_ms: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            catalog_host: "https://gamma-api.polymarket.com".into(),
            clob_host: "https://clob.polymarket.com".into(),
            data_host: "https://data-api.polymarket.com".into(),
            ws_host: "wss://ws-subscriptions-clob.polymarket.com/ws/market".into(),
        }
    }
}

impl Default for BankrollConfig {
    fn default() -> Self {
        Self {
            starting_bankroll: 1000.0,
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            top_n_markets: 50,
            page_size: 500,
            safety_cap: 5000,
            allowed_categories: Vec::new(),
            excluded_categories: Vec::new(),
            sports_keywords: vec!["nfl".into(), "nba".into(), "mlb".into(), "nhl".into()],
            min_volume_24h: 5_000.0,
            min_liquidity: 1_000.0,
            max_time_to_resolution_hours: 24 * 14,
        }
    }
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            volatility_window_minutes: 15,
            volatility_threshold: 0.05,
            late_resolution_hours: 2,
            late_compressed_price_threshold: 0.90,
            early_uncertain_price_min: 0.45,
            early_uncertain_price_max: 0.55,
        }
    }
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            levels: vec![0.60, 0.70, 0.80, 0.90, 0.95],
            weights: vec![0.10, 0.15, 0.25, 0.25, 0.25],
            max_buy_price: 0.92,
            resolution_threshold: 0.95,
        }
    }
}

impl Default for DcaConfig {
    fn default() -> Self {
        Self {
            max_dca_buys: 2,
            dca_size_pct: 0.15,
            min_drawdown_pct: 0.05,
        }
    }
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            take_profit_pct: 0.14,
            partial_exit_fraction: 0.75,
            moon_bag_drop_pct: 0.06,
            consensus_break_confirmation_seconds: 60,
            pre_game_cooldown_seconds: 900,
            min_hold_time_minutes: 0,
        }
    }
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            price_threshold: 0.05,
            exposure_pct: 0.005,
            min_favored_exposure: 2.0,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_active_positions: 30,
            max_market_exposure_pct: 0.02,
            max_single_order_pct: 0.0025,
            rate_limit_max_orders: 5,
            rate_limit_window_seconds: 60,
        }
    }
}

impl Default for CopyTradeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tracked_wallets: Vec::new(),
            standard_max_price: 0.90,
            lottery_enabled: true,
            lottery_max_price: 0.10,
            poll_interval_seconds: 2,
        }
    }
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            live_price_poll_ms: 2_000,
            pnl_snapshot_ms: 30_000,
            market_refresh_ms: 300_000,
            resolution_check_ms: 120_000,
            ws_reconnect_delay_ms: 1_000,
            ws_reconnect_max_attempts: 10,
            http_timeout_ms: 5_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Paper,
            catalog: CatalogConfig::default(),
            bankroll: BankrollConfig::default(),
            loader: LoaderConfig::default(),
            regime: RegimeConfig::default(),
            ladder: LadderConfig::default(),
            dca: DcaConfig::default(),
            exit: ExitConfig::default(),
            tail: TailConfig::default(),
            risk: RiskConfig::default(),
            copy_trade: CopyTradeConfig::default(),
            intervals: IntervalConfig::default(),
            store_path: "ladderbaaz.sqlite3".into(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables (`.env` file) with defaults.
    ///
    /// Recognized env vars:
    ///   MODE — "PAPER" or "LIVE" (default: PAPER; LIVE is accepted but still
    ///          executes through the paper path — see README)
    ///   STARTING_BANKROLL — initial USDC balance (default: 1000)
    ///   STORE_PATH — sqlite file path (default: ladderbaaz.sqlite3)
    ///   COPY_TRADE_WALLETS — comma-separated wallet addresses to track
    ///   RUST_LOG — tracing filter (default: info)
    pub fn load_or_default() -> Self {
        let _ = dotenv::dotenv();

        let mut config = Self::default();

        if let Ok(mode) = std::env::var("MODE") {
            if mode.eq_ignore_ascii_case("live") {
                config.mode = Mode::Live;
            }
        }

        if let Ok(bankroll) = std::env::var("STARTING_BANKROLL") {
            if let Ok(val) = bankroll.parse::<f64>() {
                config.bankroll.starting_bankroll = val;
            }
        }

        if let Ok(path) = std::env::var("STORE_PATH") {
            if !path.is_empty() && path != "path/to/store.sqlite3" {
                config.store_path = path;
            }
        }

        if let Ok(wallets) = std::env::var("COPY_TRADE_WALLETS") {
            config.copy_trade.tracked_wallets = wallets
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if config.mode == Mode::Live {
            tracing::warn!("MODE=LIVE requested but this build only executes through the paper engine");
        }

        config
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.bankroll.starting_bankroll > 0.0, "starting_bankroll must be positive");
        anyhow::ensure!(
            self.risk.max_market_exposure_pct > 0.0 && self.risk.max_market_exposure_pct <= 1.0,
            "max_market_exposure_pct must be in (0, 1]"
        );
        anyhow::ensure!(
            self.risk.max_single_order_pct > 0.0 && self.risk.max_single_order_pct <= self.risk.max_market_exposure_pct,
            "max_single_order_pct must be positive and not exceed max_market_exposure_pct"
        );
        anyhow::ensure!(
            self.ladder.levels.len() == self.ladder.weights.len(),
            "ladder levels and weights must have the same length"
        );
        anyhow::ensure!(
            self.ladder.levels.windows(2).all(|w| w[0] < w[1]),
            "ladder levels must be strictly ascending"
        );
        let weight_sum: f64 = self.ladder.weights.iter().sum();
        anyhow::ensure!(
            (weight_sum - 1.0).abs() < 0.01,
            "ladder weights must sum to 1.0, got {weight_sum}"
        );
        anyhow::ensure!(
            self.regime.early_uncertain_price_min < self.regime.early_uncertain_price_max,
            "early_uncertain_price_min must be less than early_uncertain_price_max"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().expect("default config must validate");
    }

    #[test]
    fn rejects_ladder_weight_mismatch() {
        let mut c = Config::default();
        c.ladder.weights.pop();
        assert!(c.validate().is_err());
    }

    #[test]
    fn rejects_non_ascending_levels() {
        let mut c = Config::default();
        c.ladder.levels = vec![0.70, 0.60, 0.80, 0.90, 0.95];
        assert!(c.validate().is_err());
    }
}
