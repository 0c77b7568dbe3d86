use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};

use crate::models::market::{Market, Side};
use crate::models::order::{OrderStatus, StrategyTag, Trade};
use crate::models::position::Position;
use crate::models::signal::TrackedMarket;
use crate::models::state::{MarketState, Regime};

/// SQLite-backed persistence for everything the orchestrator needs to survive
/// a restart: market catalog, per-market strategy state, positions, trade log,
/// price history, P&L snapshots, strategy events, and tracked copy-trade rows.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("opening store at {path}"))?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS market (
                id TEXT PRIMARY KEY,
                question TEXT NOT NULL,
                category TEXT NOT NULL,
                end_time TEXT NOT NULL,
                game_start_time TEXT,
                volume_24h REAL NOT NULL,
                liquidity REAL NOT NULL,
                outcomes TEXT NOT NULL,
                token_ids TEXT NOT NULL,
                active INTEGER NOT NULL,
                closed INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS market_state (
                market_id TEXT PRIMARY KEY,
                regime TEXT NOT NULL,
                ladder_filled TEXT NOT NULL,
                tail_active INTEGER NOT NULL,
                stop_loss_triggered_at TEXT,
                cooldown_until TEXT,
                last_processed TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS position (
                market_id TEXT PRIMARY KEY,
                shares_yes REAL NOT NULL,
                shares_no REAL NOT NULL,
                cost_basis_yes REAL NOT NULL,
                cost_basis_no REAL NOT NULL,
                realized_pnl REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS trade (
                id TEXT PRIMARY KEY,
                market_id TEXT NOT NULL,
                side TEXT NOT NULL,
                price REAL NOT NULL,
                size_usdc REAL NOT NULL,
                shares REAL NOT NULL,
                strategy TEXT NOT NULL,
                strategy_detail TEXT,
                is_exit INTEGER NOT NULL,
                status TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS price_history (
                market_id TEXT NOT NULL,
                price_yes REAL NOT NULL,
                price_no REAL NOT NULL,
                best_bid_yes REAL,
                best_ask_yes REAL,
                best_bid_no REAL,
                best_ask_no REAL,
                timestamp TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS pnl_snapshot (
                timestamp TEXT NOT NULL,
                total_value REAL NOT NULL,
                cash_balance REAL NOT NULL,
                positions_value REAL NOT NULL,
                unrealized_pnl REAL NOT NULL,
                realized_pnl REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS strategy_event (
                market_id TEXT NOT NULL,
                regime TEXT NOT NULL,
                strategy TEXT NOT NULL,
                action TEXT NOT NULL,
                price_yes REAL NOT NULL,
                price_no REAL NOT NULL,
                details TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS tracked_market (
                condition_id TEXT PRIMARY KEY,
                slug TEXT NOT NULL,
                token_id TEXT,
                outcome_index INTEGER,
                outcome TEXT NOT NULL,
                title TEXT NOT NULL,
                trader_name TEXT NOT NULL,
                trader_wallet TEXT NOT NULL,
                tracked_price REAL NOT NULL,
                current_price REAL NOT NULL,
                status TEXT NOT NULL,
                signal_time TEXT NOT NULL,
                entered_range_at TEXT,
                executed_at TEXT
            );
            CREATE TABLE IF NOT EXISTS bot_config (
                bankroll REAL NOT NULL,
                locked_profits REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_price_history_market ON price_history(market_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_trade_market ON trade(market_id, timestamp);
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn upsert_market(&self, market: &Market) -> Result<()> {
        self.conn.execute(
            "INSERT INTO market (id, question, category, end_time, game_start_time, volume_24h, liquidity, outcomes, token_ids, active, closed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
               question=excluded.question, category=excluded.category, end_time=excluded.end_time,
               game_start_time=excluded.game_start_time, volume_24h=excluded.volume_24h,
               liquidity=excluded.liquidity, outcomes=excluded.outcomes, token_ids=excluded.token_ids,
               active=excluded.active, closed=excluded.closed",
            params![
                market.id,
                market.question,
                market.category,
                market.end_time.to_rfc3339(),
                market.game_start_time.map(|t| t.to_rfc3339()),
                market.volume_24h,
                market.liquidity,
                serde_json::to_string(&market.outcomes)?,
                serde_json::to_string(&market.token_ids)?,
                market.active as i64,
                market.closed as i64,
            ],
        )?;
        Ok(())
    }

    pub fn upsert_market_state(&self, state: &MarketState) -> Result<()> {
        let ladder_filled: Vec<usize> = state.ladder_filled.iter().copied().collect();
        self.conn.execute(
            "INSERT INTO market_state (market_id, regime, ladder_filled, tail_active, stop_loss_triggered_at, cooldown_until, last_processed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(market_id) DO UPDATE SET
               regime=excluded.regime, ladder_filled=excluded.ladder_filled, tail_active=excluded.tail_active,
               stop_loss_triggered_at=excluded.stop_loss_triggered_at, cooldown_until=excluded.cooldown_until,
               last_processed=excluded.last_processed",
            params![
                state.market_id,
                regime_str(state.regime),
                serde_json::to_string(&ladder_filled)?,
                state.tail_active as i64,
                state.stop_loss_triggered_at.map(|t| t.to_rfc3339()),
                state.cooldown_until.map(|t| t.to_rfc3339()),
                state.last_processed.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn upsert_position(&self, position: &Position) -> Result<()> {
        self.conn.execute(
            "INSERT INTO position (market_id, shares_yes, shares_no, cost_basis_yes, cost_basis_no, realized_pnl)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(market_id) DO UPDATE SET
               shares_yes=excluded.shares_yes, shares_no=excluded.shares_no,
               cost_basis_yes=excluded.cost_basis_yes, cost_basis_no=excluded.cost_basis_no,
               realized_pnl=excluded.realized_pnl",
            params![
                position.market_id,
                position.shares_yes,
                position.shares_no,
                position.cost_basis_yes,
                position.cost_basis_no,
                position.realized_pnl,
            ],
        )?;
        Ok(())
    }

    pub fn insert_trade(&self, trade: &Trade) -> Result<()> {
        self.conn.execute(
            "INSERT INTO trade (id, market_id, side, price, size_usdc, shares, strategy, strategy_detail, is_exit, status, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                trade.id,
                trade.market_id,
                side_str(trade.side),
                trade.price,
                trade.size_usdc,
                trade.shares,
                trade.strategy.as_str(),
                trade.strategy_detail,
                trade.is_exit as i64,
                status_str(trade.status),
                trade.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn insert_price_history(
        &self,
        market_id: &str,
        price_yes: f64,
        price_no: f64,
        best_bid_yes: Option<f64>,
        best_ask_yes: Option<f64>,
        best_bid_no: Option<f64>,
        best_ask_no: Option<f64>,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO price_history (market_id, price_yes, price_no, best_bid_yes, best_ask_yes, best_bid_no, best_ask_no, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![market_id, price_yes, price_no, best_bid_yes, best_ask_yes, best_bid_no, best_ask_no, timestamp.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn insert_pnl_snapshot(
        &self,
        total_value: f64,
        cash_balance: f64,
        positions_value: f64,
        unrealized_pnl: f64,
        realized_pnl: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO pnl_snapshot (timestamp, total_value, cash_balance, positions_value, unrealized_pnl, realized_pnl)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![timestamp.to_rfc3339(), total_value, cash_balance, positions_value, unrealized_pnl, realized_pnl],
        )?;
        Ok(())
    }

    pub fn insert_strategy_event(
        &self,
        market_id: &str,
        regime: Regime,
        strategy: &str,
        action: &str,
        price_yes: f64,
        price_no: f64,
        details: &serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO strategy_event (market_id, regime, strategy, action, price_yes, price_no, details, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![market_id, regime_str(regime), strategy, action, price_yes, price_no, details.to_string(), timestamp.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn upsert_tracked_market(&self, tracked: &TrackedMarket) -> Result<()> {
        self.conn.execute(
            "INSERT INTO tracked_market (condition_id, slug, token_id, outcome_index, outcome, title, trader_name, trader_wallet, tracked_price, current_price, status, signal_time, entered_range_at, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(condition_id) DO UPDATE SET
               current_price=excluded.current_price, status=excluded.status,
               entered_range_at=excluded.entered_range_at, executed_at=excluded.executed_at",
            params![
                tracked.condition_id,
                tracked.slug,
                tracked.token_id,
                tracked.outcome_index.map(|i| i as i64),
                tracked.outcome,
                tracked.title,
                tracked.trader_name,
                tracked.trader_wallet,
                tracked.tracked_price,
                tracked.current_price,
                tracked_status_str(tracked.status),
                tracked.signal_time.to_rfc3339(),
                tracked.entered_range_at.map(|t| t.to_rfc3339()),
                tracked.executed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn save_bot_config(&self, bankroll: f64, locked_profits: f64) -> Result<()> {
        self.conn.execute("DELETE FROM bot_config", [])?;
        self.conn.execute(
            "INSERT INTO bot_config (bankroll, locked_profits) VALUES (?1, ?2)",
            params![bankroll, locked_profits],
        )?;
        Ok(())
    }

    pub fn load_bot_config(&self) -> Result<Option<(f64, f64)>> {
        let mut stmt = self.conn.prepare("SELECT bankroll, locked_profits FROM bot_config LIMIT 1")?;
        let mut rows = stmt.query([])?;
        if let Some(row) = rows.next()? {
            Ok(Some((row.get(0)?, row.get(1)?)))
        } else {
            Ok(None)
        }
    }

    pub fn remove_position(&self, market_id: &str) -> Result<()> {
        self.conn.execute("DELETE FROM position WHERE market_id = ?1", params![market_id])?;
        Ok(())
    }

    pub fn get_position(&self, market_id: &str) -> Result<Option<Position>> {
        let mut stmt = self
            .conn
            .prepare("SELECT shares_yes, shares_no, cost_basis_yes, cost_basis_no, realized_pnl FROM position WHERE market_id = ?1")?;
        let mut rows = stmt.query(params![market_id])?;
        let Some(row) = rows.next()? else { return Ok(None) };
        Ok(Some(Position {
            market_id: market_id.to_string(),
            shares_yes: row.get(0)?,
            shares_no: row.get(1)?,
            cost_basis_yes: row.get(2)?,
            cost_basis_no: row.get(3)?,
            realized_pnl: row.get(4)?,
            opened_at: None,
        }))
    }

    /// The subset of `MarketState` the schema actually persists (SPEC §6) —
    /// price history, exposures, consensus-break tracking, moon bag, and
    /// `activeTradeSide` are in-memory only and are rebuilt from the trade
    /// log and live prices rather than round-tripped through the store.
    pub fn get_market_state(&self, market_id: &str) -> Result<Option<PersistedMarketState>> {
        let mut stmt = self
            .conn
            .prepare("SELECT ladder_filled, tail_active, stop_loss_triggered_at, cooldown_until FROM market_state WHERE market_id = ?1")?;
        let mut rows = stmt.query(params![market_id])?;
        let Some(row) = rows.next()? else { return Ok(None) };
        let ladder_filled_json: String = row.get(0)?;
        let ladder_filled: Vec<usize> = serde_json::from_str(&ladder_filled_json).unwrap_or_default();
        let tail_active: i64 = row.get(1)?;
        let stop_loss_triggered_at: Option<String> = row.get(2)?;
        let cooldown_until: Option<String> = row.get(3)?;
        Ok(Some(PersistedMarketState {
            ladder_filled: ladder_filled.into_iter().collect(),
            tail_active: tail_active != 0,
            stop_loss_triggered_at: stop_loss_triggered_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
            cooldown_until: cooldown_until.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
        }))
    }

    pub fn list_trades(&self, market_id: &str) -> Result<Vec<Trade>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, market_id, side, price, size_usdc, shares, strategy, strategy_detail, is_exit, status, timestamp
             FROM trade WHERE market_id = ?1 ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![market_id], |row| {
            let side: String = row.get(2)?;
            let strategy: String = row.get(6)?;
            let status: String = row.get(9)?;
            let timestamp: String = row.get(10)?;
            Ok(Trade {
                id: row.get(0)?,
                market_id: row.get(1)?,
                side: parse_side(&side),
                price: row.get(3)?,
                size_usdc: row.get(4)?,
                shares: row.get(5)?,
                strategy: parse_strategy(&strategy),
                strategy_detail: row.get(7)?,
                is_exit: row.get::<_, i64>(8)? != 0,
                status: parse_status(&status),
                timestamp: DateTime::parse_from_rfc3339(&timestamp).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
    }
}

/// The fields of `MarketState` that `market_state` actually stores.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedMarketState {
    pub ladder_filled: std::collections::BTreeSet<usize>,
    pub tail_active: bool,
    pub stop_loss_triggered_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
}

fn parse_side(s: &str) -> Side {
    match s {
        "NO" => Side::No,
        _ => Side::Yes,
    }
}

fn parse_status(s: &str) -> OrderStatus {
    match s {
        "REJECTED" => OrderStatus::Rejected,
        _ => OrderStatus::Filled,
    }
}

fn parse_strategy(s: &str) -> StrategyTag {
    match s {
        "DCA" => StrategyTag::Dca,
        "TAIL_INSURANCE" => StrategyTag::TailInsurance,
        "PRE_GAME_STOP" => StrategyTag::PreGameStop,
        "CONSENSUS_BREAK_STOP" => StrategyTag::ConsensusBreakStop,
        "PROFIT_TAKE" => StrategyTag::ProfitTake,
        "MOON_BAG_EXIT" => StrategyTag::MoonBagExit,
        "RESOLUTION" => StrategyTag::Resolution,
        _ => StrategyTag::Ladder,
    }
}

fn regime_str(regime: Regime) -> &'static str {
    match regime {
        Regime::EarlyUncertain => "EARLY_UNCERTAIN",
        Regime::MidConsensus => "MID_CONSENSUS",
        Regime::LateCompressed => "LATE_COMPRESSED",
        Regime::HighVolatility => "HIGH_VOLATILITY",
    }
}

fn side_str(side: Side) -> &'static str {
    match side {
        Side::Yes => "YES",
        Side::No => "NO",
    }
}

fn status_str(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Filled => "FILLED",
        OrderStatus::Rejected => "REJECTED",
    }
}

fn tracked_status_str(status: crate::models::signal::TrackedStatus) -> &'static str {
    use crate::models::signal::TrackedStatus;
    match status {
        TrackedStatus::Watching => "WATCHING",
        TrackedStatus::InRange => "IN_RANGE",
        TrackedStatus::Executed => "EXECUTED",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::market::Market;

    fn sample_market() -> Market {
        Market {
            id: "m1".into(),
            question: "Will it happen?".into(),
            category: "politics".into(),
            outcomes: ["Yes".into(), "No".into()],
            token_ids: ["t-yes".into(), "t-no".into()],
            end_time: Utc.timestamp_opt(2_000_000_000, 0).unwrap(),
            game_start_time: None,
            volume_24h: 10_000.0,
            liquidity: 5_000.0,
            active: true,
            closed: false,
            event_group_id: None,
        }
    }

    #[test]
    fn roundtrips_market_and_position() {
        let store = Store::open(":memory:").unwrap();
        store.upsert_market(&sample_market()).unwrap();
        let mut pos = Position::new("m1".into());
        pos.record_buy(Side::Yes, 60.0, 100.0);
        store.upsert_position(&pos).unwrap();
        store.upsert_market(&sample_market()).unwrap();

        let loaded = store.get_position("m1").unwrap().unwrap();
        assert!((loaded.shares_yes - 100.0).abs() < 1e-9);
        assert!((loaded.cost_basis_yes - 60.0).abs() < 1e-9);
        assert!(store.get_position("no-such-market").unwrap().is_none());
    }

    #[test]
    fn trade_log_replays_in_timestamp_order() {
        let store = Store::open(":memory:").unwrap();
        store.upsert_market(&sample_market()).unwrap();

        let mut pos = Position::new("m1".into());
        let fills = [(0.40, 50.0), (0.45, 40.0), (0.50, 30.0)];
        for (i, (price, shares)) in fills.iter().enumerate() {
            let usdc = price * shares;
            pos.record_buy(Side::Yes, usdc, *shares);
            let trade = Trade {
                id: format!("t{i}"),
                market_id: "m1".into(),
                side: Side::Yes,
                price: *price,
                size_usdc: usdc,
                shares: *shares,
                strategy: StrategyTag::Ladder,
                strategy_detail: None,
                is_exit: false,
                status: OrderStatus::Filled,
                timestamp: Utc.timestamp_opt(1_700_000_000 + i as i64, 0).unwrap(),
            };
            store.insert_trade(&trade).unwrap();
        }
        store.upsert_position(&pos).unwrap();

        let trades = store.list_trades("m1").unwrap();
        assert_eq!(trades.len(), 3);
        assert_eq!(trades[0].id, "t0");
        assert_eq!(trades[2].id, "t2");

        let mut replayed = Position::new("m1".into());
        for trade in &trades {
            replayed.record_buy(trade.side, trade.size_usdc, trade.shares);
        }
        let stored = store.get_position("m1").unwrap().unwrap();
        assert!((replayed.shares_yes - stored.shares_yes).abs() < 1e-2);
        assert!((replayed.cost_basis_yes - stored.cost_basis_yes).abs() < 1e-2);
    }

    #[test]
    fn market_state_roundtrips_persisted_fields() {
        let store = Store::open(":memory:").unwrap();
        store.upsert_market(&sample_market()).unwrap();

        let mut state = MarketState::new("m1".into());
        state.ladder_filled.insert(0);
        state.ladder_filled.insert(2);
        state.tail_active = true;
        state.cooldown_until = Some(Utc.timestamp_opt(1_700_000_500, 0).unwrap());
        store.upsert_market_state(&state).unwrap();

        let loaded = store.get_market_state("m1").unwrap().unwrap();
        assert_eq!(loaded.ladder_filled, state.ladder_filled);
        assert_eq!(loaded.tail_active, state.tail_active);
        assert_eq!(loaded.cooldown_until, state.cooldown_until);
        assert_eq!(loaded.stop_loss_triggered_at, None);
    }

    #[test]
    fn bot_config_roundtrips() {
        let store = Store::open(":memory:").unwrap();
        assert!(store.load_bot_config().unwrap().is_none());
        store.save_bot_config(1000.0, 25.0).unwrap();
        let (bankroll, locked) = store.load_bot_config().unwrap().unwrap();
        assert!((bankroll - 1000.0).abs() < 1e-9);
        assert!((locked - 25.0).abs() < 1e-9);
    }
}
