//! Integration tests for the persistence round-trip properties the
//! orchestrator relies on across a restart: a market's strategy state and
//! trade log must survive a close-and-reopen of the store file.

use chrono::{TimeZone, Utc};

use ladderbaaz::models::market::{Market, Side};
use ladderbaaz::models::order::{OrderStatus, StrategyTag, Trade};
use ladderbaaz::models::position::Position;
use ladderbaaz::models::state::MarketState;
use ladderbaaz::store::Store;

fn sample_market(id: &str) -> Market {
    Market {
        id: id.to_string(),
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

/// Persisting a `MarketState`, closing the store, and reopening it against
/// the same file yields the same persisted fields. Regime is excluded from
/// the comparison: it is recomputed from the live price on load rather than
/// carried across a restart.
#[test]
fn market_state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ladderbaaz.sqlite3");
    let path_str = path.to_str().unwrap().to_string();

    {
        let store = Store::open(&path_str).unwrap();
        store.upsert_market(&sample_market("m1")).unwrap();

        let mut state = MarketState::new("m1".into());
        state.ladder_filled.insert(0);
        state.ladder_filled.insert(1);
        state.ladder_filled.insert(3);
        state.tail_active = true;
        state.stop_loss_triggered_at = Some(Utc.timestamp_opt(1_700_000_100, 0).unwrap());
        state.cooldown_until = Some(Utc.timestamp_opt(1_700_000_900, 0).unwrap());
        store.upsert_market_state(&state).unwrap();
    }

    let store = Store::open(&path_str).unwrap();
    let reloaded = store.get_market_state("m1").unwrap().expect("state row survives restart");

    let mut expected = MarketState::new("m1".into());
    expected.ladder_filled.insert(0);
    expected.ladder_filled.insert(1);
    expected.ladder_filled.insert(3);

    assert_eq!(reloaded.ladder_filled, expected.ladder_filled);
    assert!(reloaded.tail_active);
    assert_eq!(reloaded.stop_loss_triggered_at, Some(Utc.timestamp_opt(1_700_000_100, 0).unwrap()));
    assert_eq!(reloaded.cooldown_until, Some(Utc.timestamp_opt(1_700_000_900, 0).unwrap()));
}

/// Replaying the ordered trade log for a market through `Position::record_buy`
/// / `record_sell` reproduces the shares and cost basis the store has on file
/// for that market's position, within the tolerance the P&L snapshot job uses.
#[test]
fn trade_log_replay_reproduces_position() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ladderbaaz.sqlite3");
    let path_str = path.to_str().unwrap().to_string();

    let store = Store::open(&path_str).unwrap();
    store.upsert_market(&sample_market("m1")).unwrap();

    let mut position = Position::new("m1".into());

    let entries = [
        (Side::Yes, 0.62, 100.0, StrategyTag::Ladder),
        (Side::Yes, 0.70, 80.0, StrategyTag::Ladder),
        (Side::Yes, 0.80, 60.0, StrategyTag::Dca),
    ];
    for (i, (side, price, shares, strategy)) in entries.iter().enumerate() {
        let usdc = price * shares;
        position.record_buy(*side, usdc, *shares);
        store
            .insert_trade(&Trade {
                id: format!("entry-{i}"),
                market_id: "m1".into(),
                side: *side,
                price: *price,
                size_usdc: usdc,
                shares: *shares,
                strategy: *strategy,
                strategy_detail: None,
                is_exit: false,
                status: OrderStatus::Filled,
                timestamp: Utc.timestamp_opt(1_700_001_000 + i as i64, 0).unwrap(),
            })
            .unwrap();
    }

    // A partial profit-take exit on the Yes side.
    let (realized, _) = position.record_sell(Side::Yes, 0.90 * 120.0, 120.0);
    store
        .insert_trade(&Trade {
            id: "exit-0".into(),
            market_id: "m1".into(),
            side: Side::Yes,
            price: 0.90,
            size_usdc: 0.90 * 120.0,
            shares: 120.0,
            strategy: StrategyTag::ProfitTake,
            strategy_detail: None,
            is_exit: true,
            status: OrderStatus::Filled,
            timestamp: Utc.timestamp_opt(1_700_002_000, 0).unwrap(),
        })
        .unwrap();

    store.upsert_position(&position).unwrap();

    let trades = store.list_trades("m1").unwrap();
    assert_eq!(trades.len(), 4);
    assert!(trades.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    let mut replayed = Position::new("m1".into());
    for trade in &trades {
        if trade.is_exit {
            replayed.record_sell(trade.side, trade.size_usdc, trade.shares);
        } else {
            replayed.record_buy(trade.side, trade.size_usdc, trade.shares);
        }
    }

    let stored = store.get_position("m1").unwrap().unwrap();
    assert!((replayed.shares_yes - stored.shares_yes).abs() < 1e-2);
    assert!((replayed.cost_basis_yes - stored.cost_basis_yes).abs() < 1e-2);
    assert!((replayed.realized_pnl - stored.realized_pnl).abs() < 1e-2);
    assert!((replayed.realized_pnl - realized).abs() < 1e-2);
}
