use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use ladderbaaz::config::Config;
use ladderbaaz::events::Event;
use ladderbaaz::orchestrator::Orchestrator;
use ladderbaaz::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("================================================");
    info!("  LADDERBAAZ — paper-trading engine for binary prediction markets");
    info!("================================================");

    let config = Config::load_or_default();
    if let Err(e) = config.validate() {
        error!("config validation failed: {e}");
        return Err(e);
    }

    info!(bankroll = config.bankroll.starting_bankroll, mode = ?config.mode, "config loaded");

    let store = Store::open(&config.store_path)?;
    info!(path = %config.store_path, "store opened");

    let orchestrator = Arc::new(Orchestrator::new(config, store));

    orchestrator.bootstrap().await?;
    info!("bootstrap complete, markets registered");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    orchestrator.start(&shutdown_tx);

    // Log-only consumer for dashboard-grade events (strategy transitions, WS
    // status, copy signals) — the dashboard server itself is out of scope.
    {
        let mut rx = orchestrator.event_bus().subscribe();
        let mut bus_shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => {
                        match event {
                            Ok(Event::WsStatus(status)) => info!(?status, "ws status"),
                            Ok(Event::CopySignal(signal)) => info!(
                                trader = %signal.trader,
                                market_id = %signal.market_id,
                                price = signal.price,
                                strategy_type = ?signal.strategy_type,
                                "copy signal"
                            ),
                            Ok(Event::MarketFiltered { markets }) => {
                                info!(count = markets.len(), "markets refreshed");
                            }
                            Ok(_) => {}
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(skipped = n, "event log consumer lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = bus_shutdown.recv() => break,
                }
            }
        });
    }

    info!("=== ladderbaaz running — press Ctrl+C to shut down ===");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining...");

    let _ = shutdown_tx.send(());
    // Give spawned tasks a moment to observe the shutdown signal and close
    // the WebSocket/timers before the process exits.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    info!("ladderbaaz shutdown complete");
    Ok(())
}
