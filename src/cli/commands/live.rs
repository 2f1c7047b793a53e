//! Live trading command implementation.

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use trading_agent::TradingAgent;
use trading_broker::AlpacaBroker;
use trading_config::AppConfig;
use trading_core::{MarketClock, SystemClock};
use trading_data::{HistoricalSeriesStore, OrderHistory, SnapshotStore};
use trading_strategies::AlphaStrategy;

use super::{alpaca, market_clock, symbols_or_file};
use crate::cli::LiveArgs;
use crate::shutdown::Shutdown;
use crate::trader::Trader;

pub async fn run(args: LiveArgs, config: &AppConfig) -> Result<()> {
    let clock = market_clock(config, Arc::new(SystemClock))?;
    let broker = alpaca(config, clock.clone())?;
    let shutdown = Shutdown::new();
    shutdown.listen_for_ctrl_c();
    let idle = Duration::from_secs(config.session.idle_sleep_secs);

    info!(feed = %config.broker.feed, "Starting live trading");
    while shutdown.is_running() {
        if clock.is_early_morning() || clock.is_late_night() || !clock.is_trading_day() {
            info!(phase = ?clock.phase(), "Market closed, sleeping");
            shutdown.sleep(idle).await;
            continue;
        }

        if let Err(e) = session(&args, config, &clock, &broker, &shutdown).await {
            error!(error = ?e, "Trading session failed");
            shutdown.sleep(idle).await;
        }
    }

    info!("Live trading stopped");
    Ok(())
}

/// One trading day: bootstrap, wait for pre-market, then decide on an
/// interval until the after-hours session ends.
async fn session(
    args: &LiveArgs,
    config: &AppConfig,
    clock: &MarketClock,
    broker: &Arc<AlpacaBroker>,
    shutdown: &Shutdown,
) -> Result<()> {
    let symbols = symbols_or_file(&args.symbols, config)?;
    let snapshots = SnapshotStore::new(&config.paths.snapshot_dir);
    let prior = snapshots
        .load_latest()
        .context("Failed to read the latest snapshot")?;

    let agent = TradingAgent::new(
        symbols.clone(),
        prior,
        broker.clone(),
        broker.clone(),
        Arc::new(SystemClock),
        config.agent.clone(),
    )
    .await
    .context("Failed to start the trading agent")?;
    let strategy = AlphaStrategy::new(config.strategy.clone())?;
    let store = Arc::new(HistoricalSeriesStore::new(
        broker.clone(),
        symbols,
        config.store.clone(),
    ));
    let history = OrderHistory::new(&config.paths.orders_dir, clock.timezone());
    let mut trader = Trader::new(agent, Box::new(strategy), store.clone(), history, snapshots);

    let poll = Duration::from_secs(config.session.preparing_poll_secs);
    while shutdown.is_running() && clock.is_preparing() {
        if !shutdown.sleep(poll).await {
            return Ok(());
        }
    }
    if !shutdown.is_running() {
        return Ok(());
    }

    if let Err(e) = store.seed().await {
        trader.persist_snapshot().await;
        return Err(e).context("Failed to seed candle history");
    }
    let refresher = store.spawn();
    trader.persist_snapshot().await;

    let decision = Duration::from_secs(config.session.decision_interval_secs);
    let snapshot_every = ChronoDuration::minutes(config.session.snapshot_interval_minutes);
    let mut last_snapshot = clock.now();
    info!(phase = ?clock.phase(), "Trading session started");

    while shutdown.is_running()
        && (clock.is_pre_market() || clock.is_regular_hours() || clock.is_after_hours())
    {
        let booked = trader.cycle(clock.is_extended_hours()).await;
        if !booked.is_empty() {
            info!(orders = booked.len(), "Decision cycle booked orders");
        }

        if clock.now() - last_snapshot >= snapshot_every {
            trader.persist_snapshot().await;
            last_snapshot = clock.now();
        }
        shutdown.sleep(decision).await;
    }

    trader.persist_snapshot().await;
    store.stop();
    if let Err(e) = refresher.await {
        warn!(error = %e, "Candle refresh task ended abnormally");
    }
    info!("Trading session ended");
    Ok(())
}
