//! Paper trading command implementation.
//!
//! Candles from CSV are revealed one at a time through the in-memory
//! brokerage, which also fills the orders. The session clock follows the
//! newest revealed candle.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use trading_agent::TradingAgent;
use trading_broker::PaperBroker;
use trading_config::AppConfig;
use trading_core::{FixedClock, SeriesProvider};
use trading_data::{load_csv, HistoricalSeriesStore, OrderHistory, SnapshotStore};
use trading_strategies::AlphaStrategy;

use super::{market_clock, select_symbols};
use crate::cli::PaperArgs;
use crate::shutdown::Shutdown;
use crate::trader::Trader;

/// Newest candle visible in the store.
fn replay_time(store: &HistoricalSeriesStore) -> Option<DateTime<Utc>> {
    store
        .symbols()
        .iter()
        .filter_map(|symbol| store.latest(symbol))
        .map(|candle| candle.datetime())
        .max()
}

pub async fn run(args: PaperArgs, config: &AppConfig) -> Result<()> {
    if !args.data.exists() {
        anyhow::bail!(
            "Data path '{}' does not exist. Provide a CSV file or directory containing CSV files (e.g. --data ./data)",
            args.data.display()
        );
    }
    let data = load_csv(&args.data)
        .with_context(|| format!("Failed to load candles from {}", args.data.display()))?;
    let (symbols, data) = select_symbols(data, &args.symbols)?;

    let cash = args.cash.unwrap_or(config.broker.paper_cash);
    let broker =
        Arc::new(PaperBroker::new(cash).with_slippage(config.broker.paper_slippage_pct));
    for (symbol, candles) in data {
        broker.load_candles(&symbol, candles, config.broker.replay_preload);
    }

    let store = Arc::new(HistoricalSeriesStore::new(
        broker.clone(),
        symbols.clone(),
        config.store.clone(),
    ));
    store.seed().await.context("Failed to seed candle history")?;

    let fixed = Arc::new(FixedClock::new(replay_time(&store).unwrap_or_default()));
    let clock = market_clock(config, fixed.clone())?;

    let snapshots = SnapshotStore::new(config.paths.snapshot_dir.join("paper"));
    let prior = snapshots
        .load_latest()
        .context("Failed to read the latest paper snapshot")?;
    let agent = TradingAgent::new(
        symbols.clone(),
        prior,
        broker.clone(),
        broker.clone(),
        fixed.clone(),
        config.agent.clone(),
    )
    .await
    .context("Failed to start the trading agent")?;
    let strategy = AlphaStrategy::new(config.strategy.clone())?;
    let history = OrderHistory::new(config.paths.orders_dir.join("paper"), clock.timezone());
    let mut trader = Trader::new(agent, Box::new(strategy), store.clone(), history, snapshots);

    let shutdown = Shutdown::new();
    shutdown.listen_for_ctrl_c();
    let delay = Duration::from_millis(args.delay_ms);
    let snapshot_every = ChronoDuration::minutes(config.session.snapshot_interval_minutes);

    info!(symbols = %symbols.join(", "), %cash, "Starting paper trading");
    trader.persist_snapshot().await;
    let mut last_snapshot = clock.now();
    let mut cycles = 0usize;
    let mut booked = 0usize;

    while shutdown.is_running() {
        let now = clock.now();
        booked += trader.cycle(clock.is_extended_hours_at(now)).await.len();
        cycles += 1;

        if now - last_snapshot >= snapshot_every {
            trader.persist_snapshot().await;
            last_snapshot = now;
        }

        if broker.replay_finished() {
            break;
        }
        broker.advance();
        if let Err(e) = store.refresh().await {
            warn!(error = %e, "Candle refresh failed");
        }
        if let Some(time) = replay_time(&store) {
            fixed.set(time);
        }
        if !delay.is_zero() && !shutdown.sleep(delay).await {
            break;
        }
    }

    trader.persist_snapshot().await;
    info!(cycles, orders = booked, cash = %broker.cash(), "Paper trading finished");
    Ok(())
}
