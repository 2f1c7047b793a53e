//! Price collection command implementation.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use trading_config::AppConfig;
use trading_core::{MarketClock, SystemClock};
use trading_data::QuoteCollector;

use super::{alpaca, market_clock, symbols_or_file};
use crate::cli::CollectArgs;
use crate::shutdown::Shutdown;

pub async fn run(args: CollectArgs, config: &AppConfig) -> Result<()> {
    let clock = market_clock(config, Arc::new(SystemClock))?;
    let broker = alpaca(config, clock.clone())?;
    let shutdown = Shutdown::new();
    shutdown.listen_for_ctrl_c();
    let idle = Duration::from_secs(config.session.idle_sleep_secs);

    while shutdown.is_running() {
        if clock.is_early_morning() || clock.is_late_night() || !clock.is_trading_day() {
            info!(phase = ?clock.phase(), "Market closed, sleeping");
            shutdown.sleep(idle).await;
            continue;
        }

        let symbols = symbols_or_file(&args.symbols, config)?;
        let collector = Arc::new(QuoteCollector::new(
            broker.clone(),
            symbols,
            config.collector.clone(),
        ));
        collect_day(&collector, &clock, &shutdown, config).await;
    }

    info!("Price collection stopped");
    Ok(())
}

/// Sample until late night, flushing the buffers on an interval.
async fn collect_day(
    collector: &Arc<QuoteCollector>,
    clock: &MarketClock,
    shutdown: &Shutdown,
    config: &AppConfig,
) {
    let dir = config.paths.collector_dir.as_path();
    let handle = collector.spawn();
    let flush_every = Duration::from_secs(config.collector.flush_interval_secs);

    while shutdown.sleep(flush_every).await && !clock.is_late_night() {
        let written = collector.flush(dir, clock.local_date(clock.now()));
        info!(symbols = written.len(), "Flushed collected prices");
    }

    collector.stop();
    if let Err(e) = handle.await {
        warn!(error = %e, "Collector task ended abnormally");
    }
    collector.flush(dir, clock.local_date(clock.now()));
}
