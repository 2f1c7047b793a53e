//! Backtest command implementation.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use trading_backtest::{BacktestEngine, BacktestReport};
use trading_config::AppConfig;
use trading_core::types::Candle;
use trading_core::SystemClock;
use trading_data::{load_csv, HistoricalSeriesStore, SnapshotStore};
use trading_strategies::AlphaStrategy;

use super::{alpaca, market_clock, select_symbols, symbols_or_file};
use crate::cli::{BacktestArgs, OutputFormat};

pub async fn run(args: BacktestArgs, config: &AppConfig) -> Result<()> {
    let data = if let Some(path) = &args.data {
        if !path.exists() {
            anyhow::bail!(
                "Data path '{}' does not exist. Provide a CSV file or directory containing CSV files (e.g. --data ./data)",
                path.display()
            );
        }
        load_csv(path).with_context(|| format!("Failed to load candles from {}", path.display()))?
    } else if args.fetch {
        fetch(&args, config).await?
    } else {
        anyhow::bail!("Provide candle data with --data (e.g. --data ./data) or --fetch");
    };
    let (symbols, data) = select_symbols(data, &args.symbols)?;

    let mut engine_config = config.backtest_config();
    if let Some(capital) = args.capital {
        engine_config.initial_capital = capital;
    }

    let snapshots = SnapshotStore::new(config.paths.snapshot_dir.join("backtest"));
    let prior = if args.resume {
        snapshots
            .load_latest()
            .context("Failed to read the latest backtest snapshot")?
    } else {
        None
    };

    let strategy = AlphaStrategy::new(config.strategy.clone())?;
    info!(symbols = %symbols.join(", "), resume = prior.is_some(), "Starting backtest");

    let engine = BacktestEngine::new(engine_config);
    let report = tokio::task::spawn_blocking(move || engine.run(&strategy, data, prior))
        .await
        .context("Backtest task failed")??;

    match args.output {
        OutputFormat::Json => println!("{}", report.to_json()?),
        OutputFormat::Text => println!("{}", report.summary()),
    }

    if let Some(path) = &args.save {
        std::fs::write(path, report.to_json()?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "Report saved");
    }
    if let Some(path) = &args.equity_csv {
        std::fs::write(path, report.equity_to_csv())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "Equity curve saved");
    }
    if args.persist {
        persist(&report, &snapshots)?;
    }

    Ok(())
}

/// Seed window of every symbol from Alpaca, stitched the way the live store
/// seeds itself.
async fn fetch(args: &BacktestArgs, config: &AppConfig) -> Result<HashMap<String, Vec<Candle>>> {
    let symbols = symbols_or_file(&args.symbols, config)?;
    let broker = alpaca(config, market_clock(config, Arc::new(SystemClock))?)?;
    let store = HistoricalSeriesStore::new(broker, symbols.clone(), config.store.clone());
    store.seed().await.context("Failed to fetch candles")?;

    Ok(symbols
        .into_iter()
        .filter_map(|symbol| {
            let candles = store.candles(&symbol)?;
            Some((symbol, candles))
        })
        .collect())
}

fn persist(report: &BacktestReport, snapshots: &SnapshotStore) -> Result<()> {
    for snapshot in report.snapshots.iter().chain(std::iter::once(&report.final_snapshot)) {
        snapshots
            .save(snapshot)
            .with_context(|| format!("Failed to save snapshot at {}", snapshot.time))?;
    }
    info!(
        dir = %snapshots.dir().display(),
        count = report.snapshots.len() + 1,
        "Backtest snapshots saved"
    );
    Ok(())
}
