//! CLI command implementations.

pub mod backtest;
pub mod collect;
pub mod live;
pub mod paper;
pub mod status;
pub mod validate;

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use trading_broker::{AlpacaBroker, AlpacaConfig};
use trading_config::AppConfig;
use trading_core::types::Candle;
use trading_core::{Clock, MarketClock};
use trading_data::read_symbols;

/// Exchange calendar from the `app` and `session` sections.
pub(crate) fn market_clock(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<MarketClock> {
    let tz = config.timezone()?;
    Ok(MarketClock::new(tz, config.session.hours, clock)
        .with_holidays(config.session.holidays.iter().copied()))
}

/// Alpaca client with credentials from the environment.
pub(crate) fn alpaca(config: &AppConfig, clock: MarketClock) -> Result<Arc<AlpacaBroker>> {
    let alpaca = AlpacaConfig::from_env()
        .context("Alpaca credentials are required")?
        .with_feed(config.broker.feed.clone());
    Ok(Arc::new(AlpacaBroker::new(alpaca, clock)?))
}

/// Symbols given on the command line, else those of the symbols file.
pub(crate) fn symbols_or_file(requested: &[String], config: &AppConfig) -> Result<Vec<String>> {
    if !requested.is_empty() {
        return Ok(requested.iter().map(|s| s.trim().to_uppercase()).collect());
    }
    let symbols = read_symbols(&config.paths.symbols_file).with_context(|| {
        format!(
            "Failed to read symbols from {}",
            config.paths.symbols_file.display()
        )
    })?;
    if symbols.is_empty() {
        anyhow::bail!("No symbols in {}", config.paths.symbols_file.display());
    }
    Ok(symbols)
}

/// Keep the requested symbols of loaded candle data, or every symbol when
/// none were requested.
pub(crate) fn select_symbols(
    mut data: HashMap<String, Vec<Candle>>,
    requested: &[String],
) -> Result<(Vec<String>, HashMap<String, Vec<Candle>>)> {
    if !requested.is_empty() {
        let wanted: Vec<String> = requested.iter().map(|s| s.trim().to_uppercase()).collect();
        data.retain(|symbol, _| wanted.contains(symbol));
        if let Some(missing) = wanted.iter().find(|s| !data.contains_key(*s)) {
            anyhow::bail!("No candles for {missing}");
        }
    }
    data.retain(|_, candles| !candles.is_empty());
    if data.is_empty() {
        anyhow::bail!("No candles loaded");
    }

    let mut symbols: Vec<String> = data.keys().cloned().collect();
    symbols.sort();
    Ok((symbols, data))
}
