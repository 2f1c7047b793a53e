//! Real-time price collector.
//!
//! Samples the latest price of every symbol on an interval into per-symbol
//! buffers. The caller drains the buffers and appends them to the collector
//! output files.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use trading_core::error::BrokerError;
use trading_core::traits::QuoteSource;

use crate::persistence::{append_prices, PersistenceError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    /// Seconds between price samples
    pub sample_interval_secs: u64,
    /// Seconds between flushes to disk
    pub flush_interval_secs: u64,
    pub extended_hours: bool,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            sample_interval_secs: 5,
            flush_interval_secs: 30,
            extended_hours: true,
        }
    }
}

pub struct QuoteCollector {
    source: Arc<dyn QuoteSource>,
    symbols: Vec<String>,
    settings: CollectorSettings,
    buffers: Mutex<HashMap<String, Vec<Decimal>>>,
    running: AtomicBool,
    shutdown: Notify,
}

impl QuoteCollector {
    pub fn new(source: Arc<dyn QuoteSource>, symbols: Vec<String>, settings: CollectorSettings) -> Self {
        info!(symbols = %symbols.join(", "), "Collecting prices");
        let buffers = symbols.iter().map(|s| (s.clone(), Vec::new())).collect();
        Self {
            source,
            symbols,
            settings,
            buffers: Mutex::new(buffers),
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    /// Take one price sample for every symbol.
    pub async fn sample(&self) -> Result<usize, BrokerError> {
        let prices = self
            .source
            .latest_prices(&self.symbols, self.settings.extended_hours)
            .await?;

        let mut buffers = match self.buffers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut sampled = 0;
        for (symbol, price) in prices {
            if let Some(buffer) = buffers.get_mut(&symbol) {
                buffer.push(price);
                sampled += 1;
            }
        }
        Ok(sampled)
    }

    /// Take the samples buffered for a symbol since the last drain. `None`
    /// for symbols that are not collected.
    pub fn drain(&self, symbol: &str) -> Option<Vec<Decimal>> {
        let mut buffers = match self.buffers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        buffers.get_mut(symbol).map(std::mem::take)
    }

    /// Drain every symbol into `{dir}/{date}/{SYMBOL}.{date}`.
    ///
    /// A failing symbol is logged and the rest are still written.
    pub fn flush(&self, dir: &Path, date: NaiveDate) -> Vec<(String, Result<PathBuf, PersistenceError>)> {
        self.symbols
            .iter()
            .filter_map(|symbol| {
                let prices = self.drain(symbol)?;
                if prices.is_empty() {
                    return None;
                }
                let result = append_prices(dir, date, symbol, &prices);
                if let Err(e) = &result {
                    error!(symbol = %symbol, error = %e, "Failed to write collected prices");
                }
                Some((symbol.clone(), result))
            })
            .collect()
    }

    /// Sample on an interval until [`stop`](Self::stop) is called. A failed
    /// sample is followed by a reconnect attempt.
    pub async fn run(self: Arc<Self>) {
        let interval = Duration::from_secs(self.settings.sample_interval_secs);

        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.sample().await {
                warn!(error = %e, "Error when updating prices");
                match self.source.reconnect_quotes().await {
                    Ok(()) => info!("Reconnected quote source"),
                    Err(e) => error!(error = %e, "Reconnect failed"),
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.shutdown.notified() => break,
            }
        }

        info!(symbols = %self.symbols.join(", "), "Stopped collecting prices");
    }

    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        tokio::spawn(Arc::clone(self).run())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Ticker {
        calls: AtomicUsize,
        fail: AtomicBool,
        reconnects: AtomicUsize,
    }

    #[async_trait]
    impl QuoteSource for Ticker {
        async fn latest_price(&self, symbol: &str, _extended_hours: bool) -> Result<Decimal, BrokerError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(BrokerError::Connection("offline".into()));
            }
            if symbol == "HALT" {
                return Err(BrokerError::PriceUnavailable(symbol.into()));
            }
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(dec!(100) + Decimal::from(n))
        }

        async fn reconnect_quotes(&self) -> Result<(), BrokerError> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn collector(source: Arc<Ticker>) -> QuoteCollector {
        QuoteCollector::new(
            source,
            vec!["AAPL".into(), "HALT".into()],
            CollectorSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_sample_and_drain() {
        let collector = collector(Arc::new(Ticker::default()));

        assert_eq!(collector.sample().await.unwrap(), 1);
        collector.sample().await.unwrap();

        assert_eq!(collector.drain("AAPL").unwrap(), vec![dec!(100), dec!(101)]);
        assert!(collector.drain("AAPL").unwrap().is_empty());
        assert!(collector.drain("HALT").unwrap().is_empty());
        assert!(collector.drain("MSFT").is_none());
    }

    #[tokio::test]
    async fn test_flush_writes_collector_files() {
        let tmp = TempDir::new().unwrap();
        let collector = collector(Arc::new(Ticker::default()));
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();

        collector.sample().await.unwrap();
        collector.flush(tmp.path(), date);
        collector.sample().await.unwrap();
        let written = collector.flush(tmp.path(), date);

        assert_eq!(written.len(), 1);
        let path = written[0].1.as_ref().unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "100,101,");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reconnects_and_stops() {
        let source = Arc::new(Ticker::default());
        source.fail.store(true, Ordering::SeqCst);
        let collector = Arc::new(collector(source.clone()));

        let handle = collector.spawn();
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(source.reconnects.load(Ordering::SeqCst) >= 2);

        collector.stop();
        handle.await.unwrap();
        assert!(!collector.is_running());
    }
}
