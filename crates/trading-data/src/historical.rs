//! Per-symbol candle history kept fresh by a background refresh task.

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use trading_core::error::DataError;
use trading_core::traits::{CandleSource, SeriesProvider};
use trading_core::types::{
    Candle, CandleSeries, HistorySpan, IndicatorSpec, SeriesSnapshot, SessionBounds, Timeframe,
};
use trading_indicators::IndicatorEngine;

/// Fetch windows and cadence of the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub interval: Timeframe,
    /// Window re-fetched on every refresh
    pub refresh_span: HistorySpan,
    pub refresh_bounds: SessionBounds,
    /// Longer window fetched once at seed time
    pub seed_span: HistorySpan,
    pub seed_bounds: SessionBounds,
    /// How far the seed window reaches behind the first refreshed candle
    pub backfill_days: i64,
    pub refresh_interval_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            interval: Timeframe::Minute5,
            refresh_span: HistorySpan::Day,
            refresh_bounds: SessionBounds::Extended,
            seed_span: HistorySpan::Week,
            seed_bounds: SessionBounds::Regular,
            backfill_days: 3,
            refresh_interval_secs: 60,
        }
    }
}

/// Place the part of `backfill` that is older than the first candle of
/// `recent`, and no more than `depth` older, underneath `recent`.
pub fn stitch(backfill: Vec<Candle>, recent: Vec<Candle>, depth: ChronoDuration) -> Vec<Candle> {
    let Some(first) = recent.first().map(|c| c.timestamp) else {
        return backfill;
    };
    let floor = first - depth.num_milliseconds();

    let mut stitched: Vec<Candle> = backfill
        .into_iter()
        .filter(|c| c.timestamp < first && c.timestamp >= floor)
        .collect();
    stitched.extend(recent);
    stitched
}

/// Monotonically growing candle history per symbol.
///
/// Readers copy the candles out under the read lock and compute indicators
/// on the copy; the refresh task holds the write lock only while merging.
pub struct HistoricalSeriesStore {
    source: Arc<dyn CandleSource>,
    symbols: Vec<String>,
    settings: StoreSettings,
    series: RwLock<HashMap<String, CandleSeries>>,
    running: AtomicBool,
    shutdown: Notify,
}

impl HistoricalSeriesStore {
    pub fn new(source: Arc<dyn CandleSource>, symbols: Vec<String>, settings: StoreSettings) -> Self {
        let series = symbols
            .iter()
            .map(|s| (s.clone(), CandleSeries::new(s.clone())))
            .collect();
        Self {
            source,
            symbols,
            settings,
            series: RwLock::new(series),
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Initial fill: the recent window stitched on top of the longer
    /// backfill window.
    pub async fn seed(&self) -> Result<usize, DataError> {
        let recent = self
            .source
            .candles(
                &self.symbols,
                self.settings.interval,
                self.settings.refresh_span,
                self.settings.refresh_bounds,
            )
            .await?;
        let mut backfill = self
            .source
            .candles(
                &self.symbols,
                self.settings.interval,
                self.settings.seed_span,
                self.settings.seed_bounds,
            )
            .await?;

        let depth = ChronoDuration::days(self.settings.backfill_days);
        let mut appended = 0;
        for symbol in &self.symbols {
            let recent = recent.get(symbol).cloned().unwrap_or_default();
            let older = backfill.remove(symbol).unwrap_or_default();
            appended += self.merge(symbol, stitch(older, recent, depth));
        }

        info!(
            source = self.source.source_name(),
            symbols = self.symbols.len(),
            candles = appended,
            "Seeded candle history"
        );
        Ok(appended)
    }

    /// Fetch the recent window and append what is new.
    pub async fn refresh(&self) -> Result<usize, DataError> {
        let fetched = self
            .source
            .candles(
                &self.symbols,
                self.settings.interval,
                self.settings.refresh_span,
                self.settings.refresh_bounds,
            )
            .await?;

        let appended = fetched
            .into_iter()
            .filter(|(symbol, _)| self.symbols.contains(symbol))
            .map(|(symbol, candles)| self.merge(&symbol, candles))
            .sum();
        debug!(candles = appended, "Refreshed candle history");
        Ok(appended)
    }

    /// Append candles strictly newer than what is stored. Returns the number
    /// appended.
    pub fn merge(&self, symbol: &str, candles: Vec<Candle>) -> usize {
        let mut guard = match self.series.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .entry(symbol.to_string())
            .or_insert_with(|| CandleSeries::new(symbol))
            .merge_newer(candles)
    }

    /// Copy of a symbol's candles, `None` when the symbol is unknown.
    pub fn candles(&self, symbol: &str) -> Option<Vec<Candle>> {
        let guard = match self.series.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(symbol).map(|s| s.candles().to_vec())
    }

    /// Candles plus indicator columns. `None` for unknown or empty symbols.
    pub fn get(&self, symbol: &str, specs: &[IndicatorSpec]) -> Option<SeriesSnapshot> {
        let candles = self.candles(symbol)?;
        if candles.is_empty() {
            return None;
        }
        match IndicatorEngine::compute(symbol, candles, specs) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(symbol, error = %e, "Indicator computation failed");
                None
            }
        }
    }

    /// Refresh on an interval until [`stop`](Self::stop) is called.
    ///
    /// Failures never end the loop: they are logged and followed by a
    /// reconnect attempt.
    pub async fn run(self: Arc<Self>) {
        let interval = Duration::from_secs(self.settings.refresh_interval_secs);
        info!(interval_secs = interval.as_secs(), "Candle refresh loop started");

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.shutdown.notified() => break,
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            if let Err(e) = self.refresh().await {
                warn!(error = %e, "Candle refresh failed");
                match self.source.reconnect().await {
                    Ok(()) => info!("Reconnected candle source"),
                    Err(e) => error!(error = %e, "Reconnect failed"),
                }
            }
        }

        info!("Candle refresh loop stopped");
    }

    /// Start the refresh loop on the runtime.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        tokio::spawn(Arc::clone(self).run())
    }

    /// Ask the refresh loop to exit.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl SeriesProvider for HistoricalSeriesStore {
    fn latest(&self, symbol: &str) -> Option<Candle> {
        let guard = match self.series.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(symbol).and_then(|s| s.last().copied())
    }

    fn series(&self, symbol: &str, specs: &[IndicatorSpec]) -> Option<SeriesSnapshot> {
        self.get(symbol, specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    const FIVE_MIN: i64 = 300_000;

    fn candle(ts: i64, close: f64) -> Candle {
        Candle::new(ts, close, close + 0.5, close - 0.5, close, 100.0)
    }

    /// Serves canned windows keyed by span; can be told to fail.
    #[derive(Default)]
    struct MockSource {
        windows: Mutex<HashMap<HistorySpan, HashMap<String, Vec<Candle>>>>,
        fail: AtomicBool,
        reconnects: AtomicUsize,
    }

    impl MockSource {
        fn set(&self, span: HistorySpan, symbol: &str, candles: Vec<Candle>) {
            self.windows
                .lock()
                .unwrap()
                .entry(span)
                .or_default()
                .insert(symbol.to_string(), candles);
        }
    }

    #[async_trait]
    impl CandleSource for MockSource {
        async fn candles(
            &self,
            _symbols: &[String],
            _interval: Timeframe,
            span: HistorySpan,
            _bounds: SessionBounds,
        ) -> Result<HashMap<String, Vec<Candle>>, DataError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DataError::ConnectionError("offline".into()));
            }
            Ok(self.windows.lock().unwrap().get(&span).cloned().unwrap_or_default())
        }

        async fn reconnect(&self) -> Result<(), DataError> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn source_name(&self) -> &str {
            "mock"
        }
    }

    fn store(source: Arc<MockSource>) -> HistoricalSeriesStore {
        HistoricalSeriesStore::new(source, vec!["AAPL".into()], StoreSettings::default())
    }

    #[test]
    fn test_stitch() {
        let day = 86_400_000;
        let first = 10 * day;
        let backfill = vec![
            candle(first - 5 * day, 1.0),
            candle(first - 2 * day, 2.0),
            candle(first - FIVE_MIN, 3.0),
            candle(first, 99.0),
        ];
        let recent = vec![candle(first, 4.0), candle(first + FIVE_MIN, 5.0)];

        let stitched = stitch(backfill, recent, ChronoDuration::days(3));
        let closes: Vec<f64> = stitched.iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[tokio::test]
    async fn test_seed_then_refresh_appends_only_newer() {
        let source = Arc::new(MockSource::default());
        source.set(HistorySpan::Week, "AAPL", vec![candle(0, 1.0), candle(FIVE_MIN, 2.0)]);
        source.set(HistorySpan::Day, "AAPL", vec![candle(2 * FIVE_MIN, 3.0), candle(3 * FIVE_MIN, 4.0)]);
        let store = store(source.clone());

        assert_eq!(store.seed().await.unwrap(), 4);
        let ids: Vec<_> = store.candles("AAPL").unwrap().iter().map(|c| c.id).collect();

        source.set(
            HistorySpan::Day,
            "AAPL",
            vec![candle(3 * FIVE_MIN, 40.0), candle(4 * FIVE_MIN, 5.0)],
        );
        assert_eq!(store.refresh().await.unwrap(), 1);

        let candles = store.candles("AAPL").unwrap();
        assert_eq!(candles.len(), 5);
        assert_eq!(candles[3].close, 4.0);
        let kept: Vec<_> = candles[..4].iter().map(|c| c.id).collect();
        assert_eq!(kept, ids);
        assert!(candles.iter().all(|c| !c.id.is_nil()));
    }

    #[tokio::test]
    async fn test_get_unknown_symbol_is_none() {
        let store = store(Arc::new(MockSource::default()));

        assert!(store.get("MSFT", &IndicatorSpec::default_set()).is_none());
        // known but empty
        assert!(store.get("AAPL", &IndicatorSpec::default_set()).is_none());
        assert!(store.latest("MSFT").is_none());
    }

    #[tokio::test]
    async fn test_get_computes_columns() {
        let store = store(Arc::new(MockSource::default()));
        let candles = (0..80).map(|i| candle(i * FIVE_MIN, 100.0 + (i as f64 * 0.3).sin())).collect();
        store.merge("AAPL", candles);

        let snapshot = store.get("AAPL", &IndicatorSpec::default_set()).unwrap();
        assert_eq!(snapshot.len(), 80);
        assert!(snapshot.values("term_line_8").is_some());
        assert_eq!(store.latest("AAPL").unwrap().timestamp, 79 * FIVE_MIN);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_survives_failures_and_stops() {
        let source = Arc::new(MockSource::default());
        source.fail.store(true, Ordering::SeqCst);
        let store = Arc::new(store(source.clone()));

        let handle = store.spawn();
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert!(source.reconnects.load(Ordering::SeqCst) >= 2);
        assert!(!handle.is_finished());

        source.fail.store(false, Ordering::SeqCst);
        source.set(HistorySpan::Day, "AAPL", vec![candle(0, 1.0)]);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.candles("AAPL").unwrap().len(), 1);

        store.stop();
        handle.await.unwrap();
        assert!(!store.is_running());
    }
}
