//! Candle (OHLCV bar) data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single fixed-interval OHLCV bar.
///
/// Prices are f64 for fast indicator calculations. The `id` is assigned when
/// the candle enters a [`CandleSeries`] and doubles as the idempotency token
/// for orders placed on that bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Unique candle identifier
    pub id: Uuid,
    /// Bar open time, Unix milliseconds (UTC)
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Create a candle without an identifier.
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            id: Uuid::nil(),
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Attach an identifier.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// HLC average.
    #[inline]
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// OHLC average.
    #[inline]
    pub fn average_price(&self) -> f64 {
        (self.open + self.high + self.low + self.close) / 4.0
    }

    /// The candle id as an order token.
    pub fn token(&self) -> String {
        self.id.to_string()
    }

    /// Get the timestamp as a DateTime.
    pub fn datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.timestamp).unwrap_or_default()
    }
}

/// Append-only, timestamp-ordered candle history for one symbol.
#[derive(Debug, Clone, Default)]
pub struct CandleSeries {
    /// Symbol identifier
    pub symbol: String,
    candles: Vec<Candle>,
}

impl CandleSeries {
    /// Create a new empty series.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            candles: Vec::new(),
        }
    }

    /// Append the candles that are strictly newer than the last stored one.
    ///
    /// Incoming candles are sorted by timestamp first; duplicates and anything
    /// at or before the current tail are dropped. Candles without an id get a
    /// fresh v4 id. Returns the number of candles appended.
    pub fn merge_newer(&mut self, incoming: impl IntoIterator<Item = Candle>) -> usize {
        let mut incoming: Vec<Candle> = incoming.into_iter().collect();
        incoming.sort_by_key(|c| c.timestamp);

        let mut last_ts = self.candles.last().map(|c| c.timestamp);
        let mut appended = 0;

        for mut candle in incoming {
            if last_ts.is_some_and(|ts| candle.timestamp <= ts) {
                continue;
            }
            if candle.id.is_nil() {
                candle.id = Uuid::new_v4();
            }
            last_ts = Some(candle.timestamp);
            self.candles.push(candle);
            appended += 1;
        }

        appended
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// All candles, oldest first.
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    /// The most recent candle.
    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Candles strictly older than `timestamp`.
    pub fn before(&self, timestamp: i64) -> &[Candle] {
        let end = self.candles.partition_point(|c| c.timestamp < timestamp);
        &self.candles[..end]
    }

    /// Index of the candle with the given id.
    pub fn position_of(&self, id: Uuid) -> Option<usize> {
        self.candles.iter().position(|c| c.id == id)
    }
}

impl FromIterator<Candle> for CandleSeries {
    fn from_iter<T: IntoIterator<Item = Candle>>(iter: T) -> Self {
        let mut series = CandleSeries::default();
        series.merge_newer(iter);
        series
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64, close: f64) -> Candle {
        Candle::new(ts, close, close + 1.0, close - 1.0, close, 1000.0)
    }

    #[test]
    fn test_candle_prices() {
        let c = Candle::new(1000, 100.0, 110.0, 95.0, 105.0, 1_000_000.0);

        assert!((c.typical_price() - 103.333333).abs() < 0.001);
        assert!((c.average_price() - 102.5).abs() < 0.001);
        assert!(c.id.is_nil());
    }

    #[test]
    fn test_merge_newer_is_append_only() {
        let mut series = CandleSeries::new("AAPL");
        assert_eq!(series.merge_newer([candle(1, 10.0), candle(2, 11.0)]), 2);

        let first_id = series.candles()[0].id;
        assert!(!first_id.is_nil());

        // Overlapping window: only ts=3 is new
        let appended = series.merge_newer([candle(1, 99.0), candle(2, 99.0), candle(3, 12.0)]);
        assert_eq!(appended, 1);
        assert_eq!(series.len(), 3);
        assert_eq!(series.candles()[0].id, first_id);
        assert_eq!(series.candles()[0].close, 10.0);
        assert_eq!(series.last().unwrap().timestamp, 3);
    }

    #[test]
    fn test_merge_newer_sorts_and_dedups() {
        let mut series = CandleSeries::new("AAPL");
        let appended = series.merge_newer([candle(3, 1.0), candle(1, 1.0), candle(3, 2.0)]);

        assert_eq!(appended, 2);
        let timestamps: Vec<i64> = series.candles().iter().map(|c| c.timestamp).collect();
        assert_eq!(timestamps, vec![1, 3]);
    }

    #[test]
    fn test_existing_ids_are_kept() {
        let id = Uuid::new_v4();
        let series: CandleSeries = [candle(5, 1.0).with_id(id)].into_iter().collect();

        assert_eq!(series.position_of(id), Some(0));
        assert_eq!(series.last().unwrap().token(), id.to_string());
    }

    #[test]
    fn test_before() {
        let series: CandleSeries = (1..=5).map(|ts| candle(ts, 1.0)).collect();

        assert_eq!(series.before(3).len(), 2);
        assert_eq!(series.before(0).len(), 0);
        assert_eq!(series.before(100).len(), 5);
    }
}
