//! Market data for trading: candle history, CSV loading, price collection
//! and file persistence.

mod collector;
mod csv_source;
mod historical;
mod persistence;

pub use collector::{CollectorSettings, QuoteCollector};
pub use csv_source::{parse_timestamp, CsvCandleLoader};
pub use historical::{stitch, HistoricalSeriesStore, StoreSettings};
pub use persistence::{
    append_prices, parse_symbols, read_symbols, OrderHistory, PersistenceError, SnapshotStore,
};

use std::collections::HashMap;
use std::path::Path;
use trading_core::error::DataError;
use trading_core::types::Candle;

/// Load candles per symbol from a CSV file or a directory of CSV files.
pub fn load_csv(path: impl AsRef<Path>) -> Result<HashMap<String, Vec<Candle>>, DataError> {
    CsvCandleLoader::new(path.as_ref())?.load()
}
