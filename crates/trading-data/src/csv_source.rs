//! CSV candle loader.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use trading_core::error::DataError;
use trading_core::types::Candle;

/// CSV record format. The symbol column is optional; without it the file
/// stem names the symbol.
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(alias = "Symbol", alias = "ticker", alias = "Ticker", default)]
    symbol: Option<String>,
    #[serde(
        alias = "Date",
        alias = "timestamp",
        alias = "Timestamp",
        alias = "Datetime",
        alias = "time"
    )]
    date: String,
    #[serde(alias = "Open")]
    open: f64,
    #[serde(alias = "High")]
    high: f64,
    #[serde(alias = "Low")]
    low: f64,
    #[serde(alias = "Close")]
    close: f64,
    #[serde(alias = "Volume", default)]
    volume: f64,
}

/// Loads candles from a CSV file, or from every `.csv` file in a directory.
pub struct CsvCandleLoader {
    path: PathBuf,
}

impl CsvCandleLoader {
    /// Create a loader for a file or directory that must exist.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, DataError> {
        let path = path.into();
        if !path.exists() {
            return Err(DataError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Candles per symbol, sorted by timestamp.
    pub fn load(&self) -> Result<HashMap<String, Vec<Candle>>, DataError> {
        let mut by_symbol: HashMap<String, Vec<Candle>> = HashMap::new();

        if self.path.is_dir() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(&self.path)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")))
                .collect();
            files.sort();
            for file in files {
                Self::load_file(&file, &mut by_symbol)?;
            }
        } else {
            Self::load_file(&self.path, &mut by_symbol)?;
        }

        for candles in by_symbol.values_mut() {
            candles.sort_by_key(|c| c.timestamp);
            candles.dedup_by_key(|c| c.timestamp);
        }

        info!(
            path = %self.path.display(),
            symbols = by_symbol.len(),
            candles = by_symbol.values().map(Vec::len).sum::<usize>(),
            "Loaded CSV candles"
        );
        Ok(by_symbol)
    }

    /// Candles for one symbol.
    pub fn load_symbol(&self, symbol: &str) -> Result<Vec<Candle>, DataError> {
        self.load()?
            .remove(symbol)
            .ok_or_else(|| DataError::SymbolNotFound(symbol.to_string()))
    }

    fn load_file(
        path: &Path,
        by_symbol: &mut HashMap<String, Vec<Candle>>,
    ) -> Result<(), DataError> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_uppercase())
            .unwrap_or_default();

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| DataError::ParseError(e.to_string()))?;

        let mut count = 0;
        for result in reader.deserialize() {
            let record: CsvRecord = result.map_err(|e| DataError::ParseError(e.to_string()))?;
            let timestamp = parse_timestamp(&record.date)?;
            let symbol = match record.symbol {
                Some(symbol) if !symbol.is_empty() => symbol,
                _ => stem.clone(),
            };

            by_symbol.entry(symbol).or_default().push(Candle::new(
                timestamp,
                record.open,
                record.high,
                record.low,
                record.close,
                record.volume,
            ));
            count += 1;
        }

        debug!(path = %path.display(), rows = count, "Read CSV file");
        Ok(())
    }
}

/// Parse various timestamp formats into epoch milliseconds. Naive times are
/// taken as UTC.
pub fn parse_timestamp(date_str: &str) -> Result<i64, DataError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(date_str) {
        return Ok(dt.timestamp_millis());
    }

    let datetime_formats = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
    for format in datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(date_str, format) {
            return Ok(dt.and_utc().timestamp_millis());
        }
    }

    let date_formats = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
    for format in date_formats {
        if let Ok(d) = NaiveDate::parse_from_str(date_str, format) {
            return Ok(d.and_time(NaiveTime::MIN).and_utc().timestamp_millis());
        }
    }

    // Unix timestamp; milliseconds if > 10 digits
    if let Ok(ts) = date_str.parse::<i64>() {
        return Ok(if ts > 10_000_000_000 { ts } else { ts * 1000 });
    }

    Err(DataError::ParseError(format!(
        "Could not parse date: {}",
        date_str
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("2024-01-15").unwrap(), 1_705_276_800_000);
        assert_eq!(
            parse_timestamp("2024-01-15 10:30:00").unwrap(),
            1_705_276_800_000 + 37_800_000
        );
        assert_eq!(
            parse_timestamp("2024-01-15T10:30:00-05:00").unwrap(),
            1_705_276_800_000 + 37_800_000 + 18_000_000
        );
        assert_eq!(parse_timestamp("1705312800000").unwrap(), 1_705_312_800_000);
        assert_eq!(parse_timestamp("1705312800").unwrap(), 1_705_312_800_000);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_load_with_symbol_column() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bars.csv");
        fs::write(
            &path,
            "symbol,timestamp,open,high,low,close,volume\n\
             MSFT,1705312800,10,11,9,10.5,100\n\
             AAPL,1705313100,20,21,19,20.5,200\n\
             MSFT,1705312500,9,10,8,9.5,100\n",
        )
        .unwrap();

        let loaded = CsvCandleLoader::new(&path).unwrap().load().unwrap();
        assert_eq!(loaded.len(), 2);
        let msft = &loaded["MSFT"];
        assert_eq!(msft.len(), 2);
        assert!(msft[0].timestamp < msft[1].timestamp);
        assert_eq!(msft[1].close, 10.5);
    }

    #[test]
    fn test_load_directory_uses_file_stem() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("nvda.csv"),
            "Date,Open,High,Low,Close,Volume\n2024-01-15 10:30:00,1,2,0.5,1.5,10\n",
        )
        .unwrap();
        fs::write(tmp.path().join("readme.txt"), "not data").unwrap();

        let loader = CsvCandleLoader::new(tmp.path()).unwrap();
        let candles = loader.load_symbol("NVDA").unwrap();
        assert_eq!(candles.len(), 1);
        assert!(matches!(
            loader.load_symbol("TSLA"),
            Err(DataError::SymbolNotFound(_))
        ));
    }

    #[test]
    fn test_missing_path() {
        assert!(CsvCandleLoader::new("/definitely/not/here.csv").is_err());
    }
}
