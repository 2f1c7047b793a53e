//! File persistence: portfolio snapshots, order history, symbol list and
//! collector output.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info};
use trading_core::types::{OrderRecord, PortfolioSnapshot};

/// Persistence errors.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn json_err(path: &Path) -> impl FnOnce(serde_json::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Json {
        path: path.to_path_buf(),
        source,
    }
}

const SNAPSHOT_PREFIX: &str = "snapshot.";
const SNAPSHOT_SUFFIX: &str = ".json";

/// Timestamped portfolio snapshot files in one directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `snapshot.YYYYMMDD_HHMMSS.json` for the snapshot's time.
    pub fn file_name(time: DateTime<Utc>) -> String {
        format!(
            "{SNAPSHOT_PREFIX}{}{SNAPSHOT_SUFFIX}",
            time.format("%Y%m%d_%H%M%S")
        )
    }

    /// First unused path for a snapshot at `time`. Later saves within the
    /// same second get a `_N` suffix before the extension.
    fn free_path(&self, time: DateTime<Utc>) -> PathBuf {
        let path = self.dir.join(Self::file_name(time));
        if !path.exists() {
            return path;
        }
        let stamp = time.format("%Y%m%d_%H%M%S");
        (1u32..)
            .map(|n| {
                self.dir
                    .join(format!("{SNAPSHOT_PREFIX}{stamp}_{n}{SNAPSHOT_SUFFIX}"))
            })
            .find(|p| !p.exists())
            .unwrap_or(path)
    }

    /// Write a snapshot as pretty JSON. Returns the file written; an
    /// existing snapshot is never overwritten.
    pub fn save(&self, snapshot: &PortfolioSnapshot) -> Result<PathBuf, PersistenceError> {
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        let path = self.free_path(snapshot.time);
        let json = serde_json::to_string_pretty(snapshot).map_err(json_err(&path))?;
        fs::write(&path, json).map_err(io_err(&path))?;
        info!(path = %path.display(), net_value = %snapshot.current_net_value, "Saved portfolio snapshot");
        Ok(path)
    }

    /// Most recently created snapshot file, if any.
    ///
    /// Ordered by creation time, then modification time, then file name.
    pub fn latest_path(&self) -> Result<Option<PathBuf>, PersistenceError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&self.dir)(e)),
        };

        let mut candidates: Vec<(SystemTime, String, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_err(&self.dir))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(SNAPSHOT_PREFIX) || !name.ends_with(SNAPSHOT_SUFFIX) {
                continue;
            }
            let path = entry.path();
            let meta = entry.metadata().map_err(io_err(&path))?;
            let stamp = meta
                .created()
                .or_else(|_| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            candidates.push((stamp, name, path));
        }

        Ok(candidates
            .into_iter()
            .max_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)))
            .map(|(_, _, path)| path))
    }

    /// Load the most recent snapshot, `None` when there is none.
    pub fn load_latest(&self) -> Result<Option<PortfolioSnapshot>, PersistenceError> {
        let Some(path) = self.latest_path()? else {
            return Ok(None);
        };
        let json = fs::read_to_string(&path).map_err(io_err(&path))?;
        let snapshot = serde_json::from_str(&json).map_err(json_err(&path))?;
        debug!(path = %path.display(), "Loaded portfolio snapshot");
        Ok(Some(snapshot))
    }
}

/// Per-symbol, per-day order history files holding a JSON array.
#[derive(Debug, Clone)]
pub struct OrderHistory {
    dir: PathBuf,
    tz: Tz,
}

impl OrderHistory {
    /// Dates in file names are taken in `tz`.
    pub fn new(dir: impl Into<PathBuf>, tz: Tz) -> Self {
        Self { dir: dir.into(), tz }
    }

    /// `{SYMBOL}.{YYYYMMDD}.json`
    pub fn path(&self, symbol: &str, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{symbol}.{}.json", date.format("%Y%m%d")))
    }

    /// Records stored for a symbol on a date; empty when the file is absent.
    pub fn load(&self, symbol: &str, date: NaiveDate) -> Result<Vec<OrderRecord>, PersistenceError> {
        let path = self.path(symbol, date);
        match fs::read_to_string(&path) {
            Ok(json) if json.trim().is_empty() => Ok(Vec::new()),
            Ok(json) => serde_json::from_str(&json).map_err(json_err(&path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    /// Read the day's array, append the record and write it back.
    pub fn append(&self, record: &OrderRecord) -> Result<PathBuf, PersistenceError> {
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        let date = record.time.with_timezone(&self.tz).date_naive();
        let mut records = self.load(&record.symbol, date)?;
        records.push(record.clone());

        let path = self.path(&record.symbol, date);
        let json = serde_json::to_string_pretty(&records).map_err(json_err(&path))?;
        fs::write(&path, json).map_err(io_err(&path))?;
        debug!(path = %path.display(), count = records.len(), "Appended order record");
        Ok(path)
    }
}

/// Parse a comma-separated symbol list. Whitespace is trimmed and empty
/// entries are dropped.
pub fn parse_symbols(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read the symbol list file.
pub fn read_symbols(path: impl AsRef<Path>) -> Result<Vec<String>, PersistenceError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(io_err(path))?;
    Ok(parse_symbols(&text))
}

/// Append raw price samples to `{dir}/{YYYYMMDD}/{SYMBOL}.{YYYYMMDD}` as
/// `p1,p2,...,`.
pub fn append_prices(
    dir: &Path,
    date: NaiveDate,
    symbol: &str,
    prices: &[Decimal],
) -> Result<PathBuf, PersistenceError> {
    let day = date.format("%Y%m%d").to_string();
    let day_dir = dir.join(&day);
    fs::create_dir_all(&day_dir).map_err(io_err(&day_dir))?;

    let path = day_dir.join(format!("{symbol}.{day}"));
    let mut line = prices
        .iter()
        .map(Decimal::to_string)
        .collect::<Vec<_>>()
        .join(",");
    line.push(',');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(io_err(&path))?;
    file.write_all(line.as_bytes()).map_err(io_err(&path))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn snapshot(time: DateTime<Utc>, net: Decimal) -> PortfolioSnapshot {
        PortfolioSnapshot {
            time,
            daily_start_net_value: dec!(1000),
            current_net_value: net,
            daily_pnl: net - dec!(1000),
            daily_pnl_percentage: (net - dec!(1000)) / dec!(10),
            remain_portion: 10,
            positions: BTreeMap::new(),
            cash_position: net,
            active_orders: BTreeMap::new(),
            active_pnl: BTreeMap::new(),
            active_pnl_percentage: BTreeMap::new(),
        }
    }

    fn record(symbol: &str, time: DateTime<Utc>, share: Decimal) -> OrderRecord {
        OrderRecord {
            token: "tok".into(),
            symbol: symbol.into(),
            time,
            price: dec!(10),
            share,
            remain_portion: 9,
        }
    }

    #[test]
    fn test_snapshot_round_trip_and_latest() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::new(tmp.path().join("snapshots"));

        assert!(store.load_latest().unwrap().is_none());

        let first = snapshot(utc("2024-03-04T15:00:00Z"), dec!(1000));
        let second = snapshot(utc("2024-03-04T16:00:00Z"), dec!(1010));
        let path = store.save(&first).unwrap();
        assert!(path.ends_with("snapshot.20240304_150000.json"));
        store.save(&second).unwrap();
        fs::write(tmp.path().join("snapshots/notes.txt"), "ignore me").unwrap();

        assert_eq!(store.load_latest().unwrap(), Some(second));
    }

    #[test]
    fn test_same_second_saves_are_kept() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::new(tmp.path());
        let time = utc("2024-03-04T15:00:00Z");

        let first = store.save(&snapshot(time, dec!(1000))).unwrap();
        let second = store.save(&snapshot(time, dec!(1010))).unwrap();
        let third = store.save(&snapshot(time, dec!(1020))).unwrap();

        assert!(first.ends_with("snapshot.20240304_150000.json"));
        assert!(second.ends_with("snapshot.20240304_150000_1.json"));
        assert!(third.ends_with("snapshot.20240304_150000_2.json"));
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 3);
        let latest = store.load_latest().unwrap().unwrap();
        assert_eq!(latest.current_net_value, dec!(1020));
    }

    #[test]
    fn test_malformed_snapshot_is_an_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("snapshot.20240304_150000.json"), "{").unwrap();

        let err = SnapshotStore::new(tmp.path()).load_latest().unwrap_err();
        assert!(matches!(err, PersistenceError::Json { .. }));
    }

    #[test]
    fn test_order_history_appends() {
        let tmp = TempDir::new().unwrap();
        let history = OrderHistory::new(tmp.path(), chrono_tz::America::New_York);
        // 01:00 UTC on the 5th is still the 4th in New York
        let time = utc("2024-03-05T01:00:00Z");

        history.append(&record("AAPL", time, dec!(2))).unwrap();
        let path = history.append(&record("AAPL", time, dec!(-2))).unwrap();

        assert!(path.ends_with("AAPL.20240304.json"));
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let records = history.load("AAPL", date).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].share, dec!(-2));
        assert!(history.load("MSFT", date).unwrap().is_empty());
    }

    #[test]
    fn test_symbol_list() {
        assert_eq!(parse_symbols(" AAPL, MSFT,,NVDA \n"), vec!["AAPL", "MSFT", "NVDA"]);

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("stock_list.txt");
        fs::write(&path, "TSLA,AMD").unwrap();
        assert_eq!(read_symbols(&path).unwrap(), vec!["TSLA", "AMD"]);
        assert!(read_symbols(tmp.path().join("missing.txt")).is_err());
    }

    #[test]
    fn test_append_prices() {
        let tmp = TempDir::new().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();

        append_prices(tmp.path(), date, "AAPL", &[dec!(101.5), dec!(101.75)]).unwrap();
        let path = append_prices(tmp.path(), date, "AAPL", &[dec!(102)]).unwrap();

        assert!(path.ends_with("20240304/AAPL.20240304"));
        assert_eq!(fs::read_to_string(path).unwrap(), "101.5,101.75,102,");
    }
}
