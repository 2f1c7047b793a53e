//! Backtest over candles loaded from CSV files.

use chrono::{DateTime, Duration, Utc};
use std::fmt::Write as _;
use trading_backtest::{BacktestConfig, BacktestEngine, BacktestReport};
use trading_data::load_csv;
use trading_strategies::{AlphaConfig, AlphaStrategy};

fn write_csv(path: &std::path::Path, closes: &[f64]) {
    let start = DateTime::parse_from_rfc3339("2024-03-04T14:30:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let mut body = String::from("Date,Open,High,Low,Close,Volume\n");
    for (i, close) in closes.iter().enumerate() {
        let time = start + Duration::minutes(5 * i as i64);
        writeln!(
            body,
            "{},{close},{},{},{close},1000",
            time.format("%Y-%m-%d %H:%M:%S"),
            close + 0.5,
            close - 0.5
        )
        .unwrap();
    }
    std::fs::write(path, body).unwrap();
}

#[test]
fn test_backtest_from_csv_directory() {
    let dir = tempfile::tempdir().unwrap();
    let closes: Vec<f64> = (0..240)
        .map(|i| 50.0 + (i as f64 * 0.2).sin() * 4.0)
        .collect();
    write_csv(&dir.path().join("AAPL.csv"), &closes);
    write_csv(&dir.path().join("MSFT.csv"), &closes[40..]);

    let data = load_csv(dir.path()).unwrap();
    assert_eq!(data["MSFT"].len(), 200);

    let strategy = AlphaStrategy::new(AlphaConfig::default()).unwrap();
    let report = BacktestEngine::new(BacktestConfig {
        lookback: 200,
        ..BacktestConfig::default()
    })
    .run(&strategy, data, None)
    .unwrap();

    assert_eq!(report.strategy, "alpha");
    assert_eq!(report.stats.steps_processed, 240);
    assert_eq!(report.stats.equity_curve.len(), 240);
    // Liquidated at the end
    assert!(report.final_snapshot.active_orders.values().all(Vec::is_empty));
    assert_eq!(report.final_snapshot.remain_portion, 10);
    // Hourly over a span just short of 20 hours, starting at the first step
    assert_eq!(report.snapshots.len(), 20);

    let parsed: BacktestReport = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(parsed.final_snapshot, report.final_snapshot);
}
