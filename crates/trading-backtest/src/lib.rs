//! Strategy replay over historical candles.
//!
//! The engine drives the simulated [`trading_agent::Ledger`] with the same
//! strategy the live runner uses and collects trades, snapshots and
//! statistics into a [`BacktestReport`].

mod engine;
mod report;
mod statistics;

pub use engine::{BacktestConfig, BacktestEngine};
pub use report::BacktestReport;
pub use statistics::{BacktestStats, TradeRecord};
