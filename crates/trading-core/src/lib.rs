//! Core types and traits for the intraday trader.
//!
//! This crate provides the foundational building blocks including:
//! - Market data types (Candle, CandleSeries, SeriesSnapshot)
//! - Order records, portfolio snapshots and trading actions
//! - The exchange-session clock
//! - Core traits for strategies, indicators, brokerages and data sources

pub mod clock;
pub mod error;
pub mod traits;
pub mod types;

pub use clock::{Clock, FixedClock, MarketClock, MarketPhase, SessionHours, SystemClock};
pub use error::{TradingError, TradingResult};
pub use traits::*;
pub use types::*;
