//! Core traits for the intraday trader.

mod broker;
mod data_source;
mod indicator;
mod strategy;

pub use broker::Brokerage;
pub use data_source::{CandleSource, QuoteSource};
pub use indicator::{Column, Indicator};
pub use strategy::{SeriesProvider, StrategyConfig, TradingStrategy};
