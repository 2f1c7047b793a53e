//! Core data types for the intraday trader.

mod candle;
mod order;
mod portfolio;
mod position;
mod series;
mod timeframe;

pub use candle::{Candle, CandleSeries};
pub use order::{
    Action, ActionMetadata, BrokerOrder, OrderAmount, OrderRecord, OrderRequest, OrderStatus,
    OrderType, Side,
};
pub use portfolio::{daily_pnl_percentage, daily_start_validity, PortfolioSnapshot};
pub use position::{AccountSummary, Position};
pub use series::{columns, IndicatorSpec, SeriesSnapshot};
pub use timeframe::{HistorySpan, SessionBounds, Timeframe};
