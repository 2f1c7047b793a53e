//! Technical indicators for the intraday trader.
//!
//! This crate provides:
//! - Rolling primitives (SMA, EMA, weighted smoothing, rolling min/max/std)
//! - Momentum indicators (RSI, term lines)
//! - Volatility indicators (Bollinger Bands)
//! - Boolean signals (main-force entry / pulling-up, golden cross)
//! - [`IndicatorEngine`], which turns indicator requests into a `SeriesSnapshot`
//!
//! All outputs are aligned to the input length with NaN during warm-up.

pub mod engine;
pub mod momentum;
pub mod rolling;
pub mod signals;
pub mod volatility;

pub use engine::{indicator_for, IndicatorEngine};
pub use momentum::{Rsi, TermLine};
pub use signals::{GoldenCross, MainForce};
pub use volatility::BollingerBands;
