//! Brokerage integrations: Alpaca over HTTP and an in-memory paper broker.
//!
//! Both implement order execution, quotes and historical candles.

mod alpaca;
mod paper;

pub use alpaca::{AlpacaBroker, AlpacaConfig};
pub use paper::{FillMode, PaperBroker};
