//! Agent errors.

use rust_decimal::Decimal;
use thiserror::Error;
use trading_core::error::BrokerError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Insufficient funds for {symbol}: {remain_portion} portions left, buying power {buying_power}")]
    InsufficientFunds {
        symbol: String,
        remain_portion: i32,
        buying_power: Decimal,
    },

    #[error("Symbol is not traded by this agent: {0}")]
    UnknownSymbol(String),

    #[error("No position to sell in {0}")]
    NoPosition(String),

    #[error("No price available for {0}")]
    PriceUnavailable(String),

    #[error("Invalid agent configuration: {0}")]
    InvalidConfig(String),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

impl AgentError {
    /// Failures that are expected to clear up on a later cycle.
    pub fn is_transient(&self) -> bool {
        match self {
            AgentError::Broker(e) => e.is_transient(),
            AgentError::PriceUnavailable(_) => true,
            _ => false,
        }
    }
}
