//! Trade execution and portfolio bookkeeping.
//!
//! [`TradingAgent`] turns buy and sell decisions into brokerage orders and
//! confirms their fills; [`Ledger`] holds the cash, positions, open lots and
//! remaining buy capacity behind it and also runs simulated sessions.

mod agent;
mod config;
mod error;
mod ledger;
mod retry;

pub use agent::TradingAgent;
pub use config::{AgentConfig, Liquidation, PortionSizing};
pub use error::AgentError;
pub use ledger::{AccountState, Ledger};
pub use retry::{poll_until, RetryPolicy};
