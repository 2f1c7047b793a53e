//! Agent configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::retry::RetryPolicy;

/// How much cash one buy commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PortionSizing {
    /// Fixed dollar amount per buy
    FixedDollar { amount: Decimal },
    /// Cash at session start divided by the remaining portions
    EvenSplit,
}

impl Default for PortionSizing {
    fn default() -> Self {
        PortionSizing::FixedDollar { amount: dec!(1000) }
    }
}

/// How much of a position a sell closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Liquidation {
    #[default]
    Full,
    /// Half the position or the dollar floor, whichever is larger
    Partial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Buy capacity of a fresh session
    pub default_portions: i32,
    /// Cash kept out of trading
    pub min_cash_reserve: Decimal,
    pub sizing: PortionSizing,
    pub liquidation: Liquidation,
    /// Smallest dollar value a partial sell closes
    pub partial_sell_floor: Decimal,
    /// Share of the expected proceeds that must reach cash before a sell
    /// counts as filled
    pub fill_confirmation_ratio: Decimal,
    pub buy_poll: RetryPolicy,
    pub sell_poll: RetryPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_portions: 10,
            min_cash_reserve: Decimal::ZERO,
            sizing: PortionSizing::default(),
            liquidation: Liquidation::Full,
            partial_sell_floor: dec!(500),
            fill_confirmation_ratio: dec!(0.8),
            buy_poll: RetryPolicy::buy_fill(),
            sell_poll: RetryPolicy::sell_fill(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.default_portions <= 0 {
            return Err(AgentError::InvalidConfig(
                "default_portions must be positive".into(),
            ));
        }
        if self.min_cash_reserve < Decimal::ZERO || self.partial_sell_floor < Decimal::ZERO {
            return Err(AgentError::InvalidConfig(
                "min_cash_reserve and partial_sell_floor must not be negative".into(),
            ));
        }
        if let PortionSizing::FixedDollar { amount } = self.sizing {
            if amount <= Decimal::ZERO {
                return Err(AgentError::InvalidConfig(
                    "portion amount must be positive".into(),
                ));
            }
        }
        if self.fill_confirmation_ratio <= Decimal::ZERO || self.fill_confirmation_ratio > Decimal::ONE {
            return Err(AgentError::InvalidConfig(
                "fill_confirmation_ratio must be in (0, 1]".into(),
            ));
        }
        if self.buy_poll.max_attempts == 0 || self.sell_poll.max_attempts == 0 {
            return Err(AgentError::InvalidConfig(
                "poll attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
