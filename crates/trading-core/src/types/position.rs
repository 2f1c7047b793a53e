//! Brokerage positions and account summary.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A long position in a single security as reported by the brokerage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Number of shares, fractional allowed
    pub quantity: Decimal,
    /// Average entry price
    pub avg_entry_price: Decimal,
    /// Current market price
    pub current_price: Decimal,
}

impl Position {
    pub fn new(symbol: impl Into<String>, quantity: Decimal, avg_entry_price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            avg_entry_price,
            current_price: avg_entry_price,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == Decimal::ZERO
    }

    /// Market value (quantity * current_price).
    pub fn market_value(&self) -> Decimal {
        self.quantity * self.current_price
    }

    /// Cost basis (quantity * avg_entry_price).
    pub fn cost_basis(&self) -> Decimal {
        self.quantity * self.avg_entry_price
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.market_value() - self.cost_basis()
    }
}

/// Account balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountSummary {
    /// Settled cash
    pub cash: Decimal,
    /// Cash available for new orders
    pub buying_power: Decimal,
    /// Cash plus market value of all positions
    pub equity: Decimal,
}
