//! Brokerage (order execution) trait definition.

use crate::error::BrokerError;
use crate::types::{AccountSummary, BrokerOrder, OrderRequest, Position};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Order execution and account state at a brokerage.
///
/// Implementations must be safe to share between the decision loop and
/// background tasks.
#[async_trait]
pub trait Brokerage: Send + Sync {
    /// Cash, buying power and equity.
    async fn account(&self) -> Result<AccountSummary, BrokerError>;

    /// All open positions.
    async fn positions(&self) -> Result<Vec<Position>, BrokerError>;

    /// Position for one symbol, `None` when flat.
    async fn position(&self, symbol: &str) -> Result<Option<Position>, BrokerError>;

    /// Submit a new order.
    async fn submit_order(&self, request: OrderRequest) -> Result<BrokerOrder, BrokerError>;

    /// Current state of an order.
    async fn order(&self, order_id: &str) -> Result<BrokerOrder, BrokerError>;

    /// Cancel the unfilled remainder of an order.
    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError>;

    /// Re-establish the session after an authentication or transport failure.
    async fn reauthenticate(&self) -> Result<(), BrokerError>;

    /// Shares held for a symbol, zero when flat.
    async fn shares(&self, symbol: &str) -> Result<Decimal, BrokerError> {
        Ok(self
            .position(symbol)
            .await?
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO))
    }

    /// Get the broker name.
    fn name(&self) -> &str;
}
