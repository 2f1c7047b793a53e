//! Order requests, brokerage orders, filled order records and trading actions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Get the sign for position calculations (+1 for buy, -1 for sell).
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => -Decimal::ONE,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Execute immediately at the best available price
    Market,
    /// Execute at the limit price or better
    Limit,
}

/// How much to trade: a dollar amount or a share count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderAmount {
    Notional(Decimal),
    Shares(Decimal),
}

/// Order status as reported by the brokerage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Submitted,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// Check if the order is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

/// Order request for submitting new orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub amount: OrderAmount,
    pub order_type: OrderType,
    /// Required for limit orders
    pub limit_price: Option<Decimal>,
    /// Allow execution outside regular hours
    pub extended_hours: bool,
    /// Idempotency key forwarded to the brokerage
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    /// Market order sized in dollars.
    pub fn market_notional(symbol: impl Into<String>, side: Side, dollars: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            amount: OrderAmount::Notional(dollars),
            order_type: OrderType::Market,
            limit_price: None,
            extended_hours: false,
            client_order_id: None,
        }
    }

    /// Market order sized in shares.
    pub fn market_shares(symbol: impl Into<String>, side: Side, shares: Decimal) -> Self {
        Self {
            amount: OrderAmount::Shares(shares),
            ..Self::market_notional(symbol, side, Decimal::ZERO)
        }
    }

    /// Limit order sized in shares, eligible for extended hours.
    pub fn extended_limit(
        symbol: impl Into<String>,
        side: Side,
        shares: Decimal,
        limit_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            amount: OrderAmount::Shares(shares),
            order_type: OrderType::Limit,
            limit_price: Some(limit_price),
            extended_hours: true,
            client_order_id: None,
        }
    }

    /// Set a client order ID.
    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }
}

/// An order as known to the brokerage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub amount: OrderAmount,
    pub limit_price: Option<Decimal>,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub filled_avg_price: Option<Decimal>,
    pub submitted_at: DateTime<Utc>,
}

impl BrokerOrder {
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }
}

/// A filled buy or sell as booked by the agent.
///
/// `token` is the id of the candle the decision was made on and is what keeps
/// the strategy from buying twice on the same bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub token: String,
    pub symbol: String,
    pub time: DateTime<Utc>,
    /// Effective fill price
    pub price: Decimal,
    /// Signed share delta: positive when bought, negative when sold
    pub share: Decimal,
    /// Buy capacity left after this fill
    pub remain_portion: i32,
}

impl OrderRecord {
    pub fn is_buy(&self) -> bool {
        self.share > Decimal::ZERO
    }

    /// Signed cash value of the fill.
    pub fn cost(&self) -> Decimal {
        self.price * self.share
    }
}

/// Strategy verdict for one symbol on one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Hold,
    Buy,
    Sell,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Hold => write!(f, "HOLD"),
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
        }
    }
}

/// An action with its size and idempotency token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionMetadata {
    pub action: Action,
    /// Number of portions to buy; zero for hold and sell
    pub amount: u32,
    /// Latest candle id, empty for hold
    pub token: String,
}

impl ActionMetadata {
    pub fn hold() -> Self {
        Self {
            action: Action::Hold,
            amount: 0,
            token: String::new(),
        }
    }

    pub fn buy(token: impl Into<String>) -> Self {
        Self {
            action: Action::Buy,
            amount: 1,
            token: token.into(),
        }
    }

    pub fn sell(token: impl Into<String>) -> Self {
        Self {
            action: Action::Sell,
            amount: 0,
            token: token.into(),
        }
    }
}
