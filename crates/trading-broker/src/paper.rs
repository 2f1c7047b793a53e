//! In-memory brokerage for paper trading and tests.
//!
//! Implements order execution, quotes and a replayed candle feed so a whole
//! session can run without a network connection.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use trading_core::error::{BrokerError, DataError};
use trading_core::traits::{Brokerage, CandleSource, QuoteSource};
use trading_core::types::{
    AccountSummary, BrokerOrder, Candle, HistorySpan, OrderAmount, OrderRequest, OrderStatus,
    OrderType, Position, SessionBounds, Side, Timeframe,
};
use uuid::Uuid;

/// When submitted orders are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Marketable orders fill at submission
    Immediate,
    /// Orders rest until [`PaperBroker::fill_pending`] is called
    Deferred,
    /// Orders fill this share of their quantity at submission and rest
    Partial(Decimal),
}

#[derive(Debug, Default)]
struct PaperState {
    cash: Decimal,
    positions: HashMap<String, Position>,
    orders: HashMap<String, BrokerOrder>,
    prices: HashMap<String, Decimal>,
    candles: HashMap<String, Vec<Candle>>,
    released: HashMap<String, usize>,
}

impl PaperState {
    fn price(&self, symbol: &str) -> Result<Decimal, BrokerError> {
        self.prices
            .get(symbol)
            .copied()
            .ok_or_else(|| BrokerError::PriceUnavailable(symbol.to_string()))
    }

    fn equity(&self) -> Decimal {
        self.cash
            + self
                .positions
                .values()
                .map(|p| {
                    let price = self.prices.get(&p.symbol).copied().unwrap_or(p.avg_entry_price);
                    p.quantity * price
                })
                .sum::<Decimal>()
    }

    fn held(&self, symbol: &str) -> Decimal {
        self.positions
            .get(symbol)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO)
    }

    /// Execute up to `quantity` more shares of an order at `price`.
    fn execute(&mut self, order_id: &str, quantity: Decimal, price: Decimal) -> Result<(), BrokerError> {
        let order = self
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| BrokerError::OrderNotFound(order_id.to_string()))?;
        if order.status.is_terminal() || quantity <= Decimal::ZERO {
            return Ok(());
        }

        let value = quantity * price;
        match order.side {
            Side::Buy => {
                self.cash -= value;
                let position = self
                    .positions
                    .entry(order.symbol.clone())
                    .or_insert_with(|| Position::new(&order.symbol, Decimal::ZERO, price));
                let cost = position.cost_basis() + value;
                position.quantity += quantity;
                position.avg_entry_price = cost / position.quantity;
                position.current_price = price;
            }
            Side::Sell => {
                self.cash += value;
                if let Some(position) = self.positions.get_mut(&order.symbol) {
                    position.quantity -= quantity;
                    position.current_price = price;
                    if position.quantity <= Decimal::ZERO {
                        self.positions.remove(&order.symbol);
                    }
                }
            }
        }

        let total = order_quantity(&order, price);
        if let Some(stored) = self.orders.get_mut(order_id) {
            let filled_before = stored.filled_quantity;
            stored.filled_quantity += quantity;
            stored.filled_avg_price = Some(match stored.filled_avg_price {
                Some(avg) => (avg * filled_before + value) / stored.filled_quantity,
                None => price,
            });
            stored.status = if stored.filled_quantity >= total {
                OrderStatus::Filled
            } else {
                OrderStatus::PartiallyFilled
            };
        }
        Ok(())
    }
}

/// Share count of an order; notional orders are converted at `price`.
fn order_quantity(order: &BrokerOrder, price: Decimal) -> Decimal {
    match order.amount {
        OrderAmount::Shares(shares) => shares,
        OrderAmount::Notional(dollars) if price > Decimal::ZERO => dollars / price,
        OrderAmount::Notional(_) => Decimal::ZERO,
    }
}

/// Paper brokerage holding cash, positions, orders and prices in memory.
pub struct PaperBroker {
    state: Mutex<PaperState>,
    fill_mode: Mutex<FillMode>,
    slippage_pct: Decimal,
}

impl PaperBroker {
    /// Create a paper broker with starting cash.
    pub fn new(initial_cash: Decimal) -> Self {
        Self {
            state: Mutex::new(PaperState {
                cash: initial_cash,
                ..PaperState::default()
            }),
            fill_mode: Mutex::new(FillMode::Immediate),
            slippage_pct: Decimal::ZERO,
        }
    }

    /// Set slippage percentage applied against the trader on every fill.
    pub fn with_slippage(mut self, slippage_pct: Decimal) -> Self {
        self.slippage_pct = slippage_pct;
        self
    }

    pub fn with_fill_mode(self, mode: FillMode) -> Self {
        self.set_fill_mode(mode);
        self
    }

    pub fn set_fill_mode(&self, mode: FillMode) {
        match self.fill_mode.lock() {
            Ok(mut guard) => *guard = mode,
            Err(poisoned) => *poisoned.into_inner() = mode,
        }
    }

    fn fill_mode(&self) -> FillMode {
        match self.fill_mode.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn state(&self) -> MutexGuard<'_, PaperState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        let mut state = self.state();
        state.prices.insert(symbol.to_string(), price);
        if let Some(position) = state.positions.get_mut(symbol) {
            position.current_price = price;
        }
    }

    pub fn update_prices(&self, prices: &HashMap<String, Decimal>) {
        for (symbol, price) in prices {
            self.set_price(symbol, *price);
        }
    }

    /// Seed a holding, e.g. to mirror an account before a session.
    pub fn set_position(&self, symbol: &str, quantity: Decimal, avg_entry_price: Decimal) {
        let mut state = self.state();
        if quantity <= Decimal::ZERO {
            state.positions.remove(symbol);
        } else {
            state
                .positions
                .insert(symbol.to_string(), Position::new(symbol, quantity, avg_entry_price));
        }
    }

    pub fn cash(&self) -> Decimal {
        self.state().cash
    }

    /// Candles replayed through [`CandleSource::candles`]. The first
    /// `preload` are visible immediately; [`advance`](Self::advance) reveals
    /// the rest one at a time.
    pub fn load_candles(&self, symbol: &str, mut candles: Vec<Candle>, preload: usize) {
        candles.sort_by_key(|c| c.timestamp);
        let released = preload.min(candles.len());
        let mut state = self.state();
        if let Some(last) = candles[..released].last() {
            if let Some(price) = Decimal::from_f64_retain(last.close) {
                state.prices.insert(symbol.to_string(), price.round_dp(4));
            }
        }
        state.released.insert(symbol.to_string(), released);
        state.candles.insert(symbol.to_string(), candles);
    }

    /// Reveal the next candle of every replayed symbol and move its price to
    /// that candle's close. Returns the number of symbols that advanced.
    pub fn advance(&self) -> usize {
        let mut state = self.state();
        let mut updates = Vec::new();
        for (symbol, candles) in &state.candles {
            let released = state.released.get(symbol).copied().unwrap_or(0);
            if released < candles.len() {
                updates.push((symbol.clone(), released + 1, candles[released].close));
            }
        }

        for (symbol, released, close) in &updates {
            state.released.insert(symbol.clone(), *released);
            if let Some(price) = Decimal::from_f64_retain(*close) {
                let price = price.round_dp(4);
                state.prices.insert(symbol.clone(), price);
                if let Some(position) = state.positions.get_mut(symbol) {
                    position.current_price = price;
                }
            }
        }
        updates.len()
    }

    /// Whether every replayed symbol has revealed all of its candles.
    pub fn replay_finished(&self) -> bool {
        let state = self.state();
        state
            .candles
            .iter()
            .all(|(symbol, candles)| state.released.get(symbol).copied().unwrap_or(0) >= candles.len())
    }

    /// Execute every resting order at the current price.
    pub fn fill_pending(&self) -> Result<usize, BrokerError> {
        let mut state = self.state();
        let pending: Vec<BrokerOrder> = state
            .orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect();

        let mut filled = 0;
        for order in pending {
            let price = self.fill_price(order.side, state.price(&order.symbol)?);
            let remaining = order_quantity(&order, price) - order.filled_quantity;
            state.execute(&order.id, remaining, price)?;
            filled += 1;
        }
        Ok(filled)
    }

    fn fill_price(&self, side: Side, market_price: Decimal) -> Decimal {
        let slip = self.slippage_pct / dec!(100);
        match side {
            Side::Buy => market_price * (Decimal::ONE + slip),
            Side::Sell => market_price * (Decimal::ONE - slip),
        }
    }

    fn marketable(order: &BrokerOrder, price: Decimal) -> bool {
        match (order.order_type, order.limit_price) {
            (OrderType::Limit, Some(limit)) => match order.side {
                Side::Buy => price <= limit,
                Side::Sell => price >= limit,
            },
            _ => true,
        }
    }
}

#[async_trait]
impl Brokerage for PaperBroker {
    async fn account(&self) -> Result<AccountSummary, BrokerError> {
        let state = self.state();
        Ok(AccountSummary {
            cash: state.cash,
            buying_power: state.cash,
            equity: state.equity(),
        })
    }

    async fn positions(&self) -> Result<Vec<Position>, BrokerError> {
        Ok(self.state().positions.values().cloned().collect())
    }

    async fn position(&self, symbol: &str) -> Result<Option<Position>, BrokerError> {
        Ok(self.state().positions.get(symbol).cloned())
    }

    async fn submit_order(&self, request: OrderRequest) -> Result<BrokerOrder, BrokerError> {
        let mut state = self.state();
        let market_price = state.price(&request.symbol)?;
        let price = self.fill_price(request.side, market_price);

        let quantity = match request.amount {
            OrderAmount::Shares(shares) => shares,
            OrderAmount::Notional(dollars) => dollars / price,
        };
        if quantity <= Decimal::ZERO {
            return Err(BrokerError::OrderRejected("quantity must be positive".into()));
        }
        match request.side {
            Side::Buy => {
                let required = quantity * price;
                if required > state.cash {
                    return Err(BrokerError::InsufficientFunds {
                        required,
                        available: state.cash,
                    });
                }
            }
            Side::Sell => {
                let held = state.held(&request.symbol);
                if quantity > held {
                    return Err(BrokerError::OrderRejected(format!(
                        "sell {} {} exceeds position {}",
                        quantity, request.symbol, held
                    )));
                }
            }
        }

        let order = BrokerOrder {
            id: Uuid::new_v4().to_string(),
            client_order_id: request.client_order_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            amount: request.amount,
            limit_price: request.limit_price,
            status: OrderStatus::Accepted,
            filled_quantity: Decimal::ZERO,
            filled_avg_price: None,
            submitted_at: Utc::now(),
        };
        let id = order.id.clone();
        let marketable = Self::marketable(&order, price);
        state.orders.insert(id.clone(), order);

        match self.fill_mode() {
            FillMode::Immediate if marketable => state.execute(&id, quantity, price)?,
            FillMode::Partial(ratio) if marketable => {
                state.execute(&id, quantity * ratio, price)?
            }
            _ => {}
        }

        let order = state
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| BrokerError::OrderNotFound(id.clone()))?;
        debug!(
            id = %order.id,
            symbol = %order.symbol,
            side = %order.side,
            status = ?order.status,
            "Paper order submitted"
        );
        Ok(order)
    }

    async fn order(&self, order_id: &str) -> Result<BrokerOrder, BrokerError> {
        self.state()
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| BrokerError::OrderNotFound(order_id.to_string()))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError> {
        let mut state = self.state();
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| BrokerError::OrderNotFound(order_id.to_string()))?;

        if order.status.is_terminal() {
            return Err(BrokerError::OrderRejected("Order already terminal".to_string()));
        }
        order.status = OrderStatus::Canceled;
        info!(id = order_id, filled = %order.filled_quantity, "Paper order canceled");
        Ok(())
    }

    async fn reauthenticate(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "Paper Broker"
    }
}

#[async_trait]
impl QuoteSource for PaperBroker {
    async fn latest_price(&self, symbol: &str, _extended_hours: bool) -> Result<Decimal, BrokerError> {
        self.state().price(symbol)
    }
}

#[async_trait]
impl CandleSource for PaperBroker {
    /// Revealed candles of the replay within `span` of the newest revealed
    /// candle. Interval and bounds are those of the loaded data.
    async fn candles(
        &self,
        symbols: &[String],
        _interval: Timeframe,
        span: HistorySpan,
        _bounds: SessionBounds,
    ) -> Result<HashMap<String, Vec<Candle>>, DataError> {
        let state = self.state();
        let span_ms = span.as_duration().num_milliseconds();

        let mut result = HashMap::new();
        for symbol in symbols {
            let Some(candles) = state.candles.get(symbol) else {
                continue;
            };
            let released = state.released.get(symbol).copied().unwrap_or(0);
            let visible = &candles[..released.min(candles.len())];
            let Some(newest) = visible.last() else {
                continue;
            };
            let floor = newest.timestamp - span_ms;
            result.insert(
                symbol.clone(),
                visible
                    .iter()
                    .filter(|c| c.timestamp >= floor)
                    .map(|c| Candle { id: Uuid::nil(), ..*c })
                    .collect(),
            );
        }
        Ok(result)
    }

    async fn reconnect(&self) -> Result<(), DataError> {
        Ok(())
    }

    fn source_name(&self) -> &str {
        "paper replay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker() -> PaperBroker {
        let broker = PaperBroker::new(dec!(10000));
        broker.set_price("AAPL", dec!(100));
        broker
    }

    #[tokio::test]
    async fn test_notional_buy_fills_immediately() {
        let broker = broker();

        let order = broker
            .submit_order(OrderRequest::market_notional("AAPL", Side::Buy, dec!(500)))
            .await
            .unwrap();

        assert!(order.is_filled());
        assert_eq!(broker.shares("AAPL").await.unwrap(), dec!(5));
        let account = broker.account().await.unwrap();
        assert_eq!(account.cash, dec!(9500));
        assert_eq!(account.equity, dec!(10000));
    }

    #[tokio::test]
    async fn test_sell_with_slippage_credits_cash() {
        let broker = PaperBroker::new(dec!(1000)).with_slippage(dec!(1));
        broker.set_price("AAPL", dec!(100));
        broker.set_position("AAPL", dec!(4), dec!(90));

        broker
            .submit_order(OrderRequest::market_shares("AAPL", Side::Sell, dec!(4)))
            .await
            .unwrap();

        assert_eq!(broker.cash(), dec!(1396));
        assert!(broker.position("AAPL").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejections() {
        let broker = broker();

        let err = broker
            .submit_order(OrderRequest::market_notional("AAPL", Side::Buy, dec!(20000)))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::InsufficientFunds { .. }));

        let err = broker
            .submit_order(OrderRequest::market_shares("AAPL", Side::Sell, dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::OrderRejected(_)));

        let err = broker.latest_price("MSFT", true).await.unwrap_err();
        assert!(matches!(err, BrokerError::PriceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_deferred_and_partial_fills() {
        let broker = broker().with_fill_mode(FillMode::Deferred);

        let order = broker
            .submit_order(OrderRequest::extended_limit("AAPL", Side::Buy, dec!(2), dec!(100)))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Accepted);
        assert_eq!(broker.shares("AAPL").await.unwrap(), Decimal::ZERO);

        assert_eq!(broker.fill_pending().unwrap(), 1);
        assert!(broker.order(&order.id).await.unwrap().is_filled());

        broker.set_fill_mode(FillMode::Partial(dec!(0.5)));
        let sell = broker
            .submit_order(OrderRequest::extended_limit("AAPL", Side::Sell, dec!(2), dec!(100)))
            .await
            .unwrap();
        assert_eq!(sell.status, OrderStatus::PartiallyFilled);
        assert_eq!(sell.filled_quantity, dec!(1));

        broker.cancel_order(&sell.id).await.unwrap();
        assert_eq!(broker.order(&sell.id).await.unwrap().status, OrderStatus::Canceled);
        assert_eq!(broker.shares("AAPL").await.unwrap(), dec!(1));
        assert!(broker.cancel_order(&sell.id).await.is_err());
    }

    #[tokio::test]
    async fn test_replay_feed() {
        let broker = PaperBroker::new(dec!(1000));
        let candles: Vec<Candle> = (0..4)
            .map(|i| Candle::new(i * 300_000, 10.0, 11.0, 9.0, 10.0 + i as f64, 100.0))
            .collect();
        broker.load_candles("NVDA", candles, 2);
        let symbols = vec!["NVDA".to_string()];

        let fetched = broker
            .candles(&symbols, Timeframe::Minute5, HistorySpan::Day, SessionBounds::Extended)
            .await
            .unwrap();
        assert_eq!(fetched["NVDA"].len(), 2);
        assert_eq!(broker.latest_price("NVDA", false).await.unwrap(), dec!(11));

        assert_eq!(broker.advance(), 1);
        assert_eq!(broker.advance(), 1);
        assert_eq!(broker.advance(), 0);
        assert!(broker.replay_finished());
        assert_eq!(broker.latest_price("NVDA", false).await.unwrap(), dec!(13));
    }
}
