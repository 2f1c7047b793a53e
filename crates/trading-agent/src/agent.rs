//! Order execution against a live brokerage.

use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use trading_core::error::BrokerError;
use trading_core::types::{OrderRecord, OrderRequest, OrderType, PortfolioSnapshot, Side};
use trading_core::{Brokerage, Clock, QuoteSource};

use crate::config::{AgentConfig, Liquidation};
use crate::error::AgentError;
use crate::ledger::{AccountState, Ledger};
use crate::retry::poll_until;

/// An extended-hours buy booked before its fill was confirmed.
#[derive(Debug, Clone)]
struct RestingBuy {
    order_id: String,
    token: String,
}

/// Places orders, confirms fills and keeps the ledger in step with the
/// brokerage.
pub struct TradingAgent {
    broker: Arc<dyn Brokerage>,
    quotes: Arc<dyn QuoteSource>,
    clock: Arc<dyn Clock>,
    ledger: Ledger,
    config: AgentConfig,
    resting: BTreeMap<String, Vec<RestingBuy>>,
}

impl TradingAgent {
    /// Read the account and bootstrap the ledger from it and the prior
    /// snapshot.
    pub async fn new(
        symbols: Vec<String>,
        prior: Option<PortfolioSnapshot>,
        broker: Arc<dyn Brokerage>,
        quotes: Arc<dyn QuoteSource>,
        clock: Arc<dyn Clock>,
        config: AgentConfig,
    ) -> Result<Self, AgentError> {
        config.validate()?;

        let account = broker.account().await?;
        let mut positions = BTreeMap::new();
        for symbol in &symbols {
            positions.insert(symbol.clone(), broker.shares(symbol).await?);
        }
        let state = AccountState {
            positions,
            cash: (account.buying_power - config.min_cash_reserve).max(Decimal::ZERO),
            net_value: account.equity,
            time: clock.now(),
        };
        let ledger = Ledger::new(symbols, prior, state, &config);

        info!(broker = broker.name(), equity = %account.equity, "Trading agent ready");
        Ok(Self {
            broker,
            quotes,
            clock,
            ledger,
            config,
            resting: BTreeMap::new(),
        })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn open_orders(&self, symbol: &str) -> &[OrderRecord] {
        self.ledger.open_orders(symbol)
    }

    pub fn remain_portion(&self) -> i32 {
        self.ledger.remain_portion()
    }

    /// Buying power above the cash reserve.
    async fn available_cash(&self) -> Result<Decimal, BrokerError> {
        let account = self.broker.account().await?;
        Ok((account.buying_power - self.config.min_cash_reserve).max(Decimal::ZERO))
    }

    async fn quote(&self, symbol: &str, extended_hours: bool) -> Result<Decimal, AgentError> {
        match self.quotes.latest_price(symbol, extended_hours).await {
            Ok(price) if price > Decimal::ZERO => Ok(price),
            Ok(_) | Err(BrokerError::PriceUnavailable(_)) => {
                Err(AgentError::PriceUnavailable(symbol.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn sync(&mut self, symbol: &str) -> Result<(), BrokerError> {
        let shares = self.broker.shares(symbol).await?;
        let cash = self.available_cash().await?;
        self.ledger.set_position(symbol, shares);
        self.ledger.set_cash(cash);
        Ok(())
    }

    /// Buy one portion of `symbol`.
    ///
    /// In regular hours a notional market order is placed and the position
    /// is polled until it grows. Outside them a limit order at the latest
    /// quote is placed and booked right away. Returns `Ok(None)` when the
    /// fill is never confirmed.
    pub async fn buy(
        &mut self,
        symbol: &str,
        token: &str,
        extended_hours: bool,
    ) -> Result<Option<OrderRecord>, AgentError> {
        self.ledger.ensure_capacity(symbol)?;
        let portion = self.ledger.portion_size();
        let buying_power = self.available_cash().await?;
        if buying_power < portion {
            return Err(AgentError::InsufficientFunds {
                symbol: symbol.to_string(),
                remain_portion: self.ledger.remain_portion(),
                buying_power,
            });
        }

        if extended_hours {
            return self.buy_limit(symbol, token, portion).await.map(Some);
        }

        let before = self.broker.shares(symbol).await?;
        let request = OrderRequest::market_notional(symbol, Side::Buy, portion)
            .with_client_order_id(token);
        let order = self.broker.submit_order(request).await?;
        debug!(id = %order.id, symbol, %portion, "Buy submitted");

        let broker = Arc::clone(&self.broker);
        let owned = symbol.to_string();
        let filled = poll_until(&self.config.buy_poll, || {
            let broker = Arc::clone(&broker);
            let symbol = owned.clone();
            async move {
                let now = broker.shares(&symbol).await?;
                Ok((now > before).then_some(now))
            }
        })
        .await?;

        let Some(after) = filled else {
            warn!(symbol, token, "Order did not go through");
            if let Err(e) = self.broker.cancel_order(&order.id).await {
                debug!(id = %order.id, error = %e, "Cancel after buy timeout failed");
            }
            return Ok(None);
        };

        let shares = after - before;
        let price = match self.broker.order(&order.id).await {
            Ok(state) => state.filled_avg_price.unwrap_or(portion / shares),
            Err(_) => portion / shares,
        };
        let record = self
            .ledger
            .record_buy(symbol, token, price, shares, self.clock.now());
        self.sync(symbol).await?;
        Ok(Some(record))
    }

    async fn buy_limit(&mut self, symbol: &str, token: &str, portion: Decimal) -> Result<OrderRecord, AgentError> {
        let price = self.quote(symbol, true).await?;
        let shares = (portion / price).round_dp_with_strategy(4, RoundingStrategy::ToZero);
        if shares <= Decimal::ZERO {
            return Err(AgentError::InsufficientFunds {
                symbol: symbol.to_string(),
                remain_portion: self.ledger.remain_portion(),
                buying_power: portion,
            });
        }

        let request = OrderRequest::extended_limit(symbol, Side::Buy, shares, price)
            .with_client_order_id(token);
        let order = self.broker.submit_order(request).await?;
        debug!(id = %order.id, symbol, %shares, %price, "Extended-hours buy submitted");

        // Limit orders outside regular hours may rest for a while; book
        // them as placed and settle before selling.
        let record = self
            .ledger
            .record_buy(symbol, token, price, shares, self.clock.now());
        self.resting
            .entry(symbol.to_string())
            .or_default()
            .push(RestingBuy {
                order_id: order.id,
                token: token.to_string(),
            });
        let cash = self.available_cash().await?;
        self.ledger.set_cash(cash);
        Ok(record)
    }

    /// Settle the extended-hours buys of `symbol`. Orders still resting are
    /// canceled and their lots shrink to what filled.
    async fn settle_resting(&mut self, symbol: &str) -> Result<(), BrokerError> {
        let pending = self.resting.remove(symbol).unwrap_or_default();
        for (i, buy) in pending.iter().enumerate() {
            if let Err(e) = self.settle_buy(symbol, buy).await {
                self.resting.insert(symbol.to_string(), pending[i..].to_vec());
                return Err(e);
            }
        }
        Ok(())
    }

    async fn settle_buy(&mut self, symbol: &str, buy: &RestingBuy) -> Result<(), BrokerError> {
        let mut state = self.broker.order(&buy.order_id).await?;
        if !state.status.is_terminal() {
            info!(id = %buy.order_id, symbol, filled = %state.filled_quantity, "Canceling resting buy");
            self.broker.cancel_order(&buy.order_id).await?;
            state = self.broker.order(&buy.order_id).await?;
        }
        self.ledger.settle_lot(symbol, &buy.token, state.filled_quantity);
        Ok(())
    }

    /// Sell the whole position of `symbol`.
    pub async fn clean_all_position(
        &mut self,
        symbol: &str,
        token: &str,
        extended_hours: bool,
    ) -> Result<Option<OrderRecord>, AgentError> {
        self.clean_positions(symbol, token, extended_hours, Liquidation::Full)
            .await
    }

    /// Sell all or part of the position of `symbol`.
    ///
    /// The sell counts as filled once the cash balance has grown by the
    /// configured share of the expected proceeds; the effective price is
    /// that cash delta over the shares sold. A limit order still resting
    /// after the poll is canceled and whatever filled is booked.
    pub async fn clean_positions(
        &mut self,
        symbol: &str,
        token: &str,
        extended_hours: bool,
        liquidation: Liquidation,
    ) -> Result<Option<OrderRecord>, AgentError> {
        if !self.ledger.is_tracked(symbol) {
            return Err(AgentError::UnknownSymbol(symbol.to_string()));
        }
        self.settle_resting(symbol).await?;
        let held = self.broker.shares(symbol).await?;
        if held <= Decimal::ZERO {
            self.ledger.drop_unheld_lots(symbol);
            self.ledger.set_position(symbol, Decimal::ZERO);
            return Err(AgentError::NoPosition(symbol.to_string()));
        }
        let quote = self.quote(symbol, extended_hours).await?;
        let shares = match liquidation {
            Liquidation::Full => held,
            Liquidation::Partial => (held / Decimal::TWO)
                .max(self.config.partial_sell_floor / quote)
                .min(held),
        };

        let Some((sold, price)) = self.sell(symbol, shares, quote, extended_hours).await? else {
            warn!(symbol, token, "Order did not go through");
            return Ok(None);
        };

        let now = self.clock.now();
        let record = if sold >= held {
            self.ledger.record_full_sell(symbol, token, price, sold, now)
        } else {
            let remaining_avg = self
                .broker
                .position(symbol)
                .await?
                .map(|p| p.avg_entry_price)
                .unwrap_or(price);
            self.ledger
                .record_partial_sell(symbol, token, price, sold, remaining_avg, now)
        };
        self.sync(symbol).await?;
        Ok(Some(record))
    }

    /// Place a sell and wait for its proceeds. Returns the shares sold and
    /// the effective price, `None` when nothing filled.
    async fn sell(
        &self,
        symbol: &str,
        shares: Decimal,
        quote: Decimal,
        extended_hours: bool,
    ) -> Result<Option<(Decimal, Decimal)>, AgentError> {
        let cash_before = self.broker.account().await?.cash;
        let request = if extended_hours {
            OrderRequest::extended_limit(symbol, Side::Sell, shares, quote)
        } else {
            OrderRequest::market_shares(symbol, Side::Sell, shares)
        };
        let order = self.broker.submit_order(request).await?;
        debug!(id = %order.id, symbol, %shares, "Sell submitted");

        let expected = quote * shares * self.config.fill_confirmation_ratio;
        let broker = Arc::clone(&self.broker);
        let delta = poll_until(&self.config.sell_poll, || {
            let broker = Arc::clone(&broker);
            async move {
                let delta = broker.account().await?.cash - cash_before;
                Ok((delta >= expected).then_some(delta))
            }
        })
        .await?;

        if let Some(delta) = delta {
            return Ok(Some((shares, delta / shares)));
        }

        let mut state = self.broker.order(&order.id).await?;
        if state.order_type == OrderType::Limit && !state.status.is_terminal() {
            info!(id = %order.id, symbol, filled = %state.filled_quantity, "Canceling unfilled sell");
            self.broker.cancel_order(&order.id).await?;
            state = self.broker.order(&order.id).await?;
        }
        let filled = state.filled_quantity;
        if filled <= Decimal::ZERO {
            return Ok(None);
        }

        let delta = self.broker.account().await?.cash - cash_before;
        let price = if delta > Decimal::ZERO {
            delta / filled
        } else {
            state.filled_avg_price.unwrap_or(quote)
        };
        Ok(Some((filled, price)))
    }

    /// Snapshot of the live account: net value from the brokerage, P&L from
    /// the latest quotes.
    pub async fn snapshot(&self) -> Result<PortfolioSnapshot, AgentError> {
        let account = self.broker.account().await?;
        let prices = self
            .quotes
            .latest_prices(self.ledger.symbols(), true)
            .await?;
        Ok(self
            .ledger
            .snapshot_with(self.clock.now(), account.equity, &prices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;
    use trading_broker::{FillMode, PaperBroker};
    use trading_core::FixedClock;

    fn clock() -> Arc<dyn Clock> {
        let now = DateTime::parse_from_rfc3339("2024-03-04T15:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Arc::new(FixedClock::new(now))
    }

    fn paper(cash: Decimal) -> Arc<PaperBroker> {
        let broker = Arc::new(PaperBroker::new(cash));
        broker.set_price("AAPL", dec!(100));
        broker.set_price("NVDA", dec!(500));
        broker
    }

    async fn agent(broker: &Arc<PaperBroker>, config: AgentConfig) -> TradingAgent {
        TradingAgent::new(
            vec!["AAPL".into(), "NVDA".into()],
            None,
            broker.clone(),
            broker.clone(),
            clock(),
            config,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_buy_confirms_fill() {
        let broker = paper(dec!(10000));
        let mut agent = agent(&broker, AgentConfig::default()).await;

        let record = agent.buy("AAPL", "c1", false).await.unwrap().unwrap();

        assert_eq!(record.share, dec!(10));
        assert_eq!(record.price, dec!(100));
        assert_eq!(record.remain_portion, 9);
        assert_eq!(agent.open_orders("AAPL").len(), 1);
        assert_eq!(agent.ledger().position("AAPL"), dec!(10));
        assert_eq!(agent.ledger().cash(), dec!(9000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_buy_times_out() {
        let broker = Arc::new(PaperBroker::new(dec!(10000)).with_fill_mode(FillMode::Deferred));
        broker.set_price("AAPL", dec!(100));
        let mut agent = agent(&broker, AgentConfig::default()).await;

        let result = agent.buy("AAPL", "c1", false).await.unwrap();

        assert!(result.is_none());
        assert_eq!(agent.remain_portion(), 10);
        assert!(agent.open_orders("AAPL").is_empty());
    }

    #[tokio::test]
    async fn test_extended_hours_buy_is_booked_as_placed() {
        let broker = Arc::new(PaperBroker::new(dec!(10000)).with_fill_mode(FillMode::Deferred));
        broker.set_price("NVDA", dec!(300));
        let mut agent = agent(&broker, AgentConfig::default()).await;

        let record = agent.buy("NVDA", "c1", true).await.unwrap().unwrap();

        assert_eq!(record.price, dec!(300));
        assert_eq!(record.share, dec!(3.3333));
        assert_eq!(agent.remain_portion(), 9);
        assert_eq!(broker.shares("NVDA").await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unfilled_extended_hours_buy_is_dropped_on_sell() {
        let broker = Arc::new(PaperBroker::new(dec!(10000)).with_fill_mode(FillMode::Deferred));
        broker.set_price("NVDA", dec!(300));
        let mut agent = agent(&broker, AgentConfig::default()).await;

        agent.buy("NVDA", "c1", true).await.unwrap().unwrap();
        assert_eq!(agent.open_orders("NVDA").len(), 1);

        let err = agent.clean_all_position("NVDA", "c2", true).await.unwrap_err();
        assert!(matches!(err, AgentError::NoPosition(_)));
        assert!(agent.open_orders("NVDA").is_empty());
        assert_eq!(agent.remain_portion(), 10);
        assert_eq!(agent.ledger().position("NVDA"), Decimal::ZERO);
        // The resting limit was canceled, nothing is left to fill
        assert_eq!(broker.fill_pending().unwrap(), 0);
        assert_eq!(broker.shares("NVDA").await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_filled_extended_hours_buy_sells() {
        let broker = Arc::new(PaperBroker::new(dec!(10000)).with_fill_mode(FillMode::Deferred));
        broker.set_price("NVDA", dec!(300));
        let mut agent = agent(&broker, AgentConfig::default()).await;

        agent.buy("NVDA", "c1", true).await.unwrap().unwrap();
        assert_eq!(broker.fill_pending().unwrap(), 1);
        broker.set_fill_mode(FillMode::Immediate);

        let record = agent
            .clean_all_position("NVDA", "c2", true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.share, dec!(-3.3333));
        assert_eq!(agent.remain_portion(), 10);
        assert!(agent.open_orders("NVDA").is_empty());
    }

    #[tokio::test]
    async fn test_buy_rejected_without_capacity() {
        let broker = paper(dec!(10000));
        let config = AgentConfig {
            default_portions: 1,
            ..AgentConfig::default()
        };
        let mut agent = agent(&broker, config).await;

        agent.buy("AAPL", "c1", false).await.unwrap();
        let err = agent.buy("NVDA", "c2", false).await.unwrap_err();
        assert!(matches!(err, AgentError::InsufficientFunds { remain_portion: 0, .. }));
        assert!(matches!(
            agent.buy("TSLA", "c3", false).await,
            Err(AgentError::UnknownSymbol(_))
        ));
    }

    #[tokio::test]
    async fn test_sell_prices_from_cash_delta() {
        let broker = Arc::new(PaperBroker::new(dec!(10000)).with_slippage(dec!(1)));
        broker.set_price("AAPL", dec!(100));
        broker.set_position("AAPL", dec!(10), dec!(90));
        let mut agent = agent(&broker, AgentConfig::default()).await;

        let record = agent
            .clean_all_position("AAPL", "c2", false)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.share, dec!(-10));
        assert_eq!(record.price, dec!(99));
        assert_eq!(agent.ledger().position("AAPL"), Decimal::ZERO);
        assert_eq!(agent.remain_portion(), 10);
    }

    #[tokio::test]
    async fn test_round_trip_returns_portions() {
        let broker = paper(dec!(10000));
        let mut agent = agent(&broker, AgentConfig::default()).await;

        agent.buy("AAPL", "c1", false).await.unwrap();
        agent.buy("AAPL", "c2", false).await.unwrap();
        assert_eq!(agent.remain_portion(), 8);

        broker.set_price("AAPL", dec!(110));
        let record = agent
            .clean_all_position("AAPL", "c3", false)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.share, dec!(-20));
        assert_eq!(record.price, dec!(110));
        assert_eq!(agent.remain_portion(), 10);
        assert!(agent.open_orders("AAPL").is_empty());
        assert!(matches!(
            agent.clean_all_position("AAPL", "c4", false).await,
            Err(AgentError::NoPosition(_))
        ));
    }

    #[tokio::test]
    async fn test_partial_liquidation_collapses_lots() {
        let broker = paper(dec!(10000));
        let mut agent = agent(&broker, AgentConfig::default()).await;
        agent.buy("AAPL", "c1", false).await.unwrap();
        agent.buy("AAPL", "c2", false).await.unwrap();

        broker.set_price("AAPL", dec!(120));
        let record = agent
            .clean_positions("AAPL", "c3", false, Liquidation::Partial)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.share, dec!(-10));
        assert_eq!(agent.remain_portion(), 9);
        assert_eq!(agent.ledger().position("AAPL"), dec!(10));
        let lots = agent.open_orders("AAPL");
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].token, "c1");
        assert_eq!(lots[0].share, dec!(10));
        assert_eq!(lots[0].price, dec!(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfilled_limit_sell_is_canceled() {
        let broker = paper(dec!(10000));
        broker.set_position("AAPL", dec!(10), dec!(90));
        broker.set_fill_mode(FillMode::Partial(dec!(0.5)));
        let mut agent = agent(&broker, AgentConfig::default()).await;

        let record = agent
            .clean_all_position("AAPL", "c1", true)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.share, dec!(-5));
        assert_eq!(record.price, dec!(100));
        assert_eq!(agent.ledger().position("AAPL"), dec!(5));
        assert_eq!(broker.shares("AAPL").await.unwrap(), dec!(5));
        assert_eq!(broker.positions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_reports_pnl() {
        let broker = paper(dec!(10000));
        let mut agent = agent(&broker, AgentConfig::default()).await;
        agent.buy("NVDA", "c1", false).await.unwrap();

        broker.set_price("NVDA", dec!(550));
        let snap = agent.snapshot().await.unwrap();

        assert_eq!(snap.current_net_value, dec!(10100));
        assert_eq!(snap.daily_start_net_value, dec!(10000));
        assert_eq!(snap.daily_pnl, dec!(100));
        assert_eq!(snap.active_pnl["NVDA"], dec!(100));
        assert_eq!(snap.remain_portion, 9);
        assert_eq!(snap.active_orders["NVDA"][0].token, "c1");
    }
}
