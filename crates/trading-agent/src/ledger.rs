//! Cash, position and open-order bookkeeping.
//!
//! The ledger is pure state. The live agent feeds it confirmed fills and
//! broker balances; backtests drive it through the `simulate_*` operations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};
use trading_core::types::{daily_pnl_percentage, OrderRecord, PortfolioSnapshot};

use crate::config::{AgentConfig, PortionSizing};
use crate::error::AgentError;

/// Account state read when a session starts.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountState {
    pub positions: BTreeMap<String, Decimal>,
    /// Cash available for trading, reserve already excluded
    pub cash: Decimal,
    pub net_value: Decimal,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    symbols: Vec<String>,
    positions: BTreeMap<String, Decimal>,
    cash: Decimal,
    open_orders: BTreeMap<String, Vec<OrderRecord>>,
    remain_portion: i32,
    portion_size: Decimal,
    min_cash_reserve: Decimal,
    /// Snapshot the session started from
    start: PortfolioSnapshot,
}

impl Ledger {
    /// Bootstrap from live account state and, when present, the latest
    /// persisted snapshot.
    ///
    /// Without a prior snapshot the session starts from the account's net
    /// value with the configured number of portions. With one, its open
    /// orders and remaining portions carry over.
    pub fn new(
        symbols: Vec<String>,
        prior: Option<PortfolioSnapshot>,
        account: AccountState,
        config: &AgentConfig,
    ) -> Self {
        let start = prior.unwrap_or_else(|| PortfolioSnapshot {
            time: account.time,
            daily_start_net_value: account.net_value,
            current_net_value: account.net_value,
            daily_pnl: Decimal::ZERO,
            daily_pnl_percentage: Decimal::ZERO,
            remain_portion: config.default_portions,
            positions: account.positions.clone(),
            cash_position: account.cash,
            active_orders: empty_orders(&symbols),
            active_pnl: zeros(&symbols),
            active_pnl_percentage: zeros(&symbols),
        });

        let mut ledger = Self::from_start(symbols, start, account.positions, account.cash, config);
        for symbol in ledger.symbols.clone() {
            if ledger.position(&symbol) <= Decimal::ZERO {
                ledger.drop_unheld_lots(&symbol);
            }
        }
        ledger
    }

    /// Bootstrap a simulated session. Positions are rebuilt from the open
    /// orders of the prior snapshot and cash is taken from it; without one
    /// the session starts flat with `starting_cash`.
    pub fn simulated(
        symbols: Vec<String>,
        prior: Option<PortfolioSnapshot>,
        starting_cash: Decimal,
        time: DateTime<Utc>,
        config: &AgentConfig,
    ) -> Self {
        let start = prior.unwrap_or_else(|| {
            let net_value = config.min_cash_reserve + starting_cash;
            PortfolioSnapshot {
                time,
                daily_start_net_value: net_value,
                current_net_value: net_value,
                daily_pnl: Decimal::ZERO,
                daily_pnl_percentage: Decimal::ZERO,
                remain_portion: config.default_portions,
                positions: zeros(&symbols),
                cash_position: starting_cash,
                active_orders: empty_orders(&symbols),
                active_pnl: zeros(&symbols),
                active_pnl_percentage: zeros(&symbols),
            }
        });

        let positions = symbols
            .iter()
            .map(|symbol| {
                let shares = start
                    .active_orders
                    .get(symbol)
                    .map(|orders| orders.iter().map(|o| o.share).sum())
                    .unwrap_or(Decimal::ZERO);
                (symbol.clone(), shares)
            })
            .collect();
        let cash = start.cash_position;

        Self::from_start(symbols, start, positions, cash, config)
    }

    fn from_start(
        symbols: Vec<String>,
        start: PortfolioSnapshot,
        mut positions: BTreeMap<String, Decimal>,
        cash: Decimal,
        config: &AgentConfig,
    ) -> Self {
        let remain_portion = start.remain_portion;
        let portion_size = match &config.sizing {
            PortionSizing::FixedDollar { amount } => *amount,
            PortionSizing::EvenSplit if remain_portion > 0 => cash / Decimal::from(remain_portion),
            PortionSizing::EvenSplit => Decimal::ZERO,
        };

        let mut open_orders = start.active_orders.clone();
        for symbol in &symbols {
            open_orders.entry(symbol.clone()).or_default();
            positions.entry(symbol.clone()).or_insert(Decimal::ZERO);
        }

        info!(
            symbols = symbols.len(),
            remain_portion,
            %portion_size,
            %cash,
            "Ledger initialised"
        );
        Self {
            symbols,
            positions,
            cash,
            open_orders,
            remain_portion,
            portion_size,
            min_cash_reserve: config.min_cash_reserve,
            start,
        }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn is_tracked(&self, symbol: &str) -> bool {
        self.symbols.iter().any(|s| s == symbol)
    }

    pub fn remain_portion(&self) -> i32 {
        self.remain_portion
    }

    pub fn portion_size(&self) -> Decimal {
        self.portion_size
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn min_cash_reserve(&self) -> Decimal {
        self.min_cash_reserve
    }

    pub fn position(&self, symbol: &str) -> Decimal {
        self.positions.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn positions(&self) -> &BTreeMap<String, Decimal> {
        &self.positions
    }

    /// Open lots of a symbol, oldest first.
    pub fn open_orders(&self, symbol: &str) -> &[OrderRecord] {
        self.open_orders.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn start_snapshot(&self) -> &PortfolioSnapshot {
        &self.start
    }

    /// Start-of-day net value for a snapshot taken at `time`.
    ///
    /// The start snapshot's own daily start value holds while it is fresh;
    /// after that its current value becomes the new day's start.
    pub fn daily_start_net_value(&self, time: DateTime<Utc>) -> Decimal {
        if self.start.carries_daily_start(time) {
            self.start.daily_start_net_value
        } else {
            self.start.current_net_value
        }
    }

    /// Unrealized P&L of a symbol's open lots at `price`.
    pub fn pnl(&self, symbol: &str, price: Decimal) -> Decimal {
        self.open_orders(symbol)
            .iter()
            .map(|o| o.share * (price - o.price))
            .sum()
    }

    /// Unrealized P&L as a percentage of the open lots' cost.
    pub fn pnl_percentage(&self, symbol: &str, price: Decimal) -> Decimal {
        let cost: Decimal = self.open_orders(symbol).iter().map(OrderRecord::cost).sum();
        if cost > Decimal::ZERO {
            self.pnl(symbol, price) / cost * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        }
    }

    /// Snapshot at `time` given the net value and latest prices. Symbols
    /// without a price are left out of the P&L maps.
    pub fn snapshot_with(
        &self,
        time: DateTime<Utc>,
        net_value: Decimal,
        prices: &HashMap<String, Decimal>,
    ) -> PortfolioSnapshot {
        let start = self.daily_start_net_value(time);
        let mut active_pnl = BTreeMap::new();
        let mut active_pnl_percentage = BTreeMap::new();
        for symbol in &self.symbols {
            if let Some(price) = prices.get(symbol) {
                active_pnl.insert(symbol.clone(), self.pnl(symbol, *price));
                active_pnl_percentage.insert(symbol.clone(), self.pnl_percentage(symbol, *price));
            }
        }

        PortfolioSnapshot {
            time,
            daily_start_net_value: start,
            current_net_value: net_value,
            daily_pnl: net_value - start,
            daily_pnl_percentage: daily_pnl_percentage(start, net_value, self.min_cash_reserve),
            remain_portion: self.remain_portion,
            positions: self.positions.clone(),
            cash_position: self.cash,
            active_orders: self.open_orders.clone(),
            active_pnl,
            active_pnl_percentage,
        }
    }

    /// Fail unless the symbol is traded and a portion is left.
    pub fn ensure_capacity(&self, symbol: &str) -> Result<(), AgentError> {
        if !self.is_tracked(symbol) {
            return Err(AgentError::UnknownSymbol(symbol.to_string()));
        }
        if self.remain_portion <= 0 {
            return Err(AgentError::InsufficientFunds {
                symbol: symbol.to_string(),
                remain_portion: self.remain_portion,
                buying_power: self.cash,
            });
        }
        Ok(())
    }

    pub fn set_position(&mut self, symbol: &str, shares: Decimal) {
        self.positions.insert(symbol.to_string(), shares);
    }

    pub fn set_cash(&mut self, cash: Decimal) {
        self.cash = cash;
    }

    /// Book a filled buy as a new open lot.
    pub fn record_buy(
        &mut self,
        symbol: &str,
        token: &str,
        price: Decimal,
        shares: Decimal,
        time: DateTime<Utc>,
    ) -> OrderRecord {
        self.remain_portion -= 1;
        *self.positions.entry(symbol.to_string()).or_default() += shares;
        self.cash -= price * shares;

        let record = OrderRecord {
            token: token.to_string(),
            symbol: symbol.to_string(),
            time,
            price,
            share: shares,
            remain_portion: self.remain_portion,
        };
        self.open_orders
            .entry(symbol.to_string())
            .or_default()
            .push(record.clone());
        info!(?record, "Completed order");
        record
    }

    /// Resize a lot that was booked before its fill was known. A lot that
    /// never filled is removed and its portion returned.
    pub fn settle_lot(&mut self, symbol: &str, token: &str, filled: Decimal) {
        let Some(lots) = self.open_orders.get_mut(symbol) else {
            return;
        };
        let Some(index) = lots.iter().position(|o| o.token == token) else {
            return;
        };
        let unfilled = lots[index].share - filled;
        *self.positions.entry(symbol.to_string()).or_default() -= unfilled;
        if filled > Decimal::ZERO {
            lots[index].share = filled;
            debug!(symbol, token, %filled, "Settled resting lot");
        } else {
            let lot = lots.remove(index);
            self.remain_portion += 1;
            warn!(?lot, "Dropped unfilled lot");
        }
    }

    /// Drop every open lot of a symbol the brokerage holds no shares of.
    /// Returns the number of lots dropped.
    pub fn drop_unheld_lots(&mut self, symbol: &str) -> usize {
        let dropped = self
            .open_orders
            .get_mut(symbol)
            .map(std::mem::take)
            .map_or(0, |lots| lots.len());
        if dropped > 0 {
            self.remain_portion += dropped as i32;
            self.positions.insert(symbol.to_string(), Decimal::ZERO);
            warn!(symbol, dropped, "Dropped lots without a position");
        }
        dropped
    }

    /// Book a sell that closed the whole position. Every open lot returns
    /// its portion.
    pub fn record_full_sell(
        &mut self,
        symbol: &str,
        token: &str,
        price: Decimal,
        shares: Decimal,
        time: DateTime<Utc>,
    ) -> OrderRecord {
        let lots = self.open_orders.get(symbol).map(Vec::len).unwrap_or(0);
        self.remain_portion += lots as i32;
        self.positions.insert(symbol.to_string(), Decimal::ZERO);
        self.cash += price * shares;
        self.open_orders.insert(symbol.to_string(), Vec::new());

        let record = OrderRecord {
            token: token.to_string(),
            symbol: symbol.to_string(),
            time,
            price,
            share: -shares,
            remain_portion: self.remain_portion,
        };
        info!(?record, "Completed order");
        record
    }

    /// Book a sell that left part of the position open.
    ///
    /// The open lots collapse into one lot holding the remaining shares at
    /// `remaining_avg_price`; it keeps the token and time of the oldest lot.
    /// Per-lot entry prices are not kept after this.
    pub fn record_partial_sell(
        &mut self,
        symbol: &str,
        token: &str,
        price: Decimal,
        shares: Decimal,
        remaining_avg_price: Decimal,
        time: DateTime<Utc>,
    ) -> OrderRecord {
        let remaining = self.position(symbol) - shares;
        if remaining <= Decimal::ZERO {
            return self.record_full_sell(symbol, token, price, shares, time);
        }

        let lots = self.open_orders.get(symbol).map(Vec::len).unwrap_or(0);
        self.remain_portion += (lots as i32 - 1).max(0);
        self.positions.insert(symbol.to_string(), remaining);
        self.cash += price * shares;

        // Shares bought outside the agent have no lot to collapse into
        if let Some(oldest) = self.open_orders(symbol).first().cloned() {
            let collapsed = OrderRecord {
                token: oldest.token,
                symbol: symbol.to_string(),
                time: oldest.time,
                price: remaining_avg_price,
                share: remaining,
                remain_portion: self.remain_portion,
            };
            debug!(?collapsed, "Collapsed open lots");
            self.open_orders.insert(symbol.to_string(), vec![collapsed]);
        }

        let record = OrderRecord {
            token: token.to_string(),
            symbol: symbol.to_string(),
            time,
            price,
            share: -shares,
            remain_portion: self.remain_portion,
        };
        info!(?record, "Completed partial order");
        record
    }

    /// Buy one portion at `price` without a broker.
    pub fn simulate_buy(
        &mut self,
        symbol: &str,
        token: &str,
        price: Decimal,
        time: DateTime<Utc>,
    ) -> Result<OrderRecord, AgentError> {
        self.ensure_capacity(symbol)?;
        if self.cash < self.portion_size {
            return Err(AgentError::InsufficientFunds {
                symbol: symbol.to_string(),
                remain_portion: self.remain_portion,
                buying_power: self.cash,
            });
        }
        if price <= Decimal::ZERO {
            return Err(AgentError::PriceUnavailable(symbol.to_string()));
        }
        let shares = self.portion_size / price;
        Ok(self.record_buy(symbol, token, price, shares, time))
    }

    /// Sell the whole position at `price` without a broker.
    pub fn simulate_clean_all_position(
        &mut self,
        symbol: &str,
        token: &str,
        price: Decimal,
        time: DateTime<Utc>,
    ) -> Result<OrderRecord, AgentError> {
        if !self.is_tracked(symbol) {
            return Err(AgentError::UnknownSymbol(symbol.to_string()));
        }
        let shares = self.position(symbol);
        if shares <= Decimal::ZERO {
            return Err(AgentError::NoPosition(symbol.to_string()));
        }
        Ok(self.record_full_sell(symbol, token, price, shares, time))
    }

    /// Reserve plus cash plus positions marked at `prices`.
    pub fn simulated_net_value(&self, prices: &HashMap<String, Decimal>) -> Result<Decimal, AgentError> {
        let mut net = self.min_cash_reserve + self.cash;
        for (symbol, shares) in &self.positions {
            if shares.is_zero() {
                continue;
            }
            let price = prices
                .get(symbol)
                .ok_or_else(|| AgentError::PriceUnavailable(symbol.clone()))?;
            net += shares * price;
        }
        Ok(net)
    }

    pub fn simulated_snapshot(
        &self,
        prices: &HashMap<String, Decimal>,
        time: DateTime<Utc>,
    ) -> Result<PortfolioSnapshot, AgentError> {
        let net_value = self.simulated_net_value(prices)?;
        Ok(self.snapshot_with(time, net_value, prices))
    }
}

fn empty_orders(symbols: &[String]) -> BTreeMap<String, Vec<OrderRecord>> {
    symbols.iter().map(|s| (s.clone(), Vec::new())).collect()
}

fn zeros(symbols: &[String]) -> BTreeMap<String, Decimal> {
    symbols.iter().map(|s| (s.clone(), Decimal::ZERO)).collect()
}
