//! Backtest statistics.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use trading_core::types::Side;

/// Record of a single simulated fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub time: DateTime<Utc>,
    /// Candle id the decision was made on
    pub token: String,
    /// Realized P&L, sells only
    pub pnl: Option<Decimal>,
}

/// Backtest statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestStats {
    pub initial_equity: Decimal,
    pub final_equity: Decimal,
    pub total_return_pct: Decimal,
    /// Largest peak-to-trough fall of the equity curve
    pub max_drawdown_pct: Decimal,
    /// Buys and sells
    pub total_trades: usize,
    /// Sells that closed a position
    pub closed_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate_pct: Decimal,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    /// Gross profit over gross loss, zero without losses
    pub profit_factor: Decimal,
    pub steps_processed: usize,
    pub equity_curve: Vec<(i64, Decimal)>,
    pub trades: Vec<TradeRecord>,
    peak_equity: Decimal,
}

impl BacktestStats {
    pub fn new(initial_equity: Decimal) -> Self {
        Self {
            initial_equity,
            final_equity: initial_equity,
            total_return_pct: Decimal::ZERO,
            max_drawdown_pct: Decimal::ZERO,
            total_trades: 0,
            closed_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate_pct: Decimal::ZERO,
            avg_win: Decimal::ZERO,
            avg_loss: Decimal::ZERO,
            profit_factor: Decimal::ZERO,
            steps_processed: 0,
            equity_curve: Vec::new(),
            trades: Vec::new(),
            peak_equity: initial_equity,
        }
    }

    /// Record equity at a timestamp.
    pub fn record_equity(&mut self, timestamp: i64, equity: Decimal) {
        self.equity_curve.push((timestamp, equity));

        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        if self.peak_equity > Decimal::ZERO {
            let drawdown = (self.peak_equity - equity) / self.peak_equity * dec!(100);
            if drawdown > self.max_drawdown_pct {
                self.max_drawdown_pct = drawdown;
            }
        }

        self.steps_processed += 1;
    }

    pub fn add_trade(&mut self, trade: TradeRecord) {
        self.trades.push(trade);
        self.total_trades += 1;
    }

    /// Calculate final statistics.
    pub fn finalize(&mut self, final_equity: Decimal) {
        self.final_equity = final_equity;

        if self.initial_equity > Decimal::ZERO {
            self.total_return_pct =
                (self.final_equity - self.initial_equity) / self.initial_equity * dec!(100);
        }

        let mut total_profit = Decimal::ZERO;
        let mut total_loss = Decimal::ZERO;
        self.closed_trades = 0;
        self.winning_trades = 0;
        self.losing_trades = 0;

        for pnl in self.trades.iter().filter_map(|t| t.pnl) {
            self.closed_trades += 1;
            if pnl > Decimal::ZERO {
                self.winning_trades += 1;
                total_profit += pnl;
            } else if pnl < Decimal::ZERO {
                self.losing_trades += 1;
                total_loss += pnl.abs();
            }
        }

        if self.closed_trades > 0 {
            self.win_rate_pct =
                Decimal::from(self.winning_trades * 100) / Decimal::from(self.closed_trades);
        }
        if self.winning_trades > 0 {
            self.avg_win = total_profit / Decimal::from(self.winning_trades);
        }
        if self.losing_trades > 0 {
            self.avg_loss = total_loss / Decimal::from(self.losing_trades);
        }
        if total_loss > Decimal::ZERO {
            self.profit_factor = total_profit / total_loss;
        }
    }
}
