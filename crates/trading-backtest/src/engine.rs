//! Backtesting engine.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};
use trading_agent::{AgentConfig, AgentError, Ledger};
use trading_core::traits::{SeriesProvider, TradingStrategy};
use trading_core::types::{
    Action, Candle, CandleSeries, IndicatorSpec, PortfolioSnapshot, SeriesSnapshot, Side,
};
use trading_indicators::IndicatorEngine;

use crate::report::BacktestReport;
use crate::statistics::{BacktestStats, TradeRecord};

/// Backtest configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Cash of a session that does not resume from a snapshot
    pub initial_capital: Decimal,
    /// Most recent candles handed to the strategy at each step
    pub lookback: usize,
    /// Minutes between recorded snapshots
    pub snapshot_interval_minutes: i64,
    /// Sell what is still held at the last close once the data runs out
    pub liquidate_at_end: bool,
    pub agent: AgentConfig,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: dec!(100000),
            // four extended sessions of 5-minute candles
            lookback: 768,
            snapshot_interval_minutes: 60,
            liquidate_at_end: true,
            agent: AgentConfig::default(),
        }
    }
}

/// Candles visible at the current step of a replay.
struct ReplayWindow<'a> {
    series: &'a HashMap<String, CandleSeries>,
    cutoff: i64,
    lookback: usize,
}

impl ReplayWindow<'_> {
    fn visible(&self, symbol: &str) -> &[Candle] {
        let Some(series) = self.series.get(symbol) else {
            return &[];
        };
        let before = series.before(self.cutoff);
        &before[before.len().saturating_sub(self.lookback)..]
    }
}

impl SeriesProvider for ReplayWindow<'_> {
    fn latest(&self, symbol: &str) -> Option<Candle> {
        self.visible(symbol).last().copied()
    }

    fn series(&self, symbol: &str, specs: &[IndicatorSpec]) -> Option<SeriesSnapshot> {
        let candles = self.visible(symbol);
        if candles.is_empty() {
            return None;
        }
        match IndicatorEngine::compute(symbol, candles.to_vec(), specs) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(symbol, error = %e, "Indicator computation failed");
                None
            }
        }
    }
}

/// Replays a strategy over historical candles through a simulated ledger.
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run a backtest.
    ///
    /// Steps through the union of candle timestamps. At each step the
    /// strategy sees only candles strictly older than the step and the
    /// ledger trades at the latest visible close. Symbols are processed in
    /// name order; a failed action is logged and skipped.
    pub fn run(
        &self,
        strategy: &dyn TradingStrategy,
        data: HashMap<String, Vec<Candle>>,
        prior: Option<PortfolioSnapshot>,
    ) -> Result<BacktestReport, AgentError> {
        self.config.agent.validate()?;

        let mut series: HashMap<String, CandleSeries> = HashMap::new();
        for (symbol, candles) in data {
            let mut s = CandleSeries::new(&symbol);
            s.merge_newer(candles);
            series.insert(symbol, s);
        }
        let symbols: Vec<String> = series.keys().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        let timestamps: Vec<i64> = series
            .values()
            .flat_map(|s| s.candles().iter().map(|c| c.timestamp))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let start_time = timestamps
            .first()
            .and_then(|ts| DateTime::from_timestamp_millis(*ts))
            .unwrap_or_default();
        let mut ledger = Ledger::simulated(
            symbols.clone(),
            prior,
            self.config.initial_capital,
            start_time,
            &self.config.agent,
        );
        let initial_equity = ledger.start_snapshot().current_net_value;
        let mut stats = BacktestStats::new(initial_equity);
        let mut snapshots = Vec::new();
        let snapshot_interval = Duration::minutes(self.config.snapshot_interval_minutes.max(1));
        let mut next_snapshot = start_time;

        info!(
            strategy = strategy.name(),
            symbols = symbols.len(),
            steps = timestamps.len(),
            "Starting backtest"
        );

        for &cutoff in &timestamps {
            let window = ReplayWindow {
                series: &series,
                cutoff,
                lookback: self.config.lookback.max(1),
            };
            let time = DateTime::from_timestamp_millis(cutoff).unwrap_or_default();
            let prices = latest_closes(&window, &symbols);

            for symbol in &symbols {
                let Some(&price) = prices.get(symbol) else {
                    continue;
                };
                let decision = strategy.action(symbol, &window, ledger.open_orders(symbol));
                if let Err(e) = execute(&mut ledger, &mut stats, symbol, decision.action, &decision.token, price, time) {
                    match &e {
                        AgentError::InsufficientFunds { .. } => debug!(symbol, error = %e, "Buy skipped"),
                        _ => warn!(symbol, error = %e, "Simulated order failed"),
                    }
                }
            }

            match ledger.simulated_net_value(&prices) {
                Ok(equity) => stats.record_equity(cutoff, equity),
                Err(e) => warn!(error = %e, "Equity unavailable"),
            }
            if time >= next_snapshot {
                if let Ok(snapshot) = ledger.simulated_snapshot(&prices, time) {
                    snapshots.push(snapshot);
                }
                next_snapshot = time + snapshot_interval;
            }
        }

        let end = ReplayWindow {
            series: &series,
            cutoff: i64::MAX,
            lookback: 1,
        };
        let prices = latest_closes(&end, &symbols);
        let end_time = timestamps
            .last()
            .and_then(|ts| DateTime::from_timestamp_millis(*ts))
            .unwrap_or(start_time);

        if self.config.liquidate_at_end {
            for symbol in &symbols {
                let (Some(&price), Some(last)) = (prices.get(symbol), end.latest(symbol)) else {
                    continue;
                };
                if ledger.position(symbol) > Decimal::ZERO {
                    let token = last.token();
                    execute(&mut ledger, &mut stats, symbol, Action::Sell, &token, price, end_time)?;
                }
            }
        }

        let final_snapshot = ledger.simulated_snapshot(&prices, end_time)?;
        stats.finalize(final_snapshot.current_net_value);
        info!(
            trades = stats.total_trades,
            final_equity = %stats.final_equity,
            "Backtest finished"
        );

        Ok(BacktestReport {
            strategy: strategy.name().to_string(),
            config: self.config.clone(),
            stats,
            snapshots,
            final_snapshot,
        })
    }
}

/// Latest visible close of every symbol that has one.
fn latest_closes(window: &ReplayWindow<'_>, symbols: &[String]) -> HashMap<String, Decimal> {
    symbols
        .iter()
        .filter_map(|symbol| {
            let candle = window.latest(symbol)?;
            let price = Decimal::try_from(candle.close).ok()?.round_dp(4);
            Some((symbol.clone(), price))
        })
        .collect()
}

fn execute(
    ledger: &mut Ledger,
    stats: &mut BacktestStats,
    symbol: &str,
    action: Action,
    token: &str,
    price: Decimal,
    time: DateTime<Utc>,
) -> Result<(), AgentError> {
    match action {
        Action::Hold => Ok(()),
        Action::Buy => {
            let record = ledger.simulate_buy(symbol, token, price, time)?;
            stats.add_trade(TradeRecord {
                symbol: symbol.to_string(),
                side: Side::Buy,
                quantity: record.share,
                price,
                time,
                token: token.to_string(),
                pnl: None,
            });
            Ok(())
        }
        Action::Sell => {
            let pnl = ledger.pnl(symbol, price);
            let record = ledger.simulate_clean_all_position(symbol, token, price, time)?;
            stats.add_trade(TradeRecord {
                symbol: symbol.to_string(),
                side: Side::Sell,
                quantity: -record.share,
                price,
                time,
                token: token.to_string(),
                pnl: Some(pnl),
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trading_core::error::StrategyError;
    use trading_core::types::{ActionMetadata, OrderRecord};
    use trading_strategies::{AlphaConfig, AlphaStrategy};

    const FIVE_MIN: i64 = 300_000;

    /// Buys when flat and sells once the close is 10% above the fill.
    struct TenPercent;

    impl TradingStrategy for TenPercent {
        fn name(&self) -> &str {
            "ten_percent"
        }

        fn indicator_specs(&self) -> &[IndicatorSpec] {
            &[]
        }

        fn should_buy(&self, _symbol: &str, latest: Option<&Candle>, open_orders: &[OrderRecord]) -> bool {
            latest.is_some() && open_orders.is_empty()
        }

        fn should_sell(&self, _latest: Option<&Candle>, open_orders: &[OrderRecord]) -> bool {
            !open_orders.is_empty()
        }

        fn decide(
            &self,
            snapshot: &SeriesSnapshot,
            open_orders: &[OrderRecord],
            should_buy: bool,
            _should_sell: bool,
        ) -> ActionMetadata {
            let Some(last) = snapshot.last() else {
                return ActionMetadata::hold();
            };
            if should_buy {
                return ActionMetadata::buy(last.token());
            }
            let close = Decimal::try_from(last.close).unwrap_or_default();
            match open_orders.first() {
                Some(order) if close >= order.price * dec!(1.1) => ActionMetadata::sell(last.token()),
                _ => ActionMetadata::hold(),
            }
        }
    }

    fn ramp(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle::new(1_709_560_800_000 + i as i64 * FIVE_MIN, c, c + 0.5, c - 0.5, c, 1000.0))
            .collect()
    }

    fn config() -> BacktestConfig {
        BacktestConfig {
            initial_capital: dec!(10000),
            ..BacktestConfig::default()
        }
    }

    #[test]
    fn test_trades_at_previous_close() {
        let data = HashMap::from([("AAPL".to_string(), ramp(&[100.0, 105.0, 110.0, 125.0, 90.0]))]);
        let report = BacktestEngine::new(config()).run(&TenPercent, data, None).unwrap();

        let trades = &report.stats.trades;
        assert_eq!(trades.len(), 4);
        // First decision sees only the first candle
        assert_eq!(trades[0].side, Side::Buy);
        assert_eq!(trades[0].price, dec!(100));
        assert_eq!(trades[0].quantity, dec!(10));
        assert_eq!(trades[1].side, Side::Sell);
        assert_eq!(trades[1].price, dec!(110));
        assert_eq!(trades[1].pnl, Some(dec!(100)));
        assert_eq!(trades[2].side, Side::Buy);
        assert_eq!(trades[2].price, dec!(125));
        // Liquidated at the last close once the data runs out
        assert_eq!(trades[3].side, Side::Sell);
        assert_eq!(trades[3].price, dec!(90));
        assert_eq!(trades[3].pnl, Some(dec!(-280)));

        assert_eq!(report.stats.steps_processed, 5);
        assert_eq!(report.final_snapshot.current_net_value, dec!(9820));
        assert_eq!(report.final_snapshot.remain_portion, 10);
        assert_eq!(report.stats.closed_trades, 2);
    }

    #[test]
    fn test_hourly_snapshots() {
        let closes: Vec<f64> = (0..30).map(|_| 100.0).collect();
        let data = HashMap::from([("AAPL".to_string(), ramp(&closes))]);
        let report = BacktestEngine::new(config()).run(&TenPercent, data, None).unwrap();

        // 30 five-minute steps span two and a half hours
        assert_eq!(report.snapshots.len(), 3);
        assert!(report.snapshots.windows(2).all(|w| w[1].time - w[0].time >= Duration::hours(1)));
        assert_eq!(report.snapshots[1].active_orders["AAPL"].len(), 1);
    }

    #[test]
    fn test_resumes_from_prior_snapshot() {
        let data = HashMap::from([("AAPL".to_string(), ramp(&[100.0, 100.0]))]);
        let engine = BacktestEngine::new(BacktestConfig {
            liquidate_at_end: false,
            ..config()
        });
        let first = engine.run(&TenPercent, data.clone(), None).unwrap();
        assert_eq!(first.final_snapshot.remain_portion, 9);

        let resumed = engine
            .run(&TenPercent, data, Some(first.final_snapshot.clone()))
            .unwrap();
        // Already holding, so no second buy
        assert!(resumed.stats.trades.is_empty());
        assert_eq!(resumed.final_snapshot.remain_portion, 9);
        assert_eq!(resumed.final_snapshot.positions["AAPL"], dec!(10));
    }

    #[test]
    fn test_alpha_strategy_runs() -> Result<(), StrategyError> {
        let closes: Vec<f64> = (0..300)
            .map(|i| 100.0 + (i as f64 * 0.15).sin() * 8.0 - (i as f64 * 0.01))
            .collect();
        let data = HashMap::from([
            ("AAPL".to_string(), ramp(&closes)),
            ("NVDA".to_string(), ramp(&closes[50..])),
        ]);
        let strategy = AlphaStrategy::new(AlphaConfig::default())?;
        let report = BacktestEngine::new(BacktestConfig {
            lookback: 200,
            ..config()
        })
        .run(&strategy, data, None)
        .unwrap();

        assert_eq!(report.stats.steps_processed, 300);
        assert_eq!(report.final_snapshot.remain_portion, 10);
        assert!(report.stats.trades.iter().all(|t| t.quantity > Decimal::ZERO));
        Ok(())
    }
}
