//! Alpha strategy.
//!
//! Buys at "golden pits" (all term lines deeply oversold) once a golden cross
//! or main-force entry confirms, and sells on overbought RSI, a resistance
//! touch, take-profit or a trailing stop-loss.

use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info};
use trading_core::{
    columns,
    error::StrategyError,
    traits::{StrategyConfig, TradingStrategy},
    types::{ActionMetadata, Candle, IndicatorSpec, OrderRecord, SeriesSnapshot},
};

/// Parameters of one term line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermLineSettings {
    pub interval: usize,
    pub smoothing: Vec<usize>,
    #[serde(default)]
    pub std_interval: usize,
    #[serde(default)]
    pub std_multiplier: f64,
}

impl TermLineSettings {
    fn spec(&self) -> IndicatorSpec {
        IndicatorSpec::TermLine {
            interval: self.interval,
            smoothing: self.smoothing.clone(),
            std_interval: self.std_interval,
            std_multiplier: self.std_multiplier,
        }
    }
}

/// Configuration for the alpha strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlphaConfig {
    /// Term lines that must all sit below `golden_pit` to buy
    pub term_lines: Vec<TermLineSettings>,
    /// Upper bound for every term line at a buy
    pub golden_pit: f64,
    /// No new buy while an open lot was bought on one of the last N candles
    pub min_purchase_gap: usize,
    pub rsi_window: usize,
    /// Sell when RSI is above this
    pub overbought_rsi: f64,
    pub bollinger_window: usize,
    pub bollinger_std: f64,
    /// Upper band must clear the highest buy price by this factor
    pub resistance_margin: f64,
    /// Sell once close reaches highest buy price times this
    pub take_profit_ratio: f64,
    /// Sell once close falls to this fraction of the high since entry
    pub stop_loss_ratio: f64,
    /// Symbols never bought
    pub buy_blocklist: Vec<String>,
}

impl Default for AlphaConfig {
    fn default() -> Self {
        Self {
            term_lines: vec![
                TermLineSettings {
                    interval: 8,
                    smoothing: vec![3, 3],
                    std_interval: 21,
                    std_multiplier: 3.0,
                },
                TermLineSettings {
                    interval: 21,
                    smoothing: vec![5],
                    std_interval: 37,
                    std_multiplier: 2.0,
                },
                TermLineSettings {
                    interval: 55,
                    smoothing: vec![5],
                    std_interval: 0,
                    std_multiplier: 0.0,
                },
            ],
            golden_pit: 15.0,
            min_purchase_gap: 3,
            rsi_window: 14,
            overbought_rsi: 80.0,
            bollinger_window: 20,
            bollinger_std: 2.0,
            resistance_margin: 1.005,
            take_profit_ratio: 1.25,
            stop_loss_ratio: 0.95,
            buy_blocklist: vec![],
        }
    }
}

impl AlphaConfig {
    /// Indicator requests covering every column the strategy reads.
    pub fn indicator_specs(&self) -> Vec<IndicatorSpec> {
        let mut specs: Vec<IndicatorSpec> = self.term_lines.iter().map(TermLineSettings::spec).collect();
        specs.push(IndicatorSpec::Bollinger {
            window: self.bollinger_window,
            num_std: self.bollinger_std,
        });
        specs.push(IndicatorSpec::Rsi {
            window: self.rsi_window,
        });
        specs.push(IndicatorSpec::MainForce);
        specs.push(IndicatorSpec::GoldenCross);
        specs
    }
}

impl StrategyConfig for AlphaConfig {
    fn validate(&self) -> Result<(), StrategyError> {
        if self.term_lines.is_empty() {
            return Err(StrategyError::InvalidConfig(
                "At least one term line required".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.golden_pit) || !(0.0..=100.0).contains(&self.overbought_rsi) {
            return Err(StrategyError::InvalidConfig(
                "golden_pit and overbought_rsi must be between 0 and 100".into(),
            ));
        }
        if self.min_purchase_gap == 0 {
            return Err(StrategyError::InvalidConfig(
                "min_purchase_gap must be at least 1".into(),
            ));
        }
        if self.take_profit_ratio <= 1.0 {
            return Err(StrategyError::InvalidConfig(
                "take_profit_ratio must be greater than 1".into(),
            ));
        }
        if self.stop_loss_ratio <= 0.0 || self.stop_loss_ratio >= 1.0 {
            return Err(StrategyError::InvalidConfig(
                "stop_loss_ratio must be between 0 and 1".into(),
            ));
        }
        if self.resistance_margin <= 0.0 {
            return Err(StrategyError::InvalidConfig(
                "resistance_margin must be positive".into(),
            ));
        }
        for spec in self.indicator_specs() {
            spec.validate()
                .map_err(|e| StrategyError::InvalidConfig(e.to_string()))?;
        }
        Ok(())
    }
}

/// Which exit rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SellReason {
    Overbought,
    Resistance,
    TakeProfit,
    StopLoss,
}

impl fmt::Display for SellReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SellReason::Overbought => "overbought",
            SellReason::Resistance => "resistance",
            SellReason::TakeProfit => "take_profit",
            SellReason::StopLoss => "stop_loss",
        };
        f.write_str(s)
    }
}

/// The alpha strategy.
pub struct AlphaStrategy {
    config: AlphaConfig,
    specs: Vec<IndicatorSpec>,
    blocklist: HashSet<String>,
    term_columns: Vec<String>,
}

impl AlphaStrategy {
    /// Create a new alpha strategy.
    pub fn new(config: AlphaConfig) -> Result<Self, StrategyError> {
        config.validate()?;
        Ok(Self {
            specs: config.indicator_specs(),
            blocklist: config.buy_blocklist.iter().cloned().collect(),
            term_columns: config
                .term_lines
                .iter()
                .map(|t| columns::term_line(t.interval))
                .collect(),
            config,
        })
    }

    pub fn config(&self) -> &AlphaConfig {
        &self.config
    }

    /// All term lines below the golden pit on the latest candle.
    fn is_golden_pit(&self, snapshot: &SeriesSnapshot) -> bool {
        self.term_columns.iter().all(|name| {
            snapshot
                .latest_value(name)
                .is_some_and(|v| v < self.config.golden_pit)
        })
    }

    /// An open lot was bought on one of the last `min_purchase_gap` candles.
    fn bought_recently(&self, snapshot: &SeriesSnapshot, open_orders: &[OrderRecord]) -> bool {
        let candles = snapshot.candles();
        let start = candles.len().saturating_sub(self.config.min_purchase_gap);
        candles[start..]
            .iter()
            .any(|c| open_orders.iter().any(|o| o.token == c.token()))
    }

    /// Entry rule evaluated on the latest candle.
    pub fn buy_signal(&self, snapshot: &SeriesSnapshot, open_orders: &[OrderRecord]) -> bool {
        if self.bought_recently(snapshot, open_orders) {
            return false;
        }
        self.is_golden_pit(snapshot)
            && (snapshot.latest_flag(columns::GOLDEN_CROSS)
                || snapshot.latest_flag(columns::MAIN_FORCE_ENTRY))
    }

    /// Exit rule evaluated on the latest candle. Always `None` without open
    /// lots.
    pub fn sell_reason(
        &self,
        snapshot: &SeriesSnapshot,
        open_orders: &[OrderRecord],
    ) -> Option<SellReason> {
        let latest = snapshot.last()?;
        let max_buy_price = open_orders
            .iter()
            .filter_map(|o| o.price.to_f64())
            .reduce(f64::max)?;

        if snapshot
            .latest_value(columns::RSI)
            .is_some_and(|rsi| rsi > self.config.overbought_rsi)
        {
            return Some(SellReason::Overbought);
        }

        if self.has_resistance(snapshot)
            && snapshot
                .latest_value(columns::UPPER_BAND)
                .is_some_and(|upper| upper >= max_buy_price * self.config.resistance_margin)
        {
            return Some(SellReason::Resistance);
        }

        if latest.close >= max_buy_price * self.config.take_profit_ratio {
            return Some(SellReason::TakeProfit);
        }

        let since = stop_reference_index(snapshot.candles(), open_orders);
        let max_high = snapshot.candles()[since..]
            .iter()
            .map(|c| c.high)
            .fold(f64::NEG_INFINITY, f64::max);
        if latest.close <= self.config.stop_loss_ratio * max_high {
            return Some(SellReason::StopLoss);
        }

        None
    }

    /// The latest candle ends a run of pulling-up candles, and some candle in
    /// that run closed at or above its upper band.
    fn has_resistance(&self, snapshot: &SeriesSnapshot) -> bool {
        let (Some(pulling), Some(upper)) = (
            snapshot.flags(columns::MAIN_FORCE_PULLING_UP),
            snapshot.values(columns::UPPER_BAND),
        ) else {
            return false;
        };
        let candles = snapshot.candles();
        let n = candles.len();
        if n < 2 || pulling[n - 1] {
            return false;
        }

        (0..n - 1)
            .rev()
            .take_while(|&i| pulling[i])
            .any(|i| candles[i].close >= upper[i])
    }
}

/// Index of the candle the oldest open lot was bought on.
///
/// Looked up by token, then by time; falls back to the latest candle.
fn stop_reference_index(candles: &[Candle], open_orders: &[OrderRecord]) -> usize {
    let last = candles.len().saturating_sub(1);
    let Some(oldest) = open_orders.iter().min_by_key(|o| o.time) else {
        return last;
    };

    if let Some(i) = candles.iter().position(|c| c.token() == oldest.token) {
        return i;
    }
    let bought_at = oldest.time.timestamp_millis();
    candles
        .iter()
        .position(|c| c.timestamp >= bought_at)
        .unwrap_or(last)
}

impl TradingStrategy for AlphaStrategy {
    fn name(&self) -> &str {
        "alpha"
    }

    fn indicator_specs(&self) -> &[IndicatorSpec] {
        &self.specs
    }

    fn should_buy(&self, symbol: &str, latest: Option<&Candle>, open_orders: &[OrderRecord]) -> bool {
        let Some(latest) = latest else {
            return false;
        };
        if self.blocklist.contains(symbol) {
            return false;
        }
        let token = latest.token();
        !open_orders.iter().any(|o| o.token == token)
    }

    fn should_sell(&self, latest: Option<&Candle>, open_orders: &[OrderRecord]) -> bool {
        latest.is_some() || !open_orders.is_empty()
    }

    fn decide(
        &self,
        snapshot: &SeriesSnapshot,
        open_orders: &[OrderRecord],
        should_buy: bool,
        should_sell: bool,
    ) -> ActionMetadata {
        let Some(latest) = snapshot.last() else {
            return ActionMetadata::hold();
        };

        if should_buy && self.buy_signal(snapshot, open_orders) {
            info!(
                symbol = %snapshot.symbol,
                term_lines = ?self
                    .term_columns
                    .iter()
                    .map(|c| snapshot.latest_value(c).unwrap_or(f64::NAN))
                    .collect::<Vec<_>>(),
                golden_cross = snapshot.latest_flag(columns::GOLDEN_CROSS),
                main_force_entry = snapshot.latest_flag(columns::MAIN_FORCE_ENTRY),
                rsi = snapshot.latest_value(columns::RSI).unwrap_or(f64::NAN),
                "Buy signal"
            );
            return ActionMetadata::buy(latest.token());
        }

        if should_sell {
            if let Some(reason) = self.sell_reason(snapshot, open_orders) {
                info!(
                    symbol = %snapshot.symbol,
                    %reason,
                    close = latest.close,
                    rsi = snapshot.latest_value(columns::RSI).unwrap_or(f64::NAN),
                    upper_band = snapshot.latest_value(columns::UPPER_BAND).unwrap_or(f64::NAN),
                    "Sell signal"
                );
                return ActionMetadata::sell(latest.token());
            }
        }

        debug!(symbol = %snapshot.symbol, "Hold");
        ActionMetadata::hold()
    }
}
