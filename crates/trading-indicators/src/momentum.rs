//! Momentum indicators: RSI and smoothed term lines.

use trading_core::columns;
use trading_core::traits::{Column, Indicator};
use trading_core::Candle;

use crate::rolling::{exponential, rolling_max, rolling_min, rolling_std, sma};

/// Relative Strength Index (RSI) with Wilder smoothing.
///
/// Average gain and loss use `alpha = 1 / period`, seeded at the first bar.
/// Values before `period - 1` are NaN. When the average loss is zero the RSI
/// is 100.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
}

impl Rsi {
    /// Create a new RSI indicator.
    ///
    /// Common period is 14.
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
        }
    }

    /// Calculate RSI over a price sequence.
    pub fn calculate_prices(&self, prices: &[f64]) -> Vec<f64> {
        let mut gains = Vec::with_capacity(prices.len());
        let mut losses = Vec::with_capacity(prices.len());
        for i in 0..prices.len() {
            let change = if i == 0 { 0.0 } else { prices[i] - prices[i - 1] };
            // A NaN change counts as neither gain nor loss
            gains.push(if change > 0.0 { change } else { 0.0 });
            losses.push(if change < 0.0 { -change } else { 0.0 });
        }

        let alpha = 1.0 / self.period as f64;
        let avg_gain = exponential(&gains, alpha);
        let avg_loss = exponential(&losses, alpha);

        (0..prices.len())
            .map(|i| {
                if i + 1 < self.period {
                    f64::NAN
                } else if avg_loss[i] == 0.0 {
                    100.0
                } else {
                    100.0 - 100.0 / (1.0 + avg_gain[i] / avg_loss[i])
                }
            })
            .collect()
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &str {
        "RSI"
    }

    fn warmup(&self) -> usize {
        self.period
    }

    fn calculate(&self, candles: &[Candle]) -> Vec<(String, Column)> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        vec![(
            columns::RSI.to_string(),
            Column::Values(self.calculate_prices(&closes)),
        )]
    }
}

/// Smoothed stochastic oscillator ("term line").
///
/// The raw stochastic value (RSV) places the close within the high/low range
/// of the last `interval` candles on a 0..100 scale. It is smoothed by a
/// chain of simple moving averages, and optionally lifted by a multiple of
/// the rolling standard deviation of close.
#[derive(Debug, Clone)]
pub struct TermLine {
    interval: usize,
    smoothing: Vec<usize>,
    std_interval: usize,
    std_multiplier: f64,
    name: String,
}

impl TermLine {
    pub fn new(interval: usize, smoothing: Vec<usize>, std_interval: usize, std_multiplier: f64) -> Self {
        Self {
            name: columns::term_line(interval),
            interval: interval.max(1),
            smoothing,
            std_interval,
            std_multiplier,
        }
    }

    /// Raw stochastic value. NaN when the window range is zero.
    pub fn rsv(&self, candles: &[Candle]) -> Vec<f64> {
        let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
        let lowest = rolling_min(&lows, self.interval);
        let highest = rolling_max(&highs, self.interval);

        candles
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let range = highest[i] - lowest[i];
                if range > 0.0 {
                    (c.close - lowest[i]) / range * 100.0
                } else {
                    f64::NAN
                }
            })
            .collect()
    }
}

impl Indicator for TermLine {
    fn name(&self) -> &str {
        &self.name
    }

    fn warmup(&self) -> usize {
        let smoothing: usize = self.smoothing.iter().map(|s| s.saturating_sub(1)).sum();
        let base = self.interval + smoothing;
        if self.std_multiplier > 0.0 {
            base.max(self.std_interval)
        } else {
            base
        }
    }

    fn calculate(&self, candles: &[Candle]) -> Vec<(String, Column)> {
        let rsv = self.rsv(candles);

        let mut line = rsv.clone();
        for &window in &self.smoothing {
            line = sma(&line, window);
        }

        if self.std_multiplier > 0.0 {
            let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
            let std = rolling_std(&closes, self.std_interval);
            for (value, sd) in line.iter_mut().zip(std) {
                *value += sd * self.std_multiplier;
            }
        }

        vec![
            (columns::rsv(self.interval), Column::Values(rsv)),
            (self.name.clone(), Column::Values(line)),
        ]
    }
}
