//! Volatility indicators.

use trading_core::columns;
use trading_core::traits::{Column, Indicator};
use trading_core::Candle;

use crate::rolling::{rolling_std, sma};

/// Bollinger Bands.
///
/// Middle band is SMA of close, bands are +/- `num_std` sample standard
/// deviations.
#[derive(Debug, Clone)]
pub struct BollingerBands {
    period: usize,
    num_std: f64,
}

impl BollingerBands {
    /// Create new Bollinger Bands.
    ///
    /// Common settings: period=20, num_std=2.0
    pub fn new(period: usize, num_std: f64) -> Self {
        Self {
            period: period.max(2),
            num_std,
        }
    }
}

impl Default for BollingerBands {
    fn default() -> Self {
        Self::new(20, 2.0)
    }
}

impl Indicator for BollingerBands {
    fn name(&self) -> &str {
        "BollingerBands"
    }

    fn warmup(&self) -> usize {
        self.period
    }

    fn calculate(&self, candles: &[Candle]) -> Vec<(String, Column)> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let middle = sma(&closes, self.period);
        let std = rolling_std(&closes, self.period);

        let upper = middle
            .iter()
            .zip(&std)
            .map(|(m, s)| m + self.num_std * s)
            .collect();
        let lower = middle
            .iter()
            .zip(&std)
            .map(|(m, s)| m - self.num_std * s)
            .collect();

        vec![
            (columns::SMA.to_string(), Column::Values(middle)),
            (columns::STD.to_string(), Column::Values(std)),
            (columns::UPPER_BAND.to_string(), Column::Values(upper)),
            (columns::LOWER_BAND.to_string(), Column::Values(lower)),
        ]
    }
}
