//! Builds a [`SeriesSnapshot`] from raw candles and indicator requests.

use trading_core::error::IndicatorError;
use trading_core::traits::Indicator;
use trading_core::{Candle, IndicatorSpec, SeriesSnapshot};

use crate::momentum::{Rsi, TermLine};
use crate::signals::{GoldenCross, MainForce};
use crate::volatility::BollingerBands;

/// Instantiate the indicator behind a spec.
pub fn indicator_for(spec: &IndicatorSpec) -> Box<dyn Indicator> {
    match spec {
        IndicatorSpec::TermLine {
            interval,
            smoothing,
            std_interval,
            std_multiplier,
        } => Box::new(TermLine::new(
            *interval,
            smoothing.clone(),
            *std_interval,
            *std_multiplier,
        )),
        IndicatorSpec::Bollinger { window, num_std } => {
            Box::new(BollingerBands::new(*window, *num_std))
        }
        IndicatorSpec::Rsi { window } => Box::new(Rsi::new(*window)),
        IndicatorSpec::MainForce => Box::new(MainForce),
        IndicatorSpec::GoldenCross => Box::new(GoldenCross),
    }
}

/// Stateless indicator pipeline.
///
/// Columns are always recomputed from the full candle sequence, so the same
/// input and specs produce bit-identical output.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndicatorEngine;

impl IndicatorEngine {
    /// Compute every requested column over a copy of `candles`.
    pub fn compute(
        symbol: &str,
        candles: Vec<Candle>,
        specs: &[IndicatorSpec],
    ) -> Result<SeriesSnapshot, IndicatorError> {
        let mut snapshot = SeriesSnapshot::new(symbol, candles);
        for spec in specs {
            spec.validate()?;
            indicator_for(spec).apply(&mut snapshot)?;
        }
        Ok(snapshot)
    }

    /// Candles needed before every requested column can be defined.
    pub fn warmup(specs: &[IndicatorSpec]) -> usize {
        specs
            .iter()
            .map(|spec| indicator_for(spec).warmup())
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trading_core::columns;

    fn candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let c = 100.0 + (i as f64 * 0.4).sin() * 3.0 + i as f64 * 0.02;
                Candle::new(i as i64 * 300_000, c - 0.1, c + 0.6, c - 0.6, c, 1000.0)
            })
            .collect()
    }

    #[test]
    fn test_compute_default_set() {
        let snapshot =
            IndicatorEngine::compute("AAPL", candles(150), &IndicatorSpec::default_set()).unwrap();

        for interval in [8, 21, 55] {
            assert!(snapshot.values(&columns::term_line(interval)).is_some());
            assert!(snapshot.values(&columns::rsv(interval)).is_some());
        }
        for name in [columns::SMA, columns::STD, columns::UPPER_BAND, columns::LOWER_BAND, columns::RSI] {
            assert_eq!(snapshot.values(name).map(|c| c.len()), Some(150));
        }
        for name in [columns::MAIN_FORCE_ENTRY, columns::MAIN_FORCE_PULLING_UP, columns::GOLDEN_CROSS] {
            assert_eq!(snapshot.flags(name).map(|c| c.len()), Some(150));
        }
    }

    #[test]
    fn test_compute_is_bit_identical() {
        let specs = IndicatorSpec::default_set();
        let a = IndicatorEngine::compute("AAPL", candles(200), &specs).unwrap();
        let b = IndicatorEngine::compute("AAPL", candles(200), &specs).unwrap();

        for name in a.column_names() {
            if let (Some(x), Some(y)) = (a.values(name), b.values(name)) {
                let xb: Vec<u64> = x.iter().map(|v| v.to_bits()).collect();
                let yb: Vec<u64> = y.iter().map(|v| v.to_bits()).collect();
                assert_eq!(xb, yb, "column {name}");
            } else {
                assert_eq!(a.flags(name), b.flags(name), "column {name}");
            }
        }
    }

    #[test]
    fn test_compute_rejects_bad_spec() {
        let specs = [IndicatorSpec::Bollinger {
            window: 1,
            num_std: 2.0,
        }];
        assert!(IndicatorEngine::compute("AAPL", candles(10), &specs).is_err());
    }

    #[test]
    fn test_warmup() {
        assert_eq!(IndicatorEngine::warmup(&IndicatorSpec::default_set()), 59);
        assert_eq!(IndicatorEngine::warmup(&[]), 0);
    }
}
