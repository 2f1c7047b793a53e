//! Indicator requests and the derived per-symbol series view.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Candle;
use crate::error::IndicatorError;

/// Column names written by the indicator engine.
pub mod columns {
    pub const SMA: &str = "sma";
    pub const STD: &str = "std";
    pub const UPPER_BAND: &str = "upper_band";
    pub const LOWER_BAND: &str = "lower_band";
    pub const RSI: &str = "rsi";
    pub const MAIN_FORCE_ENTRY: &str = "main_force_entry";
    pub const MAIN_FORCE_PULLING_UP: &str = "main_force_pulling_up";
    pub const GOLDEN_CROSS: &str = "golden_cross";

    /// Smoothed term line for a lookback interval.
    pub fn term_line(interval: usize) -> String {
        format!("term_line_{interval}")
    }

    /// Raw stochastic value for a lookback interval.
    pub fn rsv(interval: usize) -> String {
        format!("rsv_{interval}")
    }
}

/// A parameterised request for derived columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorSpec {
    /// Smoothed stochastic oscillator with optional volatility offset.
    TermLine {
        interval: usize,
        smoothing: Vec<usize>,
        std_interval: usize,
        std_multiplier: f64,
    },
    /// Bollinger bands over close.
    Bollinger { window: usize, num_std: f64 },
    /// Relative strength index over close.
    Rsi { window: usize },
    /// Main-force entry / pulling-up signal pair.
    MainForce,
    /// Awesome-oscillator derived golden cross.
    GoldenCross,
}

impl IndicatorSpec {
    /// The short, medium and long term lines.
    pub fn default_term_lines() -> Vec<IndicatorSpec> {
        vec![
            IndicatorSpec::TermLine {
                interval: 8,
                smoothing: vec![3, 3],
                std_interval: 21,
                std_multiplier: 3.0,
            },
            IndicatorSpec::TermLine {
                interval: 21,
                smoothing: vec![5],
                std_interval: 37,
                std_multiplier: 2.0,
            },
            IndicatorSpec::TermLine {
                interval: 55,
                smoothing: vec![5],
                std_interval: 0,
                std_multiplier: 0.0,
            },
        ]
    }

    /// Every indicator the trading strategy reads.
    pub fn default_set() -> Vec<IndicatorSpec> {
        let mut specs = Self::default_term_lines();
        specs.push(IndicatorSpec::Bollinger {
            window: 20,
            num_std: 2.0,
        });
        specs.push(IndicatorSpec::Rsi { window: 14 });
        specs.push(IndicatorSpec::MainForce);
        specs.push(IndicatorSpec::GoldenCross);
        specs
    }

    /// Reject windows that can never produce a value.
    pub fn validate(&self) -> Result<(), IndicatorError> {
        let bad = |msg: String| Err(IndicatorError::InvalidParameter(msg));
        match self {
            IndicatorSpec::TermLine {
                interval,
                smoothing,
                std_interval,
                std_multiplier,
            } => {
                if *interval == 0 || smoothing.contains(&0) {
                    return bad(format!("term line {interval} has a zero window"));
                }
                if *std_multiplier > 0.0 && *std_interval < 2 {
                    return bad(format!(
                        "term line {interval} needs std_interval >= 2, got {std_interval}"
                    ));
                }
                Ok(())
            }
            IndicatorSpec::Bollinger { window, .. } if *window < 2 => {
                bad(format!("bollinger window must be >= 2, got {window}"))
            }
            IndicatorSpec::Rsi { window } if *window == 0 => bad("rsi window is zero".into()),
            _ => Ok(()),
        }
    }
}

/// Candles of one symbol plus derived columns, each the same length as the
/// candle sequence.
///
/// Numeric columns hold NaN where the indicator is not yet defined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesSnapshot {
    pub symbol: String,
    candles: Vec<Candle>,
    values: BTreeMap<String, Vec<f64>>,
    flags: BTreeMap<String, Vec<bool>>,
}

impl SeriesSnapshot {
    pub fn new(symbol: impl Into<String>, candles: Vec<Candle>) -> Self {
        Self {
            symbol: symbol.into(),
            candles,
            values: BTreeMap::new(),
            flags: BTreeMap::new(),
        }
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Add or replace a numeric column.
    pub fn insert_values(
        &mut self,
        name: impl Into<String>,
        column: Vec<f64>,
    ) -> Result<(), IndicatorError> {
        let name = name.into();
        self.check_len(&name, column.len())?;
        self.values.insert(name, column);
        Ok(())
    }

    /// Add or replace a boolean column.
    pub fn insert_flags(
        &mut self,
        name: impl Into<String>,
        column: Vec<bool>,
    ) -> Result<(), IndicatorError> {
        let name = name.into();
        self.check_len(&name, column.len())?;
        self.flags.insert(name, column);
        Ok(())
    }

    fn check_len(&self, name: &str, actual: usize) -> Result<(), IndicatorError> {
        if actual != self.candles.len() {
            return Err(IndicatorError::LengthMismatch {
                column: name.to_string(),
                expected: self.candles.len(),
                actual,
            });
        }
        Ok(())
    }

    pub fn values(&self, name: &str) -> Option<&[f64]> {
        self.values.get(name).map(Vec::as_slice)
    }

    pub fn flags(&self, name: &str) -> Option<&[bool]> {
        self.flags.get(name).map(Vec::as_slice)
    }

    /// Numeric value on the most recent candle.
    pub fn latest_value(&self, name: &str) -> Option<f64> {
        self.values(name).and_then(|c| c.last().copied())
    }

    /// Flag on the most recent candle; missing columns read as false.
    pub fn latest_flag(&self, name: &str) -> bool {
        self.flags(name)
            .and_then(|c| c.last().copied())
            .unwrap_or(false)
    }

    /// Names of all derived columns, numeric first.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().chain(self.flags.keys()).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(n: usize) -> SeriesSnapshot {
        let candles = (0..n)
            .map(|i| Candle::new(i as i64, 1.0, 1.0, 1.0, 1.0, 1.0))
            .collect();
        SeriesSnapshot::new("TEST", candles)
    }

    #[test]
    fn test_column_length_is_enforced() {
        let mut snap = snapshot(3);

        assert!(snap.insert_values("sma", vec![f64::NAN, 1.0, 2.0]).is_ok());
        let err = snap.insert_flags("golden_cross", vec![true]).unwrap_err();
        assert!(matches!(err, IndicatorError::LengthMismatch { expected: 3, actual: 1, .. }));
    }

    #[test]
    fn test_latest_accessors() {
        let mut snap = snapshot(2);
        snap.insert_values(columns::RSI, vec![f64::NAN, 55.0]).unwrap();
        snap.insert_flags(columns::GOLDEN_CROSS, vec![false, true]).unwrap();

        assert_eq!(snap.latest_value(columns::RSI), Some(55.0));
        assert!(snap.latest_flag(columns::GOLDEN_CROSS));
        assert!(!snap.latest_flag(columns::MAIN_FORCE_ENTRY));
        assert_eq!(snap.latest_value("missing"), None);
    }

    #[test]
    fn test_default_set_validates() {
        let specs = IndicatorSpec::default_set();
        assert_eq!(specs.len(), 7);
        assert!(specs.iter().all(|s| s.validate().is_ok()));

        let bad = IndicatorSpec::TermLine {
            interval: 8,
            smoothing: vec![0],
            std_interval: 0,
            std_multiplier: 0.0,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_spec_serde_shape() {
        let json = serde_json::to_string(&IndicatorSpec::Rsi { window: 14 }).unwrap();
        assert_eq!(json, r#"{"kind":"rsi","window":14}"#);
    }
}
