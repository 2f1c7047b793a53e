//! Indicator trait definitions.

use crate::error::IndicatorError;
use crate::types::{Candle, SeriesSnapshot};

/// One derived column produced by an indicator.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Numeric values, NaN where undefined
    Values(Vec<f64>),
    /// Boolean signal
    Flags(Vec<bool>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Values(v) => v.len(),
            Column::Flags(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Trait for technical indicators computed over a whole candle sequence.
///
/// Implementations are pure: the same candles always produce the same
/// columns, each exactly as long as the input.
pub trait Indicator: Send + Sync {
    /// Get the name of the indicator.
    fn name(&self) -> &str;

    /// Candles needed before the first defined value.
    fn warmup(&self) -> usize;

    /// Calculate named output columns.
    fn calculate(&self, candles: &[Candle]) -> Vec<(String, Column)>;

    /// Calculate and store the columns on a snapshot.
    fn apply(&self, snapshot: &mut SeriesSnapshot) -> Result<(), IndicatorError> {
        for (name, column) in self.calculate(snapshot.candles()) {
            match column {
                Column::Values(values) => snapshot.insert_values(name, values)?,
                Column::Flags(flags) => snapshot.insert_flags(name, flags)?,
            }
        }
        Ok(())
    }
}
