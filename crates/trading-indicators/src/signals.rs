//! Boolean entry/exit signals: main-force pair and golden cross.

use trading_core::columns;
use trading_core::traits::{Column, Indicator};
use trading_core::Candle;

use crate::rolling::{cross_over, ema, rolling_max, rolling_min, shift, sma, wsma};

const DEVIATION_WINDOW: usize = 13;
const DIRECTIONAL_WINDOW: usize = 10;
const EXTREME_WINDOW: usize = 33;
const SIGNAL_SPAN: usize = 3;

/// Main-force accumulation signals.
///
/// `main_force_entry` fires while smoothed buying pressure at fresh 33-bar
/// lows is rising. `main_force_pulling_up` is the mirror image at fresh
/// 33-bar highs and fires while that pressure is falling.
#[derive(Debug, Clone, Default)]
pub struct MainForce;

impl MainForce {
    /// Previous bar's OHLC average; the first bar uses its own.
    fn reference_prices(candles: &[Candle]) -> Vec<f64> {
        let averages: Vec<f64> = candles.iter().map(Candle::average_price).collect();
        let mut reference = shift(&averages, 1);
        if let (Some(first), Some(avg)) = (reference.first_mut(), averages.first()) {
            *first = *avg;
        }
        reference
    }

    /// Smoothed ratio of absolute deviation to one-sided deviation.
    fn pressure(deviation: &[f64], directional: &[f64]) -> Vec<f64> {
        let numerator = wsma(deviation, DEVIATION_WINDOW, 1.0);
        let denominator = wsma(directional, DIRECTIONAL_WINDOW, 1.0);
        let ratio: Vec<f64> = numerator
            .iter()
            .zip(&denominator)
            .map(|(n, d)| n / d)
            .collect();
        ema(&ratio, DIRECTIONAL_WINDOW)
    }

    fn gated(pressure: &[f64], at_extreme: impl Fn(usize) -> bool) -> Vec<f64> {
        let gated: Vec<f64> = pressure
            .iter()
            .enumerate()
            .map(|(i, p)| if at_extreme(i) { *p } else { 0.0 })
            .collect();
        ema(&gated, SIGNAL_SPAN)
    }

    /// Returns `(entry, pulling_up)`.
    pub fn signals(&self, candles: &[Candle]) -> (Vec<bool>, Vec<bool>) {
        let reference = Self::reference_prices(candles);
        let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
        let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();

        let low_dev: Vec<f64> = lows.iter().zip(&reference).map(|(l, r)| (l - r).abs()).collect();
        let low_up: Vec<f64> = lows.iter().zip(&reference).map(|(l, r)| (l - r).max(0.0)).collect();
        let buying = Self::pressure(&low_dev, &low_up);
        let lowest = rolling_min(&lows, EXTREME_WINDOW);
        let entry_line = Self::gated(&buying, |i| lows[i] <= lowest[i]);

        let high_dev: Vec<f64> = highs.iter().zip(&reference).map(|(h, r)| (h - r).abs()).collect();
        let high_down: Vec<f64> = highs.iter().zip(&reference).map(|(h, r)| (h - r).min(0.0)).collect();
        let selling = Self::pressure(&high_dev, &high_down);
        let highest = rolling_max(&highs, EXTREME_WINDOW);
        let exit_line = Self::gated(&selling, |i| highs[i] >= highest[i]);

        let entry = (0..candles.len())
            .map(|i| i > 0 && entry_line[i] > entry_line[i - 1])
            .collect();
        let pulling_up = (0..candles.len())
            .map(|i| i > 0 && exit_line[i] < exit_line[i - 1])
            .collect();

        (entry, pulling_up)
    }
}

impl Indicator for MainForce {
    fn name(&self) -> &str {
        "MainForce"
    }

    fn warmup(&self) -> usize {
        EXTREME_WINDOW
    }

    fn calculate(&self, candles: &[Candle]) -> Vec<(String, Column)> {
        let (entry, pulling_up) = self.signals(candles);
        vec![
            (columns::MAIN_FORCE_ENTRY.to_string(), Column::Flags(entry)),
            (columns::MAIN_FORCE_PULLING_UP.to_string(), Column::Flags(pulling_up)),
        ]
    }
}

/// Golden cross of the awesome-oscillator momentum line over its support.
///
/// `AO = SMA(TP, 5) - SMA(TP, 13)`, `BBD = (AO - SMA(AO, 3)) * 100`,
/// `support = SMA(BBD, 5)`. Fires only on the bar where BBD moves from at
/// or below support to above it.
#[derive(Debug, Clone, Default)]
pub struct GoldenCross;

impl GoldenCross {
    /// Returns `(bbd, support)`.
    pub fn lines(&self, candles: &[Candle]) -> (Vec<f64>, Vec<f64>) {
        let typical: Vec<f64> = candles.iter().map(Candle::typical_price).collect();
        let fast = sma(&typical, 5);
        let slow = sma(&typical, 13);
        let ao: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
        let ao_avg = sma(&ao, 3);
        let bbd: Vec<f64> = ao.iter().zip(&ao_avg).map(|(a, m)| (a - m) * 100.0).collect();
        let support = sma(&bbd, 5);
        (bbd, support)
    }
}

impl Indicator for GoldenCross {
    fn name(&self) -> &str {
        "GoldenCross"
    }

    fn warmup(&self) -> usize {
        13 + 2 + 4 + 1
    }

    fn calculate(&self, candles: &[Candle]) -> Vec<(String, Column)> {
        let (bbd, support) = self.lines(candles);
        vec![(
            columns::GOLDEN_CROSS.to_string(),
            Column::Flags(cross_over(&bbd, &support)),
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle::new(i as i64 * 300_000, c - 0.2, c + 0.5, c - 0.5, c, 1000.0))
            .collect()
    }

    fn oscillating(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 100.0 + (i as f64 * 0.35).sin() * 4.0 + (i as f64 * 0.05).cos() * 2.0)
            .collect()
    }

    #[test]
    fn test_golden_cross_fires_only_on_transition() {
        let candles = candles_from_closes(&oscillating(200));
        let (bbd, support) = GoldenCross.lines(&candles);
        let output = GoldenCross.calculate(&candles);
        let Column::Flags(cross) = &output[0].1 else {
            panic!("golden cross should be a flag column");
        };

        assert!(cross.iter().any(|c| *c));
        assert!(!cross[0]);
        for i in 1..cross.len() {
            let expected = bbd[i] > support[i] && bbd[i - 1] <= support[i - 1];
            assert_eq!(cross[i], expected, "bar {i}");
            // two consecutive transitions are impossible
            assert!(!(cross[i] && cross[i - 1]));
        }
    }

    #[test]
    fn test_golden_cross_needs_warmup() {
        let candles = candles_from_closes(&oscillating(19));
        let output = GoldenCross.calculate(&candles);
        let Column::Flags(cross) = &output[0].1 else {
            panic!("golden cross should be a flag column");
        };
        assert!(cross.iter().all(|c| !c));
    }

    #[test]
    fn test_main_force_shapes() {
        let candles = candles_from_closes(&oscillating(120));
        let (entry, pulling_up) = MainForce.signals(&candles);

        assert_eq!(entry.len(), 120);
        assert_eq!(pulling_up.len(), 120);
        assert!(!entry[0] && !pulling_up[0]);
    }

    #[test]
    fn test_main_force_quiet_in_steady_uptrend() {
        let closes: Vec<f64> = (0..80).map(|i| 50.0 + i as f64).collect();
        let (entry, pulling_up) = MainForce.signals(&candles_from_closes(&closes));

        // no fresh lows, and no downside deviation at the highs
        assert!(entry.iter().all(|e| !e));
        assert!(pulling_up.iter().all(|p| !p));
    }

    #[test]
    fn test_main_force_deterministic() {
        let candles = candles_from_closes(&oscillating(150));
        assert_eq!(MainForce.signals(&candles), MainForce.signals(&candles));
    }
}
