//! Rolling-window primitives.
//!
//! Every function returns a vector as long as its input. Positions where the
//! window is not yet full, or where the window contains a NaN, are NaN.

/// Simple moving average.
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    let mut result = vec![f64::NAN; data.len()];
    if period == 0 || data.len() < period {
        return result;
    }

    let period_f64 = period as f64;
    let mut sum = 0.0;
    let mut nans = 0usize;

    for i in 0..data.len() {
        let incoming = data[i];
        if incoming.is_nan() {
            nans += 1;
        } else {
            sum += incoming;
        }

        if i >= period {
            let outgoing = data[i - period];
            if outgoing.is_nan() {
                nans -= 1;
            } else {
                sum -= outgoing;
            }
        }

        if i + 1 >= period && nans == 0 {
            result[i] = sum / period_f64;
        }
    }

    result
}

/// Sample standard deviation (n - 1 denominator).
pub fn rolling_std(data: &[f64], period: usize) -> Vec<f64> {
    let mut result = vec![f64::NAN; data.len()];
    if period < 2 || data.len() < period {
        return result;
    }

    let period_f64 = period as f64;
    for (i, window) in data.windows(period).enumerate() {
        if window.iter().any(|x| x.is_nan()) {
            continue;
        }
        let mean = window.iter().sum::<f64>() / period_f64;
        let variance = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (period_f64 - 1.0);
        result[i + period - 1] = variance.sqrt();
    }

    result
}

/// Lowest value over the window (LLV).
pub fn rolling_min(data: &[f64], period: usize) -> Vec<f64> {
    rolling_fold(data, period, f64::min)
}

/// Highest value over the window (HHV).
pub fn rolling_max(data: &[f64], period: usize) -> Vec<f64> {
    rolling_fold(data, period, f64::max)
}

fn rolling_fold(data: &[f64], period: usize, f: fn(f64, f64) -> f64) -> Vec<f64> {
    let mut result = vec![f64::NAN; data.len()];
    if period == 0 || data.len() < period {
        return result;
    }

    for (i, window) in data.windows(period).enumerate() {
        if window.iter().any(|x| x.is_nan()) {
            continue;
        }
        result[i + period - 1] = window.iter().copied().reduce(f).unwrap_or(f64::NAN);
    }

    result
}

/// Exponential moving average with `alpha = 2 / (span + 1)`, no bias
/// adjustment.
///
/// Seeded with the first finite value. A non-finite input carries the
/// previous average forward.
pub fn ema(data: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    exponential(data, alpha)
}

/// Exponential smoothing with an explicit smoothing factor.
pub fn exponential(data: &[f64], alpha: f64) -> Vec<f64> {
    let mut result = Vec::with_capacity(data.len());
    let mut current: Option<f64> = None;

    for &value in data {
        if value.is_finite() {
            current = Some(match current {
                Some(prev) => alpha * value + (1.0 - alpha) * prev,
                None => value,
            });
        }
        result.push(current.unwrap_or(f64::NAN));
    }

    result
}

/// Weighted smoothing: `y[i] = (x[i] * weight + y[i-1] * (period - weight)) / period`.
///
/// The first value is the mean of the first `period` inputs (or of all inputs
/// when there are fewer).
pub fn wsma(data: &[f64], period: usize, weight: f64) -> Vec<f64> {
    let mut result = Vec::with_capacity(data.len());
    if data.is_empty() || period == 0 {
        return vec![f64::NAN; data.len()];
    }

    let period_f64 = period as f64;
    let head = &data[..period.min(data.len())];
    let mut prev = head.iter().sum::<f64>() / head.len() as f64;
    result.push(prev);

    for &value in &data[1..] {
        prev = (value * weight + prev * (period_f64 - weight)) / period_f64;
        result.push(prev);
    }

    result
}

/// Shift values forward by `periods`; the vacated head is NaN.
pub fn shift(data: &[f64], periods: usize) -> Vec<f64> {
    let mut result = vec![f64::NAN; data.len()];
    if periods < data.len() {
        result[periods..].copy_from_slice(&data[..data.len() - periods]);
    }
    result
}

/// True where `a` crosses above `b`: `a[i] > b[i]` and `a[i-1] <= b[i-1]`.
///
/// Never true at index 0. Comparisons with NaN are false.
pub fn cross_over(a: &[f64], b: &[f64]) -> Vec<bool> {
    let len = a.len().min(b.len());
    let mut result = vec![false; len];
    for i in 1..len {
        result[i] = a[i] > b[i] && a[i - 1] <= b[i - 1];
    }
    result
}
