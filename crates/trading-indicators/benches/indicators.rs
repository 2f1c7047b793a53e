//! Benchmarks for indicator implementations.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use trading_core::{Candle, IndicatorSpec};
use trading_indicators::{rolling, IndicatorEngine, MainForce, Rsi};

fn generate_test_data(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 100.0 + (i as f64 * 0.1).sin() * 10.0)
        .collect()
}

fn generate_candles(size: usize) -> Vec<Candle> {
    generate_test_data(size)
        .into_iter()
        .enumerate()
        .map(|(i, c)| Candle::new(i as i64 * 300_000, c - 0.1, c + 0.5, c - 0.5, c, 1000.0))
        .collect()
}

fn benchmark_rolling(c: &mut Criterion) {
    let mut group = c.benchmark_group("rolling");

    for size in [1000, 10000].iter() {
        let data = generate_test_data(*size);

        group.bench_with_input(BenchmarkId::new("sma", size), &data, |b, data| {
            b.iter(|| rolling::sma(black_box(data), black_box(20)))
        });

        group.bench_with_input(BenchmarkId::new("std", size), &data, |b, data| {
            b.iter(|| rolling::rolling_std(black_box(data), black_box(20)))
        });

        group.bench_with_input(BenchmarkId::new("rsi", size), &data, |b, data| {
            let rsi = Rsi::new(14);
            b.iter(|| rsi.calculate_prices(black_box(data)))
        });
    }

    group.finish();
}

fn benchmark_signals(c: &mut Criterion) {
    let mut group = c.benchmark_group("signals");

    for size in [1000, 10000].iter() {
        let candles = generate_candles(*size);

        group.bench_with_input(BenchmarkId::new("main_force", size), &candles, |b, candles| {
            b.iter(|| MainForce.signals(black_box(candles)))
        });
    }

    group.finish();
}

fn benchmark_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine");
    let specs = IndicatorSpec::default_set();

    // A trading week of 5 minute candles, and a month
    for size in [960, 4000].iter() {
        let candles = generate_candles(*size);

        group.bench_with_input(BenchmarkId::new("default_set", size), &candles, |b, candles| {
            b.iter(|| IndicatorEngine::compute("BENCH", black_box(candles.clone()), &specs))
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_rolling, benchmark_signals, benchmark_engine);
criterion_main!(benches);
