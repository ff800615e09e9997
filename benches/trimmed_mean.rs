//! Criterion benchmarks for calibration statistics.
//!
//! A calibration phase reduces a few dozen to a few thousand raw load cell
//! readings to one trimmed mean; these benchmarks keep that reduction cheap
//! enough to run on the kiosk's UI thread.
//!
//! Run with: cargo bench --bench trimmed_mean

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use meal_kiosk::calibration::stats::{trimmed_mean, DEFAULT_TRIM_FRACTION};
use rand::Rng;

/// Raw counts around an 8000-count zero point with occasional spikes.
fn noisy_samples(n: usize) -> Vec<f64> {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|i| {
            let base = 8_000.0 + rng.gen_range(-25.0..25.0);
            if i % 17 == 0 {
                base + 40_000.0
            } else {
                base
            }
        })
        .collect()
}

fn trimmed_mean_by_sample_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("trimmed_mean");

    for n in [60usize, 600, 6_000] {
        let samples = noisy_samples(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &samples, |b, samples| {
            b.iter(|| trimmed_mean(black_box(samples), DEFAULT_TRIM_FRACTION));
        });
    }

    group.finish();
}

fn trim_fraction_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("trimmed_mean_fraction");
    let samples = noisy_samples(600);

    for fraction in [0.0, 0.1, 0.25, 0.45] {
        group.bench_with_input(
            BenchmarkId::from_parameter(fraction),
            &fraction,
            |b, &fraction| {
                b.iter(|| trimmed_mean(black_box(&samples), fraction));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, trimmed_mean_by_sample_count, trim_fraction_sweep);
criterion_main!(benches);
