//! Criterion benchmarks for the per-scan hot path.
//!
//! Benchmarks:
//! 1. Full timeframe scoring over a 200-bar window
//! 2. Pivot detection alone
//! 3. Level extraction alone
//! 4. Indicator precompute (SMA, ATR)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use confluence_core::config::{EngineConfig, LevelConfig, PivotConfig};
use confluence_core::domain::{Bar, Timeframe};
use confluence_core::indicators::{Atr, Indicator, Sma};
use confluence_core::levels::LevelExtractor;
use confluence_core::pivots::detect;
use confluence_core::scoring::TimeframeScorer;
use confluence_core::trend::Trend;

// ── Helpers ──────────────────────────────────────────────────────────

fn make_bars(n: usize) -> Vec<Bar> {
    let base = chrono::DateTime::from_timestamp(1_704_153_600, 0).unwrap_or_default();
    (0..n)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.1).sin() * 10.0 + (i as f64 * 0.37).cos() * 2.0;
            let open = close - 0.3;
            Bar::new(
                base + Timeframe::M15.duration() * i as i32,
                Timeframe::M15,
                open,
                close + 1.5,
                open - 1.5,
                close,
                1_000.0 + (i % 500) as f64,
            )
        })
        .collect()
}

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_scoring(c: &mut Criterion) {
    let scorer = TimeframeScorer::new(&EngineConfig::default());
    let mut group = c.benchmark_group("timeframe_scoring");
    for n in [100, 200, 500] {
        let bars = make_bars(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &bars, |b, bars| {
            b.iter(|| scorer.analyze("BENCH", Timeframe::M15, black_box(bars)))
        });
    }
    group.finish();
}

fn bench_pivots(c: &mut Criterion) {
    let bars = make_bars(200);
    let config = PivotConfig::default();
    c.bench_function("pivots_200", |b| b.iter(|| detect(black_box(&bars), &config)));
}

fn bench_levels(c: &mut Criterion) {
    let bars = make_bars(200);
    let pivots = detect(&bars, &PivotConfig::default());
    let extractor = LevelExtractor::new(&LevelConfig::default());
    c.bench_function("levels_200", |b| {
        b.iter(|| extractor.extract(black_box(&bars), black_box(&pivots), Trend::Sideways))
    });
}

fn bench_indicators(c: &mut Criterion) {
    let bars = make_bars(500);
    let sma = Sma::new(40);
    let atr = Atr::new(14);
    c.bench_function("sma_40_500", |b| b.iter(|| sma.compute(black_box(&bars))));
    c.bench_function("atr_14_500", |b| b.iter(|| atr.compute(black_box(&bars))));
}

criterion_group!(benches, bench_scoring, bench_pivots, bench_levels, bench_indicators);
criterion_main!(benches);
