//! Bar builders shared by the integration tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use confluence_core::domain::{Bar, Timeframe};

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
}

pub fn bar_at(timeframe: Timeframe, i: usize, o: f64, h: f64, l: f64, c: f64) -> Bar {
    Bar::new(
        base_time() + timeframe.duration() * i as i32,
        timeframe,
        o,
        h,
        l,
        c,
        1000.0,
    )
}

/// Bars from (open, high, low, close) tuples.
pub fn ohlc(timeframe: Timeframe, data: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
    data.iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| bar_at(timeframe, i, o, h, l, c))
        .collect()
}

/// Random walk from (move, upper wick, lower wick) steps. Each bar opens at the
/// previous close; prices stay positive.
pub fn walk(timeframe: Timeframe, steps: &[(f64, f64, f64)]) -> Vec<Bar> {
    let mut price = 100.0;
    steps
        .iter()
        .enumerate()
        .map(|(i, &(delta, upper, lower))| {
            let open = price;
            let close = (price + delta).max(1.0);
            let high = open.max(close) + upper;
            let low = (open.min(close) - lower).max(0.5);
            price = close;
            bar_at(timeframe, i, open, high, low, close)
        })
        .collect()
}

/// Deterministic pseudo-random walk of `n` bars (LCG).
pub fn lcg_walk(timeframe: Timeframe, n: usize, seed: u64) -> Vec<Bar> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let mut next = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((state >> 33) % 10_000) as f64 / 10_000.0
    };
    let steps: Vec<(f64, f64, f64)> = (0..n)
        .map(|i| {
            let drift = (i as f64 / 25.0).sin() * 0.4;
            (drift + (next() - 0.5) * 2.0, next() * 0.8, next() * 0.8)
        })
        .collect();
    walk(timeframe, &steps)
}
