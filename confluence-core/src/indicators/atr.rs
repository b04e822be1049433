//! Average True Range (ATR).
//!
//! True Range: max(high-low, |high-prev_close|, |low-prev_close|)
//! ATR uses Wilder smoothing (alpha = 1/period), seeded with the mean of the
//! first `period` true ranges that have a previous close.
//! Lookback: period.

use super::Indicator;
use crate::domain::Bar;

#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    name: String,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "ATR period must be >= 1");
        Self {
            period,
            name: format!("atr_{period}"),
        }
    }
}

/// True range of one bar given the close before it, if any.
pub fn bar_true_range(bar: &Bar, prev_close: Option<f64>) -> f64 {
    match prev_close {
        Some(pc) => bar
            .range()
            .max((bar.high - pc).abs())
            .max((bar.low - pc).abs()),
        None => bar.range(),
    }
}

/// True Range series. TR[0] is the plain high-low range (no previous close).
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| bar_true_range(bar, i.checked_sub(1).map(|p| bars[p].close)))
        .collect()
}

/// Wilder smoothing over `values[start..]`. Positions before the seed are NaN.
pub fn wilder_smooth(values: &[f64], period: usize, start: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < start + period {
        return result;
    }

    let seed_end = start + period;
    let seed = values[start..seed_end].iter().sum::<f64>() / period as f64;
    result[seed_end - 1] = seed;

    let alpha = 1.0 / period as f64;
    let mut prev = seed;
    for i in seed_end..n {
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        result[i] = prev;
    }
    result
}

impl Indicator for Atr {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        wilder_smooth(&true_range(bars), self.period, 1)
    }
}
