//! Simple Moving Average (SMA) of closes.
//!
//! Lookback: period - 1 (first valid value at index period-1).

use super::Indicator;
use crate::domain::Bar;

#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    name: String,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "SMA period must be >= 1");
        Self {
            period,
            name: format!("sma_{period}"),
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Indicator for Sma {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period - 1
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let mut result = vec![f64::NAN; bars.len()];
        if bars.len() < self.period {
            return result;
        }

        // Window sums are rebuilt from scratch every `period` bars so that float
        // drift from the rolling add/subtract never accumulates across a long series.
        let mut sum: f64 = bars[..self.period].iter().map(|b| b.close).sum();
        result[self.period - 1] = sum / self.period as f64;

        for i in self.period..bars.len() {
            if i % self.period == 0 {
                sum = bars[i + 1 - self.period..=i].iter().map(|b| b.close).sum();
            } else {
                sum += bars[i].close - bars[i - self.period].close;
            }
            result[i] = sum / self.period as f64;
        }

        result
    }
}
