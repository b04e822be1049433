//! Average true range over the *prior* N bars.
//!
//! Value at index t is the plain mean of the true ranges of bars t-N..t, excluding
//! bar t itself: the baseline a bar is compared against when it is classified. The
//! oldest bar in the window uses the close before it when `prior` has one.
//! Lookback: period.

use super::{bar_true_range, Indicator};
use crate::domain::Bar;

#[derive(Debug, Clone)]
pub struct AverageRange {
    period: usize,
    name: String,
}

impl AverageRange {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "AverageRange period must be >= 1");
        Self {
            period,
            name: format!("avg_range_{period}"),
        }
    }

    /// Mean true range of the last `period` bars of `prior` (fewer if `prior` is
    /// shorter). `None` for an empty slice.
    pub fn of_prior(&self, prior: &[Bar]) -> Option<f64> {
        let start = prior.len().saturating_sub(self.period);
        if start == prior.len() {
            return None;
        }
        let total: f64 = (start..prior.len())
            .map(|i| bar_true_range(&prior[i], i.checked_sub(1).map(|p| prior[p].close)))
            .sum();
        Some(total / (prior.len() - start) as f64)
    }
}

impl Indicator for AverageRange {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        (0..bars.len())
            .map(|i| {
                if i < self.period {
                    f64::NAN
                } else {
                    self.of_prior(&bars[..i]).unwrap_or(f64::NAN)
                }
            })
            .collect()
    }
}
