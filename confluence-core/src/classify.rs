//! Single-bar structural classification.
//!
//! A bar is described by one tagged value: its polarity, its range relative to the
//! prior bars, an optional tail and an optional change of guard. Every named candle
//! pattern the scorer cares about is a combination of these few thresholds.

use serde::{Deserialize, Serialize};

use crate::config::ClassifierConfig;
use crate::domain::{Bar, Direction};
use crate::error::CoreError;
use crate::indicators::AverageRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarity {
    Bullish,
    Bearish,
    Doji,
}

impl Polarity {
    pub fn direction(self) -> Option<Direction> {
        match self {
            Polarity::Bullish => Some(Direction::Long),
            Polarity::Bearish => Some(Direction::Short),
            Polarity::Doji => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RangeClass {
    WideRange,
    NarrowRange,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tail {
    /// Rejection from above: close in the lower half, long upper wick.
    TopTail,
    /// Rejection from below: close in the upper half, long lower wick.
    BottomTail,
}

impl Tail {
    /// Direction the rejection points to.
    pub fn direction(self) -> Direction {
        match self {
            Tail::TopTail => Direction::Short,
            Tail::BottomTail => Direction::Long,
        }
    }
}

/// How much of the prior bar's body a change of guard reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Penetration {
    /// Below the deep threshold (default 40%).
    Shallow,
    /// From the deep threshold up to the full body.
    Deep,
    /// More than the full body.
    Engulfing,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChangeOfGuard {
    /// Fraction of the prior bar's body reversed (1.0 = the whole body).
    pub penetration_pct: f64,
    pub tier: Penetration,
    /// Number of opposite-signed bars the change of guard reversed.
    pub run: usize,
}

/// Structural classification of one closed bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarClass {
    pub polarity: Polarity,
    pub range: RangeClass,
    pub tail: Option<Tail>,
    pub change_of_guard: Option<ChangeOfGuard>,
}

impl BarClass {
    pub fn is_wide_range(&self) -> bool {
        self.range == RangeClass::WideRange
    }

    /// Direction of a change of guard, which is the bar's own polarity.
    pub fn change_of_guard_direction(&self) -> Option<Direction> {
        self.change_of_guard.and(self.polarity.direction())
    }
}

/// Outcome of the bar after a WideRange bar closing beyond one of its extremes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FollowThroughKind {
    /// Broke the extreme on the WideRange bar's own side.
    Continuation,
    /// Broke the opposite extreme.
    Reversal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowThrough {
    pub direction: Direction,
    pub kind: FollowThroughKind,
}

#[derive(Debug, Clone)]
pub struct BarClassifier {
    config: ClassifierConfig,
    baseline: AverageRange,
}

impl BarClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            config: config.clone(),
            baseline: AverageRange::new(config.avg_range_period.max(1)),
        }
    }

    pub fn polarity(&self, bar: &Bar) -> Polarity {
        let range = bar.range();
        if range <= 0.0 || bar.body() <= self.config.doji_body_ratio * range {
            Polarity::Doji
        } else if bar.close > bar.open {
            Polarity::Bullish
        } else {
            Polarity::Bearish
        }
    }

    /// Classify `bar` against the bars that closed before it (oldest first).
    ///
    /// Fails with `InvalidBar` on broken OHLC and `UnclosedBar` for an in-progress
    /// bar. `prior` must hold closed bars only.
    pub fn classify(&self, bar: &Bar, prior: &[Bar]) -> Result<BarClass, CoreError> {
        bar.validate().map_err(|reason| CoreError::InvalidBar {
            start_time: bar.start_time,
            reason,
        })?;
        if !bar.is_closed {
            return Err(CoreError::UnclosedBar {
                start_time: bar.start_time,
            });
        }
        crate::error::ensure_closed(prior)?;

        let polarity = self.polarity(bar);
        Ok(BarClass {
            polarity,
            range: self.range_class(bar, prior),
            tail: self.tail(bar),
            change_of_guard: self.change_of_guard(bar, polarity, prior),
        })
    }

    /// Classify the last bar of a closed series.
    pub fn classify_last(&self, bars: &[Bar]) -> Result<Option<BarClass>, CoreError> {
        match bars.split_last() {
            Some((last, prior)) => self.classify(last, prior).map(Some),
            None => Ok(None),
        }
    }

    fn range_class(&self, bar: &Bar, prior: &[Bar]) -> RangeClass {
        let Some(avg) = self.baseline.of_prior(prior).filter(|a| *a > 0.0) else {
            return RangeClass::Normal;
        };
        let range = bar.range();
        // WideRange first: a bar is never both.
        if range >= self.config.wide_range_multiple * avg {
            RangeClass::WideRange
        } else if range < self.config.narrow_range_multiple * avg {
            RangeClass::NarrowRange
        } else {
            RangeClass::Normal
        }
    }

    fn tail(&self, bar: &Bar) -> Option<Tail> {
        let min_wick = self.config.tail_wick_body_multiple * bar.body();
        let mid = bar.midpoint();
        if bar.close < mid && bar.upper_wick() >= min_wick {
            Some(Tail::TopTail)
        } else if bar.close > mid && bar.lower_wick() >= min_wick {
            Some(Tail::BottomTail)
        } else {
            None
        }
    }

    fn change_of_guard(
        &self,
        bar: &Bar,
        polarity: Polarity,
        prior: &[Bar],
    ) -> Option<ChangeOfGuard> {
        let opposite = match polarity {
            Polarity::Bullish => Polarity::Bearish,
            Polarity::Bearish => Polarity::Bullish,
            Polarity::Doji => return None,
        };
        let run = prior
            .iter()
            .rev()
            .take_while(|b| self.polarity(b) == opposite)
            .count();
        if run < self.config.cog_min_run.max(1) {
            return None;
        }

        let last = prior.last()?;
        let body = last.body();
        let reversed = match polarity {
            Polarity::Bullish => bar.close - last.close,
            _ => last.close - bar.close,
        };
        let penetration_pct = (reversed / body).max(0.0);
        let tier = if penetration_pct > self.config.cog_engulfing_threshold {
            Penetration::Engulfing
        } else if penetration_pct >= self.config.cog_deep_threshold {
            Penetration::Deep
        } else {
            Penetration::Shallow
        };
        Some(ChangeOfGuard {
            penetration_pct,
            tier,
            run,
        })
    }

    /// Follow-through of `bar` after a WideRange bar `wide` with class `wide_class`.
    ///
    /// A close below the WideRange bar's low points down and a close above its high
    /// points up. It is a continuation when that matches the WideRange bar's own
    /// polarity and a reversal otherwise. A doji WideRange bar has no side of its
    /// own, so any break counts as a continuation of the break.
    pub fn follow_through(
        &self,
        wide: &Bar,
        wide_class: &BarClass,
        bar: &Bar,
    ) -> Option<FollowThrough> {
        if !wide_class.is_wide_range() {
            return None;
        }
        let direction = if bar.close < wide.low {
            Direction::Short
        } else if bar.close > wide.high {
            Direction::Long
        } else {
            return None;
        };
        let kind = match wide_class.polarity.direction() {
            Some(own) if own != direction => FollowThroughKind::Reversal,
            _ => FollowThroughKind::Continuation,
        };
        Some(FollowThrough { direction, kind })
    }
}
