//! Graded turning points over a closed-bar stream.
//!
//! A Low pivot candidate sits at bar t-1 once bar t closes with a higher low, given
//! at least one bar before it with a higher low. Its grade is fixed when it is
//! emitted:
//!
//! - the left approach (consecutive strictly descending lows into the pivot) is
//!   shorter than `major_run`: Minor, emitted on the first confirming bar;
//! - otherwise the pivot waits for the right side. `major_run` consecutive strictly
//!   ascending lows make it Major; any break first makes it Minor.
//!
//! Equal prices never count as ascending or descending, so ties land on the lower
//! grade. Highs are symmetric. Once emitted a pivot is never touched again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PivotConfig;
use crate::domain::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PivotKind {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PivotGrade {
    Minor,
    Major,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pivot {
    /// Position of the pivot bar in the bar sequence it was detected on.
    pub index: usize,
    pub price: f64,
    pub kind: PivotKind,
    pub grade: PivotGrade,
    /// Start time of the pivot bar.
    pub bar_time: DateTime<Utc>,
    /// Close time of the bar that finalized the pivot.
    pub formed_at: DateTime<Utc>,
}

impl Pivot {
    pub fn is_major(&self) -> bool {
        self.grade == PivotGrade::Major
    }
}

#[derive(Debug, Clone)]
struct Pending {
    index: usize,
    price: f64,
    bar_time: DateTime<Utc>,
    right_run: usize,
}

/// Incremental detector for one (symbol, timeframe). Feed closed bars in order.
#[derive(Debug, Clone)]
pub struct PivotDetector {
    major_run: usize,
    next_index: usize,
    prev: Option<Bar>,
    /// Consecutive strictly descending lows ending at `prev`.
    low_desc_run: usize,
    /// Consecutive strictly ascending highs ending at `prev`.
    high_asc_run: usize,
    pending_low: Option<Pending>,
    pending_high: Option<Pending>,
}

impl PivotDetector {
    pub fn new(config: &PivotConfig) -> Self {
        Self {
            major_run: config.major_run.max(2),
            next_index: 0,
            prev: None,
            low_desc_run: 0,
            high_asc_run: 0,
            pending_low: None,
            pending_high: None,
        }
    }

    /// Push the next closed bar; returns any pivots it finalized.
    pub fn push(&mut self, bar: &Bar) -> Vec<Pivot> {
        let index = self.next_index;
        self.next_index += 1;
        let mut formed = Vec::new();

        let Some(prev) = self.prev.replace(bar.clone()) else {
            return formed;
        };
        let formed_at = bar.close_time();

        // Lows: resolve the waiting pivot before looking for a new one.
        if let Some(mut pending) = self.pending_low.take() {
            if bar.low > prev.low {
                pending.right_run += 1;
                if pending.right_run >= self.major_run {
                    formed.push(finish(pending, PivotKind::Low, PivotGrade::Major, formed_at));
                } else {
                    self.pending_low = Some(pending);
                }
            } else {
                formed.push(finish(pending, PivotKind::Low, PivotGrade::Minor, formed_at));
            }
        }
        if bar.low > prev.low && self.low_desc_run >= 1 {
            let candidate = Pending {
                index: index - 1,
                price: prev.low,
                bar_time: prev.start_time,
                right_run: 1,
            };
            if self.low_desc_run >= self.major_run {
                self.pending_low = Some(candidate);
            } else {
                formed.push(finish(candidate, PivotKind::Low, PivotGrade::Minor, formed_at));
            }
        }
        self.low_desc_run = if bar.low < prev.low {
            self.low_desc_run + 1
        } else {
            0
        };

        if let Some(mut pending) = self.pending_high.take() {
            if bar.high < prev.high {
                pending.right_run += 1;
                if pending.right_run >= self.major_run {
                    formed.push(finish(pending, PivotKind::High, PivotGrade::Major, formed_at));
                } else {
                    self.pending_high = Some(pending);
                }
            } else {
                formed.push(finish(pending, PivotKind::High, PivotGrade::Minor, formed_at));
            }
        }
        if bar.high < prev.high && self.high_asc_run >= 1 {
            let candidate = Pending {
                index: index - 1,
                price: prev.high,
                bar_time: prev.start_time,
                right_run: 1,
            };
            if self.high_asc_run >= self.major_run {
                self.pending_high = Some(candidate);
            } else {
                formed.push(finish(candidate, PivotKind::High, PivotGrade::Minor, formed_at));
            }
        }
        self.high_asc_run = if bar.high > prev.high {
            self.high_asc_run + 1
        } else {
            0
        };

        formed
    }

    /// Candidate still waiting on its right side, if any.
    pub fn pending(&self, kind: PivotKind) -> Option<(usize, f64)> {
        let pending = match kind {
            PivotKind::Low => self.pending_low.as_ref(),
            PivotKind::High => self.pending_high.as_ref(),
        };
        pending.map(|p| (p.index, p.price))
    }
}

fn finish(pending: Pending, kind: PivotKind, grade: PivotGrade, formed_at: DateTime<Utc>) -> Pivot {
    Pivot {
        index: pending.index,
        price: pending.price,
        kind,
        grade,
        bar_time: pending.bar_time,
        formed_at,
    }
}

/// All pivots finalized over `bars`, in formation order.
pub fn detect(bars: &[Bar], config: &PivotConfig) -> Vec<Pivot> {
    let mut detector = PivotDetector::new(config);
    bars.iter().flat_map(|bar| detector.push(bar)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Timeframe;
    use chrono::TimeZone;

    fn ohlc(data: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
        let base = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        data.iter()
            .enumerate()
            .map(|(i, &(o, h, l, c))| {
                Bar::new(
                    base + chrono::Duration::hours(i as i64),
                    Timeframe::H1,
                    o,
                    h,
                    l,
                    c,
                    1000.0,
                )
            })
            .collect()
    }

    fn lows(bars: &[Bar]) -> Vec<Pivot> {
        detect(bars, &PivotConfig::default())
            .into_iter()
            .filter(|p| p.kind == PivotKind::Low)
            .collect()
    }

    #[test]
    fn deep_v_is_major() {
        let bars = ohlc(&[
            (12.0, 12.5, 11.0, 11.2),
            (11.2, 11.5, 10.0, 10.2),
            (10.0, 12.0, 9.0, 11.0),
            (11.0, 13.0, 10.0, 12.0),
            (12.0, 14.0, 11.0, 13.0),
        ]);
        let pivots = lows(&bars);
        assert_eq!(pivots.len(), 1);
        assert_eq!(pivots[0].index, 2);
        assert_eq!(pivots[0].price, 9.0);
        assert_eq!(pivots[0].grade, PivotGrade::Major);
        // finalized by the second ascending bar, not the first
        assert_eq!(pivots[0].formed_at, bars[4].close_time());
    }

    #[test]
    fn single_bar_approach_is_minor() {
        let bars = ohlc(&[
            (11.0, 11.5, 10.0, 10.2),
            (10.0, 12.0, 9.0, 11.0),
            (11.0, 13.0, 10.0, 12.0),
            (12.0, 14.0, 11.0, 13.0),
        ]);
        let pivots = lows(&bars);
        assert_eq!(pivots.len(), 1);
        assert_eq!(pivots[0].grade, PivotGrade::Minor);
        assert_eq!(pivots[0].formed_at, bars[2].close_time());
    }

    #[test]
    fn broken_right_side_is_minor() {
        let bars = ohlc(&[
            (12.0, 12.5, 11.0, 11.2),
            (11.2, 11.5, 10.0, 10.2),
            (10.0, 12.0, 9.0, 11.0),
            (11.0, 13.0, 10.0, 12.0),
            (12.0, 12.5, 9.5, 10.0),
        ]);
        let pivots = lows(&bars);
        assert_eq!(pivots.len(), 1);
        assert_eq!(pivots[0].grade, PivotGrade::Minor);
    }

    #[test]
    fn equal_lows_do_not_ascend() {
        let bars = ohlc(&[
            (12.0, 12.5, 11.0, 11.2),
            (11.2, 11.5, 10.0, 10.2),
            (10.0, 12.0, 9.0, 11.0),
            (11.0, 13.0, 10.0, 12.0),
            (12.0, 13.5, 10.0, 13.0),
        ]);
        let pivots = lows(&bars);
        assert_eq!(pivots[0].grade, PivotGrade::Minor);
    }

    #[test]
    fn unconfirmed_candidate_is_not_emitted() {
        let bars = ohlc(&[
            (12.0, 12.5, 11.0, 11.2),
            (11.2, 11.5, 10.0, 10.2),
            (10.0, 12.0, 9.0, 11.0),
        ]);
        assert!(lows(&bars).is_empty());

        let mut extended = bars.clone();
        extended.extend(ohlc(&[(0.0, 0.0, 0.0, 0.0); 4]).into_iter().skip(3).map(|mut b| {
            (b.open, b.high, b.low, b.close) = (11.0, 13.0, 10.0, 12.0);
            b
        }));
        let mut detector = PivotDetector::new(&PivotConfig::default());
        for bar in &extended {
            assert!(detector.push(bar).iter().all(|p| p.kind != PivotKind::Low));
        }
        assert_eq!(detector.pending(PivotKind::Low), Some((2, 9.0)));
    }

    #[test]
    fn high_pivot_symmetric() {
        let bars = ohlc(&[
            (10.0, 11.0, 9.5, 10.8),
            (10.8, 12.0, 10.5, 11.8),
            (11.8, 13.0, 11.0, 12.0),
            (12.0, 12.5, 10.5, 11.0),
            (11.0, 11.5, 9.5, 10.0),
        ]);
        let highs: Vec<Pivot> = detect(&bars, &PivotConfig::default())
            .into_iter()
            .filter(|p| p.kind == PivotKind::High)
            .collect();
        assert_eq!(highs.len(), 1);
        assert_eq!(highs[0].price, 13.0);
        assert_eq!(highs[0].grade, PivotGrade::Major);
    }

    #[test]
    fn incremental_matches_batch() {
        let bars = ohlc(&[
            (12.0, 12.5, 11.0, 11.2),
            (11.2, 11.5, 10.0, 10.2),
            (10.0, 12.0, 9.0, 11.0),
            (11.0, 13.0, 10.0, 12.0),
            (12.0, 14.0, 11.0, 13.0),
            (13.0, 15.0, 12.0, 14.0),
            (14.0, 14.5, 9.0, 10.0),
        ]);
        let mut detector = PivotDetector::new(&PivotConfig::default());
        let streamed: Vec<Pivot> = bars.iter().flat_map(|b| detector.push(b)).collect();
        assert_eq!(streamed, detect(&bars, &PivotConfig::default()));
    }
}
