//! Support and resistance levels.
//!
//! Levels come from four sources:
//!
//! 1. two or more same-kind pivots within the touch tolerance (Major), or a lone
//!    Major pivot (Minor);
//! 2. the pivot right before the latest higher high in an uptrend, or lower low in
//!    a downtrend (Major);
//! 3. a level broken and then revisited from the other side (Minor, opposite kind);
//! 4. the boundary of a cluster of overlapping bodies once a close crosses it (Minor).
//!
//! A close beyond a level by more than `invalidation_atr_multiple` ATRs removes it.
//! Levels past the nearest congestion zone on either side are pruned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::LevelConfig;
use crate::domain::{Bar, Direction};
use crate::indicators::{value_at, Atr, Indicator};
use crate::pivots::{Pivot, PivotKind};
use crate::trend::Trend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LevelKind {
    Support,
    Resistance,
}

impl LevelKind {
    pub fn opposite(self) -> Self {
        match self {
            LevelKind::Support => LevelKind::Resistance,
            LevelKind::Resistance => LevelKind::Support,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LevelGrade {
    Minor,
    Major,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LevelOrigin {
    RepeatedLow,
    RepeatedHigh,
    RallyOrigin,
    PriorPivot,
    ClusterBreak,
    RoleReversal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: f64,
    pub kind: LevelKind,
    pub grade: LevelGrade,
    pub origin: LevelOrigin,
    /// Start time of the earliest bar the level was derived from.
    pub left_bound: DateTime<Utc>,
    pub touches: usize,
}

impl Level {
    pub fn qualifies(&self, min_grade: LevelGrade) -> bool {
        self.grade >= min_grade
    }

    /// True when `bar` trades through the level and closes beyond it in `direction`.
    pub fn crossed_by(&self, bar: &Bar, direction: Direction) -> bool {
        match direction {
            Direction::Long => bar.low <= self.price && bar.close > self.price,
            Direction::Short => bar.high >= self.price && bar.close < self.price,
        }
    }
}

/// Closest support at or below, and resistance at or above, a reference price.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NearestLevels {
    pub support: Option<Level>,
    pub resistance: Option<Level>,
}

impl NearestLevels {
    pub fn around(levels: &[Level], price: f64, tolerance_pct: f64) -> Self {
        let support = levels
            .iter()
            .filter(|l| l.kind == LevelKind::Support && l.price <= price * (1.0 + tolerance_pct))
            .max_by(|a, b| a.price.total_cmp(&b.price))
            .cloned();
        let resistance = levels
            .iter()
            .filter(|l| l.kind == LevelKind::Resistance && l.price >= price * (1.0 - tolerance_pct))
            .min_by(|a, b| a.price.total_cmp(&b.price))
            .cloned();
        Self {
            support,
            resistance,
        }
    }

    /// The level a position in `direction` would lean on.
    pub fn defending(&self, direction: Direction) -> Option<&Level> {
        match direction {
            Direction::Long => self.support.as_ref(),
            Direction::Short => self.resistance.as_ref(),
        }
    }
}

/// A run of at least `cluster_min_bars` bars whose bodies share a common price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Congestion {
    pub start: usize,
    pub end: usize,
    pub top: f64,
    pub bottom: f64,
}

struct Candidate {
    level: Level,
    /// First bar index checked for violation.
    active_from: usize,
}

#[derive(Debug, Clone)]
pub struct LevelExtractor {
    config: LevelConfig,
    atr: Atr,
}

impl LevelExtractor {
    pub fn new(config: &LevelConfig) -> Self {
        Self {
            config: config.clone(),
            atr: Atr::new(config.atr_period.max(1)),
        }
    }

    pub fn tolerance_pct(&self) -> f64 {
        self.config.touch_tolerance_pct
    }

    /// Live levels over `bars`, sorted by price.
    pub fn extract(&self, bars: &[Bar], pivots: &[Pivot], trend: Trend) -> Vec<Level> {
        let Some(last) = bars.last() else {
            return Vec::new();
        };
        let atr = self.atr.compute(bars);
        let zones = self.congestion(bars);

        let mut candidates = self.pivot_levels(bars, pivots);
        candidates.extend(self.rally_origin(bars, pivots, trend));
        candidates.extend(self.cluster_breaks(bars, &zones));

        let live: Vec<Level> = candidates
            .into_iter()
            .filter_map(|c| self.resolve(c, bars, &atr))
            .collect();
        let pruned = self.prune(live, &zones, last.close, bars.len());
        self.merge(pruned)
    }

    fn within(&self, a: f64, b: f64) -> bool {
        (a - b).abs() <= self.config.touch_tolerance_pct * b.abs()
    }

    fn pivot_levels(&self, bars: &[Bar], pivots: &[Pivot]) -> Vec<Candidate> {
        let mut out = Vec::new();
        for kind in [PivotKind::Low, PivotKind::High] {
            let mut groups: Vec<Vec<&Pivot>> = Vec::new();
            let mut sorted: Vec<&Pivot> = pivots.iter().filter(|p| p.kind == kind).collect();
            sorted.sort_by_key(|p| p.index);
            for pivot in sorted {
                match groups.iter_mut().find(|g| self.within(pivot.price, g[0].price)) {
                    Some(group) => group.push(pivot),
                    None => groups.push(vec![pivot]),
                }
            }

            let (level_kind, repeated) = match kind {
                PivotKind::Low => (LevelKind::Support, LevelOrigin::RepeatedLow),
                PivotKind::High => (LevelKind::Resistance, LevelOrigin::RepeatedHigh),
            };
            for group in groups {
                let (grade, origin) = if group.len() >= 2 {
                    (LevelGrade::Major, repeated)
                } else if group[0].is_major() {
                    (LevelGrade::Minor, LevelOrigin::PriorPivot)
                } else {
                    continue;
                };
                let price = group.iter().map(|p| p.price).sum::<f64>() / group.len() as f64;
                let first = group.iter().map(|p| p.index).min().unwrap_or(0);
                let last = group.iter().map(|p| p.index).max().unwrap_or(0);
                out.push(Candidate {
                    level: Level {
                        price,
                        kind: level_kind,
                        grade,
                        origin,
                        left_bound: bars.get(first).map_or(group[0].bar_time, |b| b.start_time),
                        touches: group.len(),
                    },
                    active_from: last + 1,
                });
            }
        }
        out
    }

    fn rally_origin(&self, bars: &[Bar], pivots: &[Pivot], trend: Trend) -> Option<Candidate> {
        let (extreme_kind, origin_kind, level_kind) = match trend {
            Trend::Up => (PivotKind::High, PivotKind::Low, LevelKind::Support),
            Trend::Down => (PivotKind::Low, PivotKind::High, LevelKind::Resistance),
            Trend::Sideways => return None,
        };
        let mut extremes: Vec<&Pivot> = pivots
            .iter()
            .filter(|p| p.kind == extreme_kind && p.is_major())
            .collect();
        extremes.sort_by_key(|p| p.index);
        let breakout = extremes.windows(2).rev().find_map(|w| {
            let beyond = match trend {
                Trend::Up => w[1].price > w[0].price,
                _ => w[1].price < w[0].price,
            };
            beyond.then_some(w[1])
        })?;
        let origin = pivots
            .iter()
            .filter(|p| p.kind == origin_kind && p.index < breakout.index)
            .max_by_key(|p| p.index)?;
        Some(Candidate {
            level: Level {
                price: origin.price,
                kind: level_kind,
                grade: LevelGrade::Major,
                origin: LevelOrigin::RallyOrigin,
                left_bound: bars.get(origin.index).map_or(origin.bar_time, |b| b.start_time),
                touches: 1,
            },
            active_from: origin.index + 1,
        })
    }

    /// Maximal runs of overlapping bodies, oldest first.
    pub fn congestion(&self, bars: &[Bar]) -> Vec<Congestion> {
        let min_len = self.config.cluster_min_bars.max(2);
        let mut zones = Vec::new();
        let mut start = 0;
        let (mut lo, mut hi) = (f64::NEG_INFINITY, f64::INFINITY);

        let close_run = |start: usize, end: usize, zones: &mut Vec<Congestion>| {
            if end + 1 - start >= min_len {
                let run = &bars[start..=end];
                zones.push(Congestion {
                    start,
                    end,
                    top: run.iter().map(Bar::body_top).fold(f64::NEG_INFINITY, f64::max),
                    bottom: run.iter().map(Bar::body_bottom).fold(f64::INFINITY, f64::min),
                });
            }
        };

        for (i, bar) in bars.iter().enumerate() {
            let (next_lo, next_hi) = (lo.max(bar.body_bottom()), hi.min(bar.body_top()));
            if next_lo <= next_hi {
                (lo, hi) = (next_lo, next_hi);
            } else {
                close_run(start, i - 1, &mut zones);
                start = i;
                (lo, hi) = (bar.body_bottom(), bar.body_top());
            }
        }
        if !bars.is_empty() {
            close_run(start, bars.len() - 1, &mut zones);
        }
        zones
    }

    fn cluster_breaks(&self, bars: &[Bar], zones: &[Congestion]) -> Vec<Candidate> {
        zones
            .iter()
            .filter_map(|zone| {
                let (offset, bar) = bars[zone.end + 1..]
                    .iter()
                    .enumerate()
                    .find(|(_, b)| b.close > zone.top || b.close < zone.bottom)?;
                let (price, kind) = if bar.close > zone.top {
                    (zone.top, LevelKind::Support)
                } else {
                    (zone.bottom, LevelKind::Resistance)
                };
                Some(Candidate {
                    level: Level {
                        price,
                        kind,
                        grade: LevelGrade::Minor,
                        origin: LevelOrigin::ClusterBreak,
                        left_bound: bars[zone.start].start_time,
                        touches: zone.end + 1 - zone.start,
                    },
                    active_from: zone.end + offset + 2,
                })
            })
            .collect()
    }

    fn violated(&self, kind: LevelKind, price: f64, bar: &Bar, buffer: f64) -> bool {
        match kind {
            LevelKind::Support => bar.close < price - buffer,
            LevelKind::Resistance => bar.close > price + buffer,
        }
    }

    /// Walk the bars after a candidate formed. A surviving level is returned as is; a
    /// broken one survives only as a revisited role reversal.
    fn resolve(&self, candidate: Candidate, bars: &[Bar], atr: &[f64]) -> Option<Level> {
        let Candidate { level, active_from } = candidate;
        let buffer_at = |j: usize| {
            self.config.invalidation_atr_multiple * value_at(atr, j).unwrap_or(bars[j].range())
        };

        let Some(broken_at) = (active_from..bars.len())
            .find(|&j| self.violated(level.kind, level.price, &bars[j], buffer_at(j)))
        else {
            return Some(level);
        };

        let flipped = level.kind.opposite();
        let tol = self.config.touch_tolerance_pct * level.price.abs();
        let mut revisited = false;
        for j in broken_at + 1..bars.len() {
            let bar = &bars[j];
            if self.violated(flipped, level.price, bar, buffer_at(j)) {
                return None;
            }
            revisited |= match flipped {
                LevelKind::Resistance => bar.high >= level.price - tol,
                LevelKind::Support => bar.low <= level.price + tol,
            };
        }
        revisited.then(|| Level {
            kind: flipped,
            grade: LevelGrade::Minor,
            origin: LevelOrigin::RoleReversal,
            touches: 1,
            ..level
        })
    }

    fn prune(&self, levels: Vec<Level>, zones: &[Congestion], close: f64, len: usize) -> Vec<Level> {
        let prior = zones.iter().filter(|z| z.end + 1 < len);
        let floor = prior
            .clone()
            .filter(|z| z.top <= close)
            .max_by(|a, b| a.top.total_cmp(&b.top))
            .map(|z| z.bottom * (1.0 - self.config.touch_tolerance_pct));
        let ceiling = prior
            .filter(|z| z.bottom >= close)
            .min_by(|a, b| a.bottom.total_cmp(&b.bottom))
            .map(|z| z.top * (1.0 + self.config.touch_tolerance_pct));

        levels
            .into_iter()
            .filter(|l| match l.kind {
                LevelKind::Support => floor.map_or(true, |f| l.price >= f),
                LevelKind::Resistance => ceiling.map_or(true, |c| l.price <= c),
            })
            .collect()
    }

    /// Collapse same-kind levels within tolerance. The stronger grade wins.
    fn merge(&self, mut levels: Vec<Level>) -> Vec<Level> {
        levels.sort_by(|a, b| {
            (a.kind as u8)
                .cmp(&(b.kind as u8))
                .then(a.price.total_cmp(&b.price))
        });
        let mut merged: Vec<Level> = Vec::with_capacity(levels.len());
        for level in levels {
            match merged.last_mut() {
                Some(prev) if prev.kind == level.kind && self.within(level.price, prev.price) => {
                    let touches = prev.touches + level.touches;
                    let left_bound = prev.left_bound.min(level.left_bound);
                    if level.grade > prev.grade {
                        *prev = level;
                    }
                    prev.touches = touches;
                    prev.left_bound = left_bound;
                }
                _ => merged.push(level),
            }
        }
        merged.sort_by(|a, b| a.price.total_cmp(&b.price));
        merged
    }
}

/// Per (symbol, timeframe) memory of the last extraction.
///
/// Extraction reruns from scratch on every scan; the book carries grades across
/// runs so a level that was Major stays Major until it disappears.
#[derive(Debug, Clone, Default)]
pub struct LevelBook {
    tolerance_pct: f64,
    levels: Vec<Level>,
}

impl LevelBook {
    pub fn new(tolerance_pct: f64) -> Self {
        Self {
            tolerance_pct,
            levels: Vec::new(),
        }
    }

    pub fn reconcile(&mut self, fresh: Vec<Level>) -> Vec<Level> {
        let reconciled: Vec<Level> = fresh
            .into_iter()
            .map(|mut level| {
                for old in self.levels.iter().filter(|old| {
                    old.kind == level.kind
                        && (old.price - level.price).abs() <= self.tolerance_pct * old.price.abs()
                }) {
                    level.grade = level.grade.max(old.grade);
                    level.left_bound = level.left_bound.min(old.left_bound);
                }
                level
            })
            .collect();
        self.levels = reconciled.clone();
        reconciled
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PivotConfig;
    use crate::domain::Timeframe;
    use crate::pivots::detect;
    use crate::test_support::{from_mids, staircase, zigzag};
    use crate::trend::TrendAnalyzer;

    fn extract(bars: &[Bar], trend: Trend) -> Vec<Level> {
        let pivots = detect(bars, &PivotConfig::default());
        LevelExtractor::new(&LevelConfig::default()).extract(bars, &pivots, trend)
    }

    fn near(levels: &[Level], price: f64) -> Option<&Level> {
        levels.iter().find(|l| (l.price - price).abs() < 0.05)
    }

    #[test]
    fn repeated_pivots_make_major_levels() {
        let bars = zigzag(100.0, 3.0, 4);
        let levels = extract(&bars, Trend::Sideways);

        let support = near(&levels, 99.5).expect("support at repeated lows");
        assert_eq!(support.kind, LevelKind::Support);
        assert_eq!(support.grade, LevelGrade::Major);
        assert_eq!(support.origin, LevelOrigin::RepeatedLow);
        assert_eq!(support.touches, 3);

        let resistance = near(&levels, 103.5).expect("resistance at repeated highs");
        assert_eq!(resistance.grade, LevelGrade::Major);
        assert_eq!(resistance.origin, LevelOrigin::RepeatedHigh);
    }

    #[test]
    fn broken_support_revisited_becomes_minor_resistance() {
        let mut mids: Vec<f64> = (0..25)
            .map(|i| 100.0 + [0.0, 1.0, 2.0, 3.0, 2.0, 1.0][i % 6])
            .collect();
        mids.extend([98.0, 96.0, 94.0, 96.0, 98.0, 99.0]);
        let bars = from_mids(Timeframe::H1, &mids);
        let levels = extract(&bars, Trend::Sideways);

        let flipped = near(&levels, 99.5).expect("role reversal level");
        assert_eq!(flipped.kind, LevelKind::Resistance);
        assert_eq!(flipped.grade, LevelGrade::Minor);
        assert_eq!(flipped.origin, LevelOrigin::RoleReversal);
        assert!(levels
            .iter()
            .all(|l| !(l.kind == LevelKind::Support && (l.price - 99.5).abs() < 0.05)));
    }

    #[test]
    fn broken_support_not_revisited_is_removed() {
        let mut mids: Vec<f64> = (0..25)
            .map(|i| 100.0 + [0.0, 1.0, 2.0, 3.0, 2.0, 1.0][i % 6])
            .collect();
        mids.extend([98.0, 96.0, 94.0, 93.0]);
        let bars = from_mids(Timeframe::H1, &mids);
        assert!(near(&extract(&bars, Trend::Sideways), 99.5).is_none());
    }

    #[test]
    fn cluster_break_becomes_minor_support() {
        let bars = from_mids(Timeframe::H1, &[100.0, 100.1, 100.0, 100.1, 101.0, 102.0, 103.0]);
        let extractor = LevelExtractor::new(&LevelConfig::default());
        let zones = extractor.congestion(&bars);
        assert_eq!(zones.len(), 1);
        assert_eq!((zones[0].start, zones[0].end), (0, 3));

        let levels = extract(&bars, Trend::Sideways);
        let level = near(&levels, zones[0].top).expect("cluster break level");
        assert_eq!(level.kind, LevelKind::Support);
        assert_eq!(level.origin, LevelOrigin::ClusterBreak);
        assert_eq!(level.grade, LevelGrade::Minor);
    }

    #[test]
    fn uptrend_marks_rally_origin_major() {
        let bars = staircase(100.0, 1.0, 4);
        let pivots = detect(&bars, &PivotConfig::default());
        let trend = TrendAnalyzer::new(&crate::config::TrendConfig {
            fast_ma: 3,
            slow_ma: 6,
            separation_lookback: 2,
            ..Default::default()
        })
        .analyze(&bars, &pivots);
        assert_eq!(trend.trend, Trend::Up);

        let last_high = pivots
            .iter()
            .filter(|p| p.kind == PivotKind::High && p.is_major())
            .max_by_key(|p| p.index)
            .unwrap();
        let origin = pivots
            .iter()
            .filter(|p| p.kind == PivotKind::Low && p.index < last_high.index)
            .max_by_key(|p| p.index)
            .unwrap();

        let levels = LevelExtractor::new(&LevelConfig::default()).extract(&bars, &pivots, Trend::Up);
        let level = near(&levels, origin.price).expect("rally origin");
        assert_eq!(level.grade, LevelGrade::Major);
        assert_eq!(level.origin, LevelOrigin::RallyOrigin);
    }

    #[test]
    fn book_never_downgrades() {
        let t = crate::test_support::base_time();
        let level = |price: f64, grade| Level {
            price,
            kind: LevelKind::Support,
            grade,
            origin: LevelOrigin::RepeatedLow,
            left_bound: t,
            touches: 2,
        };
        let mut book = LevelBook::new(0.003);
        book.reconcile(vec![level(100.0, LevelGrade::Major)]);
        let again = book.reconcile(vec![level(100.1, LevelGrade::Minor)]);
        assert_eq!(again[0].grade, LevelGrade::Major);

        assert!(book.reconcile(Vec::new()).is_empty());
        let fresh = book.reconcile(vec![level(100.0, LevelGrade::Minor)]);
        assert_eq!(fresh[0].grade, LevelGrade::Minor);
    }

    #[test]
    fn nearest_levels_bracket_price() {
        let levels = extract(&zigzag(100.0, 3.0, 4), Trend::Sideways);
        let nearest = NearestLevels::around(&levels, 101.0, 0.003);
        assert!((nearest.support.unwrap().price - 99.5).abs() < 0.05);
        assert!((nearest.resistance.unwrap().price - 103.5).abs() < 0.05);
    }
}
