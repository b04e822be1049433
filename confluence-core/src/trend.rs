//! Trend direction and quality from Major pivots and a fast/slow SMA pair.
//!
//! Direction comes from the last `min_swings` Major highs and Major lows: all
//! strictly stepping up (beyond the equality tolerance) is Up, all stepping down is
//! Down, anything else is Sideways. A close through the last Major pivot on the
//! trend's defended side also ends the trend on that bar.
//!
//! Quality only applies to Up and Down and blends three sub-scores:
//! adherence of pullbacks to the fast SMA, fast/slow separation, and the absence
//! of gaps and engulfing counter-trend bars inside the trend segment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TrendConfig;
use crate::domain::{Bar, Direction};
use crate::indicators::{value_at, Indicator, Sma};
use crate::pivots::{Pivot, PivotKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trend {
    Up,
    Down,
    Sideways,
}

impl Trend {
    pub fn direction(self) -> Option<Direction> {
        match self {
            Trend::Up => Some(Direction::Long),
            Trend::Down => Some(Direction::Short),
            Trend::Sideways => None,
        }
    }
}

/// Where the last close sits relative to the two averages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaPosition {
    AboveBoth,
    BelowBoth,
    Between,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaStack {
    /// Fast above slow.
    Bullish,
    Bearish,
    Flat,
}

/// How the fast/slow spread changed over `separation_lookback` bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaSeparation {
    Parallel,
    Converging,
    /// Spread widening: the trend is getting extended.
    Diverging,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaRelationship {
    pub fast: f64,
    pub slow: f64,
    pub position: MaPosition,
    pub stack: MaStack,
    pub separation: MaSeparation,
}

impl MaRelationship {
    /// 1.0 when position and stack both agree with `direction`, 0.0 when both oppose.
    pub fn agreement(&self, direction: Direction) -> f64 {
        let position = match (self.position, direction) {
            (MaPosition::AboveBoth, Direction::Long) | (MaPosition::BelowBoth, Direction::Short) => 1.0,
            (MaPosition::Between, _) => 0.5,
            _ => 0.0,
        };
        let stack = match (self.stack, direction) {
            (MaStack::Bullish, Direction::Long) | (MaStack::Bearish, Direction::Short) => 1.0,
            (MaStack::Flat, _) => 0.5,
            _ => 0.0,
        };
        0.5 * position + 0.5 * stack
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAssessment {
    pub trend: Trend,
    /// 0..1; always 0 for Sideways.
    pub quality: f64,
    pub adherence: f64,
    pub separation: f64,
    pub cleanliness: f64,
    /// `None` while either average is warming up.
    pub ma: Option<MaRelationship>,
    /// Formation time of the newest pivot the direction was read from.
    pub established_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    config: TrendConfig,
    fast: Sma,
    slow: Sma,
}

impl TrendAnalyzer {
    pub fn new(config: &TrendConfig) -> Self {
        Self {
            config: config.clone(),
            fast: Sma::new(config.fast_ma.max(1)),
            slow: Sma::new(config.slow_ma.max(1)),
        }
    }

    pub fn analyze(&self, bars: &[Bar], pivots: &[Pivot]) -> TrendAssessment {
        let fast = self.fast.compute(bars);
        let slow = self.slow.compute(bars);
        let ma = self.ma_relationship(bars, &fast, &slow);

        let (trend, used) = self.direction(bars, pivots);
        let established_at = used.iter().map(|p| p.formed_at).max();

        let Some(direction) = trend.direction() else {
            return TrendAssessment {
                trend,
                quality: 0.0,
                adherence: 0.0,
                separation: 0.0,
                cleanliness: 0.0,
                ma,
                established_at,
            };
        };

        let segment_start = used.iter().map(|p| p.index).min().unwrap_or(0);
        let adherence = self.adherence(direction, pivots, segment_start, &fast);
        let separation = separation_score(ma.as_ref(), direction);
        let cleanliness = self.cleanliness(direction, &bars[segment_start.min(bars.len())..]);

        let w = &self.config.quality_weights;
        let total = w.sum();
        let quality = if total > 0.0 {
            ((w.adherence * adherence + w.separation * separation + w.cleanliness * cleanliness)
                / total)
                .clamp(0.0, 1.0)
        } else {
            0.0
        };

        TrendAssessment {
            trend,
            quality,
            adherence,
            separation,
            cleanliness,
            ma,
            established_at,
        }
    }

    fn direction<'p>(&self, bars: &[Bar], pivots: &'p [Pivot]) -> (Trend, Vec<&'p Pivot>) {
        let n = self.config.min_swings.max(2);
        let highs = last_major(pivots, PivotKind::High, n);
        let lows = last_major(pivots, PivotKind::Low, n);
        let mut used: Vec<&Pivot> = highs.iter().chain(lows.iter()).copied().collect();
        used.sort_by_key(|p| p.index);

        if highs.len() < n || lows.len() < n {
            return (Trend::Sideways, used);
        }

        let tol = self.config.equality_tolerance;
        let rising = |xs: &[&Pivot]| xs.windows(2).all(|w| w[1].price > w[0].price * (1.0 + tol));
        let falling = |xs: &[&Pivot]| xs.windows(2).all(|w| w[1].price < w[0].price * (1.0 - tol));

        let last_close = bars.last().map(|b| b.close);
        let trend = if rising(&highs) && rising(&lows) {
            // closing under the last Major low ends the uptrend
            match (last_close, lows.last()) {
                (Some(close), Some(low)) if close < low.price => Trend::Sideways,
                _ => Trend::Up,
            }
        } else if falling(&highs) && falling(&lows) {
            match (last_close, highs.last()) {
                (Some(close), Some(high)) if close > high.price => Trend::Sideways,
                _ => Trend::Down,
            }
        } else {
            Trend::Sideways
        };
        (trend, used)
    }

    fn ma_relationship(&self, bars: &[Bar], fast: &[f64], slow: &[f64]) -> Option<MaRelationship> {
        let last = bars.len().checked_sub(1)?;
        let (f, s) = (value_at(fast, last)?, value_at(slow, last)?);
        let close = bars[last].close;

        let position = if close > f && close > s {
            MaPosition::AboveBoth
        } else if close < f && close < s {
            MaPosition::BelowBoth
        } else {
            MaPosition::Between
        };

        let spread = f - s;
        let stack = if spread.abs() <= f64::EPSILON * s.abs() {
            MaStack::Flat
        } else if spread > 0.0 {
            MaStack::Bullish
        } else {
            MaStack::Bearish
        };

        let separation = match last
            .checked_sub(self.config.separation_lookback)
            .and_then(|then| Some(value_at(fast, then)? - value_at(slow, then)?))
        {
            Some(before) if before.signum() != spread.signum() => MaSeparation::Converging,
            Some(before) => {
                let band = self.config.parallel_band * before.abs().max(s.abs() * 1e-4);
                let change = spread.abs() - before.abs();
                if change.abs() <= band {
                    MaSeparation::Parallel
                } else if change > 0.0 {
                    MaSeparation::Diverging
                } else {
                    MaSeparation::Converging
                }
            }
            None => MaSeparation::Parallel,
        };

        Some(MaRelationship {
            fast: f,
            slow: s,
            position,
            stack,
            separation,
        })
    }

    /// Fraction of recent pullback pivots that held within the band around the fast SMA.
    fn adherence(&self, direction: Direction, pivots: &[Pivot], from: usize, fast: &[f64]) -> f64 {
        let pullback_kind = match direction {
            Direction::Long => PivotKind::Low,
            Direction::Short => PivotKind::High,
        };
        let band = self.config.ma_band_pct;
        let checks: Vec<bool> = pivots
            .iter()
            .filter(|p| p.kind == pullback_kind && p.index >= from)
            .filter_map(|p| value_at(fast, p.index).map(|ma| (p.price, ma)))
            .map(|(price, ma)| match direction {
                Direction::Long => price >= ma * (1.0 - band),
                Direction::Short => price <= ma * (1.0 + band),
            })
            .collect();
        let recent = &checks[checks.len().saturating_sub(self.config.pullback_lookback.max(1))..];
        if recent.is_empty() {
            return 0.5;
        }
        recent.iter().filter(|held| **held).count() as f64 / recent.len() as f64
    }

    fn cleanliness(&self, direction: Direction, segment: &[Bar]) -> f64 {
        if segment.len() < 2 {
            return 1.0;
        }
        let defects = segment
            .windows(2)
            .filter(|w| {
                let (prev, bar) = (&w[0], &w[1]);
                let gap = bar.low > prev.high || bar.high < prev.low;
                let prior_body = prev.body();
                let reversal = prior_body > 0.0
                    && direction.sign() * (prev.close - bar.close) / prior_body
                        > self.config.engulf_ratio;
                gap || reversal
            })
            .count();
        (1.0 - defects as f64 / (segment.len() - 1) as f64).clamp(0.0, 1.0)
    }
}

fn last_major(pivots: &[Pivot], kind: PivotKind, n: usize) -> Vec<&Pivot> {
    let mut picked: Vec<&Pivot> = pivots
        .iter()
        .filter(|p| p.kind == kind && p.is_major())
        .collect();
    picked.sort_by_key(|p| p.index);
    let skip = picked.len().saturating_sub(n);
    picked.into_iter().skip(skip).collect()
}

fn separation_score(ma: Option<&MaRelationship>, direction: Direction) -> f64 {
    let Some(ma) = ma else {
        return 0.0;
    };
    let against = matches!(
        (ma.stack, direction),
        (MaStack::Bearish, Direction::Long) | (MaStack::Bullish, Direction::Short)
    );
    if against {
        return 0.0;
    }
    match ma.separation {
        MaSeparation::Parallel => 1.0,
        MaSeparation::Converging => 0.5,
        MaSeparation::Diverging => 0.25,
    }
}
