//! Per-timeframe score.
//!
//! Every call recomputes pivots, trend, levels and the five score components from
//! the closed-bar window. Nothing is carried over except the level grades kept by
//! a `LevelBook`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::{BarClass, BarClassifier, FollowThrough, FollowThroughKind, Penetration, Polarity, RangeClass};
use crate::config::{EngineConfig, PivotConfig, ScoringConfig};
use crate::domain::{Bar, Direction, Timeframe};
use crate::error::{ensure_closed, CoreError};
use crate::indicators::{value_at, Atr, Indicator};
use crate::levels::{Level, LevelBook, LevelExtractor, LevelGrade, NearestLevels};
use crate::pivots::{detect, Pivot, PivotKind};
use crate::trend::{MaRelationship, MaStack, Trend, TrendAnalyzer};

/// Component values in 0..1, before weighting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub trend: f64,
    pub ma: f64,
    pub level: f64,
    pub candle: f64,
    pub retracement: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeAnalysis {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub trend: Trend,
    pub trend_quality: f64,
    pub ma_relationship: Option<MaRelationship>,
    pub nearest_levels: NearestLevels,
    pub levels: Vec<Level>,
    /// Fraction of the last swing given back; `None` without a complete swing.
    pub retracement_pct: Option<f64>,
    pub candle_score: f64,
    pub components: ScoreComponents,
    /// 0..100.
    pub score: f64,
    pub bias: Option<Direction>,
    pub bar_class: BarClass,
    pub follow_through: Option<FollowThrough>,
    pub last_close: f64,
    /// Close time of the newest bar scored.
    pub last_bar_close: DateTime<Utc>,
    pub atr: Option<f64>,
    pub bars_used: usize,
}

#[derive(Debug, Clone)]
pub struct TimeframeScorer {
    scoring: ScoringConfig,
    pivots: PivotConfig,
    min_history: usize,
    classifier: BarClassifier,
    trend: TrendAnalyzer,
    levels: LevelExtractor,
    atr: Atr,
}

impl TimeframeScorer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            scoring: config.scoring.clone(),
            pivots: config.pivots.clone(),
            min_history: config.min_history(),
            classifier: BarClassifier::new(&config.classifier),
            trend: TrendAnalyzer::new(&config.trend),
            levels: LevelExtractor::new(&config.levels),
            atr: Atr::new(config.levels.atr_period.max(1)),
        }
    }

    pub fn min_history(&self) -> usize {
        self.min_history
    }

    pub fn classifier(&self) -> &BarClassifier {
        &self.classifier
    }

    /// Score without level memory.
    pub fn analyze(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: &[Bar],
    ) -> Result<TimeframeAnalysis, CoreError> {
        let mut book = LevelBook::new(self.levels.tolerance_pct());
        self.analyze_with_book(symbol, timeframe, bars, &mut book)
    }

    /// Score `bars` (closed, oldest first) and reconcile levels against `book`.
    pub fn analyze_with_book(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: &[Bar],
        book: &mut LevelBook,
    ) -> Result<TimeframeAnalysis, CoreError> {
        ensure_closed(bars)?;
        if let Some(other) = bars.iter().find(|b| b.interval != timeframe) {
            return Err(CoreError::TimeframeMismatch {
                expected: timeframe,
                actual: other.interval,
            });
        }
        if bars.len() < self.min_history {
            return Err(CoreError::InsufficientHistory {
                timeframe,
                have: bars.len(),
                need: self.min_history,
            });
        }

        let (last, prior) = bars
            .split_last()
            .ok_or(CoreError::InsufficientHistory {
                timeframe,
                have: 0,
                need: self.min_history,
            })?;
        let bar_class = self.classifier.classify(last, prior)?;
        let follow_through = match prior.split_last() {
            Some((prev, before)) => {
                let prev_class = self.classifier.classify(prev, before)?;
                self.classifier.follow_through(prev, &prev_class, last)
            }
            None => None,
        };

        let pivots = detect(bars, &self.pivots);
        let trend = self.trend.analyze(bars, &pivots);
        let levels = book.reconcile(self.levels.extract(bars, &pivots, trend.trend));
        let nearest_levels = NearestLevels::around(&levels, last.close, self.levels.tolerance_pct());
        let atr = value_at(&self.atr.compute(bars), bars.len() - 1);

        let bias = trend.trend.direction().or_else(|| {
            trend.ma.as_ref().and_then(|ma| match ma.stack {
                MaStack::Bullish => Some(Direction::Long),
                MaStack::Bearish => Some(Direction::Short),
                MaStack::Flat => None,
            })
        });

        let retracement_pct = bias.and_then(|dir| retracement(&pivots, dir, last.close));
        let components = match bias {
            Some(dir) => ScoreComponents {
                trend: match trend.trend {
                    Trend::Sideways => self.scoring.sideways_trend_credit,
                    _ => 0.5 + 0.5 * trend.quality,
                },
                ma: trend.ma.as_ref().map_or(0.0, |ma| ma.agreement(dir)),
                level: self.level_component(&nearest_levels, dir, last.close, atr),
                candle: self.candle_component(&bar_class, follow_through, dir),
                retracement: retracement_pct.map_or(0.0, |pct| self.retracement_component(pct)),
            },
            None => ScoreComponents {
                trend: self.scoring.sideways_trend_credit,
                ..ScoreComponents::default()
            },
        };

        Ok(TimeframeAnalysis {
            symbol: symbol.to_string(),
            timeframe,
            trend: trend.trend,
            trend_quality: trend.quality,
            ma_relationship: trend.ma,
            nearest_levels,
            levels,
            retracement_pct,
            candle_score: components.candle,
            score: self.weighted(&components),
            components,
            bias,
            bar_class,
            follow_through,
            last_close: last.close,
            last_bar_close: last.close_time(),
            atr,
            bars_used: bars.len(),
        })
    }

    fn weighted(&self, c: &ScoreComponents) -> f64 {
        let w = &self.scoring.weights;
        let total = w.sum();
        if total <= 0.0 {
            return 0.0;
        }
        let sum = w.trend * c.trend
            + w.ma * c.ma
            + w.level * c.level
            + w.candle * c.candle
            + w.retracement * c.retracement;
        (100.0 * sum / total).clamp(0.0, 100.0)
    }

    fn level_component(
        &self,
        nearest: &NearestLevels,
        bias: Direction,
        close: f64,
        atr: Option<f64>,
    ) -> f64 {
        let (Some(level), Some(atr)) = (nearest.defending(bias), atr.filter(|a| *a > 0.0)) else {
            return 0.0;
        };
        let reach = self.scoring.level_proximity_atr;
        let distance = (close - level.price).abs() / atr;
        if reach <= 0.0 || distance > reach {
            return 0.0;
        }
        let proximity = 1.0 - distance / reach;
        match level.grade {
            LevelGrade::Major => proximity,
            LevelGrade::Minor => proximity * self.scoring.minor_level_factor,
        }
    }

    /// Strongest pattern on the last bar that points the bias direction.
    fn candle_component(
        &self,
        class: &BarClass,
        follow_through: Option<FollowThrough>,
        bias: Direction,
    ) -> f64 {
        let p = &self.scoring.candle;
        let own = class.polarity.direction();
        let against = own.is_some_and(|d| d != bias)
            && (class.change_of_guard.is_some() || class.is_wide_range());
        if against {
            return 0.0;
        }

        let mut best = match (class.polarity, class.range) {
            (Polarity::Doji, _) => p.doji,
            (_, RangeClass::NarrowRange) => p.narrow_range,
            _ => p.normal,
        };
        if let Some(cog) = class.change_of_guard.filter(|_| own == Some(bias)) {
            best = best.max(match cog.tier {
                Penetration::Engulfing => p.engulfing,
                Penetration::Deep => p.deep,
                Penetration::Shallow => p.shallow,
            });
        }
        if class.is_wide_range() && own == Some(bias) {
            best = best.max(p.wide_range);
        }
        if class.tail.is_some_and(|t| t.direction() == bias) {
            best = best.max(p.tail);
        }
        if follow_through
            .is_some_and(|ft| ft.direction == bias && ft.kind == FollowThroughKind::Continuation)
        {
            best = best.max(p.continuation);
        }
        best.clamp(0.0, 1.0)
    }

    fn retracement_component(&self, pct: f64) -> f64 {
        let b = &self.scoring.retracement;
        if pct <= b.strong_max {
            b.strong
        } else if pct <= b.moderate_max {
            b.moderate
        } else if pct <= b.deep_max {
            b.deep
        } else {
            b.extended_bonus
        }
    }
}

/// Share of the last swing in `direction` given back by `close`.
///
/// Long: the last swing high and the low pivot before it. Major pivots are
/// preferred; any grade is used when no Major swing exists.
pub fn retracement(pivots: &[Pivot], direction: Direction, close: f64) -> Option<f64> {
    let (extreme_kind, origin_kind) = match direction {
        Direction::Long => (PivotKind::High, PivotKind::Low),
        Direction::Short => (PivotKind::Low, PivotKind::High),
    };
    let latest = |kind: PivotKind, before: usize, major_only: bool| {
        pivots
            .iter()
            .filter(|p| p.kind == kind && p.index < before && (!major_only || p.is_major()))
            .max_by_key(|p| p.index)
    };
    let swing = [true, false].into_iter().find_map(|major_only| {
        let extreme = latest(extreme_kind, usize::MAX, major_only)?;
        let origin = latest(origin_kind, extreme.index, major_only)?;
        Some((extreme.price, origin.price))
    })?;

    let (extreme, origin) = swing;
    let span = (extreme - origin) * direction.sign();
    if span <= 0.0 {
        return None;
    }
    Some((extreme - close) * direction.sign() / span)
}
