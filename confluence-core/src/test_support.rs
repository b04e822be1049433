//! Bar builders shared by unit tests.

use chrono::{DateTime, TimeZone, Utc};

use crate::classify::{BarClass, Polarity, RangeClass};
use crate::domain::{Bar, Timeframe};
use crate::levels::NearestLevels;
use crate::scoring::{ScoreComponents, TimeframeAnalysis};
use crate::trend::Trend;

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
}

/// Bars from explicit (open, high, low, close) tuples, one hour apart.
pub fn ohlc(data: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
    data.iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| {
            Bar::new(
                base_time() + chrono::Duration::hours(i as i64),
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

/// One bar per mid price: high/low half a point away, a 0.4 body in the direction
/// of the move. Highs and lows therefore order exactly like the mids.
pub fn from_mids(timeframe: Timeframe, mids: &[f64]) -> Vec<Bar> {
    mids.iter()
        .enumerate()
        .map(|(i, &m)| {
            let dir = match i.checked_sub(1).map(|p| mids[p]) {
                Some(prev) if m < prev => -1.0,
                Some(prev) if m == prev => 0.0,
                _ => 1.0,
            };
            Bar::new(
                base_time() + timeframe.duration() * i as i32,
                timeframe,
                m - 0.2 * dir,
                m + 0.5,
                m - 0.5,
                m + 0.2 * dir,
                1000.0,
            )
        })
        .collect()
}

/// Trending swings: four impulse bars of `2 * step`, three pullback bars of `step`,
/// closed by a two-bar impulse so the last pullback low is confirmed.
pub fn staircase_mids(start: f64, step: f64, swings: usize) -> Vec<f64> {
    let mut mids = vec![start];
    let push = |delta: f64, n: usize, mids: &mut Vec<f64>| {
        for _ in 0..n {
            let last = *mids.last().unwrap();
            mids.push(last + delta);
        }
    };
    for _ in 0..swings {
        push(2.0 * step, 4, &mut mids);
        push(-step, 3, &mut mids);
    }
    push(2.0 * step, 2, &mut mids);
    mids
}

pub fn staircase(start: f64, step: f64, swings: usize) -> Vec<Bar> {
    from_mids(Timeframe::H1, &staircase_mids(start, step, swings))
}

/// Range-bound swings between `center` and `center + amplitude`.
pub fn zigzag(center: f64, amplitude: f64, swings: usize) -> Vec<Bar> {
    let pattern = [0.0, 1.0, 2.0, 3.0, 2.0, 1.0];
    let mids: Vec<f64> = (0..swings * pattern.len() + 1)
        .map(|i| center + amplitude * pattern[i % pattern.len()] / 3.0)
        .collect();
    from_mids(Timeframe::H1, &mids)
}

/// A hand-built analysis for aggregation and watchlist tests.
pub fn analysis(symbol: &str, timeframe: Timeframe, trend: Trend, score: f64) -> TimeframeAnalysis {
    TimeframeAnalysis {
        symbol: symbol.to_string(),
        timeframe,
        trend,
        trend_quality: 0.5,
        ma_relationship: None,
        nearest_levels: NearestLevels::default(),
        levels: Vec::new(),
        retracement_pct: None,
        candle_score: 0.0,
        components: ScoreComponents::default(),
        score,
        bias: trend.direction(),
        bar_class: BarClass {
            polarity: Polarity::Doji,
            range: RangeClass::Normal,
            tail: None,
            change_of_guard: None,
        },
        follow_through: None,
        last_close: 100.0,
        last_bar_close: base_time(),
        atr: Some(1.0),
        bars_used: 200,
    }
}
