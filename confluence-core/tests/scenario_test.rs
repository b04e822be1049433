//! End-to-end behavior on hand-built bar sequences.

mod common;

use std::collections::BTreeMap;

use chrono::Duration;
use common::{base_time, lcg_walk, ohlc};
use confluence_core::classify::{BarClassifier, FollowThroughKind, RangeClass};
use confluence_core::config::{ClassifierConfig, ConfluenceConfig, EngineConfig, PivotConfig};
use confluence_core::confluence::{ConfluenceAggregator, SymbolAnalysis};
use confluence_core::domain::{Bar, Direction, ScanSeq, Timeframe};
use confluence_core::levels::{Level, LevelGrade, LevelKind, LevelOrigin, NearestLevels};
use confluence_core::pivots::{detect, PivotDetector, PivotGrade, PivotKind};
use confluence_core::scoring::{ScoreComponents, TimeframeAnalysis, TimeframeScorer};
use confluence_core::trend::Trend;
use confluence_core::watchlist::{BarCloseOutcome, WatchState, WatchlistEntry, WatchlistStateMachine};

fn analysis(timeframe: Timeframe, trend: Trend, score: f64, bar: &Bar) -> TimeframeAnalysis {
    let classifier = BarClassifier::new(&ClassifierConfig::default());
    TimeframeAnalysis {
        symbol: "AAA".into(),
        timeframe,
        trend,
        trend_quality: 0.6,
        ma_relationship: None,
        nearest_levels: NearestLevels::default(),
        levels: Vec::new(),
        retracement_pct: Some(0.3),
        candle_score: 0.5,
        components: ScoreComponents::default(),
        score,
        bias: trend.direction(),
        bar_class: classifier.classify(bar, &[]).unwrap(),
        follow_through: None,
        last_close: bar.close,
        last_bar_close: bar.close_time(),
        atr: Some(1.0),
        bars_used: 200,
    }
}

fn aggregate(micro: TimeframeAnalysis, macro_frame: TimeframeAnalysis) -> SymbolAnalysis {
    let config = EngineConfig::default();
    ConfluenceAggregator::new(&ConfluenceConfig::default(), config.fingerprint())
        .unwrap()
        .aggregate(
            "AAA",
            BTreeMap::from([(micro.timeframe, micro), (macro_frame.timeframe, macro_frame)]),
            BTreeMap::new(),
        )
}

#[test]
fn low_pivot_needs_bars_on_its_left() {
    // Pivot bar first, three higher lows, then a reversal. Nothing sits to the left
    // of the low, so it never becomes a pivot (DESIGN.md, decision 2).
    let bars = ohlc(
        Timeframe::H1,
        &[
            (10.0, 12.0, 9.0, 11.0),
            (11.0, 13.0, 10.0, 12.0),
            (12.0, 14.0, 11.0, 13.0),
            (13.0, 15.0, 12.0, 14.0),
            (14.0, 14.5, 9.0, 10.0),
        ],
    );
    let mut detector = PivotDetector::new(&PivotConfig::default());
    let formed: Vec<_> = bars.iter().flat_map(|b| detector.push(b)).collect();
    assert!(formed.iter().all(|p| p.kind != PivotKind::Low));
    // The run of higher highs is waiting on its right side.
    assert_eq!(detector.pending(PivotKind::High), Some((3, 15.0)));
}

#[test]
fn low_pivot_after_deep_v_is_major() {
    // The same sequence behind two descending approach bars (DESIGN.md, decision 2):
    // the pivot bar, three higher lows, then a reversal.
    let bars = ohlc(
        Timeframe::H1,
        &[
            (12.0, 12.5, 11.0, 11.2),
            (11.2, 11.5, 10.0, 10.2),
            (10.0, 12.0, 9.0, 11.0),
            (11.0, 13.0, 10.0, 12.0),
            (12.0, 14.0, 11.0, 13.0),
            (13.0, 15.0, 12.0, 14.0),
            (14.0, 14.5, 9.0, 10.0),
        ],
    );
    let lows: Vec<_> = detect(&bars, &PivotConfig::default())
        .into_iter()
        .filter(|p| p.kind == PivotKind::Low)
        .collect();
    assert_eq!(lows.len(), 1);
    assert_eq!(lows[0].index, 2);
    assert_eq!(lows[0].price, 9.0);
    assert_eq!(lows[0].grade, PivotGrade::Major);
    assert!(lows[0].formed_at <= bars[6].close_time());
}

#[test]
fn wide_range_bar_then_break_of_its_low_is_continuation() {
    let mut data: Vec<(f64, f64, f64, f64)> = (0..8)
        .map(|i| {
            if i % 2 == 0 {
                (10.2, 10.9, 9.9, 10.7)
            } else {
                (10.7, 10.9, 9.9, 10.2)
            }
        })
        .collect();
    data.push((10.8, 11.0, 8.0, 8.2));
    data.push((8.2, 8.4, 7.5, 7.8));
    let bars = ohlc(Timeframe::H1, &data);

    let classifier = BarClassifier::new(&ClassifierConfig::default());
    let wide = classifier.classify(&bars[8], &bars[..8]).unwrap();
    assert_eq!(wide.range, RangeClass::WideRange);

    let follow = classifier.follow_through(&bars[8], &wide, &bars[9]).unwrap();
    assert_eq!(follow.direction, Direction::Short);
    assert_eq!(follow.kind, FollowThroughKind::Continuation);
}

#[test]
fn micro_against_macro_is_capped_at_ceiling() {
    let bar = ohlc(Timeframe::M15, &[(10.0, 11.0, 9.5, 10.5)]).remove(0);
    let result = aggregate(
        analysis(Timeframe::M15, Trend::Up, 85.0, &bar),
        analysis(Timeframe::H1, Trend::Down, 70.0, &bar),
    );
    assert!(!result.macro_aligned);
    assert_eq!(result.raw_score, 85.0);
    assert_eq!(result.confluence_score, 40.0);
}

/// Three bearish bars, a bullish change of guard through support at 10.0, then two
/// more bars that would match again if cooldown did not hold them back.
fn trigger_sequence() -> Vec<Bar> {
    ohlc(
        Timeframe::M15,
        &[
            (13.0, 13.1, 11.9, 12.0),
            (12.0, 12.1, 10.9, 11.0),
            (11.0, 11.1, 9.9, 10.0),
            (10.0, 10.8, 9.8, 10.7),
            (10.7, 10.8, 9.9, 10.1),
            (10.1, 10.2, 9.0, 9.3),
        ],
    )
}

fn watched_entry(machine: &WatchlistStateMachine, bars: &[Bar]) -> WatchlistEntry {
    let trigger_bar = &bars[3];
    let mut micro = analysis(Timeframe::M15, Trend::Up, 80.0, trigger_bar);
    micro.levels = vec![Level {
        price: 10.0,
        kind: LevelKind::Support,
        grade: LevelGrade::Major,
        origin: LevelOrigin::RepeatedLow,
        left_bound: base_time(),
        touches: 3,
    }];
    let macro_frame = analysis(Timeframe::H1, Trend::Up, 65.0, trigger_bar);

    let mut entry = WatchlistEntry::new("AAA");
    machine.apply_scan(&mut entry, aggregate(micro, macro_frame), ScanSeq(1), trigger_bar.close_time());
    assert_eq!(entry.state, WatchState::Watching);
    entry
}

#[test]
fn one_signal_then_cooldown_for_one_interval() {
    let machine = WatchlistStateMachine::new(&EngineConfig::default());
    let bars = trigger_sequence();
    let mut entry = watched_entry(&machine, &bars);

    let close = bars[3].close_time();
    let outcome = machine.on_bar_close(&mut entry, &bars[..4], close).unwrap();
    let BarCloseOutcome::Triggered(signal) = outcome else {
        panic!("expected a trigger, got {outcome:?}");
    };
    assert_eq!(entry.state, WatchState::Triggered);
    assert_eq!(entry.cooldown_until, Some(close + Duration::minutes(15)));
    assert_eq!(entry.last_triggered_at, Some(close));
    assert!(machine.confirm_delivery(&mut entry, &signal.key));

    let next = bars[4].close_time();
    assert_eq!(
        machine.on_bar_close(&mut entry, &bars[..5], next).unwrap(),
        BarCloseOutcome::Cooldown
    );
    assert_eq!(entry.state, WatchState::Signaled);

    let after = bars[5].close_time();
    let outcome = machine.on_bar_close(&mut entry, &bars[..6], after).unwrap();
    assert_ne!(outcome, BarCloseOutcome::Cooldown);
    assert_eq!(entry.state, WatchState::Watching);
}

#[test]
fn replaying_the_same_bars_emits_at_most_one_signal() {
    let machine = WatchlistStateMachine::new(&EngineConfig::default());
    let bars = trigger_sequence();
    let mut entry = watched_entry(&machine, &bars);

    let mut signals = Vec::new();
    for _ in 0..2 {
        for end in 4..=bars.len() {
            let now = bars[end - 1].close_time();
            if let BarCloseOutcome::Triggered(signal) =
                machine.on_bar_close(&mut entry, &bars[..end], now).unwrap()
            {
                signals.push(signal);
            }
        }
    }
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].key.bar_close, bars[3].close_time());
}

#[test]
fn full_pipeline_is_deterministic() {
    let config = EngineConfig::default();
    let scorer = TimeframeScorer::new(&config);
    let aggregator = ConfluenceAggregator::new(&config.confluence, config.fingerprint()).unwrap();

    let run = || {
        let micro = lcg_walk(Timeframe::M15, 200, 11);
        let macro_bars = lcg_walk(Timeframe::H1, 200, 12);
        let per = BTreeMap::from([
            (Timeframe::M15, scorer.analyze("AAA", Timeframe::M15, &micro).unwrap()),
            (Timeframe::H1, scorer.analyze("AAA", Timeframe::H1, &macro_bars).unwrap()),
        ]);
        serde_json::to_string(&aggregator.aggregate("AAA", per, BTreeMap::new())).unwrap()
    };
    assert_eq!(run(), run());
}
