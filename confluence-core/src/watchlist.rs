//! Per-symbol trigger lifecycle.
//!
//! ```text
//! Scanned --score >= watch--> Watching --pattern at level, score >= trigger--> Triggered
//!    ^                           ^                                                |
//!    |                           |                                   sink accepts signal
//!    |                           |                                                v
//!    |                           +------------ cooldown over (bar close) --- Signaled
//!    +---- score < watch (from any state)
//! ```
//!
//! Stale and cooldown are flags on the entry, not states. Periodic scans drive the
//! score-based transitions and closed trigger-timeframe bars drive the trigger.
//! A bar close at or before the entry's watermark is a replay and changes nothing,
//! so re-delivered bars can never emit a second signal.
//!
//! A matched trigger commits the watermark and cooldown immediately and queues the
//! signal on the entry. It leaves the queue only through `confirm_delivery`, so a
//! signal the sink refused is offered again on the next scan.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::classify::{BarClass, BarClassifier};
use crate::config::{EngineConfig, WatchlistConfig};
use crate::confluence::SymbolAnalysis;
use crate::domain::{Bar, ConfigFingerprint, Direction, ScanSeq, Timeframe, TriggerKey};
use crate::error::{ensure_closed, CoreError};
use crate::levels::{Level, LevelKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WatchState {
    Scanned,
    Watching,
    Triggered,
    Signaled,
}

/// Bar patterns that can fire a trigger. Each requires the bar to close through a
/// qualified level in the bias direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerPattern {
    ChangeOfGuardAtLevel,
    TailAtLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub symbol: String,
    pub state: WatchState,
    pub analysis: Option<SymbolAnalysis>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub stale: bool,
    pub last_scan_seq: Option<ScanSeq>,
    /// Close time of the newest trigger-timeframe bar evaluated.
    pub last_bar_close: Option<DateTime<Utc>>,
    pub last_trigger: Option<TriggerKey>,
    /// Signals built but not yet accepted by the sink, oldest first.
    #[serde(default)]
    pub undelivered: Vec<TradeSignal>,
}

impl WatchlistEntry {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            state: WatchState::Scanned,
            analysis: None,
            last_triggered_at: None,
            cooldown_until: None,
            stale: false,
            last_scan_seq: None,
            last_bar_close: None,
            last_trigger: None,
            undelivered: Vec::new(),
        }
    }

    /// A bar closing at or before `cooldown_until` is still inside the cooldown.
    pub fn in_cooldown(&self, bar_close: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| bar_close <= until)
    }

    pub fn confluence_score(&self) -> Option<f64> {
        self.analysis.as_ref().map(|a| a.confluence_score)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub symbol: String,
    pub direction: Direction,
    pub entry: f64,
    pub stop: f64,
    pub targets: Vec<f64>,
    pub score: f64,
    pub triggering_timeframe: Timeframe,
    pub triggered_bar_close_time: DateTime<Utc>,
    pub rationale: String,
    pub pattern: TriggerPattern,
    pub key: TriggerKey,
    pub config_fingerprint: ConfigFingerprint,
}

/// Read-only dump of every entry, sorted by symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistSnapshot {
    pub taken_at: DateTime<Utc>,
    pub entries: Vec<WatchlistEntry>,
}

impl WatchlistSnapshot {
    pub fn new(taken_at: DateTime<Utc>, mut entries: Vec<WatchlistEntry>) -> Self {
        entries.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Self { taken_at, entries }
    }

    pub fn count(&self, state: WatchState) -> usize {
        self.entries.iter().filter(|e| e.state == state).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Applied { from: WatchState, to: WatchState },
    /// A newer scan for the symbol already landed; this result was dropped.
    Superseded { latest: ScanSeq },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BarCloseOutcome {
    /// Bar close at or before the watermark.
    Replay,
    /// Bar closed too long before `now` to act on.
    Stale,
    NotWatching,
    Cooldown,
    BelowTrigger,
    NoPattern,
    /// Pattern matched; the signal is queued on the entry until delivered.
    Triggered(TradeSignal),
}

#[derive(Debug, Clone)]
pub struct WatchlistStateMachine {
    config: WatchlistConfig,
    classifier: BarClassifier,
    trigger_timeframe: Timeframe,
}

impl WatchlistStateMachine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.watchlist.clone(),
            classifier: BarClassifier::new(&config.classifier),
            trigger_timeframe: config.confluence.trigger_timeframe(),
        }
    }

    pub fn trigger_timeframe(&self) -> Timeframe {
        self.trigger_timeframe
    }

    fn freshness_bound(&self) -> Duration {
        self.trigger_timeframe.duration() * self.config.freshness_intervals as i32
    }

    /// Whether a trigger bar closing at `bar_close` is still recent enough to act on.
    pub fn is_fresh(&self, bar_close: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - bar_close <= self.freshness_bound()
    }

    /// Apply a periodic scan result. Results from an older cycle than the last one
    /// applied are discarded.
    pub fn apply_scan(
        &self,
        entry: &mut WatchlistEntry,
        analysis: SymbolAnalysis,
        seq: ScanSeq,
        now: DateTime<Utc>,
    ) -> ScanOutcome {
        if let Some(latest) = entry.last_scan_seq.filter(|latest| seq <= *latest) {
            debug!(symbol = %entry.symbol, seq = %seq, latest = %latest, "superseded scan result discarded");
            return ScanOutcome::Superseded { latest };
        }
        entry.last_scan_seq = Some(seq);

        let newest = analysis.as_of().max(entry.last_bar_close);
        let stale = newest.map_or(true, |t| now - t > self.freshness_bound());
        if stale != entry.stale {
            info!(symbol = %entry.symbol, stale, "freshness changed");
            entry.stale = stale;
        }

        let (from, to) = self.apply_score(entry, analysis, now);
        ScanOutcome::Applied { from, to }
    }

    fn apply_score(
        &self,
        entry: &mut WatchlistEntry,
        analysis: SymbolAnalysis,
        at: DateTime<Utc>,
    ) -> (WatchState, WatchState) {
        let score = analysis.confluence_score;
        entry.analysis = Some(analysis);

        let from = entry.state;
        let to = if score < self.config.watch_threshold {
            WatchState::Scanned
        } else {
            match from {
                WatchState::Scanned => WatchState::Watching,
                WatchState::Triggered | WatchState::Signaled if !entry.in_cooldown(at) => {
                    WatchState::Watching
                }
                other => other,
            }
        };
        if to != from {
            info!(symbol = %entry.symbol, from = ?from, to = ?to, score, "watchlist transition");
            entry.state = to;
        }
        (from, to)
    }

    /// Evaluate a trigger bar that closed before the current scan.
    ///
    /// `analysis` must be scored from the bars that had closed when `bars`' newest
    /// bar closed. It replaces the entry's analysis and drives the score transitions
    /// at that close time, then the bar is evaluated as by `on_bar_close`. Catching up
    /// this way yields the same signals whether the scanner ran after every bar or
    /// only after several.
    pub fn on_missed_bar_close(
        &self,
        entry: &mut WatchlistEntry,
        analysis: SymbolAnalysis,
        bars: &[Bar],
        now: DateTime<Utc>,
    ) -> Result<BarCloseOutcome, CoreError> {
        let Some(bar) = bars.last() else {
            return Err(CoreError::InsufficientHistory {
                timeframe: self.trigger_timeframe,
                have: 0,
                need: 1,
            });
        };
        let close = bar.close_time();
        if let Some(as_of) = analysis.as_of().filter(|t| *t > close) {
            return Err(CoreError::AnalysisAhead {
                analysis: as_of,
                bar_close: close,
            });
        }
        if entry.last_bar_close.is_some_and(|w| close <= w) {
            return Ok(BarCloseOutcome::Replay);
        }
        self.apply_score(entry, analysis, close);
        self.on_bar_close(entry, bars, now)
    }

    /// Evaluate the newest bar of `bars` (closed trigger-timeframe bars, oldest first).
    pub fn on_bar_close(
        &self,
        entry: &mut WatchlistEntry,
        bars: &[Bar],
        now: DateTime<Utc>,
    ) -> Result<BarCloseOutcome, CoreError> {
        ensure_closed(bars)?;
        let Some((bar, prior)) = bars.split_last() else {
            return Err(CoreError::InsufficientHistory {
                timeframe: self.trigger_timeframe,
                have: 0,
                need: 1,
            });
        };
        if bar.interval != self.trigger_timeframe {
            return Err(CoreError::TimeframeMismatch {
                expected: self.trigger_timeframe,
                actual: bar.interval,
            });
        }

        let close = bar.close_time();
        if entry.last_bar_close.is_some_and(|w| close <= w) {
            return Ok(BarCloseOutcome::Replay);
        }
        if let Some(as_of) = entry
            .analysis
            .as_ref()
            .and_then(SymbolAnalysis::as_of)
            .filter(|t| *t > close)
        {
            return Err(CoreError::AnalysisAhead {
                analysis: as_of,
                bar_close: close,
            });
        }
        entry.last_bar_close = Some(close);

        let stale = !self.is_fresh(close, now);
        if stale != entry.stale {
            info!(symbol = %entry.symbol, stale, bar_close = %close, "freshness changed");
            entry.stale = stale;
        }
        if stale {
            return Ok(BarCloseOutcome::Stale);
        }

        if matches!(entry.state, WatchState::Triggered | WatchState::Signaled) {
            if entry.in_cooldown(close) {
                debug!(symbol = %entry.symbol, bar_close = %close, "bar inside cooldown");
                return Ok(BarCloseOutcome::Cooldown);
            }
            info!(symbol = %entry.symbol, from = ?entry.state, to = ?WatchState::Watching, "cooldown over");
            entry.state = WatchState::Watching;
        }
        if entry.state != WatchState::Watching {
            return Ok(BarCloseOutcome::NotWatching);
        }
        if entry.in_cooldown(close) {
            return Ok(BarCloseOutcome::Cooldown);
        }

        let Some(analysis) = entry.analysis.as_ref() else {
            return Ok(BarCloseOutcome::NotWatching);
        };
        if analysis.confluence_score < self.config.trigger_threshold {
            return Ok(BarCloseOutcome::BelowTrigger);
        }
        let Some(direction) = analysis.bias else {
            return Ok(BarCloseOutcome::NoPattern);
        };

        let class = self.classifier.classify(bar, prior)?;
        let Some((pattern, level)) = self.match_pattern(&class, bar, direction, analysis) else {
            return Ok(BarCloseOutcome::NoPattern);
        };

        let key = TriggerKey::new(entry.symbol.clone(), self.trigger_timeframe, close);
        let signal = self.build_signal(bar, direction, pattern, &level, analysis, key.clone());

        info!(symbol = %entry.symbol, key = %key, pattern = ?pattern, "trigger matched");
        entry.state = WatchState::Triggered;
        entry.last_triggered_at = Some(close);
        entry.cooldown_until =
            Some(close + self.trigger_timeframe.duration() * self.config.cooldown_bars as i32);
        entry.last_trigger = Some(key);
        entry.undelivered.push(signal.clone());
        Ok(BarCloseOutcome::Triggered(signal))
    }

    /// Record that the sink accepted the signal keyed `key`. Returns false when the
    /// signal is not queued on the entry, which means it was already delivered.
    pub fn confirm_delivery(&self, entry: &mut WatchlistEntry, key: &TriggerKey) -> bool {
        let Some(pos) = entry.undelivered.iter().position(|s| &s.key == key) else {
            return false;
        };
        let signal = entry.undelivered.remove(pos);
        if entry.state == WatchState::Triggered && entry.undelivered.is_empty() {
            entry.state = WatchState::Signaled;
        }
        info!(
            symbol = %signal.symbol,
            direction = ?signal.direction,
            entry = signal.entry,
            stop = signal.stop,
            score = signal.score,
            "trade signal delivered"
        );
        true
    }

    fn match_pattern(
        &self,
        class: &BarClass,
        bar: &Bar,
        direction: Direction,
        analysis: &SymbolAnalysis,
    ) -> Option<(TriggerPattern, Level)> {
        let level = analysis
            .trigger()?
            .levels
            .iter()
            .filter(|l| l.qualifies(self.config.min_level_grade) && l.crossed_by(bar, direction))
            .max_by(|a, b| {
                a.grade
                    .cmp(&b.grade)
                    .then((b.price - bar.close).abs().total_cmp(&(a.price - bar.close).abs()))
            })?
            .clone();

        let own = class.polarity.direction();
        self.config.patterns.iter().copied().find_map(|pattern| {
            let matched = match pattern {
                TriggerPattern::ChangeOfGuardAtLevel => class
                    .change_of_guard
                    .is_some_and(|cog| cog.tier >= self.config.min_cog_tier && own == Some(direction)),
                TriggerPattern::TailAtLevel => class.tail.is_some_and(|t| t.direction() == direction),
            };
            matched.then(|| (pattern, level.clone()))
        })
    }

    fn build_signal(
        &self,
        bar: &Bar,
        direction: Direction,
        pattern: TriggerPattern,
        level: &Level,
        analysis: &SymbolAnalysis,
        key: TriggerKey,
    ) -> TradeSignal {
        let atr = analysis
            .trigger()
            .and_then(|a| a.atr)
            .unwrap_or_else(|| bar.range());
        let buffer = self.config.stop_buffer_atr * atr;
        let entry = bar.close;
        let stop = match direction {
            Direction::Long => bar.low - buffer,
            Direction::Short => bar.high + buffer,
        };
        let risk = (entry - stop).abs();

        let opposing = match direction {
            Direction::Long => LevelKind::Resistance,
            Direction::Short => LevelKind::Support,
        };
        let mut targets: Vec<f64> = [analysis.trigger(), analysis.macro_frame()]
            .into_iter()
            .flatten()
            .flat_map(|a| a.levels.iter())
            .filter(|l| l.kind == opposing && (l.price - entry) * direction.sign() > 0.0)
            .map(|l| l.price)
            .collect();
        targets.sort_by(|a, b| ((a - entry).abs()).total_cmp(&(b - entry).abs()));
        targets.dedup_by(|a, b| (*a - *b).abs() <= f64::EPSILON * b.abs());
        targets.truncate(self.config.target_r_multiples.len().max(1));
        if targets.is_empty() {
            targets = self
                .config
                .target_r_multiples
                .iter()
                .map(|r| entry + direction.sign() * r * risk)
                .collect();
        }

        let rationale = format!(
            "{pattern:?} {direction:?} through {grade:?} {kind:?} {price:.4} on {tf}; confluence {score:.1} (raw {raw:.1}, macro {alignment})",
            grade = level.grade,
            kind = level.kind,
            price = level.price,
            tf = self.trigger_timeframe,
            score = analysis.confluence_score,
            raw = analysis.raw_score,
            alignment = if analysis.macro_aligned { "aligned" } else { "misaligned" },
        );

        TradeSignal {
            symbol: key.symbol.clone(),
            direction,
            entry,
            stop,
            targets,
            score: analysis.confluence_score,
            triggering_timeframe: self.trigger_timeframe,
            triggered_bar_close_time: key.bar_close,
            rationale,
            pattern,
            key,
            config_fingerprint: analysis.config_fingerprint.clone(),
        }
    }
}
