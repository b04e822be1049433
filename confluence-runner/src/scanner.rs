//! Periodic scanner: fetch, score, aggregate and drive the watchlist.
//!
//! One scan unit per symbol runs on a private rayon pool. Fetches go through the
//! single `FetchDispatcher`. Each cycle takes a fresh `ScanSeq`; a result that lands
//! after a newer cycle's result for the same symbol is dropped by the state machine.
//!
//! Per-symbol state (rolling bar windows and level books) lives behind its own
//! mutex, so scoring a symbol never races with itself across overlapping cycles.
//!
//! Trigger bars that closed between two scans are judged on an analysis rescored
//! from the bars available at their own close, so the signals do not depend on how
//! often the scanner runs. Signals wait on their watchlist entry until the sink
//! accepts them.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use confluence_core::confluence::{ConfluenceAggregator, SymbolAnalysis};
use confluence_core::domain::{Bar, ScanSeq, Timeframe};
use confluence_core::levels::LevelBook;
use confluence_core::scoring::{TimeframeAnalysis, TimeframeScorer};
use confluence_core::series::BarSeries;
use confluence_core::watchlist::{ScanOutcome, TradeSignal, WatchlistStateMachine};
use confluence_core::{ConfigError as EngineConfigError, CoreError, EngineConfig};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, RunnerConfig};
use crate::error::{ScanError, SinkError};
use crate::provider::{BarHistory, FetchDispatcher};
use crate::sink::SignalSink;
use crate::watchlist::Watchlist;

/// Totals for one scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub seq: u64,
    pub scanned: usize,
    /// Timeframes skipped for lack of history.
    pub insufficient: usize,
    /// Timeframes that failed to fetch or score.
    pub failed: usize,
    pub superseded: usize,
    pub signals: usize,
}

/// What one symbol's scan unit produced.
#[derive(Debug, Clone, Default)]
pub struct SymbolScan {
    pub insufficient: usize,
    pub failed: usize,
    pub superseded: bool,
    pub signals: Vec<TradeSignal>,
}

#[derive(Debug, Default)]
struct FrameScores {
    per_timeframe: BTreeMap<Timeframe, TimeframeAnalysis>,
    unavailable: BTreeMap<Timeframe, String>,
    insufficient: usize,
    failed: usize,
}

#[derive(Debug)]
struct SymbolState {
    series: BTreeMap<Timeframe, BarSeries>,
    books: BTreeMap<Timeframe, LevelBook>,
}

pub struct Scanner {
    config: RunnerConfig,
    scorer: TimeframeScorer,
    aggregator: ConfluenceAggregator,
    machine: WatchlistStateMachine,
    dispatcher: FetchDispatcher,
    watchlist: Arc<Watchlist>,
    states: Mutex<HashMap<String, Arc<Mutex<SymbolState>>>>,
    seq: AtomicU64,
    pool: rayon::ThreadPool,
}

impl Scanner {
    pub fn new(config: RunnerConfig, history: Arc<dyn BarHistory>) -> Result<Self, ScanError> {
        Self::with_watchlist(config, history, Arc::new(Watchlist::new()))
    }

    pub fn with_watchlist(
        config: RunnerConfig,
        history: Arc<dyn BarHistory>,
        watchlist: Arc<Watchlist>,
    ) -> Result<Self, ScanError> {
        config.validate()?;
        let aggregator = ConfluenceAggregator::new(
            &config.engine.confluence,
            config.engine.fingerprint(),
        )
        .ok_or_else(|| ConfigError::Engine(EngineConfigError::Invalid(
            "no macro timeframe on the ladder".into(),
        )))?;
        let dispatcher = FetchDispatcher::spawn(
            history,
            Duration::from_millis(config.scanner.fetch_timeout_ms),
        )
        .map_err(|e| ScanError::Pool(e.to_string()))?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.scanner.workers)
            .thread_name(|i| format!("confluence-scan-{i}"))
            .build()
            .map_err(|e| ScanError::Pool(e.to_string()))?;

        Ok(Self {
            scorer: TimeframeScorer::new(&config.engine),
            machine: WatchlistStateMachine::new(&config.engine),
            aggregator,
            dispatcher,
            watchlist,
            states: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
            pool,
            config,
        })
    }

    pub fn watchlist(&self) -> &Arc<Watchlist> {
        &self.watchlist
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn next_seq(&self) -> ScanSeq {
        ScanSeq(self.seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Scan the whole universe once and hand every new signal to `sink`.
    pub fn run_cycle_at(
        &self,
        now: DateTime<Utc>,
        sink: &dyn SignalSink,
    ) -> Result<CycleReport, ScanError> {
        let seq = self.next_seq();
        let universe = &self.config.scanner.universe;
        let results: Vec<(&String, Result<SymbolScan, ScanError>)> = self.pool.install(|| {
            universe
                .par_iter()
                .map(|symbol| (symbol, self.scan_symbol(symbol, seq, now)))
                .collect()
        });

        let mut report = CycleReport {
            seq: seq.0,
            ..CycleReport::default()
        };
        for (symbol, result) in results {
            let scan = match result {
                Ok(scan) => scan,
                Err(err @ ScanError::Poisoned(_)) => return Err(err),
                Err(err) => {
                    warn!(symbol = %symbol, seq = %seq, error = %err, "symbol scan failed");
                    report.failed += 1;
                    continue;
                }
            };
            report.scanned += 1;
            report.insufficient += scan.insufficient;
            report.failed += scan.failed;
            report.superseded += usize::from(scan.superseded);
            for signal in &scan.signals {
                if self.deliver(signal, sink)? {
                    report.signals += 1;
                }
            }
        }
        info!(
            seq = %seq,
            scanned = report.scanned,
            insufficient = report.insufficient,
            failed = report.failed,
            superseded = report.superseded,
            signals = report.signals,
            "scan cycle complete"
        );
        Ok(report)
    }

    /// Hand one queued signal to the sink and confirm it on the entry. The entry
    /// stays locked across the emit, so a signal is never handed over twice. A sink
    /// failure leaves it queued for the next cycle.
    fn deliver(&self, signal: &TradeSignal, sink: &dyn SignalSink) -> Result<bool, ScanError> {
        let delivered = self.watchlist.with_entry(&signal.symbol, |entry| -> Result<bool, SinkError> {
            if !entry.undelivered.iter().any(|queued| queued.key == signal.key) {
                return Ok(false);
            }
            sink.emit(signal)?;
            Ok(self.machine.confirm_delivery(entry, &signal.key))
        })?;
        delivered.map_err(|err| {
            warn!(symbol = %signal.symbol, key = %signal.key, error = %err, "signal left queued for redelivery");
            ScanError::Sink(err)
        })
    }

    /// Run cycles every `scan_interval_secs` until `shutdown` is set. The flag is
    /// checked between cycles and while waiting; a running cycle always completes.
    pub fn run_loop(
        &self,
        sink: &dyn SignalSink,
        shutdown: &AtomicBool,
        clock: impl Fn() -> DateTime<Utc>,
    ) -> Result<usize, ScanError> {
        let interval = Duration::from_secs(self.config.scanner.scan_interval_secs);
        let tick = Duration::from_millis(100).min(interval.max(Duration::from_millis(1)));
        let mut cycles = 0;
        while !shutdown.load(Ordering::Relaxed) {
            let started = Instant::now();
            self.run_cycle_at(clock(), sink)?;
            cycles += 1;
            while started.elapsed() < interval {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                std::thread::sleep(tick);
            }
        }
        info!(cycles, "scanner stopped");
        Ok(cycles)
    }

    fn symbol_state(&self, symbol: &str) -> Result<Arc<Mutex<SymbolState>>, ScanError> {
        let mut states = self
            .states
            .lock()
            .map_err(|e| ScanError::Poisoned(e.to_string()))?;
        // Room for the bars that close between scans, so a missed trigger bar can
        // still be scored on a full window.
        let capacity = self.config.engine.window_bars
            + self.config.engine.watchlist.freshness_intervals as usize
            + 1;
        let tolerance = self.config.engine.levels.touch_tolerance_pct;
        let timeframes = self.aggregator.timeframes();
        Ok(Arc::clone(states.entry(symbol.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(SymbolState {
                series: timeframes
                    .iter()
                    .map(|tf| (*tf, BarSeries::new(symbol, *tf, capacity)))
                    .collect(),
                books: timeframes
                    .iter()
                    .map(|tf| (*tf, LevelBook::new(tolerance)))
                    .collect(),
            }))
        })))
    }

    /// One scan unit: fetch every timeframe, catch up on trigger bars that closed
    /// since the last look, then score, aggregate, apply to the watchlist and
    /// evaluate the newest trigger bar.
    pub fn scan_symbol(
        &self,
        symbol: &str,
        seq: ScanSeq,
        now: DateTime<Utc>,
    ) -> Result<SymbolScan, ScanError> {
        let state = self.symbol_state(symbol)?;
        let mut state = state
            .lock()
            .map_err(|e| ScanError::Poisoned(format!("{symbol}: {e}")))?;
        let state = &mut *state;

        let mut scan = SymbolScan::default();
        let mut fetched = Vec::new();
        let mut fetch_failures = BTreeMap::new();
        for tf in self.aggregator.timeframes() {
            let Some(series) = state.series.get_mut(&tf) else {
                continue;
            };
            match self.refresh_series(symbol, tf, series) {
                Ok(()) => fetched.push(tf),
                Err(err) => {
                    warn!(symbol, timeframe = %tf, error = %err, "timeframe unavailable");
                    fetch_failures.insert(tf, err.to_string());
                    scan.failed += 1;
                }
            }
        }

        let trigger_tf = self.aggregator.trigger_timeframe();
        let (watermark, superseded) = self.watchlist.with_entry(symbol, |entry| {
            (
                entry.last_bar_close,
                entry.last_scan_seq.is_some_and(|latest| seq <= latest),
            )
        })?;
        if let Some(watermark) =
            watermark.filter(|_| !superseded && fetched.contains(&trigger_tf))
        {
            self.catch_up(symbol, state, &fetched, watermark, now)?;
        }

        let scores = self.score_frames(symbol, state, &fetched, None);
        scan.insufficient += scores.insufficient;
        scan.failed += scores.failed;
        let trigger_ready = scores.per_timeframe.contains_key(&trigger_tf);
        let mut unavailable = scores.unavailable;
        unavailable.extend(fetch_failures);
        let analysis = self
            .aggregator
            .aggregate(symbol, scores.per_timeframe, unavailable);
        let trigger_window = state
            .series
            .get(&trigger_tf)
            .map(|s| s.structural_window())
            .unwrap_or_default();

        self.watchlist.with_entry(symbol, |entry| {
            match self.machine.apply_scan(entry, analysis, seq, now) {
                ScanOutcome::Superseded { .. } => {
                    scan.superseded = true;
                    return;
                }
                ScanOutcome::Applied { .. } if trigger_ready && !trigger_window.is_empty() => {
                    match self.machine.on_bar_close(entry, trigger_window, now) {
                        Ok(outcome) => {
                            debug!(symbol, outcome = ?outcome, "newest trigger bar evaluated");
                        }
                        Err(err) => {
                            warn!(symbol, error = %err, "trigger evaluation failed");
                        }
                    }
                }
                ScanOutcome::Applied { .. } => {}
            }
            scan.signals = entry.undelivered.clone();
        })?;
        Ok(scan)
    }

    /// Fetch one timeframe and fold it into the rolling window.
    fn refresh_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        series: &mut BarSeries,
    ) -> Result<(), ScanError> {
        let bars = self
            .dispatcher
            .fetch(symbol, timeframe, self.config.scanner.history_bars)
            .map_err(|source| ScanError::Fetch {
                symbol: symbol.to_string(),
                timeframe,
                source,
            })?;
        let report = series.ingest(&bars).map_err(|source| ScanError::Core {
            symbol: symbol.to_string(),
            timeframe,
            source,
        })?;
        if report.rejected > 0 {
            debug!(symbol, timeframe = %timeframe, rejected = report.rejected, "bars rejected this fetch");
        }
        Ok(())
    }

    /// The newest `window_bars` of the structural window that had closed by `cut`.
    fn scoring_window<'a>(&self, series: &'a BarSeries, cut: Option<DateTime<Utc>>) -> &'a [Bar] {
        let window = series.structural_window();
        let end = cut.map_or(window.len(), |cut| {
            window.partition_point(|b| b.close_time() <= cut)
        });
        let window = &window[..end];
        &window[window.len().saturating_sub(self.config.engine.window_bars)..]
    }

    /// Score every fetched timeframe on the bars closed by `cut` (all of them when
    /// `None`), reconciling each timeframe's level book in turn.
    fn score_frames(
        &self,
        symbol: &str,
        state: &mut SymbolState,
        frames: &[Timeframe],
        cut: Option<DateTime<Utc>>,
    ) -> FrameScores {
        let mut scores = FrameScores::default();
        for &tf in frames {
            let (Some(series), Some(book)) = (state.series.get(&tf), state.books.get_mut(&tf))
            else {
                continue;
            };
            let window = self.scoring_window(series, cut);
            match self.scorer.analyze_with_book(symbol, tf, window, book) {
                Ok(analysis) => {
                    scores.per_timeframe.insert(tf, analysis);
                }
                Err(CoreError::InsufficientHistory { have, need, .. }) => {
                    debug!(symbol, timeframe = %tf, have, need, "insufficient history");
                    scores
                        .unavailable
                        .insert(tf, format!("insufficient data: {have} of {need} bars"));
                    scores.insufficient += 1;
                }
                Err(err) => {
                    warn!(symbol, timeframe = %tf, error = %err, "timeframe not scored");
                    scores.unavailable.insert(tf, err.to_string());
                    scores.failed += 1;
                }
            }
        }
        scores
    }

    /// Evaluate trigger bars that closed after `watermark` but before the newest
    /// one, oldest first. Each fresh bar is judged on an analysis scored from the
    /// bars that had closed by then; stale ones only advance the watermark.
    fn catch_up(
        &self,
        symbol: &str,
        state: &mut SymbolState,
        frames: &[Timeframe],
        watermark: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), ScanError> {
        let trigger_tf = self.aggregator.trigger_timeframe();
        let Some(series) = state.series.get(&trigger_tf) else {
            return Ok(());
        };
        let window = series.structural_window();
        let start = window.partition_point(|b| b.close_time() <= watermark);
        if start + 1 >= window.len() {
            return Ok(());
        }
        let window: Vec<Bar> = window.to_vec();

        for end in start..window.len() - 1 {
            let bars = &window[..=end];
            let close = window[end].close_time();
            let evaluated = if self.machine.is_fresh(close, now) {
                let scores = self.score_frames(symbol, state, frames, Some(close));
                let analysis =
                    self.aggregator
                        .aggregate(symbol, scores.per_timeframe, scores.unavailable);
                self.watchlist.with_entry(symbol, |entry| {
                    self.machine.on_missed_bar_close(entry, analysis, bars, now)
                })?
            } else {
                self.watchlist
                    .with_entry(symbol, |entry| self.machine.on_bar_close(entry, bars, now))?
            };
            match evaluated {
                Ok(outcome) => {
                    debug!(symbol, bar_close = %close, outcome = ?outcome, "missed trigger bar evaluated");
                }
                Err(err) => {
                    warn!(symbol, bar_close = %close, error = %err, "missed trigger bar not evaluated");
                    break;
                }
            }
        }
        Ok(())
    }
}

/// One-shot analysis of a symbol without watchlist state.
pub fn analyze_symbol(
    history: &dyn BarHistory,
    config: &EngineConfig,
    symbol: &str,
    history_bars: usize,
) -> Result<SymbolAnalysis, ScanError> {
    let aggregator = ConfluenceAggregator::new(&config.confluence, config.fingerprint())
        .ok_or_else(|| ConfigError::Engine(EngineConfigError::Invalid(
            "no macro timeframe on the ladder".into(),
        )))?;
    let scorer = TimeframeScorer::new(config);

    let mut per_timeframe = BTreeMap::new();
    let mut unavailable = BTreeMap::new();
    for tf in aggregator.timeframes() {
        let bars = history
            .fetch(symbol, tf, history_bars)
            .map_err(|source| ScanError::Fetch {
                symbol: symbol.to_string(),
                timeframe: tf,
                source,
            })?;
        let mut series = BarSeries::new(symbol, tf, config.window_bars);
        let scored = series
            .ingest(&bars)
            .and_then(|_| scorer.analyze(symbol, tf, series.structural_window()));
        match scored {
            Ok(analysis) => {
                per_timeframe.insert(tf, analysis);
            }
            Err(err) => {
                unavailable.insert(tf, err.to_string());
            }
        }
    }
    Ok(aggregator.aggregate(symbol, per_timeframe, unavailable))
}
