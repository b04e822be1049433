//! Bounded rolling window of closed bars for one (symbol, timeframe).
//!
//! This is the only place bars are evicted. Fetched histories overlap from one scan
//! to the next, so ingestion skips everything at or before the newest bar it has
//! already seen. A rejected bar leaves a gap: structural detection only looks at the
//! contiguous segment after the most recent gap.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::domain::{Bar, Timeframe};
use crate::error::CoreError;

/// Counts from one `ingest` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub accepted: usize,
    pub replayed: usize,
    pub rejected: usize,
    pub open_skipped: usize,
}

#[derive(Debug, Clone)]
pub struct BarSeries {
    symbol: String,
    timeframe: Timeframe,
    capacity: usize,
    bars: Vec<Bar>,
    /// Index into `bars` where the segment after the latest gap begins.
    contiguous_from: usize,
    /// Newest start time seen, accepted or rejected.
    watermark: Option<DateTime<Utc>>,
}

impl BarSeries {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, capacity: usize) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            capacity: capacity.max(1),
            bars: Vec::with_capacity(capacity),
            contiguous_from: 0,
            watermark: None,
        }
    }

    /// Append a fetched history, oldest first.
    ///
    /// Open bars are skipped, bars at or before the watermark are replays, and an
    /// invalid bar is dropped and opens a gap. A bar older than its predecessor in
    /// the same batch is an `OutOfOrder` error and nothing after it is ingested.
    pub fn ingest(&mut self, batch: &[Bar]) -> Result<IngestReport, CoreError> {
        let mut report = IngestReport::default();
        let mut prev_in_batch: Option<DateTime<Utc>> = None;

        for bar in batch {
            if bar.interval != self.timeframe {
                return Err(CoreError::TimeframeMismatch {
                    expected: self.timeframe,
                    actual: bar.interval,
                });
            }
            if let Some(prev) = prev_in_batch {
                if bar.start_time <= prev {
                    return Err(CoreError::OutOfOrder {
                        start_time: bar.start_time,
                        last: prev,
                    });
                }
            }
            prev_in_batch = Some(bar.start_time);

            if !bar.is_closed {
                report.open_skipped += 1;
                continue;
            }
            if self.watermark.is_some_and(|w| bar.start_time <= w) {
                report.replayed += 1;
                continue;
            }
            self.watermark = Some(bar.start_time);

            if let Err(reason) = bar.validate() {
                warn!(
                    symbol = %self.symbol,
                    timeframe = %self.timeframe,
                    start_time = %bar.start_time,
                    error = %reason,
                    "rejected invalid bar"
                );
                report.rejected += 1;
                self.contiguous_from = self.bars.len();
                continue;
            }

            self.bars.push(bar.clone());
            report.accepted += 1;
        }

        if self.bars.len() > self.capacity {
            let excess = self.bars.len() - self.capacity;
            self.bars.drain(..excess);
            self.contiguous_from = self.contiguous_from.saturating_sub(excess);
        }
        Ok(report)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Every retained closed bar, oldest first.
    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    /// Closed bars since the most recent gap. Pivots, levels and scores run on this.
    pub fn structural_window(&self) -> &[Bar] {
        &self.bars[self.contiguous_from..]
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn latest(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn last_close_time(&self) -> Option<DateTime<Utc>> {
        self.latest().map(Bar::close_time)
    }
}
