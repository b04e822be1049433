//! Bar-history collaborator and the serialized fetch dispatcher.
//!
//! `BarHistory` abstracts over where bars come from (CSV files, a synthetic walk, a
//! broker feed) so the scanner can be tested against a mock. Retries belong to the
//! implementation; the dispatcher only bounds how long a caller waits.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use confluence_core::domain::{Bar, Timeframe};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("fetch of {symbol} {timeframe} timed out after {timeout_ms}ms")]
    Timeout {
        symbol: String,
        timeframe: Timeframe,
        timeout_ms: u64,
    },

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("{symbol} {timeframe}: bars are not in strictly increasing time order")]
    OutOfOrder { symbol: String, timeframe: Timeframe },

    #[error("bar source error: {0}")]
    Source(String),

    #[error("fetch dispatcher has shut down")]
    Disconnected,
}

/// Source of OHLCV history.
///
/// Returns the most recent `count` bars oldest first. The newest bar may still be
/// open; gaps are left as gaps.
pub trait BarHistory: Send + Sync {
    fn name(&self) -> &str;

    fn fetch(&self, symbol: &str, timeframe: Timeframe, count: usize)
        -> Result<Vec<Bar>, FetchError>;
}

struct FetchRequest {
    symbol: String,
    timeframe: Timeframe,
    count: usize,
    reply: Sender<Result<Vec<Bar>, FetchError>>,
}

/// Single-threaded front for a `BarHistory`.
///
/// All fetches run one at a time on a dedicated thread; callers block on a reply
/// channel for at most `timeout`. A timed-out fetch still completes on the
/// dispatcher thread and its result is dropped.
pub struct FetchDispatcher {
    requests: Option<Sender<FetchRequest>>,
    handle: Option<JoinHandle<()>>,
    timeout: Duration,
    source_name: String,
}

impl FetchDispatcher {
    pub fn spawn(history: Arc<dyn BarHistory>, timeout: Duration) -> Result<Self, FetchError> {
        let (tx, rx) = mpsc::channel();
        let source_name = history.name().to_string();
        let handle = thread::Builder::new()
            .name("confluence-fetch".into())
            .spawn(move || dispatch_loop(history, rx))
            .map_err(|e| FetchError::Source(format!("failed to spawn fetch thread: {e}")))?;
        Ok(Self {
            requests: Some(tx),
            handle: Some(handle),
            timeout,
            source_name,
        })
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Fetch through the dispatcher thread and check the ordering contract.
    pub fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Bar>, FetchError> {
        let requests = self.requests.as_ref().ok_or(FetchError::Disconnected)?;
        let (reply, response) = mpsc::channel();
        requests
            .send(FetchRequest {
                symbol: symbol.to_string(),
                timeframe,
                count,
                reply,
            })
            .map_err(|_| FetchError::Disconnected)?;

        let bars = match response.recv_timeout(self.timeout) {
            Ok(result) => result?,
            Err(RecvTimeoutError::Timeout) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                warn!(symbol, timeframe = %timeframe, timeout_ms, "bar fetch timed out");
                return Err(FetchError::Timeout {
                    symbol: symbol.to_string(),
                    timeframe,
                    timeout_ms,
                });
            }
            Err(RecvTimeoutError::Disconnected) => return Err(FetchError::Disconnected),
        };

        if bars.windows(2).any(|w| w[1].start_time <= w[0].start_time) {
            return Err(FetchError::OutOfOrder {
                symbol: symbol.to_string(),
                timeframe,
            });
        }
        Ok(bars)
    }
}

impl Drop for FetchDispatcher {
    fn drop(&mut self) {
        // Closing the request channel ends the loop once the current fetch returns.
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn dispatch_loop(history: Arc<dyn BarHistory>, rx: Receiver<FetchRequest>) {
    while let Ok(request) = rx.recv() {
        let result = history.fetch(&request.symbol, request.timeframe, request.count);
        if let Ok(bars) = &result {
            debug!(
                symbol = %request.symbol,
                timeframe = %request.timeframe,
                bars = bars.len(),
                "fetched bars"
            );
        }
        // The caller may have timed out and gone away.
        let _ = request.reply.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};

    struct Fixed {
        bars: Vec<Bar>,
        delay: Duration,
    }

    impl BarHistory for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn fetch(&self, symbol: &str, _: Timeframe, count: usize) -> Result<Vec<Bar>, FetchError> {
            if symbol == "MISSING" {
                return Err(FetchError::SymbolNotFound {
                    symbol: symbol.to_string(),
                });
            }
            thread::sleep(self.delay);
            let skip = self.bars.len().saturating_sub(count);
            Ok(self.bars[skip..].to_vec())
        }
    }

    fn bars(starts: &[i64]) -> Vec<Bar> {
        let base = DateTime::<Utc>::from_timestamp(1_704_153_600, 0).unwrap();
        starts
            .iter()
            .map(|m| {
                Bar::new(
                    base + ChronoDuration::minutes(*m),
                    Timeframe::M15,
                    10.0,
                    11.0,
                    9.0,
                    10.5,
                    100.0,
                )
            })
            .collect()
    }

    fn dispatcher(bars: Vec<Bar>, delay_ms: u64, timeout_ms: u64) -> FetchDispatcher {
        let history = Arc::new(Fixed {
            bars,
            delay: Duration::from_millis(delay_ms),
        });
        FetchDispatcher::spawn(history, Duration::from_millis(timeout_ms)).unwrap()
    }

    #[test]
    fn returns_the_newest_bars() {
        let d = dispatcher(bars(&[0, 15, 30, 45]), 0, 1_000);
        let got = d.fetch("AAA", Timeframe::M15, 2).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got, bars(&[30, 45]));
        assert_eq!(d.source_name(), "fixed");
    }

    #[test]
    fn slow_source_times_out() {
        let d = dispatcher(bars(&[0]), 300, 20);
        let err = d.fetch("AAA", Timeframe::M15, 1).unwrap_err();
        assert!(matches!(err, FetchError::Timeout { timeout_ms: 20, .. }));
    }

    #[test]
    fn unordered_bars_are_refused() {
        let d = dispatcher(bars(&[0, 30, 15]), 0, 1_000);
        assert!(matches!(
            d.fetch("AAA", Timeframe::M15, 3),
            Err(FetchError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn source_errors_pass_through() {
        let d = dispatcher(bars(&[0]), 0, 1_000);
        assert!(matches!(
            d.fetch("MISSING", Timeframe::M15, 1),
            Err(FetchError::SymbolNotFound { .. })
        ));
    }
}
