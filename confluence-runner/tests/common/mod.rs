//! Shared fixtures for runner integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use confluence_core::domain::{Bar, Timeframe};
use confluence_runner::{BarHistory, FetchError, RunnerConfig, SyntheticBarHistory};

pub fn anchor() -> DateTime<Utc> {
    DateTime::from_timestamp(1_704_153_600, 0).unwrap()
}

/// Twenty days after the anchor: plenty of 15m and 1h history.
pub fn as_of() -> DateTime<Utc> {
    anchor() + chrono::Duration::days(20)
}

pub fn config(universe: &[&str]) -> RunnerConfig {
    let mut config = RunnerConfig::default();
    config.scanner.universe = universe.iter().map(|s| s.to_string()).collect();
    config.scanner.workers = 2;
    config.scanner.fetch_timeout_ms = 2_000;
    config
}

pub fn synthetic() -> Arc<dyn BarHistory> {
    Arc::new(SyntheticBarHistory::fixed(anchor(), as_of()))
}

/// Wraps another history, counting concurrent fetches and failing on request.
pub struct Instrumented {
    pub inner: Arc<dyn BarHistory>,
    pub delay: Duration,
    pub missing: Vec<String>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub calls: AtomicUsize,
}

impl Instrumented {
    pub fn new(inner: Arc<dyn BarHistory>) -> Self {
        Self {
            inner,
            delay: Duration::ZERO,
            missing: Vec::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }
}

impl BarHistory for Instrumented {
    fn name(&self) -> &str {
        "instrumented"
    }

    fn fetch(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        thread::sleep(self.delay);
        let result = if self.missing.iter().any(|m| m == symbol) {
            Err(FetchError::SymbolNotFound {
                symbol: symbol.to_string(),
            })
        } else {
            self.inner.fetch(symbol, timeframe, count)
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
