//! Confluence Core — bar classification, pivots, trend, levels, scoring, confluence,
//! and the watchlist trigger state machine.
//!
//! Data flows strictly upward:
//! - `classify`: one closed bar against the average range of the prior bars
//! - `pivots`: graded turning points over the closed-bar stream
//! - `trend`: direction and quality from Major pivots plus a fast/slow SMA pair
//! - `levels`: support/resistance from pivots and congestion
//! - `scoring`: one score per (symbol, timeframe)
//! - `confluence`: macro/micro reconciliation into one `SymbolAnalysis`
//! - `watchlist`: per-symbol lifecycle and `TradeSignal` emission
//!
//! Everything here is a pure function of closed bars and configuration except
//! `BarSeries`, `LevelBook` and `WatchlistEntry`, which are explicit per-symbol
//! state owned by the caller.

pub mod classify;
pub mod config;
pub mod confluence;
pub mod domain;
pub mod error;
pub mod indicators;
pub mod levels;
pub mod pivots;
pub mod scoring;
pub mod series;
pub mod trend;
pub mod watchlist;

#[cfg(test)]
mod test_support;

pub use config::{ConfigError, EngineConfig};
pub use error::CoreError;
