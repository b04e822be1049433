//! Confluence Runner — scan orchestration around `confluence-core`.
//!
//! This crate provides:
//! - The `BarHistory` collaborator trait with CSV and synthetic implementations
//! - A serialized fetch dispatcher with per-request timeouts
//! - The shared watchlist (per-symbol locks) and JSON snapshot export
//! - The periodic `Scanner` on a private rayon pool
//! - Signal sinks that hand `TradeSignal`s downstream
//! - `RunnerConfig` TOML loading

pub mod config;
pub mod csv_history;
pub mod error;
pub mod provider;
pub mod scanner;
pub mod sink;
pub mod synthetic;
pub mod watchlist;

pub use config::{ConfigError, RunnerConfig, ScannerConfig};
pub use csv_history::CsvBarHistory;
pub use error::{ScanError, SinkError};
pub use provider::{BarHistory, FetchDispatcher, FetchError};
pub use scanner::{analyze_symbol, CycleReport, Scanner, SymbolScan};
pub use sink::{CollectingSink, JsonLinesSink, SignalSink};
pub use synthetic::SyntheticBarHistory;
pub use watchlist::{export_snapshot, Watchlist};
