//! Errors surfaced by the scanner.

use std::path::PathBuf;

use confluence_core::domain::Timeframe;
use confluence_core::CoreError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::provider::FetchError;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("{symbol} {timeframe}: {source}")]
    Fetch {
        symbol: String,
        timeframe: Timeframe,
        source: FetchError,
    },

    #[error("{symbol} {timeframe}: {source}")]
    Core {
        symbol: String,
        timeframe: Timeframe,
        source: CoreError,
    },

    #[error("lock poisoned: {0}")]
    Poisoned(String),

    #[error("signal sink failed: {0}")]
    Sink(#[from] SinkError),

    #[error("failed to build scan pool: {0}")]
    Pool(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("lock poisoned: {0}")]
    Poisoned(String),
}
