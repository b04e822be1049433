//! Error kinds surfaced by the core.
//!
//! All core functions are total over well-formed input; malformed or premature input
//! produces one of these variants, propagated to the caller for logging.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{BarError, Timeframe};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("invalid bar at {start_time}: {reason}")]
    InvalidBar {
        start_time: DateTime<Utc>,
        reason: BarError,
    },

    #[error("bar starting {start_time} is not closed; refusing to classify an in-progress bar")]
    UnclosedBar { start_time: DateTime<Utc> },

    #[error("insufficient history on {timeframe}: have {have} closed bars, need {need}")]
    InsufficientHistory {
        timeframe: Timeframe,
        have: usize,
        need: usize,
    },

    #[error("expected a {expected} bar, got {actual}")]
    TimeframeMismatch {
        expected: Timeframe,
        actual: Timeframe,
    },

    #[error("bar starting {start_time} is older than the last accepted bar {last}")]
    OutOfOrder {
        start_time: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    #[error("analysis as of {analysis} is newer than the bar closing {bar_close}")]
    AnalysisAhead {
        analysis: DateTime<Utc>,
        bar_close: DateTime<Utc>,
    },
}

/// Refuse any slice that contains an in-progress bar.
pub fn ensure_closed(bars: &[crate::domain::Bar]) -> Result<(), CoreError> {
    match bars.iter().find(|b| !b.is_closed) {
        Some(open) => Err(CoreError::UnclosedBar {
            start_time: open.start_time,
        }),
        None => Ok(()),
    }
}
