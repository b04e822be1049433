//! Bar — the fundamental market data unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::timeframe::Timeframe;

/// OHLCV bar for a single symbol on a single timeframe.
///
/// A bar is immutable once `is_closed` is true. Only the newest bar of a fetched
/// series may be open, and open bars never reach structural classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub start_time: DateTime<Utc>,
    pub interval: Timeframe,
    pub is_closed: bool,
}

/// Why a bar failed the OHLC sanity check.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BarError {
    #[error("non-finite price field")]
    NonFinite,

    #[error("high {high} below low {low}")]
    HighBelowLow { high: f64, low: f64 },

    #[error("open/close outside [low, high]")]
    BodyOutsideRange,

    #[error("negative volume")]
    NegativeVolume,
}

impl Bar {
    pub fn new(
        start_time: DateTime<Utc>,
        interval: Timeframe,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            open,
            high,
            low,
            close,
            volume,
            start_time,
            interval,
            is_closed: true,
        }
    }

    /// Timestamp at which the bar's interval ends.
    pub fn close_time(&self) -> DateTime<Utc> {
        self.start_time + self.interval.duration()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn body_top(&self) -> f64 {
        self.open.max(self.close)
    }

    pub fn body_bottom(&self) -> f64 {
        self.open.min(self.close)
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.body_top()
    }

    pub fn lower_wick(&self) -> f64 {
        self.body_bottom() - self.low
    }

    pub fn midpoint(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    /// OHLC sanity: `low <= open, close <= high`, all prices finite.
    pub fn validate(&self) -> Result<(), BarError> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) || !self.volume.is_finite() {
            return Err(BarError::NonFinite);
        }
        if self.high < self.low {
            return Err(BarError::HighBelowLow {
                high: self.high,
                low: self.low,
            });
        }
        if self.open < self.low
            || self.open > self.high
            || self.close < self.low
            || self.close > self.high
        {
            return Err(BarError::BodyOutsideRange);
        }
        if self.volume < 0.0 {
            return Err(BarError::NegativeVolume);
        }
        Ok(())
    }

    pub fn is_sane(&self) -> bool {
        self.validate().is_ok()
    }
}
