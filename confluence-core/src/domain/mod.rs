//! Domain types: bars, the timeframe ladder, identifiers.

pub mod bar;
pub mod ids;
pub mod timeframe;

pub use bar::{Bar, BarError};
pub use ids::{ConfigFingerprint, ScanSeq, TriggerKey};
pub use timeframe::Timeframe;

/// Trade direction shared by analysis bias and emitted signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1.0 for long, -1.0 for short.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}
