use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::timeframe::Timeframe;

/// Deterministic configuration fingerprint (BLAKE3 of the canonical config JSON).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigFingerprint(pub String);

impl ConfigFingerprint {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ConfigFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Idempotency key of a bar-close event: no transition fires twice for the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerKey {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bar_close: DateTime<Utc>,
}

impl TriggerKey {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, bar_close: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            bar_close,
        }
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.symbol,
            self.timeframe,
            self.bar_close.timestamp()
        )
    }
}

/// Monotonic scan-cycle sequence number. Later cycles win over earlier ones.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ScanSeq(pub u64);

impl fmt::Display for ScanSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = ConfigFingerprint::from_bytes(b"{\"watch\":60}");
        let b = ConfigFingerprint::from_bytes(b"{\"watch\":60}");
        assert_eq!(a, b);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn fingerprint_changes_with_input() {
        let a = ConfigFingerprint::from_bytes(b"{\"watch\":60}");
        let b = ConfigFingerprint::from_bytes(b"{\"watch\":61}");
        assert_ne!(a, b);
    }

    #[test]
    fn trigger_key_display() {
        let close = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let key = TriggerKey::new("AAPL", Timeframe::M15, close);
        assert_eq!(key.to_string(), format!("AAPL:15m:{}", close.timestamp()));
    }

    #[test]
    fn scan_seq_orders() {
        assert!(ScanSeq(2) > ScanSeq(1));
    }
}
