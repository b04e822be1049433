//! Macro/micro reconciliation into one `SymbolAnalysis`.
//!
//! The confluence score is the triggering micro frame's score. When any micro
//! frame's trend fights the macro trend the score is capped at the misaligned
//! ceiling instead of being zeroed. A Sideways macro never fights.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConfluenceConfig;
use crate::domain::{ConfigFingerprint, Direction, Timeframe};
use crate::scoring::TimeframeAnalysis;
use crate::trend::Trend;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolAnalysis {
    pub symbol: String,
    pub per_timeframe: BTreeMap<Timeframe, TimeframeAnalysis>,
    /// Timeframes that could not be scored this cycle, with the reason.
    pub unavailable: BTreeMap<Timeframe, String>,
    pub confluence_score: f64,
    /// Trigger frame score before the alignment gate.
    pub raw_score: f64,
    pub macro_aligned: bool,
    pub trigger_timeframe: Timeframe,
    pub macro_timeframe: Timeframe,
    pub bias: Option<Direction>,
    pub config_fingerprint: ConfigFingerprint,
}

impl SymbolAnalysis {
    pub fn trigger(&self) -> Option<&TimeframeAnalysis> {
        self.per_timeframe.get(&self.trigger_timeframe)
    }

    pub fn macro_frame(&self) -> Option<&TimeframeAnalysis> {
        self.per_timeframe.get(&self.macro_timeframe)
    }

    /// Close time of the newest trigger-frame bar behind this analysis.
    pub fn as_of(&self) -> Option<DateTime<Utc>> {
        self.trigger().map(|a| a.last_bar_close)
    }
}

#[derive(Debug, Clone)]
pub struct ConfluenceAggregator {
    config: ConfluenceConfig,
    trigger_timeframe: Timeframe,
    macro_timeframe: Timeframe,
    fingerprint: ConfigFingerprint,
}

impl ConfluenceAggregator {
    /// `None` when the ladder has no rung for the configured macro frame.
    pub fn new(config: &ConfluenceConfig, fingerprint: ConfigFingerprint) -> Option<Self> {
        Some(Self {
            trigger_timeframe: config.trigger_timeframe(),
            macro_timeframe: config.macro_timeframe()?,
            config: config.clone(),
            fingerprint,
        })
    }

    pub fn trigger_timeframe(&self) -> Timeframe {
        self.trigger_timeframe
    }

    pub fn macro_timeframe(&self) -> Timeframe {
        self.macro_timeframe
    }

    pub fn timeframes(&self) -> Vec<Timeframe> {
        self.config.timeframes()
    }

    /// Pure reduction over one cycle's per-timeframe results.
    pub fn aggregate(
        &self,
        symbol: &str,
        per_timeframe: BTreeMap<Timeframe, TimeframeAnalysis>,
        unavailable: BTreeMap<Timeframe, String>,
    ) -> SymbolAnalysis {
        let macro_trend = per_timeframe.get(&self.macro_timeframe).map(|a| a.trend);
        let micros: Vec<&TimeframeAnalysis> = self
            .config
            .micro_timeframes
            .iter()
            .filter_map(|tf| per_timeframe.get(tf))
            .collect();

        let macro_aligned = match macro_trend {
            Some(Trend::Sideways) => true,
            Some(trend) => micros.iter().all(|micro| micro.trend == trend),
            None => false,
        };

        let trigger = per_timeframe.get(&self.trigger_timeframe);
        let raw_score = trigger.map_or(0.0, |a| a.score);
        let confluence_score = if macro_aligned {
            raw_score
        } else {
            raw_score.min(self.config.misaligned_ceiling)
        };

        SymbolAnalysis {
            symbol: symbol.to_string(),
            bias: trigger.and_then(|a| a.bias),
            per_timeframe,
            unavailable,
            confluence_score,
            raw_score,
            macro_aligned,
            trigger_timeframe: self.trigger_timeframe,
            macro_timeframe: self.macro_timeframe,
            config_fingerprint: self.fingerprint.clone(),
        }
    }
}
