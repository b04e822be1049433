//! Engine configuration.
//!
//! Every threshold used by the classification and scoring rules lives here as a
//! named, serializable field. Nothing in the algorithms hard-codes a number that a
//! user might want to tune. All sections default, so a partial TOML file is valid.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::Penetration;
use crate::domain::{ConfigFingerprint, Timeframe};
use crate::levels::LevelGrade;
use crate::watchlist::TriggerPattern;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Complete rule set for the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rolling window capacity per (symbol, timeframe), in closed bars.
    pub window_bars: usize,
    pub classifier: ClassifierConfig,
    pub pivots: PivotConfig,
    pub trend: TrendConfig,
    pub levels: LevelConfig,
    pub scoring: ScoringConfig,
    pub confluence: ConfluenceConfig,
    pub watchlist: WatchlistConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_bars: 200,
            classifier: ClassifierConfig::default(),
            pivots: PivotConfig::default(),
            trend: TrendConfig::default(),
            levels: LevelConfig::default(),
            scoring: ScoringConfig::default(),
            confluence: ConfluenceConfig::default(),
            watchlist: WatchlistConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Minimum number of contiguous closed bars a timeframe needs before it is scored.
    pub fn min_history(&self) -> usize {
        self.scoring
            .min_history
            .max(self.trend.slow_ma + self.trend.separation_lookback)
            .max(self.levels.atr_period + 1)
            .max(self.classifier.avg_range_period + 1)
    }

    /// BLAKE3 over the canonical JSON form. Identical rule sets hash identically.
    pub fn fingerprint(&self) -> ConfigFingerprint {
        let json = serde_json::to_string(self).expect("EngineConfig serialization failed");
        ConfigFingerprint::from_bytes(json.as_bytes())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.window_bars < self.min_history() {
            return invalid(format!(
                "window_bars ({}) must hold at least min_history ({}) bars",
                self.window_bars,
                self.min_history()
            ));
        }
        if self.classifier.avg_range_period == 0 {
            return invalid("classifier.avg_range_period must be >= 1".into());
        }
        if self.classifier.cog_deep_threshold >= self.classifier.cog_engulfing_threshold {
            return invalid("classifier.cog_deep_threshold must be below cog_engulfing_threshold".into());
        }
        if self.levels.atr_period == 0 || self.levels.cluster_min_bars < 2 {
            return invalid("levels.atr_period must be >= 1 and levels.cluster_min_bars >= 2".into());
        }
        if self.pivots.major_run < 2 {
            return invalid("pivots.major_run must be >= 2".into());
        }
        if self.trend.fast_ma == 0 || self.trend.fast_ma >= self.trend.slow_ma {
            return invalid(format!(
                "trend.fast_ma ({}) must be >= 1 and below trend.slow_ma ({})",
                self.trend.fast_ma, self.trend.slow_ma
            ));
        }
        if self.trend.quality_weights.sum() <= 0.0 {
            return invalid("trend.quality_weights must sum to a positive value".into());
        }
        if self.scoring.weights.sum() <= 0.0 {
            return invalid("scoring.weights must sum to a positive value".into());
        }
        let bands = &self.scoring.retracement;
        if !(bands.strong_max < bands.moderate_max && bands.moderate_max < bands.deep_max) {
            return invalid("scoring.retracement band edges must be strictly increasing".into());
        }
        let ladder = &self.confluence.ladder;
        if ladder.is_empty() {
            return invalid("confluence.ladder must name at least one timeframe".into());
        }
        if let Some(pair) = ladder.windows(2).find(|pair| pair[0] >= pair[1]) {
            return invalid(format!(
                "confluence.ladder must be strictly increasing ({} before {})",
                pair[0], pair[1]
            ));
        }
        if self.confluence.micro_timeframes.is_empty() {
            return invalid("confluence.micro_timeframes must name at least one timeframe".into());
        }
        if let Some(off) = self
            .confluence
            .micro_timeframes
            .iter()
            .chain(&self.confluence.macro_override)
            .find(|tf| !ladder.contains(tf))
        {
            return invalid(format!("confluence: timeframe {off} is not on the ladder"));
        }
        let Some(macro_tf) = self.confluence.macro_timeframe() else {
            return invalid("confluence: no macro timeframe above the trigger timeframe".into());
        };
        if let Some(micro) = self
            .confluence
            .micro_timeframes
            .iter()
            .find(|tf| **tf >= macro_tf)
        {
            return invalid(format!(
                "confluence: micro timeframe {micro} is not below macro timeframe {macro_tf}"
            ));
        }
        let wl = &self.watchlist;
        if wl.watch_threshold > wl.trigger_threshold {
            return invalid("watchlist.watch_threshold must not exceed trigger_threshold".into());
        }
        if wl.patterns.is_empty() {
            return invalid("watchlist.patterns must name at least one trigger pattern".into());
        }
        if wl.freshness_intervals == 0 {
            return invalid("watchlist.freshness_intervals must be >= 1".into());
        }
        Ok(())
    }
}

/// Thresholds for single-bar classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Number of prior closed bars in the average-true-range baseline.
    pub avg_range_period: usize,
    pub wide_range_multiple: f64,
    pub narrow_range_multiple: f64,
    /// Body at or below this fraction of the range is a doji.
    pub doji_body_ratio: f64,
    /// Wick must be at least this multiple of the body to count as a tail.
    pub tail_wick_body_multiple: f64,
    /// Minimum run of opposite-signed bars a change of guard must reverse.
    pub cog_min_run: usize,
    /// Penetration at or above this fraction is `Deep`.
    pub cog_deep_threshold: f64,
    /// Penetration above this fraction is `Engulfing`.
    pub cog_engulfing_threshold: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            avg_range_period: 8,
            wide_range_multiple: 1.5,
            narrow_range_multiple: 1.0,
            doji_body_ratio: 0.10,
            tail_wick_body_multiple: 2.0,
            cog_min_run: 3,
            cog_deep_threshold: 0.40,
            cog_engulfing_threshold: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PivotConfig {
    /// Consecutive monotone bars needed on each side for a Major pivot.
    pub major_run: usize,
}

impl Default for PivotConfig {
    fn default() -> Self {
        Self { major_run: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    pub fast_ma: usize,
    pub slow_ma: usize,
    /// Consecutive swing points within this fraction of each other count as equal.
    pub equality_tolerance: f64,
    /// Major pivots per side that must step in the trend's direction.
    pub min_swings: usize,
    /// A pullback adheres when its extreme is within this fraction of the fast MA.
    pub ma_band_pct: f64,
    /// Number of most recent pullbacks scored for adherence.
    pub pullback_lookback: usize,
    /// Bars back used to measure MA separation drift.
    pub separation_lookback: usize,
    /// Relative separation change inside this band is "parallel".
    pub parallel_band: f64,
    /// Counter-trend bar reversing more than this fraction of the prior body is a defect.
    pub engulf_ratio: f64,
    pub quality_weights: QualityWeights,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            fast_ma: 20,
            slow_ma: 40,
            equality_tolerance: 0.005,
            min_swings: 2,
            ma_band_pct: 0.01,
            pullback_lookback: 4,
            separation_lookback: 5,
            parallel_band: 0.25,
            engulf_ratio: 0.5,
            quality_weights: QualityWeights::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub adherence: f64,
    pub separation: f64,
    pub cleanliness: f64,
}

impl QualityWeights {
    pub fn sum(&self) -> f64 {
        self.adherence + self.separation + self.cleanliness
    }
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            adherence: 0.5,
            separation: 0.3,
            cleanliness: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelConfig {
    /// Prices within this fraction of each other are the same level.
    pub touch_tolerance_pct: f64,
    /// Close beyond a level by more than this many ATRs invalidates it.
    pub invalidation_atr_multiple: f64,
    pub atr_period: usize,
    /// Minimum bars with overlapping bodies that form a congestion cluster.
    pub cluster_min_bars: usize,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            touch_tolerance_pct: 0.003,
            invalidation_atr_multiple: 0.3,
            atr_period: 14,
            cluster_min_bars: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoreWeights,
    pub retracement: RetracementBands,
    pub candle: CandlePotency,
    /// Distance (in ATRs) at which level proximity decays to zero.
    pub level_proximity_atr: f64,
    /// Proximity multiplier applied to Minor levels.
    pub minor_level_factor: f64,
    /// Trend component credit for a sideways timeframe.
    pub sideways_trend_credit: f64,
    pub min_history: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            retracement: RetracementBands::default(),
            candle: CandlePotency::default(),
            level_proximity_atr: 2.0,
            minor_level_factor: 0.6,
            sideways_trend_credit: 0.0,
            min_history: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub trend: f64,
    pub ma: f64,
    pub level: f64,
    pub candle: f64,
    pub retracement: f64,
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.trend + self.ma + self.level + self.candle + self.retracement
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            trend: 0.35,
            ma: 0.20,
            level: 0.20,
            candle: 0.15,
            retracement: 0.10,
        }
    }
}

/// Retracement band edges (fractions of the last swing) and their credits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetracementBands {
    pub strong_max: f64,
    pub moderate_max: f64,
    pub deep_max: f64,
    pub strong: f64,
    pub moderate: f64,
    pub deep: f64,
    /// Flat credit for a retracement beyond the whole swing.
    pub extended_bonus: f64,
}

impl Default for RetracementBands {
    fn default() -> Self {
        Self {
            strong_max: 0.40,
            moderate_max: 0.60,
            deep_max: 1.0,
            strong: 1.0,
            moderate: 0.8,
            deep: 0.3,
            extended_bonus: 0.5,
        }
    }
}

/// Credit (0..1) for each bar pattern when it agrees with the bias direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandlePotency {
    pub engulfing: f64,
    pub deep: f64,
    pub shallow: f64,
    pub wide_range: f64,
    pub continuation: f64,
    pub tail: f64,
    pub narrow_range: f64,
    pub doji: f64,
    pub normal: f64,
}

impl Default for CandlePotency {
    fn default() -> Self {
        Self {
            engulfing: 1.0,
            deep: 0.8,
            shallow: 0.5,
            wide_range: 0.7,
            continuation: 0.7,
            tail: 0.6,
            narrow_range: 0.3,
            doji: 0.2,
            normal: 0.1,
        }
    }
}

/// Macro/micro pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfluenceConfig {
    /// Timeframes in use, smallest first. `macro_steps` counts rungs on this list.
    pub ladder: Vec<Timeframe>,
    /// Micro timeframes; the first one is the triggering timeframe.
    pub micro_timeframes: Vec<Timeframe>,
    /// Explicit macro timeframe. When absent, `macro_steps` above the trigger timeframe.
    #[serde(rename = "macro")]
    pub macro_override: Option<Timeframe>,
    pub macro_steps: usize,
    /// Score ceiling applied when the micro trend fights the macro trend.
    pub misaligned_ceiling: f64,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        Self {
            ladder: Timeframe::LADDER.to_vec(),
            micro_timeframes: vec![Timeframe::M15],
            macro_override: None,
            macro_steps: 2,
            misaligned_ceiling: 40.0,
        }
    }
}

impl ConfluenceConfig {
    pub fn trigger_timeframe(&self) -> Timeframe {
        self.micro_timeframes
            .first()
            .copied()
            .unwrap_or(Timeframe::M15)
    }

    pub fn macro_timeframe(&self) -> Option<Timeframe> {
        self.macro_override
            .or_else(|| {
                self.trigger_timeframe()
                    .step_up(&self.ladder, self.macro_steps)
            })
    }

    /// Every timeframe that must be fetched and scored, smallest first.
    pub fn timeframes(&self) -> Vec<Timeframe> {
        let mut all = self.micro_timeframes.clone();
        all.extend(self.macro_timeframe());
        all.sort();
        all.dedup();
        all
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchlistConfig {
    pub watch_threshold: f64,
    pub trigger_threshold: f64,
    /// Cooldown after a signal, in trigger-timeframe bars.
    pub cooldown_bars: u32,
    /// An entry goes stale after this many trigger intervals without a closed bar.
    pub freshness_intervals: u32,
    pub patterns: Vec<TriggerPattern>,
    /// Weakest change-of-guard penetration tier that can trigger.
    pub min_cog_tier: Penetration,
    /// Weakest level grade a trigger bar may close through.
    pub min_level_grade: LevelGrade,
    /// Stop distance beyond the trigger bar's extreme, in ATRs.
    pub stop_buffer_atr: f64,
    /// Fallback targets as multiples of the entry-to-stop risk.
    pub target_r_multiples: Vec<f64>,
}

impl Default for WatchlistConfig {
    fn default() -> Self {
        Self {
            watch_threshold: 60.0,
            trigger_threshold: 75.0,
            cooldown_bars: 1,
            freshness_intervals: 2,
            patterns: vec![TriggerPattern::ChangeOfGuardAtLevel],
            min_cog_tier: Penetration::Shallow,
            min_level_grade: LevelGrade::Minor,
            stop_buffer_atr: 0.1,
            target_r_multiples: vec![1.0, 2.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn default_pairing_is_two_rungs_up() {
        let cfg = ConfluenceConfig::default();
        assert_eq!(cfg.trigger_timeframe(), Timeframe::M15);
        assert_eq!(cfg.macro_timeframe(), Some(Timeframe::H1));
        assert_eq!(cfg.timeframes(), vec![Timeframe::M15, Timeframe::H1]);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg = EngineConfig::from_toml_str(
            r#"
            [watchlist]
            watch_threshold = 55.0

            [confluence]
            micro_timeframes = ["5m", "15m"]
            macro = "4h"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.watchlist.watch_threshold, 55.0);
        assert_eq!(cfg.watchlist.trigger_threshold, 75.0);
        assert_eq!(cfg.confluence.trigger_timeframe(), Timeframe::M5);
        assert_eq!(cfg.confluence.macro_timeframe(), Some(Timeframe::H4));
        assert_eq!(cfg.trend.fast_ma, 20);
    }

    #[test]
    fn rejects_macro_below_micro() {
        let err = EngineConfig::from_toml_str(
            r#"
            [confluence]
            micro_timeframes = ["1h"]
            macro = "15m"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut cfg = EngineConfig::default();
        cfg.watchlist.watch_threshold = 80.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_weights() {
        let mut cfg = EngineConfig::default();
        cfg.scoring.weights = ScoreWeights {
            trend: 0.0,
            ma: 0.0,
            level: 0.0,
            candle: 0.0,
            retracement: 0.0,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn min_history_covers_slow_ma() {
        let cfg = EngineConfig::default();
        assert!(cfg.min_history() >= cfg.trend.slow_ma + cfg.trend.separation_lookback);
    }

    #[test]
    fn fingerprint_tracks_changes() {
        let a = EngineConfig::default();
        let mut b = EngineConfig::default();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.watchlist.trigger_threshold = 80.0;
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn ladder_is_configurable() {
        let cfg = EngineConfig::from_toml_str(
            r#"
            [confluence]
            ladder = ["15m", "1h", "4h", "1d"]
            micro_timeframes = ["15m"]
            macro_steps = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.confluence.macro_timeframe(), Some(Timeframe::H4));
        assert_eq!(
            cfg.confluence.timeframes(),
            vec![Timeframe::M15, Timeframe::H4]
        );
    }

    #[test]
    fn ladder_must_be_increasing_and_cover_the_pairing() {
        let mut cfg = EngineConfig::default();
        cfg.confluence.ladder = vec![Timeframe::H1, Timeframe::M15];
        assert!(cfg.validate().unwrap_err().to_string().contains("strictly increasing"));

        cfg.confluence.ladder = vec![Timeframe::H1, Timeframe::D1];
        assert!(cfg.validate().unwrap_err().to_string().contains("not on the ladder"));

        cfg.confluence.ladder = vec![Timeframe::M15];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unsupported_interval_is_a_parse_error() {
        let err = EngineConfig::from_toml_str("[confluence]\nladder = [\"15m\", \"2h\"]\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn toml_roundtrip_of_defaults() {
        let text = toml::to_string_pretty(&EngineConfig::default()).unwrap();
        let back = EngineConfig::from_toml_str(&text).unwrap();
        assert_eq!(back, EngineConfig::default());
    }
}
