//! Runner configuration: the engine rule set plus scanner settings.
//!
//! ```toml
//! [scanner]
//! universe = ["AAPL", "MSFT"]
//! workers = 4
//!
//! [engine.confluence]
//! micro_timeframes = ["15m"]
//! ```

use std::path::{Path, PathBuf};

use confluence_core::{ConfigError as EngineConfigError, EngineConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Parse failures and engine rule-set violations.
    #[error(transparent)]
    Engine(#[from] EngineConfigError),

    #[error("invalid scanner config: {0}")]
    Scanner(String),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub scanner: ScannerConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub universe: Vec<String>,
    /// Size of the private scan pool.
    pub workers: usize,
    pub fetch_timeout_ms: u64,
    /// Bars requested per (symbol, timeframe) fetch.
    pub history_bars: usize,
    pub scan_interval_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            universe: Vec::new(),
            workers: 4,
            fetch_timeout_ms: 5_000,
            history_bars: 250,
            scan_interval_secs: 60,
        }
    }
}

impl RunnerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| EngineConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        let scanner = &self.scanner;
        if scanner.workers == 0 {
            return Err(ConfigError::Scanner("scanner.workers must be >= 1".into()));
        }
        if scanner.fetch_timeout_ms == 0 {
            return Err(ConfigError::Scanner("scanner.fetch_timeout_ms must be >= 1".into()));
        }
        if scanner.history_bars < self.engine.min_history() {
            return Err(ConfigError::Scanner(format!(
                "scanner.history_bars ({}) is below the engine's minimum history ({})",
                scanner.history_bars,
                self.engine.min_history()
            )));
        }
        if let Some(dup) = scanner
            .universe
            .iter()
            .enumerate()
            .find(|(i, s)| scanner.universe[..*i].contains(s))
            .map(|(_, s)| s)
        {
            return Err(ConfigError::Scanner(format!("scanner.universe lists {dup} twice")));
        }
        Ok(())
    }
}
