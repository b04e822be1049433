//! CSV-backed bar history: one file per (symbol, timeframe) at
//! `<dir>/<SYMBOL>_<tf>.csv`.
//!
//! Expected header: `start_time,open,high,low,close,volume[,is_closed]`, with
//! `start_time` in RFC 3339. Rows must already be in time order; the dispatcher
//! refuses anything else.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use confluence_core::domain::{Bar, Timeframe};
use serde::Deserialize;

use crate::provider::{BarHistory, FetchError};

#[derive(Debug, Deserialize)]
struct CsvRow {
    start_time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    #[serde(default)]
    is_closed: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct CsvBarHistory {
    dir: PathBuf,
}

impl CsvBarHistory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.dir.join(format!("{symbol}_{timeframe}.csv"))
    }

    fn read(&self, path: &Path, timeframe: Timeframe) -> Result<Vec<Bar>, FetchError> {
        let file = File::open(path)
            .map_err(|e| FetchError::Source(format!("{}: {e}", path.display())))?;
        let mut reader = csv::Reader::from_reader(BufReader::new(file));

        let mut bars = Vec::new();
        for (line, result) in reader.deserialize().enumerate() {
            let row: CsvRow = result.map_err(|e| {
                FetchError::Source(format!("{} row {}: {e}", path.display(), line + 1))
            })?;
            let start_time = DateTime::parse_from_rfc3339(row.start_time.trim())
                .map_err(|e| {
                    FetchError::Source(format!(
                        "{} row {}: bad start_time '{}': {e}",
                        path.display(),
                        line + 1,
                        row.start_time
                    ))
                })?
                .with_timezone(&Utc);
            let mut bar = Bar::new(
                start_time, timeframe, row.open, row.high, row.low, row.close, row.volume,
            );
            bar.is_closed = row.is_closed.unwrap_or(true);
            bars.push(bar);
        }
        Ok(bars)
    }
}

impl BarHistory for CsvBarHistory {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Bar>, FetchError> {
        let path = self.path_for(symbol, timeframe);
        if !path.exists() {
            return Err(FetchError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        let mut bars = self.read(&path, timeframe)?;
        let skip = bars.len().saturating_sub(count);
        bars.drain(..skip);
        Ok(bars)
    }
}
