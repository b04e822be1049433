//! Shared watchlist: one lock per symbol.
//!
//! The map itself is only write-locked to insert a new symbol. Scan workers and
//! trigger evaluation take the per-symbol mutex, so different symbols never block
//! each other and one symbol is never mutated from two threads at once.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use confluence_core::watchlist::{WatchlistEntry, WatchlistSnapshot};

use crate::error::ScanError;

#[derive(Debug, Default)]
pub struct Watchlist {
    entries: RwLock<HashMap<String, Arc<Mutex<WatchlistEntry>>>>,
}

impl Watchlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// The entry for `symbol`, created in `Scanned` on first use.
    pub fn entry(&self, symbol: &str) -> Result<Arc<Mutex<WatchlistEntry>>, ScanError> {
        {
            let entries = self
                .entries
                .read()
                .map_err(|e| ScanError::Poisoned(e.to_string()))?;
            if let Some(entry) = entries.get(symbol) {
                return Ok(Arc::clone(entry));
            }
        }
        let mut entries = self
            .entries
            .write()
            .map_err(|e| ScanError::Poisoned(e.to_string()))?;
        Ok(Arc::clone(entries.entry(symbol.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(WatchlistEntry::new(symbol)))
        })))
    }

    /// Run `f` with exclusive access to one symbol's entry.
    pub fn with_entry<T>(
        &self,
        symbol: &str,
        f: impl FnOnce(&mut WatchlistEntry) -> T,
    ) -> Result<T, ScanError> {
        let entry = self.entry(symbol)?;
        let mut guard = entry
            .lock()
            .map_err(|e| ScanError::Poisoned(format!("{symbol}: {e}")))?;
        Ok(f(&mut guard))
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consistent per entry; entries are copied one at a time.
    pub fn snapshot(&self, taken_at: DateTime<Utc>) -> Result<WatchlistSnapshot, ScanError> {
        let handles: Vec<Arc<Mutex<WatchlistEntry>>> = self
            .entries
            .read()
            .map_err(|e| ScanError::Poisoned(e.to_string()))?
            .values()
            .cloned()
            .collect();
        let entries = handles
            .iter()
            .map(|h| {
                h.lock()
                    .map(|e| e.clone())
                    .map_err(|e| ScanError::Poisoned(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(WatchlistSnapshot::new(taken_at, entries))
    }
}

/// Write a snapshot as pretty JSON.
pub fn export_snapshot(snapshot: &WatchlistSnapshot, path: &Path) -> Result<(), ScanError> {
    let io_err = |source| ScanError::Io {
        path: path.to_path_buf(),
        source,
    };
    let json = serde_json::to_string_pretty(snapshot)
        .map_err(|e| io_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, json).map_err(io_err)
}
