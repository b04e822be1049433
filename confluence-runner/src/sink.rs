//! Where trade signals go. The engine never places orders; a sink hands each
//! `TradeSignal` to whatever risk manager sits downstream.

use std::io::Write;
use std::sync::Mutex;

use confluence_core::watchlist::TradeSignal;

use crate::error::SinkError;

pub trait SignalSink: Send + Sync {
    fn emit(&self, signal: &TradeSignal) -> Result<(), SinkError>;
}

/// Keeps every signal in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    signals: Mutex<Vec<TradeSignal>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> Vec<TradeSignal> {
        self.signals
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.signals.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SignalSink for CollectingSink {
    fn emit(&self, signal: &TradeSignal) -> Result<(), SinkError> {
        self.signals
            .lock()
            .map_err(|e| SinkError::Poisoned(e.to_string()))?
            .push(signal.clone());
        Ok(())
    }
}

/// Writes one JSON object per line and flushes after each signal.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .map_err(|e| SinkError::Poisoned(e.to_string()))
    }
}

impl<W: Write + Send> SignalSink for JsonLinesSink<W> {
    fn emit(&self, signal: &TradeSignal) -> Result<(), SinkError> {
        let json = serde_json::to_string(signal)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| SinkError::Poisoned(e.to_string()))?;
        writeln!(writer, "{json}")?;
        writer.flush()?;
        Ok(())
    }
}
