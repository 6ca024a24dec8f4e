//! Telemetry sinks
//!
//! The instrumentation pipeline only ever writes to these three contracts. Delivery to a
//! backend collector is somebody else's problem: in the function runtime the stdout
//! stream is shipped by the platform, and tests read everything back from
//! [`MemorySink`].

use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use super::logging::LogEntry;
use super::metrics::{MetricBatch, MetricRecord, emf_document};
use super::tracing::TraceSegment;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to write telemetry: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode telemetry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("telemetry sink unavailable: {0}")]
    Unavailable(String),
}

/// Write-only destination for structured log records
pub trait LogSink: Send + Sync {
    fn write(&self, entry: &LogEntry) -> Result<(), SinkError>;
}

/// Destination for a flushed batch of metric records
pub trait MetricsSink: Send + Sync {
    fn publish(&self, batch: &MetricBatch) -> Result<(), SinkError>;
}

/// Destination for a completed trace tree
pub trait TraceCollector: Send + Sync {
    fn submit(&self, segment: &TraceSegment) -> Result<(), SinkError>;
}

/// JSON-lines writer on stdout. Metrics are rendered as Embedded Metric Format
/// documents, one per record.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl StdoutSink {
    fn write_line(value: &impl serde::Serialize) -> Result<(), SinkError> {
        let line = serde_json::to_string(value)?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line)?;
        Ok(())
    }
}

impl LogSink for StdoutSink {
    fn write(&self, entry: &LogEntry) -> Result<(), SinkError> {
        Self::write_line(entry)
    }
}

impl MetricsSink for StdoutSink {
    fn publish(&self, batch: &MetricBatch) -> Result<(), SinkError> {
        for record in &batch.records {
            Self::write_line(&emf_document(record, batch.timestamp_ms))?;
        }
        Ok(())
    }
}

impl TraceCollector for StdoutSink {
    fn submit(&self, segment: &TraceSegment) -> Result<(), SinkError> {
        Self::write_line(segment)
    }
}

/// In-memory sink for every telemetry kind, with an optional failure switch
#[derive(Debug, Default)]
pub struct MemorySink {
    logs: Mutex<Vec<LogEntry>>,
    batches: Mutex<Vec<MetricBatch>>,
    traces: Mutex<Vec<TraceSegment>>,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with [`SinkError::Unavailable`]
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        lock(&self.logs).clone()
    }

    pub fn batches(&self) -> Vec<MetricBatch> {
        lock(&self.batches).clone()
    }

    /// All published records, flattened across batches
    pub fn records(&self) -> Vec<MetricRecord> {
        lock(&self.batches)
            .iter()
            .flat_map(|batch| batch.records.iter().cloned())
            .collect()
    }

    pub fn traces(&self) -> Vec<TraceSegment> {
        lock(&self.traces).clone()
    }

    pub fn clear(&self) {
        lock(&self.logs).clear();
        lock(&self.batches).clear();
        lock(&self.traces).clear();
    }

    fn check(&self) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("memory sink set to fail".to_string()));
        }
        Ok(())
    }
}

impl LogSink for MemorySink {
    fn write(&self, entry: &LogEntry) -> Result<(), SinkError> {
        self.check()?;
        lock(&self.logs).push(entry.clone());
        Ok(())
    }
}

impl MetricsSink for MemorySink {
    fn publish(&self, batch: &MetricBatch) -> Result<(), SinkError> {
        self.check()?;
        lock(&self.batches).push(batch.clone());
        Ok(())
    }
}

impl TraceCollector for MemorySink {
    fn submit(&self, segment: &TraceSegment) -> Result<(), SinkError> {
        self.check()?;
        lock(&self.traces).push(segment.clone());
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
