//! Observability for the request pipeline
//!
//! This module provides the per-invocation telemetry the handler emits:
//! - correlation context derived from platform headers
//! - structured JSON request logs
//! - invocation-scoped metrics flushed as Embedded Metric Format
//! - trace segment trees with error capture
//! - sink contracts with stdout and in-memory implementations

pub mod context;
pub mod init;
pub mod logging;
pub mod metrics;
pub mod recorder;
pub mod sink;
pub mod tracing;

pub use context::{CorrelationContext, RequestMetadata};
pub use init::{Telemetry, init_observability};
pub use logging::{LogEntry, LogLevel, RequestLogger, StructuredLogger, init_logging};
pub use self::metrics::{MetricBatch, MetricRecord, MetricUnit, MetricsRecorder};
pub use sink::{LogSink, MemorySink, MetricsSink, SinkError, StdoutSink, TraceCollector};
pub use self::tracing::{SegmentGuard, SegmentHandle, Trace, TraceSegment};
