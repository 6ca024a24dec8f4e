//! Structured request logging and process log initialization
//!
//! Two streams are kept apart:
//! - the request log: one flat JSON object per record, tied to the invocation's
//!   [`CorrelationContext`] and written to a [`LogSink`] (stdout in production)
//! - the process log: `tracing` events for startup, configuration, sink failures and
//!   shutdown, formatted by `tracing-subscriber` on stderr
//!
//! # Record shape
//!
//! ```json
//! {"timestamp":"2024-05-01T12:00:00.000Z","level":"INFO","message":"Request completed",
//!  "service":"serverless-api","correlation_id":"c0ffee","xray_trace_id":"1-...",
//!  "cold_start":false,"function_name":"apigw-handler","status_code":200,"duration_ms":4.2}
//! ```
//!
//! Keys appended by the caller are flattened next to the fixed keys. A caller-supplied
//! key that collides with a fixed key is dropped.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, anyhow};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use super::context::CorrelationContext;
use super::sink::LogSink;
use crate::config::LoggingConfig;
use crate::error::error_chain;

/// Keys owned by [`LogEntry`] itself
pub const RESERVED_KEYS: [&str; 8] = [
    "timestamp",
    "level",
    "message",
    "service",
    "correlation_id",
    "xray_trace_id",
    "cold_start",
    "function_name",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown log level '{0}'")]
pub struct ParseLevelError(String);

impl FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// One request log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    pub service: String,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xray_trace_id: Option<String>,
    pub cold_start: bool,
    pub function_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LogEntry {
    /// Look up a value by key, covering both fixed and appended keys
    pub fn field(&self, key: &str) -> Option<Value> {
        match key {
            "timestamp" => Some(Value::from(self.timestamp.clone())),
            "level" => Some(Value::from(self.level.as_str())),
            "message" => Some(Value::from(self.message.clone())),
            "service" => Some(Value::from(self.service.clone())),
            "correlation_id" => Some(Value::from(self.correlation_id.clone())),
            "xray_trace_id" => self.xray_trace_id.clone().map(Value::from),
            "cold_start" => Some(Value::from(self.cold_start)),
            "function_name" => Some(Value::from(self.function_name.clone())),
            _ => self.extra.get(key).cloned(),
        }
    }
}

/// Error description attached to an error record as `error` and `stack_trace`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub error: String,
    pub stack_trace: String,
}

impl ErrorReport {
    /// The error, every `source()` below it, and a backtrace when capture is enabled
    pub fn from_error(err: &(dyn Error + 'static)) -> Self {
        let mut lines: Vec<String> = error_chain(err)
            .into_iter()
            .enumerate()
            .map(|(depth, cause)| {
                if depth == 0 {
                    cause
                } else {
                    format!("Caused by: {}", cause)
                }
            })
            .collect();

        let backtrace = Backtrace::capture();
        if backtrace.status() == BacktraceStatus::Captured {
            lines.push(format!("stack backtrace:\n{}", backtrace));
        }

        Self {
            error: err.to_string(),
            stack_trace: lines.join("\n"),
        }
    }

    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = panic_message(payload);
        Self {
            stack_trace: format!("panicked: {}", message),
            error: message,
        }
    }
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Leveled JSON logger bound to one sink
///
/// Writes never fail from the caller's point of view: a sink error is counted in
/// [`StructuredLogger::dropped_records`] and reported on the process log.
pub struct StructuredLogger {
    service: String,
    min_level: LogLevel,
    sink: Arc<dyn LogSink>,
    dropped: AtomicU64,
}

impl StructuredLogger {
    pub fn new(service: impl Into<String>, min_level: LogLevel, sink: Arc<dyn LogSink>) -> Self {
        Self {
            service: service.into(),
            min_level,
            sink,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    /// Build the record without writing it
    pub fn entry(
        &self,
        level: LogLevel,
        message: &str,
        ctx: &CorrelationContext,
        extra: Map<String, Value>,
    ) -> LogEntry {
        LogEntry {
            timestamp: chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level,
            message: message.to_string(),
            service: self.service.clone(),
            correlation_id: ctx.correlation_id.clone(),
            xray_trace_id: ctx.trace_id.clone(),
            cold_start: ctx.cold_start,
            function_name: ctx.function_name.clone(),
            extra: extra
                .into_iter()
                .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
                .collect(),
        }
    }

    pub fn log(
        &self,
        level: LogLevel,
        message: &str,
        ctx: &CorrelationContext,
        extra: Map<String, Value>,
    ) {
        if !self.enabled(level) {
            return;
        }

        let entry = self.entry(level, message, ctx, extra);
        if let Err(e) = self.sink.write(&entry) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                error = %e,
                correlation_id = %ctx.correlation_id,
                "Dropped request log record"
            );
        }
    }

    /// Log an error record carrying `error` and `stack_trace`
    pub fn log_error(
        &self,
        level: LogLevel,
        message: &str,
        report: &ErrorReport,
        ctx: &CorrelationContext,
        mut extra: Map<String, Value>,
    ) {
        extra.insert("error".to_string(), Value::from(report.error.clone()));
        extra.insert("stack_trace".to_string(), Value::from(report.stack_trace.clone()));
        self.log(level, message, ctx, extra);
    }

    pub fn dropped_records(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Logger for a single invocation
///
/// Carries the invocation's context and any keys appended along the way, which are
/// merged into every later record.
pub struct RequestLogger {
    logger: Arc<StructuredLogger>,
    ctx: CorrelationContext,
    keys: Map<String, Value>,
}

impl RequestLogger {
    pub fn new(logger: Arc<StructuredLogger>, ctx: CorrelationContext) -> Self {
        Self {
            logger,
            ctx,
            keys: Map::new(),
        }
    }

    pub fn context(&self) -> &CorrelationContext {
        &self.ctx
    }

    /// Merge keys into every subsequent record. `fields` should be a JSON object.
    pub fn append_keys(&mut self, fields: Value) {
        if let Value::Object(fields) = fields {
            self.keys.extend(fields);
        }
    }

    pub fn remove_keys(&mut self, keys: &[&str]) {
        for key in keys {
            self.keys.remove(*key);
        }
    }

    fn merged(&self, fields: Value) -> Map<String, Value> {
        let mut extra = self.keys.clone();
        if let Value::Object(fields) = fields {
            extra.extend(fields);
        }
        extra
    }

    pub fn log(&self, level: LogLevel, message: &str, fields: Value) {
        self.logger.log(level, message, &self.ctx, self.merged(fields));
    }

    pub fn debug(&self, message: &str, fields: Value) {
        self.log(LogLevel::Debug, message, fields);
    }

    pub fn info(&self, message: &str, fields: Value) {
        self.log(LogLevel::Info, message, fields);
    }

    pub fn warn(&self, message: &str, fields: Value) {
        self.log(LogLevel::Warn, message, fields);
    }

    pub fn error(&self, message: &str, fields: Value) {
        self.log(LogLevel::Error, message, fields);
    }

    pub fn exception(&self, level: LogLevel, message: &str, err: &(dyn Error + 'static), fields: Value) {
        self.report(level, message, &ErrorReport::from_error(err), fields);
    }

    pub fn report(&self, level: LogLevel, message: &str, report: &ErrorReport, fields: Value) {
        self.logger
            .log_error(level, message, report, &self.ctx, self.merged(fields));
    }
}

/// Install the process-wide `tracing` subscriber writing to stderr
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            let level = config.level.parse::<LogLevel>().unwrap_or(LogLevel::Info);
            EnvFilter::new(level.as_str().to_ascii_lowercase())
        });

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "pretty" => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .with_file(true)
                .with_line_number(true)
                .with_target(true);
            registry.with(fmt_layer).try_init()
        }
        _ => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_span_list(true)
                .with_target(true)
                .with_file(false)
                .with_line_number(false);
            registry.with(fmt_layer).try_init()
        }
    }
    .map_err(|e| anyhow!("Failed to initialize process logging: {}", e))?;

    tracing::info!(
        level = %config.level,
        format = %config.format,
        "Process logging initialized"
    );

    Ok(())
}
