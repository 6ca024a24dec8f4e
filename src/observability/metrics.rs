//! Invocation-scoped metrics
//!
//! Observations are buffered by a [`MetricsRecorder`] for the lifetime of one
//! invocation and published as a single [`MetricBatch`] when it is flushed. Every record
//! in a batch shares the batch namespace and carries the `service` default dimension.
//!
//! # Cardinality
//!
//! Dimension values are request paths, HTTP methods, status codes, table names and the
//! function name. Request ids and item ids never become dimensions.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::sink::MetricsSink;

/// Metric names emitted by the request pipeline
pub mod names {
    pub const REQUEST_LATENCY: &str = "RequestLatency";
    pub const SUCCESSFUL_REQUESTS: &str = "SuccessfulRequests";
    pub const CLIENT_ERRORS: &str = "ClientErrors";
    pub const SERVER_ERRORS: &str = "ServerErrors";
    pub const DYNAMODB_LATENCY: &str = "DynamoDBLatency";
    pub const COLD_START: &str = "ColdStart";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricUnit {
    Milliseconds,
    Count,
}

impl MetricUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricUnit::Milliseconds => "Milliseconds",
            MetricUnit::Count => "Count",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub name: String,
    pub unit: MetricUnit,
    pub value: f64,
    pub dimensions: BTreeMap<String, String>,
    pub namespace: String,
}

impl MetricRecord {
    pub fn dimension(&self, key: &str) -> Option<&str> {
        self.dimensions.get(key).map(String::as_str)
    }
}

/// Everything one invocation recorded, under a single namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBatch {
    pub namespace: String,
    pub timestamp_ms: i64,
    pub records: Vec<MetricRecord>,
}

/// Render one record as an Embedded Metric Format document
pub fn emf_document(record: &MetricRecord, timestamp_ms: i64) -> Value {
    let dimension_keys: Vec<&String> = record.dimensions.keys().collect();

    let mut document = Map::new();
    document.insert(
        "_aws".to_string(),
        json!({
            "Timestamp": timestamp_ms,
            "CloudWatchMetrics": [{
                "Namespace": record.namespace,
                "Dimensions": [dimension_keys],
                "Metrics": [{ "Name": record.name, "Unit": record.unit.as_str() }],
            }],
        }),
    );
    for (key, value) in &record.dimensions {
        document.insert(key.clone(), Value::from(value.clone()));
    }
    document.insert(record.name.clone(), json!(record.value));

    Value::Object(document)
}

/// Fans a flushed batch out to every configured sink
///
/// Publishing is best-effort. A failing sink is counted and reported on the process
/// log; it never affects the response.
pub struct MetricsPublisher {
    sinks: Vec<Arc<dyn MetricsSink>>,
    failed: AtomicU64,
}

impl MetricsPublisher {
    pub fn new(sinks: Vec<Arc<dyn MetricsSink>>) -> Self {
        Self {
            sinks,
            failed: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, batch: &MetricBatch) {
        for sink in &self.sinks {
            if let Err(e) = sink.publish(batch) {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    error = %e,
                    namespace = %batch.namespace,
                    records = batch.records.len(),
                    "Failed to publish metrics batch"
                );
            }
        }
    }

    pub fn failed_publishes(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
struct PendingMetric {
    name: String,
    unit: MetricUnit,
    value: f64,
    dimensions: BTreeMap<String, String>,
}

/// Metrics buffer for one invocation
pub struct MetricsRecorder {
    default_dimensions: BTreeMap<String, String>,
    buffer: Vec<PendingMetric>,
    publisher: Arc<MetricsPublisher>,
}

impl MetricsRecorder {
    pub fn new(service: &str, publisher: Arc<MetricsPublisher>) -> Self {
        let mut default_dimensions = BTreeMap::new();
        default_dimensions.insert("service".to_string(), service.to_string());
        Self {
            default_dimensions,
            buffer: Vec::new(),
            publisher,
        }
    }

    pub fn add(&mut self, name: &str, unit: MetricUnit, value: f64, dimensions: &[(&str, String)]) {
        let mut merged = self.default_dimensions.clone();
        for (key, value) in dimensions {
            merged.insert(key.to_string(), value.clone());
        }
        self.buffer.push(PendingMetric {
            name: name.to_string(),
            unit,
            value,
            dimensions: merged,
        });
    }

    /// Record a single occurrence
    pub fn count(&mut self, name: &str, dimensions: &[(&str, String)]) {
        self.add(name, MetricUnit::Count, 1.0, dimensions);
    }

    pub fn latency(&mut self, name: &str, duration: std::time::Duration, dimensions: &[(&str, String)]) {
        self.add(
            name,
            MetricUnit::Milliseconds,
            duration.as_secs_f64() * 1000.0,
            dimensions,
        );
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Publish everything buffered under `namespace` and clear the buffer
    ///
    /// Returns the published batch. An empty buffer publishes nothing.
    pub fn flush(&mut self, namespace: &str) -> MetricBatch {
        let records: Vec<MetricRecord> = self
            .buffer
            .drain(..)
            .map(|pending| MetricRecord {
                name: pending.name,
                unit: pending.unit,
                value: pending.value,
                dimensions: pending.dimensions,
                namespace: namespace.to_string(),
            })
            .collect();

        let batch = MetricBatch {
            namespace: namespace.to_string(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            records,
        };

        if !batch.records.is_empty() {
            self.publisher.publish(&batch);
        }
        batch
    }
}

/// Bucket HTTP status codes for status-class reporting
pub fn status_class(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}
