//! Prometheus export of flushed invocation metrics
//!
//! When `metrics.prometheus_port` is set, every flushed batch is also replayed into the
//! `metrics` facade and served by the Prometheus HTTP listener. Counts become counters
//! and latencies become histograms (in milliseconds, as recorded).

use std::net::SocketAddr;

use anyhow::{Result, anyhow};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use super::metrics::{MetricBatch, MetricUnit};
use super::sink::{MetricsSink, SinkError};

/// Install the global Prometheus recorder with its HTTP listener
///
/// Must be called from within a Tokio runtime.
pub fn install_prometheus(bind: &str, port: u16, service: &str) -> Result<()> {
    let ip = bind
        .parse::<std::net::IpAddr>()
        .map_err(|e| anyhow!("Invalid metrics bind address {}: {}", bind, e))?;

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::new(ip, port))
        .add_global_label("version", env!("CARGO_PKG_VERSION"))
        .install()
        .map_err(|e| anyhow!("Failed to install Prometheus recorder: {}", e))?;

    tracing::info!(
        port = %port,
        service = %service,
        "Prometheus metrics listener started"
    );
    Ok(())
}

/// Replays batches into whatever recorder the `metrics` facade currently has
#[derive(Debug, Default, Clone, Copy)]
pub struct FacadeMetricsSink;

impl MetricsSink for FacadeMetricsSink {
    fn publish(&self, batch: &MetricBatch) -> Result<(), SinkError> {
        for record in &batch.records {
            let labels: Vec<(String, String)> = record
                .dimensions
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let name = record.name.clone();

            match record.unit {
                MetricUnit::Count => counter!(name, &labels).increment(record.value as u64),
                MetricUnit::Milliseconds => histogram!(name, &labels).record(record.value),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::metrics::MetricRecord;
    use std::collections::BTreeMap;

    fn record(name: &str, unit: MetricUnit, value: f64) -> MetricRecord {
        let mut dimensions = BTreeMap::new();
        dimensions.insert("endpoint".to_string(), "/".to_string());
        dimensions.insert("service".to_string(), "orders".to_string());
        MetricRecord {
            name: name.to_string(),
            unit,
            value,
            dimensions,
            namespace: "ServerlessApp".to_string(),
        }
    }

    #[test]
    fn test_facade_sink_feeds_prometheus() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let batch = MetricBatch {
            namespace: "ServerlessApp".to_string(),
            timestamp_ms: 0,
            records: vec![
                record("SuccessfulRequests", MetricUnit::Count, 1.0),
                record("RequestLatency", MetricUnit::Milliseconds, 12.5),
            ],
        };

        metrics::with_local_recorder(&recorder, || {
            FacadeMetricsSink.publish(&batch).unwrap();
            FacadeMetricsSink.publish(&batch).unwrap();
        });

        let rendered = handle.render();
        assert!(rendered.contains("SuccessfulRequests{endpoint=\"/\",service=\"orders\"} 2"));
        assert!(rendered.contains("RequestLatency_count{endpoint=\"/\",service=\"orders\"} 2"));
    }

    #[test]
    fn test_invalid_bind_is_rejected() {
        let err = install_prometheus("not-an-ip", 9100, "orders").unwrap_err();
        assert!(err.to_string().contains("Invalid metrics bind address"));
    }
}
