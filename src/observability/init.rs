//! Observability initialization
//!
//! [`Telemetry`] is created once per process (one execution environment) and shared by
//! reference with every invocation. It holds the service identity, the cold start flag
//! and the three sinks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;

use super::context::{ColdStart, CorrelationContext, RequestMetadata};
use super::logging::{LogLevel, RequestLogger, StructuredLogger, init_logging};
use super::metrics::{MetricsPublisher, MetricsRecorder};
use super::recorder::{FacadeMetricsSink, install_prometheus};
use super::sink::{LogSink, MetricsSink, StdoutSink, TraceCollector};
use super::tracing::{SegmentGuard, Trace};
use crate::config::AppConfig;

/// Identity stamped on every record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub name: String,
    pub function_name: String,
    pub version: String,
}

pub struct Telemetry {
    service: ServiceIdentity,
    namespace: String,
    capture_cold_start: bool,
    tracing_enabled: bool,
    log_event: bool,
    cold_start: ColdStart,
    logger: Arc<StructuredLogger>,
    metrics: Arc<MetricsPublisher>,
    traces: Arc<dyn TraceCollector>,
    dropped_traces: AtomicU64,
}

impl Telemetry {
    /// Build the bundle with explicit sinks
    pub fn new(
        config: &AppConfig,
        log_sink: Arc<dyn LogSink>,
        metrics_sinks: Vec<Arc<dyn MetricsSink>>,
        traces: Arc<dyn TraceCollector>,
    ) -> Self {
        let min_level = config.logging.level.parse().unwrap_or(LogLevel::Info);

        Self {
            service: ServiceIdentity {
                name: config.service.name.clone(),
                function_name: config.service.function_name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            namespace: config.metrics.namespace.clone(),
            capture_cold_start: config.metrics.capture_cold_start,
            tracing_enabled: config.tracing.enabled,
            log_event: config.logging.log_event,
            cold_start: ColdStart::new(),
            logger: Arc::new(StructuredLogger::new(
                config.service.name.clone(),
                min_level,
                log_sink,
            )),
            metrics: Arc::new(MetricsPublisher::new(metrics_sinks)),
            traces,
            dropped_traces: AtomicU64::new(0),
        }
    }

    /// Build the bundle writing everything to stdout
    pub fn stdout(config: &AppConfig) -> Self {
        let sink = Arc::new(StdoutSink);
        let mut metrics_sinks: Vec<Arc<dyn MetricsSink>> = vec![sink.clone()];
        if config.metrics.prometheus_port.is_some() {
            metrics_sinks.push(Arc::new(FacadeMetricsSink));
        }
        Self::new(config, sink.clone(), metrics_sinks, sink)
    }

    pub fn service(&self) -> &ServiceIdentity {
        &self.service
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn capture_cold_start(&self) -> bool {
        self.capture_cold_start
    }

    pub fn log_event(&self) -> bool {
        self.log_event
    }

    pub fn logger(&self) -> &Arc<StructuredLogger> {
        &self.logger
    }

    pub fn metrics_publisher(&self) -> &Arc<MetricsPublisher> {
        &self.metrics
    }

    /// Derive the context for a new invocation, consuming the cold start flag
    pub fn begin(&self, metadata: &RequestMetadata) -> CorrelationContext {
        CorrelationContext::begin(
            metadata,
            self.cold_start.take(),
            &self.service.function_name,
            self.tracing_enabled,
        )
    }

    pub fn request_logger(&self, ctx: &CorrelationContext) -> RequestLogger {
        RequestLogger::new(self.logger.clone(), ctx.clone())
    }

    pub fn metrics_recorder(&self) -> MetricsRecorder {
        MetricsRecorder::new(&self.service.name, self.metrics.clone())
    }

    /// Start the invocation's trace with the function segment as root
    pub fn start_trace(&self, ctx: &CorrelationContext) -> (Trace, SegmentGuard) {
        let (trace, root) = Trace::begin(ctx, &self.service.function_name);
        root.put_annotation("ColdStart", ctx.cold_start);
        root.put_annotation("Service", &self.service.name);
        (trace, root)
    }

    /// Close what is still open and hand the tree to the collector
    pub fn submit_trace(&self, trace: &Trace) {
        let Some(tree) = trace.finish() else {
            return;
        };
        if let Err(e) = self.traces.submit(&tree) {
            self.dropped_traces.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, trace_id = %tree.trace_id, "Failed to submit trace");
        }
    }

    pub fn dropped_traces(&self) -> u64 {
        self.dropped_traces.load(Ordering::Relaxed)
    }
}

/// Initialize process logging, the optional Prometheus listener, and the telemetry
/// bundle for this process
pub fn init_observability(config: &AppConfig) -> Result<Arc<Telemetry>> {
    init_logging(&config.logging)?;

    if let Some(port) = config.metrics.prometheus_port {
        install_prometheus(&config.server.bind, port, &config.service.name)?;
    }

    let telemetry = Arc::new(Telemetry::stdout(config));

    tracing::info!(
        service = %config.service.name,
        function_name = %config.service.function_name,
        namespace = %config.metrics.namespace,
        tracing_enabled = %config.tracing.enabled,
        prometheus = config.metrics.prometheus_port.is_some(),
        "Observability components initialized successfully"
    );
    Ok(telemetry)
}
