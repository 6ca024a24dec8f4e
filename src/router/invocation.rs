use std::time::{Duration, Instant};

use super::state::{RequestState, TransitionError};
use crate::observability::context::{CorrelationContext, RequestMetadata};
use crate::observability::init::Telemetry;
use crate::observability::logging::RequestLogger;
use crate::observability::metrics::{MetricBatch, MetricsRecorder, names};
use crate::observability::tracing::{SegmentGuard, Trace};

/// Everything owned by one request while it is being handled
///
/// Consumed by [`Invocation::finish`], so metrics are flushed and the trace submitted
/// exactly once.
pub struct Invocation {
    ctx: CorrelationContext,
    log: RequestLogger,
    metrics: MetricsRecorder,
    trace: Trace,
    root: Option<SegmentGuard>,
    state: RequestState,
    started: Instant,
}

impl Invocation {
    pub fn start(telemetry: &Telemetry, metadata: &RequestMetadata) -> Self {
        let started = Instant::now();
        let ctx = telemetry.begin(metadata);
        let log = telemetry.request_logger(&ctx);
        let mut metrics = telemetry.metrics_recorder();
        let (trace, root) = telemetry.start_trace(&ctx);

        if ctx.cold_start && telemetry.capture_cold_start() {
            metrics.count(names::COLD_START, &[("function_name", ctx.function_name.clone())]);
        }

        Self {
            ctx,
            log,
            metrics,
            trace,
            root: Some(root),
            state: RequestState::Received,
            started,
        }
    }

    pub fn context(&self) -> &CorrelationContext {
        &self.ctx
    }

    pub fn log(&self) -> &RequestLogger {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut RequestLogger {
        &mut self.log
    }

    pub fn metrics_mut(&mut self) -> &mut MetricsRecorder {
        &mut self.metrics
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn advance(&mut self, next: RequestState) -> Result<(), TransitionError> {
        self.state = self.state.transition(next)?;
        Ok(())
    }

    /// Flush metrics under the bundle namespace and submit the trace tree
    pub fn finish(mut self, telemetry: &Telemetry) -> MetricBatch {
        let batch = self.metrics.flush(telemetry.namespace());
        drop(self.root.take());
        telemetry.submit_trace(&self.trace);
        batch
    }
}
