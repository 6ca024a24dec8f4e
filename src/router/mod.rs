//! Request dispatch for the API
//!
//! Every call goes through [`RequestRouter::route`], which owns the invocation
//! lifecycle: correlation context, request log records, the metric batch and the
//! trace tree. Handler outcomes are mapped to responses here, so nothing below the
//! router ever builds an HTTP status.

pub mod invocation;
pub mod request;
pub mod state;

pub use invocation::Invocation;
pub use request::{ApiRequest, ApiResponse};
pub use state::{RequestState, TransitionError};

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode};
use futures::FutureExt;
use serde_json::{Value, json};

use crate::config::AppConfig;
use crate::error::RequestError;
use crate::handlers::{DataWriter, parse_item};
use crate::health::checker::round_ms;
use crate::health::{HealthChecker, HealthReport};
use crate::observability::context::RequestMetadata;
use crate::observability::init::Telemetry;
use crate::observability::logging::{ErrorReport, LogLevel};
use crate::observability::metrics::{names as metric, status_class};
use crate::observability::tracing::names as segment;
use crate::services::StorageBackend;

/// Routes the API answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Write,
    Health,
    Unmatched,
}

impl Endpoint {
    pub fn resolve(method: &Method, path: &str) -> Self {
        if *method == Method::POST && path == "/" {
            Endpoint::Write
        } else if *method == Method::GET && path == "/health" {
            Endpoint::Health
        } else {
            Endpoint::Unmatched
        }
    }
}

pub struct RequestRouter {
    telemetry: Arc<Telemetry>,
    writer: DataWriter,
    checker: HealthChecker,
    health_timeout: Duration,
    api_key: Option<String>,
}

impl RequestRouter {
    pub fn new(telemetry: Arc<Telemetry>, storage: Arc<dyn StorageBackend>, config: &AppConfig) -> Self {
        Self {
            telemetry,
            writer: DataWriter::new(
                storage.clone(),
                config.storage.table_name.clone(),
                config.storage.write_timeout(),
            ),
            checker: HealthChecker::new(storage),
            health_timeout: config.health.timeout(),
            api_key: config.auth.api_key.clone(),
        }
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub fn table_name(&self) -> &str {
        self.writer.table_name()
    }

    /// True when no key is configured or the request presented the configured one
    fn authorized(&self, metadata: &RequestMetadata) -> bool {
        match self.api_key.as_deref() {
            Some(expected) => metadata.api_key.as_deref() == Some(expected),
            None => true,
        }
    }

    /// Handle one request end to end
    ///
    /// Always produces a response. Metrics are flushed and the trace submitted before
    /// returning, whatever the outcome.
    pub async fn route(&self, metadata: &RequestMetadata, request: ApiRequest) -> ApiResponse {
        let mut invocation = Invocation::start(&self.telemetry, metadata);
        let method = request.method.to_string();
        let path = request.path.clone();

        if self.telemetry.log_event() {
            invocation.log().info(
                "Received event",
                json!({ "http_method": method, "path": path, "body_size": request.body_size() }),
            );
        }
        invocation.log().info(
            &format!("Processing {} request to {}", method, path),
            json!({ "http_method": method, "path": path }),
        );

        let endpoint = Endpoint::resolve(&request.method, &request.path);
        advance(&mut invocation, RequestState::Routed);

        let response = match endpoint {
            Endpoint::Unmatched => {
                advance(&mut invocation, RequestState::Completed);
                ApiResponse::not_found()
            }
            Endpoint::Write if !self.authorized(metadata) => {
                invocation.log().warn(
                    "Rejected request with missing or invalid API key",
                    json!({ "path": path, "key_present": metadata.api_key.is_some() }),
                );
                advance(&mut invocation, RequestState::Completed);
                ApiResponse::message(StatusCode::UNAUTHORIZED, "Unauthorized")
            }
            endpoint => {
                advance(&mut invocation, RequestState::Executing);
                self.execute(&mut invocation, endpoint, request.body).await
            }
        };

        let duration = invocation.elapsed();
        record_response(&mut invocation, endpoint, &method, &path, response.status_code, duration);
        invocation.log().info(
            "Request completed",
            json!({ "status_code": response.status_code, "duration_ms": round_ms(duration) }),
        );

        tracing::debug!(
            correlation_id = %invocation.context().correlation_id,
            method = %method,
            path = %path,
            status = response.status_code,
            status_class = status_class(response.status_code),
            state = ?invocation.state(),
            "Request routed"
        );

        invocation.finish(&self.telemetry);
        response
    }

    async fn execute(&self, invocation: &mut Invocation, endpoint: Endpoint, body: Option<Bytes>) -> ApiResponse {
        let trace = invocation.trace().clone();
        let handler = trace.open_segment(segment::HANDLER);

        let outcome = AssertUnwindSafe(self.dispatch(invocation, endpoint, body))
            .catch_unwind()
            .await;

        let (response, next) = match outcome {
            Ok(Ok(response)) => (response, RequestState::Completed),
            Ok(Err(err)) => (error_response(invocation, &err), RequestState::Failed),
            Err(payload) => {
                let report = ErrorReport::from_panic(payload.as_ref());
                handler.capture_panic(&report.error);
                invocation.log().report(
                    LogLevel::Error,
                    "Unhandled exception",
                    &report,
                    json!({ "error_type": "Panic" }),
                );
                (
                    ApiResponse::internal_error(&invocation.context().correlation_id),
                    RequestState::Failed,
                )
            }
        };

        handler.close();
        advance(invocation, next);
        response
    }

    async fn dispatch(
        &self,
        invocation: &mut Invocation,
        endpoint: Endpoint,
        body: Option<Bytes>,
    ) -> Result<ApiResponse, RequestError> {
        match endpoint {
            Endpoint::Write => self.handle_post(invocation, body).await,
            Endpoint::Health => Ok(self.handle_health(invocation).await),
            Endpoint::Unmatched => Ok(ApiResponse::not_found()),
        }
    }

    async fn handle_post(&self, invocation: &mut Invocation, body: Option<Bytes>) -> Result<ApiResponse, RequestError> {
        let trace = invocation.trace().clone();
        let trace = &trace;
        let table = self.writer.table_name();

        trace
            .scoped(segment::HANDLE_POST, |_| async move {
                invocation
                    .log_mut()
                    .append_keys(json!({ "table_name": table, "operation": "post_request" }));

                let has_payload = body.as_ref().is_some_and(|b| !b.is_empty());
                let item = match parse_item(body.as_deref()) {
                    Ok(item) => item,
                    Err(err) => {
                        invocation.log().exception(
                            LogLevel::Warn,
                            &err.to_string(),
                            &err,
                            json!({ "error_type": err.kind() }),
                        );
                        return Err(RequestError::from(err));
                    }
                };

                if has_payload {
                    invocation.log().info("Received payload", json!({ "item": item }));
                } else {
                    invocation.log().info(
                        "Received request without a payload, using defaults",
                        json!({ "item_id": item.id }),
                    );
                }

                invocation.log().info(
                    "Writing to DynamoDB",
                    json!({ "table_name": table, "operation": "put_item", "item_id": item.id }),
                );

                match self.writer.persist(item, trace).await {
                    Ok(outcome) => {
                        invocation.metrics_mut().latency(
                            metric::DYNAMODB_LATENCY,
                            outcome.latency,
                            &[("operation", "put_item".to_string()), ("table", table.to_string())],
                        );
                        invocation.log().info(
                            "DynamoDB write successful",
                            json!({
                                "operation": "put_item",
                                "duration_ms": round_ms(outcome.latency),
                                "item_id": outcome.item.id,
                            }),
                        );
                        Ok(ApiResponse::message(StatusCode::OK, "Successfully inserted data!"))
                    }
                    Err(err) => {
                        invocation.log().exception(
                            LogLevel::Error,
                            "DynamoDB write failed",
                            &err,
                            json!({ "operation": "put_item", "error_type": err.kind.as_str() }),
                        );
                        Err(RequestError::from(err))
                    }
                }
            })
            .await
    }

    async fn handle_health(&self, invocation: &mut Invocation) -> ApiResponse {
        let trace = invocation.trace().clone();
        let scope = trace.open_segment(segment::HANDLE_HEALTH);
        invocation.log().info("Performing health check", Value::Null);

        let result = self
            .checker
            .check_storage_health(self.writer.table_name(), self.health_timeout, &trace)
            .await;

        scope.put_annotation("healthy", result.is_healthy());
        if result.is_healthy() {
            invocation
                .log()
                .info("Health check passed", json!({ "latency_ms": result.latency_ms }));
        } else {
            invocation.log().error(
                "Health check failed",
                json!({ "error": result.error, "latency_ms": result.latency_ms }),
            );
        }
        scope.close();

        let report = HealthReport::from_result(&result);
        match serde_json::to_value(&report) {
            Ok(body) => ApiResponse::json(report.status_code(), body),
            Err(e) => {
                invocation
                    .log()
                    .error("Failed to encode health report", json!({ "error": e.to_string() }));
                ApiResponse::internal_error(&invocation.context().correlation_id)
            }
        }
    }
}

fn advance(invocation: &mut Invocation, next: RequestState) {
    if let Err(e) = invocation.advance(next) {
        tracing::error!(error = %e, "Request lifecycle violated");
    }
}

fn error_response(invocation: &Invocation, err: &RequestError) -> ApiResponse {
    match err {
        RequestError::Validation(e) => ApiResponse::json(
            err.status_code(),
            json!({ "message": e.to_string(), "correlation_id": invocation.context().correlation_id }),
        ),
        RequestError::Storage(_) => ApiResponse::message(err.status_code(), "Database operation failed"),
    }
}

/// Per-response metrics. A 503 from the health endpoint is a check result, not a
/// server error, and is only visible through latency.
fn record_response(
    invocation: &mut Invocation,
    endpoint: Endpoint,
    method: &str,
    path: &str,
    status: u16,
    duration: Duration,
) {
    let metrics = invocation.metrics_mut();
    metrics.latency(
        metric::REQUEST_LATENCY,
        duration,
        &[("endpoint", path.to_string()), ("method", method.to_string())],
    );

    match status {
        200..=299 => metrics.count(metric::SUCCESSFUL_REQUESTS, &[("endpoint", path.to_string())]),
        400..=499 => metrics.count(
            metric::CLIENT_ERRORS,
            &[("endpoint", path.to_string()), ("status_code", status.to_string())],
        ),
        503 if endpoint == Endpoint::Health => {}
        500..=599 => metrics.count(
            metric::SERVER_ERRORS,
            &[("endpoint", path.to_string()), ("status_code", status.to_string())],
        ),
        _ => {}
    }
}
