use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::tracing::{Trace, names};
use crate::services::storage::{StorageBackend, StorageFailure};

/// Health status of a dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Why a check did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckFailure {
    Timeout,
    Unreachable,
}

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("DescribeTable timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("DescribeTable failed: {0}")]
    Unreachable(#[source] StorageFailure),
}

impl CheckError {
    pub fn failure(&self) -> CheckFailure {
        match self {
            CheckError::Timeout(_) => CheckFailure::Timeout,
            CheckError::Unreachable(_) => CheckFailure::Unreachable,
        }
    }
}

/// Outcome of one check. Computed fresh for every request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub latency_ms: f64,
    pub table_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub failure: Option<CheckFailure>,
}

impl HealthCheckResult {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Milliseconds rounded to two decimals
pub(crate) fn round_ms(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100_000.0).round() / 100.0
}

/// Checks storage availability with a single bounded describe call
#[derive(Clone)]
pub struct HealthChecker {
    storage: Arc<dyn StorageBackend>,
}

impl HealthChecker {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Describe `table_name` once, giving up after `timeout`. No retries.
    ///
    /// Timeouts and backend failures both report unhealthy; the distinction is kept in
    /// `failure` and in the error text.
    pub async fn check_storage_health(
        &self,
        table_name: &str,
        timeout: Duration,
        trace: &Trace,
    ) -> HealthCheckResult {
        let start = Instant::now();

        let check = trace
            .scoped(names::CHECK_DYNAMODB_HEALTH, |segment| async move {
                segment.put_annotation("table_name", table_name);
                trace
                    .scoped(names::DYNAMODB, |call| async move {
                        call.put_annotation("operation", "DescribeTable");
                        call.put_annotation("table_name", table_name);
                        match tokio::time::timeout(timeout, self.storage.describe_table(table_name))
                            .await
                        {
                            Ok(Ok(())) => Ok(()),
                            Ok(Err(failure)) => Err(CheckError::Unreachable(failure)),
                            Err(_) => Err(CheckError::Timeout(timeout)),
                        }
                    })
                    .await
            })
            .await;

        let latency_ms = round_ms(start.elapsed());

        match check {
            Ok(()) => HealthCheckResult {
                status: HealthStatus::Healthy,
                latency_ms,
                table_name: table_name.to_string(),
                error: None,
                failure: None,
            },
            Err(e) => {
                tracing::warn!(
                    table_name = %table_name,
                    backend = self.storage.name(),
                    error = %e,
                    "Storage health check failed"
                );
                HealthCheckResult {
                    status: HealthStatus::Unhealthy,
                    latency_ms,
                    table_name: table_name.to_string(),
                    error: Some(e.to_string()),
                    failure: Some(e.failure()),
                }
            }
        }
    }
}
