use axum::http::StatusCode;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use super::checker::{HealthCheckResult, HealthStatus};

/// Health endpoint response body
///
/// ```json
/// {"status":"healthy","timestamp":"2024-05-01T12:00:00.000Z",
///  "checks":{"dynamodb":{"status":"healthy","latency_ms":3.1,"table_name":"movies"}},
///  "version":"1.0.0"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: String,
    pub checks: HealthChecks,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthChecks {
    pub dynamodb: DependencyCheck,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyCheck {
    pub status: HealthStatus,
    pub latency_ms: f64,
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    pub fn from_result(result: &HealthCheckResult) -> Self {
        Self {
            status: result.status,
            timestamp: chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            checks: HealthChecks {
                dynamodb: DependencyCheck {
                    status: result.status,
                    latency_ms: result.latency_ms,
                    table_name: result.table_name.clone(),
                    error: result.error.clone(),
                },
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// 200 when healthy, 503 otherwise
    pub fn status_code(&self) -> StatusCode {
        match self.status {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}
