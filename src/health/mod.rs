//! Dependency health probing for the `/health` endpoint

pub mod checker;
pub mod report;

pub use checker::{HealthCheckResult, HealthChecker, HealthStatus, CheckError, CheckFailure};
pub use report::{DependencyCheck, HealthChecks, HealthReport};
