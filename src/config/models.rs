use std::time::Duration;

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::observability::logging::LogLevel;

#[derive(Debug, Clone, Deserialize, Serialize, Validate, Default)]
pub struct AppConfig {
    #[garde(dive)]
    #[serde(default)]
    pub server: ServerConfig,

    #[garde(dive)]
    #[serde(default)]
    pub service: ServiceConfig,

    #[garde(dive)]
    #[serde(default)]
    pub logging: LoggingConfig,

    #[garde(dive)]
    #[serde(default)]
    pub metrics: MetricsConfig,

    #[garde(skip)]
    #[serde(default)]
    pub tracing: TracingConfig,

    #[garde(dive)]
    #[serde(default)]
    pub storage: StorageConfig,

    #[garde(dive)]
    #[serde(default)]
    pub health: HealthConfig,

    #[garde(skip)]
    #[serde(default)]
    pub auth: AuthConfig,

    #[garde(skip)]
    #[serde(default)]
    pub environment: Environment,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServerConfig {
    #[garde(range(min = 1024, max = 65535))]
    pub port: u16,

    #[garde(length(min = 1), custom(validate_bind_address))]
    #[serde(default = "default_bind")]
    pub bind: String,

    #[garde(range(min = 1, max = 300))]
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64, // seconds
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            bind: default_bind(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Identity stamped on every log record, metric and trace
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServiceConfig {
    #[garde(length(min = 1, max = 128))]
    #[serde(default = "default_service_name")]
    pub name: String,

    #[garde(length(min = 1, max = 128))]
    #[serde(default = "default_function_name")]
    pub function_name: String,
}

fn default_service_name() -> String {
    "serverless-api".to_string()
}

fn default_function_name() -> String {
    "apigw-handler".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            function_name: default_function_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LoggingConfig {
    #[garde(custom(validate_log_level))]
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Format of the process log written to stderr
    #[garde(pattern(r"^(json|pretty)$"))]
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log the inbound request at INFO when an invocation starts
    #[garde(skip)]
    #[serde(default)]
    pub log_event: bool,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_event: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct MetricsConfig {
    #[garde(length(min = 1, max = 255))]
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[garde(skip)]
    #[serde(default = "default_true")]
    pub capture_cold_start: bool,

    /// Also expose flushed metrics on a Prometheus listener at this port
    #[garde(skip)]
    #[serde(default)]
    pub prometheus_port: Option<u16>,
}

fn default_namespace() -> String {
    "ServerlessApp".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            capture_cold_start: true,
            prometheus_port: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TracingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    #[default]
    Memory,
    Dynamodb,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct StorageConfig {
    #[garde(skip)]
    #[serde(default)]
    pub backend: StorageBackendKind,

    #[garde(length(min = 3, max = 255))]
    #[serde(default = "default_table_name")]
    pub table_name: String,

    #[garde(range(min = 1, max = 60000))]
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    #[garde(skip)]
    #[serde(default)]
    pub region: Option<String>,

    #[garde(skip)]
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_table_name() -> String {
    "movies".to_string()
}

fn default_write_timeout_ms() -> u64 {
    3000
}

impl StorageConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::default(),
            table_name: default_table_name(),
            write_timeout_ms: default_write_timeout_ms(),
            region: None,
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct HealthConfig {
    #[garde(range(min = 1, max = 30000))]
    #[serde(default = "default_health_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_health_timeout_ms() -> u64 {
    2000
}

impl HealthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_health_timeout_ms(),
        }
    }
}

/// Optional shared-secret check on the data route. `/health` is never authenticated.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    #[default]
    Production,
}

fn validate_log_level(value: &str, _: &()) -> garde::Result {
    value
        .parse::<LogLevel>()
        .map(|_| ())
        .map_err(|e| garde::Error::new(e.to_string()))
}

fn validate_bind_address(value: &str, _: &()) -> garde::Result {
    value
        .parse::<std::net::IpAddr>()
        .map(|_| ())
        .map_err(|_| garde::Error::new("Invalid IP address"))
}
