use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

use crate::services::storage::StorageFailure;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Config(_) | AppError::Server(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        // Don't expose internal error details
        let message = match &self {
            AppError::Unauthorized(_) => "Unauthorized".to_string(),
            _ => "Internal server error".to_string(),
        };

        (status, Json(json!({ "message": message }))).into_response()
    }
}

/// Client-caused failures detected before any storage call is made
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid JSON in request body")]
    InvalidJson { detail: String },

    #[error("Missing required field: '{0}'")]
    MissingField(String),

    #[error("Request body must be a JSON object")]
    NotAnObject,

    #[error("Invalid value for field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
}

impl ValidationError {
    /// Short machine-friendly name used in log records
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::InvalidJson { .. } => "InvalidJSON",
            ValidationError::MissingField(_) => "MissingField",
            ValidationError::NotAnObject => "NotAnObject",
            ValidationError::InvalidField { .. } => "InvalidField",
        }
    }
}

/// Classification of storage failures exposed to the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageErrorKind {
    Timeout,
    Throttling,
    AccessDenied,
    Unknown,
}

impl StorageErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageErrorKind::Timeout => "Timeout",
            StorageErrorKind::Throttling => "Throttling",
            StorageErrorKind::AccessDenied => "AccessDenied",
            StorageErrorKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed storage operation, classified. The source carries backend detail that is
/// logged server-side but never returned to the caller.
#[derive(Error, Debug)]
#[error("{operation} on table '{table}' failed: {kind}")]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub operation: &'static str,
    pub table: String,
    #[source]
    pub source: StorageFailure,
}

impl StorageError {
    pub fn new(operation: &'static str, table: impl Into<String>, source: StorageFailure) -> Self {
        Self {
            kind: source.kind,
            operation,
            table: table.into(),
            source,
        }
    }
}

/// Everything the data-writing path can fail with
#[derive(Error, Debug)]
pub enum RequestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RequestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RequestError::Validation(_) => StatusCode::BAD_REQUEST,
            RequestError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Render an error and its full `source()` chain, one cause per line
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> Vec<String> {
    let mut chain = vec![err.to_string()];
    let mut current = err.source();
    while let Some(cause) = current {
        chain.push(cause.to_string());
        current = cause.source();
    }
    chain
}
