//! Key-value storage backends
//!
//! The request pipeline only depends on the [`StorageBackend`] contract: a single-item
//! write and a lightweight describe check. Timeouts are applied by the caller, so an
//! implementation may block for as long as its transport allows.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::StorageErrorKind;

pub mod memory;

#[cfg(feature = "dynamodb")]
pub mod dynamodb;

pub use memory::MemoryStorage;

/// Attribute names every stored item must carry
pub const REQUIRED_FIELDS: [&str; 3] = ["year", "title", "id"];

/// A movie record as persisted in the table
///
/// `year` holds canonical numeric text and is stored as a number attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub year: String,
    pub title: String,
    pub id: String,
}

/// Backend-level failure. The message may contain internal detail (ARNs, endpoints) and
/// must only ever reach server-side logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StorageFailure {
    pub kind: StorageErrorKind,
    pub message: String,
}

impl StorageFailure {
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(operation: &str, after: std::time::Duration) -> Self {
        Self::new(
            StorageErrorKind::Timeout,
            format!("{} did not complete within {}ms", operation, after.as_millis()),
        )
    }
}

/// Storage operations consumed by the data writer and the health checker
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Persist one item, replacing any existing item with the same id
    async fn put_item(&self, table: &str, item: &Item) -> Result<(), StorageFailure>;

    /// Non-mutating existence check for a table
    async fn describe_table(&self, table: &str) -> Result<(), StorageFailure>;
}
