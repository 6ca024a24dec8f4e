use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Item, StorageBackend, StorageFailure};
use crate::error::StorageErrorKind;

/// In-memory table store with fault injection
///
/// Used as the default backend for local runs and as the test double for the
/// request pipeline. Cloning shares the underlying tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<RwLock<HashMap<String, HashMap<String, Item>>>>,
    faults: Arc<RwLock<Faults>>,
}

#[derive(Debug, Default)]
struct Faults {
    write_failure: Option<StorageFailure>,
    describe_failure: Option<StorageFailure>,
    latency: Option<Duration>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already contains the given (empty) table
    pub async fn with_table(table: &str) -> Self {
        let storage = Self::new();
        storage.create_table(table).await;
        storage
    }

    pub async fn create_table(&self, table: &str) {
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default();
    }

    pub async fn drop_table(&self, table: &str) {
        self.tables.write().await.remove(table);
    }

    /// Make every subsequent write fail with the given classification
    pub async fn fail_writes(&self, kind: StorageErrorKind, message: &str) {
        self.faults.write().await.write_failure = Some(StorageFailure::new(kind, message));
    }

    /// Make every subsequent describe check fail with the given classification
    pub async fn fail_describe(&self, kind: StorageErrorKind, message: &str) {
        self.faults.write().await.describe_failure = Some(StorageFailure::new(kind, message));
    }

    /// Delay every operation, used to exercise caller-side timeouts
    pub async fn set_latency(&self, latency: Duration) {
        self.faults.write().await.latency = Some(latency);
    }

    pub async fn clear_faults(&self) {
        *self.faults.write().await = Faults::default();
    }

    pub async fn get_item(&self, table: &str, id: &str) -> Option<Item> {
        self.tables
            .read()
            .await
            .get(table)
            .and_then(|items| items.get(id))
            .cloned()
    }

    pub async fn item_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map(|items| items.len())
            .unwrap_or(0)
    }

    async fn simulate_latency(&self) {
        let latency = self.faults.read().await.latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn table_not_found(table: &str) -> StorageFailure {
        StorageFailure::new(
            StorageErrorKind::Unknown,
            format!("Requested resource not found: Table: {} not found", table),
        )
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put_item(&self, table: &str, item: &Item) -> Result<(), StorageFailure> {
        self.simulate_latency().await;

        if let Some(failure) = self.faults.read().await.write_failure.clone() {
            return Err(failure);
        }

        let mut tables = self.tables.write().await;
        let items = tables
            .get_mut(table)
            .ok_or_else(|| Self::table_not_found(table))?;
        items.insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn describe_table(&self, table: &str) -> Result<(), StorageFailure> {
        self.simulate_latency().await;

        if let Some(failure) = self.faults.read().await.describe_failure.clone() {
            return Err(failure);
        }

        if self.tables.read().await.contains_key(table) {
            Ok(())
        } else {
            Err(Self::table_not_found(table))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> Item {
        Item {
            year: "2024".to_string(),
            title: "Test Movie".to_string(),
            id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_put_and_get_item() {
        let storage = MemoryStorage::with_table("movies").await;
        storage.put_item("movies", &item("a")).await.unwrap();

        assert_eq!(storage.get_item("movies", "a").await, Some(item("a")));
        assert_eq!(storage.item_count("movies").await, 1);
    }

    #[tokio::test]
    async fn test_put_replaces_existing_id() {
        let storage = MemoryStorage::with_table("movies").await;
        storage.put_item("movies", &item("a")).await.unwrap();

        let mut updated = item("a");
        updated.title = "Sequel".to_string();
        storage.put_item("movies", &updated).await.unwrap();

        assert_eq!(storage.item_count("movies").await, 1);
        assert_eq!(storage.get_item("movies", "a").await.unwrap().title, "Sequel");
    }

    #[tokio::test]
    async fn test_missing_table_fails() {
        let storage = MemoryStorage::new();
        let err = storage.put_item("movies", &item("a")).await.unwrap_err();
        assert_eq!(err.kind, StorageErrorKind::Unknown);
        assert!(storage.describe_table("movies").await.is_err());
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let storage = MemoryStorage::with_table("movies").await;
        storage.fail_writes(StorageErrorKind::Throttling, "slow down").await;
        storage.fail_describe(StorageErrorKind::AccessDenied, "denied").await;

        let err = storage.put_item("movies", &item("a")).await.unwrap_err();
        assert_eq!(err.kind, StorageErrorKind::Throttling);
        let err = storage.describe_table("movies").await.unwrap_err();
        assert_eq!(err.kind, StorageErrorKind::AccessDenied);

        storage.clear_faults().await;
        assert!(storage.describe_table("movies").await.is_ok());
    }

    #[tokio::test]
    async fn test_clones_share_tables() {
        let storage = MemoryStorage::with_table("movies").await;
        let clone = storage.clone();
        clone.put_item("movies", &item("shared")).await.unwrap();
        assert!(storage.get_item("movies", "shared").await.is_some());
    }
}
