use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use uuid::Uuid;

use crate::error::{RequestError, StorageError, ValidationError};
use crate::observability::tracing::{Trace, names};
use crate::services::storage::{Item, REQUIRED_FIELDS, StorageBackend, StorageFailure};

pub const DEFAULT_YEAR: &str = "2012";
pub const DEFAULT_TITLE: &str = "The Amazing Spider-Man 2";

/// A persisted item and how long the storage call took
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub item: Item,
    pub latency: Duration,
}

/// Item used when a request carries no body
pub fn default_item() -> Item {
    Item {
        year: DEFAULT_YEAR.to_string(),
        title: DEFAULT_TITLE.to_string(),
        id: Uuid::new_v4().to_string(),
    }
}

/// Validate a request body into an [`Item`]
///
/// An absent or empty body yields [`default_item`]. Otherwise the body must be a JSON
/// object carrying non-null `year`, `title` and `id`; `year` must be numeric (a number
/// or numeric text). Other field types are stringified.
pub fn parse_item(body: Option<&[u8]>) -> Result<Item, ValidationError> {
    let body = match body {
        Some(body) if !body.is_empty() => body,
        _ => return Ok(default_item()),
    };

    let value: Value = serde_json::from_slice(body).map_err(|e| ValidationError::InvalidJson {
        detail: e.to_string(),
    })?;
    let Value::Object(fields) = value else {
        return Err(ValidationError::NotAnObject);
    };

    for field in REQUIRED_FIELDS {
        match fields.get(field) {
            None | Some(Value::Null) => return Err(ValidationError::MissingField(field.to_string())),
            Some(_) => {}
        }
    }

    Ok(Item {
        year: numeric_text("year", &fields["year"])?,
        title: text(&fields["title"]),
        id: text(&fields["id"]),
    })
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn numeric_text(field: &str, value: &Value) -> Result<String, ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidField {
        field: field.to_string(),
        reason: reason.to_string(),
    };

    match value {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => {
            let trimmed = s.trim();
            match trimmed.parse::<f64>() {
                Ok(parsed) if parsed.is_finite() => Ok(trimmed.to_string()),
                _ => Err(invalid("expected a number")),
            }
        }
        _ => Err(invalid("expected a number")),
    }
}

/// Persists items to the configured table
#[derive(Clone)]
pub struct DataWriter {
    storage: Arc<dyn StorageBackend>,
    table_name: String,
    write_timeout: Duration,
}

impl DataWriter {
    pub fn new(storage: Arc<dyn StorageBackend>, table_name: impl Into<String>, write_timeout: Duration) -> Self {
        Self {
            storage,
            table_name: table_name.into(),
            write_timeout,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Validate `body` and persist the resulting item
    pub async fn write(&self, body: Option<&[u8]>, trace: &Trace) -> Result<WriteOutcome, RequestError> {
        let item = parse_item(body)?;
        Ok(self.persist(item, trace).await?)
    }

    /// Store an already validated item within the write timeout
    ///
    /// Runs under `## write_to_dynamodb` with a nested `DynamoDB` call segment.
    pub async fn persist(&self, item: Item, trace: &Trace) -> Result<WriteOutcome, StorageError> {
        let table = self.table_name.as_str();

        trace
            .scoped(names::WRITE_TO_DYNAMODB, |segment| async move {
                segment.put_annotation("table_name", table);
                segment.put_annotation("operation", "put_item");
                segment.put_metadata("item_id", Value::from(item.id.clone()));

                let start = Instant::now();
                let stored: Result<(), StorageError> = trace
                    .scoped(names::DYNAMODB, |call| {
                        let item = &item;
                        async move {
                            call.put_annotation("operation", "PutItem");
                            call.put_annotation("table_name", table);
                            let result = match tokio::time::timeout(
                                self.write_timeout,
                                self.storage.put_item(table, item),
                            )
                            .await
                            {
                                Ok(result) => result,
                                Err(_) => Err(StorageFailure::timeout("put_item", self.write_timeout)),
                            };
                            result.map_err(|failure| StorageError::new("put_item", table, failure))
                        }
                    })
                    .await;

                stored.map(|()| WriteOutcome {
                    latency: start.elapsed(),
                    item,
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageErrorKind;
    use crate::observability::context::{CorrelationContext, RequestMetadata};
    use crate::services::storage::MemoryStorage;

    fn body(text: &str) -> Option<&[u8]> {
        Some(text.as_bytes())
    }

    #[test]
    fn test_absent_or_empty_body_uses_default_item() {
        for body in [None, Some(&b""[..])] {
            let item = parse_item(body).unwrap();
            assert_eq!(item.year, "2012");
            assert_eq!(item.title, "The Amazing Spider-Man 2");
            assert!(Uuid::parse_str(&item.id).is_ok());
        }
    }

    #[test]
    fn test_default_ids_are_unique() {
        assert_ne!(default_item().id, default_item().id);
    }

    #[test]
    fn test_valid_body_is_parsed() {
        let item = parse_item(body(r#"{"year":"2024","title":"Movie Title","id":"x"}"#)).unwrap();
        assert_eq!(
            item,
            Item {
                year: "2024".to_string(),
                title: "Movie Title".to_string(),
                id: "x".to_string(),
            }
        );
    }

    #[test]
    fn test_numeric_year_and_non_string_fields() {
        let item = parse_item(body(r#"{"year":1999,"title":42,"id":7,"extra":true}"#)).unwrap();
        assert_eq!(item.year, "1999");
        assert_eq!(item.title, "42");
        assert_eq!(item.id, "7");
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        let err = parse_item(body("invalid json")).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidJson { .. }));
        assert_eq!(err.to_string(), "Invalid JSON in request body");
    }

    #[test]
    fn test_missing_or_null_field_is_rejected() {
        let err = parse_item(body(r#"{"year":"2024","title":"t"}"#)).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("id".to_string()));

        let err = parse_item(body(r#"{"year":null,"title":"t","id":"x"}"#)).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("year".to_string()));
    }

    #[test]
    fn test_non_object_body_is_rejected() {
        assert_eq!(parse_item(body("[1,2]")).unwrap_err(), ValidationError::NotAnObject);
        assert_eq!(parse_item(body("\"text\"")).unwrap_err(), ValidationError::NotAnObject);
    }

    #[test]
    fn test_non_numeric_year_is_rejected() {
        let err = parse_item(body(r#"{"year":"last year","title":"t","id":"x"}"#)).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { ref field, .. } if field == "year"));

        let err = parse_item(body(r#"{"year":true,"title":"t","id":"x"}"#)).unwrap_err();
        assert_eq!(err.kind(), "InvalidField");
    }

    #[tokio::test]
    async fn test_write_persists_item() {
        let storage = MemoryStorage::with_table("movies").await;
        let writer = DataWriter::new(Arc::new(storage.clone()), "movies", Duration::from_secs(1));

        let outcome = writer
            .write(body(r#"{"year":"2024","title":"Movie","id":"m-1"}"#), &Trace::inert())
            .await
            .unwrap();

        assert_eq!(outcome.item.id, "m-1");
        assert_eq!(storage.get_item("movies", "m-1").await, Some(outcome.item));
    }

    #[tokio::test]
    async fn test_validation_failure_never_reaches_storage() {
        let storage = MemoryStorage::with_table("movies").await;
        let writer = DataWriter::new(Arc::new(storage.clone()), "movies", Duration::from_secs(1));

        let err = writer.write(body("{"), &Trace::inert()).await.unwrap_err();

        assert!(matches!(err, RequestError::Validation(_)));
        assert_eq!(storage.item_count("movies").await, 0);
    }

    #[tokio::test]
    async fn test_storage_failure_is_classified() {
        let storage = MemoryStorage::with_table("movies").await;
        storage
            .fail_writes(StorageErrorKind::Throttling, "ProvisionedThroughputExceededException")
            .await;
        let writer = DataWriter::new(Arc::new(storage), "movies", Duration::from_secs(1));

        let err = writer.persist(default_item(), &Trace::inert()).await.unwrap_err();

        assert_eq!(err.kind, StorageErrorKind::Throttling);
        assert_eq!(err.operation, "put_item");
        assert_eq!(err.table, "movies");
        assert!(!err.to_string().contains("ProvisionedThroughputExceededException"));
    }

    #[tokio::test]
    async fn test_slow_write_times_out() {
        let storage = MemoryStorage::with_table("movies").await;
        storage.set_latency(Duration::from_millis(500)).await;
        let writer = DataWriter::new(Arc::new(storage), "movies", Duration::from_millis(20));

        let err = writer.persist(default_item(), &Trace::inert()).await.unwrap_err();

        assert_eq!(err.kind, StorageErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_write_segments_nest_and_capture_errors() {
        let storage = MemoryStorage::new();
        let writer = DataWriter::new(Arc::new(storage), "movies", Duration::from_secs(1));
        let metadata = RequestMetadata::default().with_trace_header("Root=1-66a0b1c2-0123456789abcdef01234567");
        let ctx = CorrelationContext::begin(&metadata, false, "fn", true);
        let (trace, root) = Trace::begin(&ctx, "fn");

        let item = default_item();
        let id = item.id.clone();
        assert!(writer.persist(item, &trace).await.is_err());
        drop(root);

        let tree = trace.finish().unwrap();
        let write = tree.find(names::WRITE_TO_DYNAMODB).unwrap();
        assert_eq!(write.annotations["table_name"], "movies");
        assert_eq!(write.annotations["operation"], "put_item");
        assert_eq!(write.metadata["item_id"], id.as_str());
        assert!(write.error);

        let call = write.find(names::DYNAMODB).unwrap();
        assert_eq!(call.annotations["operation"], "PutItem");
        assert!(call.error);
        assert!(call.metadata["exception"]["message"]
            .as_str()
            .unwrap()
            .contains("put_item on table 'movies' failed"));
        assert_eq!(tree.count(names::DYNAMODB), 1);
    }
}
