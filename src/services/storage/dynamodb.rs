use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;

use super::{Item, StorageBackend, StorageFailure};
use crate::config::StorageConfig;
use crate::error::StorageErrorKind;

/// Create a DynamoDB client from the default AWS provider chain, with optional region
/// and endpoint overrides (useful for LocalStack or DynamoDB Local)
pub async fn create_client(config: &StorageConfig) -> Client {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = &config.region {
        loader = loader.region(Region::new(region.clone()));
    }
    let shared = loader.load().await;

    let mut builder = aws_sdk_dynamodb::config::Builder::from(&shared);
    if let Some(endpoint) = &config.endpoint {
        builder = builder.endpoint_url(endpoint);
    }

    tracing::info!(
        region = config.region.as_deref().unwrap_or("default"),
        endpoint = config.endpoint.as_deref().unwrap_or("default"),
        "DynamoDB client created"
    );
    Client::from_conf(builder.build())
}

pub struct DynamoDbStorage {
    client: Client,
}

impl DynamoDbStorage {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn from_config(config: &StorageConfig) -> Self {
        Self::new(create_client(config).await)
    }
}

#[async_trait]
impl StorageBackend for DynamoDbStorage {
    fn name(&self) -> &'static str {
        "dynamodb"
    }

    async fn put_item(&self, table: &str, item: &Item) -> Result<(), StorageFailure> {
        self.client
            .put_item()
            .table_name(table)
            .item("year", AttributeValue::N(item.year.clone()))
            .item("title", AttributeValue::S(item.title.clone()))
            .item("id", AttributeValue::S(item.id.clone()))
            .send()
            .await
            .map(|_| ())
            .map_err(|err| classify(&err))
    }

    async fn describe_table(&self, table: &str) -> Result<(), StorageFailure> {
        self.client
            .describe_table()
            .table_name(table)
            .send()
            .await
            .map(|_| ())
            .map_err(|err| classify(&err))
    }
}

fn classify<E, R>(err: &SdkError<E, R>) -> StorageFailure
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let kind = match err {
        SdkError::TimeoutError(_) => StorageErrorKind::Timeout,
        SdkError::DispatchFailure(failure) if failure.is_timeout() => StorageErrorKind::Timeout,
        _ => kind_from_code(err.code()),
    };
    StorageFailure::new(kind, DisplayErrorContext(err).to_string())
}

fn kind_from_code(code: Option<&str>) -> StorageErrorKind {
    match code {
        Some(
            "ProvisionedThroughputExceededException"
            | "ThrottlingException"
            | "RequestLimitExceeded",
        ) => StorageErrorKind::Throttling,
        Some("AccessDeniedException" | "UnrecognizedClientException") => {
            StorageErrorKind::AccessDenied
        }
        _ => StorageErrorKind::Unknown,
    }
}
