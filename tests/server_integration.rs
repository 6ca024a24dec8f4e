use anyhow::Result;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use serverless_api::config::AppConfig;
use serverless_api::observability::metrics::names;
use serverless_api::observability::{MemorySink, MetricsSink, Telemetry};
use serverless_api::server::{AppState, create_router, start_server};
use serverless_api::services::MemoryStorage;
use serverless_api::RequestRouter;

struct TestServer {
    base: String,
    storage: MemoryStorage,
    sink: Arc<MemorySink>,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn spawn_server(config: AppConfig) -> Result<TestServer> {
    let sink = Arc::new(MemorySink::new());
    let sinks: Vec<Arc<dyn MetricsSink>> = vec![sink.clone()];
    let telemetry = Arc::new(Telemetry::new(&config, sink.clone(), sinks, sink.clone()));
    let storage = MemoryStorage::with_table(&config.storage.table_name).await;
    let router = Arc::new(RequestRouter::new(telemetry, Arc::new(storage.clone()), &config));
    let app = create_router(AppState::new(router));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let base = format!("http://{}", listener.local_addr()?);
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Ok(TestServer {
        base,
        storage,
        sink,
        handle,
    })
}

fn count(sink: &MemorySink, name: &str) -> usize {
    sink.records().iter().filter(|r| r.name == name).count()
}

/// Test that a valid item is written and acknowledged
#[tokio::test]
async fn test_post_writes_item() -> Result<()> {
    let server = spawn_server(AppConfig::default()).await?;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/", server.base))
        .header("content-type", "application/json")
        .header("x-amzn-requestid", "it-req-1")
        .body(r#"{"year":"2024","title":"Movie Title","id":"movie-1"}"#)
        .send()
        .await?;

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    let body: Value = response.json().await?;
    assert_eq!(body, json!({"message": "Successfully inserted data!"}));

    let stored = server.storage.get_item("movies", "movie-1").await.unwrap();
    assert_eq!(stored.year, "2024");
    assert_eq!(count(&server.sink, names::SUCCESSFUL_REQUESTS), 1);
    assert!(server.sink.logs().iter().all(|l| l.correlation_id == "it-req-1"));
    Ok(())
}

/// Test that an empty POST stores the default movie
#[tokio::test]
async fn test_post_without_body_uses_defaults() -> Result<()> {
    let server = spawn_server(AppConfig::default()).await?;

    let response = reqwest::Client::new()
        .post(format!("{}/", server.base))
        .send()
        .await?;

    assert_eq!(response.status(), 200);
    assert_eq!(server.storage.item_count("movies").await, 1);
    Ok(())
}

/// Test that malformed JSON gets a 400 carrying the correlation id
#[tokio::test]
async fn test_invalid_json_is_rejected() -> Result<()> {
    let server = spawn_server(AppConfig::default()).await?;

    let response = reqwest::Client::new()
        .post(format!("{}/", server.base))
        .header("x-request-id", "it-req-2")
        .body("invalid json")
        .send()
        .await?;

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await?;
    assert_eq!(body["message"], "Invalid JSON in request body");
    assert_eq!(body["correlation_id"], "it-req-2");
    assert_eq!(server.storage.item_count("movies").await, 0);
    assert_eq!(count(&server.sink, names::CLIENT_ERRORS), 1);
    Ok(())
}

/// Test the health endpoint in both states
#[tokio::test]
async fn test_health_reports_storage_state() -> Result<()> {
    let server = spawn_server(AppConfig::default()).await?;
    let client = reqwest::Client::new();

    let healthy = client.get(format!("{}/health", server.base)).send().await?;
    assert_eq!(healthy.status(), 200);
    let body: Value = healthy.json().await?;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["dynamodb"]["status"], "healthy");
    assert!(body["timestamp"].is_string());

    server.storage.drop_table("movies").await;
    let unhealthy = client.get(format!("{}/health", server.base)).send().await?;
    assert_eq!(unhealthy.status(), 503);
    let body: Value = unhealthy.json().await?;
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(count(&server.sink, names::SERVER_ERRORS), 0);
    Ok(())
}

/// Test that unknown routes get a JSON 404 counted once as a client error
#[tokio::test]
async fn test_unknown_route_is_not_found() -> Result<()> {
    let server = spawn_server(AppConfig::default()).await?;

    let response = reqwest::Client::new()
        .put(format!("{}/movies/1", server.base))
        .send()
        .await?;

    assert_eq!(response.status(), 404);
    let body: Value = response.json().await?;
    assert_eq!(body, json!({"message": "Not Found"}));
    assert_eq!(count(&server.sink, names::CLIENT_ERRORS), 1);
    Ok(())
}

/// Test that the API key guards writes but never the health check
#[tokio::test]
async fn test_api_key_required_for_writes() -> Result<()> {
    let mut config = AppConfig::default();
    config.auth.api_key = Some("s3cret".to_string());
    let server = spawn_server(config).await?;
    let client = reqwest::Client::new();

    let denied = client.post(format!("{}/", server.base)).send().await?;
    assert_eq!(denied.status(), 401);
    let body: Value = denied.json().await?;
    assert_eq!(body, json!({"message": "Unauthorized"}));
    assert_eq!(server.storage.item_count("movies").await, 0);
    assert_eq!(count(&server.sink, names::CLIENT_ERRORS), 1);
    assert_eq!(count(&server.sink, names::REQUEST_LATENCY), 1);

    let allowed = client
        .post(format!("{}/", server.base))
        .header("x-api-key", "s3cret")
        .send()
        .await?;
    assert_eq!(allowed.status(), 200);

    let health = client.get(format!("{}/health", server.base)).send().await?;
    assert_eq!(health.status(), 200);

    let root = client.get(format!("{}/", server.base)).send().await?;
    assert_eq!(root.status(), 404);
    Ok(())
}

/// Test that start_server binds to the configured port and serves requests
#[tokio::test]
async fn test_server_starts_and_binds() -> Result<()> {
    // Find an available port
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);

    let mut config = AppConfig::default();
    config.server.bind = "127.0.0.1".to_string();
    config.server.port = port;

    let sink = Arc::new(MemorySink::new());
    let sinks: Vec<Arc<dyn MetricsSink>> = vec![sink.clone()];
    let telemetry = Arc::new(Telemetry::new(&config, sink.clone(), sinks, sink.clone()));

    let server_handle = tokio::spawn(start_server(config, telemetry));

    // Give server time to start
    tokio::time::sleep(Duration::from_millis(200)).await;

    let response = timeout(
        Duration::from_secs(5),
        reqwest::Client::new()
            .get(format!("http://127.0.0.1:{}/health", port))
            .send(),
    )
    .await??;
    assert_eq!(response.status(), 200);
    assert!(!sink.logs().is_empty());

    server_handle.abort();
    Ok(())
}
