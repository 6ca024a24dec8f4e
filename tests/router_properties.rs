use std::collections::HashSet;
use std::sync::Arc;

use axum::http::Method;
use proptest::prelude::*;
use tokio_test::block_on;

use serverless_api::config::AppConfig;
use serverless_api::observability::metrics::names;
use serverless_api::observability::{MemorySink, MetricsSink, RequestMetadata, Telemetry};
use serverless_api::services::MemoryStorage;
use serverless_api::{ApiRequest, RequestRouter};

async fn router() -> (RequestRouter, Arc<MemorySink>) {
    let config = AppConfig::default();
    let sink = Arc::new(MemorySink::new());
    let sinks: Vec<Arc<dyn MetricsSink>> = vec![sink.clone()];
    let telemetry = Arc::new(Telemetry::new(&config, sink.clone(), sinks, sink.clone()));
    let storage = MemoryStorage::with_table(&config.storage.table_name).await;
    (RequestRouter::new(telemetry, Arc::new(storage), &config), sink)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn arbitrary_bodies_get_a_definite_answer(body in proptest::collection::vec(any::<u8>(), 0..256)) {
        let (router, sink) = block_on(router());

        let request = ApiRequest::new(Method::POST, "/").with_body(body);
        let response = block_on(router.route(&RequestMetadata::default(), request));

        prop_assert!(matches!(response.status_code, 200 | 400));
        prop_assert_eq!(sink.batches().len(), 1);

        let records = sink.records();
        prop_assert_eq!(records.iter().filter(|r| r.name == names::REQUEST_LATENCY).count(), 1);
        prop_assert!(records.iter().all(|r| r.name != names::SERVER_ERRORS));

        let ids: HashSet<String> = sink.logs().into_iter().map(|l| l.correlation_id).collect();
        prop_assert_eq!(ids.len(), 1);
    }

    #[test]
    fn unrouted_paths_are_not_found(path in "/[a-z0-9/_-]{1,24}") {
        prop_assume!(path != "/health");
        let (router, sink) = block_on(router());

        for method in [Method::GET, Method::POST, Method::DELETE] {
            let response = block_on(router.route(&RequestMetadata::default(), ApiRequest::new(method, path.clone())));
            prop_assert_eq!(response.status_code, 404);
        }

        let client_errors = sink.records().into_iter().filter(|r| r.name == names::CLIENT_ERRORS).count();
        prop_assert_eq!(client_errors, 3);
        prop_assert!(sink.traces().iter().all(|t| t.subsegments.is_empty()));
    }

    #[test]
    fn request_id_is_the_correlation_id(id in "[A-Za-z0-9-]{1,36}") {
        let (router, sink) = block_on(router());

        let metadata = RequestMetadata::default().with_request_id(id.clone());
        let request = ApiRequest::new(Method::POST, "/").with_body("not json");
        let response = block_on(router.route(&metadata, request));

        prop_assert_eq!(response.status_code, 400);
        prop_assert_eq!(response.body["correlation_id"].as_str(), Some(id.as_str()));
        prop_assert!(sink.logs().iter().all(|l| l.correlation_id == id));
    }
}
