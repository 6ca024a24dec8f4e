use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, Uri},
    middleware,
    routing::any,
};
use tower_http::trace::TraceLayer;

use crate::middleware::request_span;
use crate::observability::context::RequestMetadata;
use crate::router::{ApiRequest, ApiResponse, RequestRouter};

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<RequestRouter>,
}

impl AppState {
    pub fn new(router: Arc<RequestRouter>) -> Self {
        Self { router }
    }
}

/// Build the HTTP surface
///
/// Every path is handed to [`RequestRouter::route`], which decides between the write
/// endpoint, the health endpoint and 404, and checks the API key for writes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", any(invoke))
        .route("/health", any(invoke))
        .fallback(invoke)
        .layer(middleware::from_fn(request_span))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn invoke(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResponse {
    let metadata = RequestMetadata::from_headers(&headers);
    let mut request = ApiRequest::new(method, uri.path());
    if !body.is_empty() {
        request = request.with_body(body);
    }
    state.router.route(&metadata, request).await
}
