use axum::{extract::Request, middleware::Next, response::Response};
use tracing::Instrument;

/// Wrap each request in an `http_request` span for the process log
pub async fn request_span(req: Request, next: Next) -> Response {
    let span = tracing::info_span!(
        "http_request",
        method = %req.method(),
        path = %req.uri().path(),
        user_agent = req
            .headers()
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
    );
    next.run(req).instrument(span).await
}
