//! Per-invocation correlation context
//!
//! Every record emitted while handling one request (log entry, metric, trace segment)
//! carries the identifiers derived here. The context is created once when an invocation
//! starts and is read-only afterwards.

use std::sync::atomic::{AtomicBool, Ordering};

use axum::http::HeaderMap;
use rand::Rng;
use uuid::Uuid;

/// Headers carrying the platform request id, in order of preference
pub const REQUEST_ID_HEADERS: [&str; 2] = ["x-amzn-requestid", "x-request-id"];

/// Header carrying the client API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Trace propagation header
pub const TRACE_HEADER: &str = "x-amzn-trace-id";

/// Environment variable the function runtime sets with the active trace header
pub const TRACE_ENV: &str = "_X_AMZN_TRACE_ID";

/// Platform-provided side channel an invocation is started from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMetadata {
    pub request_id: Option<String>,
    pub trace_header: Option<String>,
    /// Client key as sent, compared by the router when a key is configured
    pub api_key: Option<String>,
}

impl RequestMetadata {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        Self {
            request_id: REQUEST_ID_HEADERS.iter().find_map(|name| header(name)),
            trace_header: header(TRACE_HEADER),
            api_key: header(API_KEY_HEADER),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_trace_header(mut self, trace_header: impl Into<String>) -> Self {
        self.trace_header = Some(trace_header.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

/// Parsed `Root=...;Parent=...;Sampled=...` trace header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceHeader {
    pub root: Option<String>,
    pub parent: Option<String>,
    pub sampled: Option<bool>,
}

impl TraceHeader {
    pub fn parse(raw: &str) -> Self {
        let mut header = TraceHeader::default();
        for part in raw.split(';') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "Root" if !value.is_empty() => header.root = Some(value.to_string()),
                "Parent" if !value.is_empty() => header.parent = Some(value.to_string()),
                "Sampled" => header.sampled = Some(value != "0"),
                _ => {}
            }
        }
        header
    }
}

/// Generate a trace id in `1-<8 hex epoch seconds>-<24 hex random>` form
pub fn generate_trace_id() -> String {
    let epoch = chrono::Utc::now().timestamp() as u32;
    let random: [u8; 12] = rand::thread_rng().r#gen();
    format!("1-{:08x}-{}", epoch, hex(&random))
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{:02x}", byte)).collect()
}

/// Process-wide cold start marker. The first `take` returns true, every later one false.
#[derive(Debug)]
pub struct ColdStart(AtomicBool);

impl ColdStart {
    pub fn new() -> Self {
        Self(AtomicBool::new(true))
    }

    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

impl Default for ColdStart {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationContext {
    pub correlation_id: String,
    pub trace_id: Option<String>,
    /// Upstream segment id from the trace header, if any
    pub parent_id: Option<String>,
    pub cold_start: bool,
    pub function_name: String,
    pub sampled: bool,
}

impl CorrelationContext {
    /// Derive the context for a new invocation
    ///
    /// The correlation id is the platform request id, or a fresh UUID v4 when none was
    /// supplied. When tracing is enabled the trace id comes from the trace header (or
    /// the runtime environment); a header with `Sampled=0` disables tracing for this
    /// invocation.
    pub fn begin(
        metadata: &RequestMetadata,
        cold_start: bool,
        function_name: &str,
        tracing_enabled: bool,
    ) -> Self {
        let correlation_id = metadata
            .request_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let header = metadata
            .trace_header
            .clone()
            .or_else(|| std::env::var(TRACE_ENV).ok())
            .map(|raw| TraceHeader::parse(&raw))
            .unwrap_or_default();

        let sampled = tracing_enabled && header.sampled.unwrap_or(true);
        let trace_id = sampled.then(|| header.root.clone().unwrap_or_else(generate_trace_id));

        Self {
            correlation_id,
            trace_id,
            parent_id: if sampled { header.parent } else { None },
            cold_start,
            function_name: function_name.to_string(),
            sampled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn metadata(request_id: Option<&str>, trace: Option<&str>) -> RequestMetadata {
        RequestMetadata {
            request_id: request_id.map(str::to_string),
            trace_header: trace.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_platform_request_id_becomes_correlation_id() {
        let ctx = CorrelationContext::begin(&metadata(Some("req-123"), None), false, "fn", false);
        assert_eq!(ctx.correlation_id, "req-123");
        assert!(!ctx.cold_start);
        assert_eq!(ctx.function_name, "fn");
    }

    #[test]
    fn test_missing_request_id_generates_uuid() {
        let first = CorrelationContext::begin(&metadata(None, None), false, "fn", false);
        let second = CorrelationContext::begin(&metadata(Some("   "), None), false, "fn", false);

        assert!(Uuid::parse_str(&first.correlation_id).is_ok());
        assert!(Uuid::parse_str(&second.correlation_id).is_ok());
        assert_ne!(first.correlation_id, second.correlation_id);
    }

    #[test]
    fn test_trace_root_taken_from_header() {
        let header = "Root=1-5759e988-bd862e3fe1be46a994272793;Parent=53995c3f42cd8ad8;Sampled=1";
        let ctx = CorrelationContext::begin(&metadata(Some("r"), Some(header)), true, "fn", true);

        assert_eq!(ctx.trace_id.as_deref(), Some("1-5759e988-bd862e3fe1be46a994272793"));
        assert_eq!(ctx.parent_id.as_deref(), Some("53995c3f42cd8ad8"));
        assert!(ctx.sampled);
    }

    #[test]
    fn test_unsampled_header_disables_tracing() {
        let header = "Root=1-5759e988-bd862e3fe1be46a994272793;Sampled=0";
        let ctx = CorrelationContext::begin(&metadata(Some("r"), Some(header)), false, "fn", true);

        assert!(ctx.trace_id.is_none());
        assert!(ctx.parent_id.is_none());
        assert!(!ctx.sampled);
    }

    #[test]
    fn test_tracing_disabled_yields_no_trace_id() {
        let header = "Root=1-5759e988-bd862e3fe1be46a994272793";
        let ctx = CorrelationContext::begin(&metadata(Some("r"), Some(header)), false, "fn", false);
        assert!(ctx.trace_id.is_none());
    }

    #[test]
    fn test_generated_trace_id_format() {
        let id = generate_trace_id();
        let parts: Vec<&str> = id.split('-').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "1");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 24);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_trace_header_parsing_tolerates_noise() {
        let header = TraceHeader::parse(" Root=abc ; Sampled=1;garbage;Lineage=x:1");
        assert_eq!(header.root.as_deref(), Some("abc"));
        assert_eq!(header.sampled, Some(true));
        assert!(header.parent.is_none());
    }

    #[test]
    fn test_cold_start_is_taken_once() {
        let flag = ColdStart::new();
        assert!(flag.take());
        assert!(!flag.take());
        assert!(!flag.take());
    }

    #[test]
    fn test_metadata_from_headers_prefers_platform_id() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("fallback"));
        headers.insert("x-amzn-requestid", HeaderValue::from_static("platform"));
        headers.insert("x-amzn-trace-id", HeaderValue::from_static("Root=1-abc-def"));
        headers.insert("x-api-key", HeaderValue::from_static(" s3cret "));

        let metadata = RequestMetadata::from_headers(&headers);
        assert_eq!(metadata.request_id.as_deref(), Some("platform"));
        assert_eq!(metadata.trace_header.as_deref(), Some("Root=1-abc-def"));
        assert_eq!(metadata.api_key.as_deref(), Some("s3cret"));

        headers.remove("x-amzn-requestid");
        let metadata = RequestMetadata::from_headers(&headers);
        assert_eq!(metadata.request_id.as_deref(), Some("fallback"));
    }
}
