//! Trace segments for one invocation
//!
//! A [`Trace`] owns a tree of named segments rooted at the function segment. Segments
//! nest by call order: a new segment's parent is the innermost segment still open.
//! Closing is tied to scope. [`SegmentGuard`] closes its segment on drop, and closing a
//! segment first closes any descendant that is still open, so a parent never ends
//! before its children.
//!
//! # Usage
//!
//! ```rust,ignore
//! let trace = telemetry.start_trace(&ctx);
//! let item = trace
//!     .scoped("## write_to_dynamodb", |segment| async move {
//!         segment.put_annotation("table_name", "movies");
//!         storage.put_item("movies", &item).await
//!     })
//!     .await?;
//! let tree = trace.finish();
//! ```
//!
//! When the invocation is not sampled the trace is inert: every operation is a no-op
//! and [`Trace::finish`] returns `None`.

use std::collections::BTreeMap;
use std::error::Error;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::Instrument;

use super::context::CorrelationContext;
use super::logging::panic_message;
use crate::error::error_chain;

/// Segment names used by the request pipeline
pub mod names {
    pub const HANDLER: &str = "## handler";
    pub const HANDLE_POST: &str = "## handle_post_request";
    pub const WRITE_TO_DYNAMODB: &str = "## write_to_dynamodb";
    pub const HANDLE_HEALTH: &str = "## handle_health_check";
    pub const CHECK_DYNAMODB_HEALTH: &str = "## check_dynamodb_health";
    pub const DYNAMODB: &str = "DynamoDB";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSegment {
    pub name: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub trace_id: String,
    pub start_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    #[serde(default)]
    pub error: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subsegments: Vec<TraceSegment>,
}

impl TraceSegment {
    pub fn is_closed(&self) -> bool {
        self.end_time.is_some()
    }

    /// Depth-first search by name, including `self`
    pub fn find(&self, name: &str) -> Option<&TraceSegment> {
        if self.name == name {
            return Some(self);
        }
        self.subsegments.iter().find_map(|child| child.find(name))
    }

    /// Number of segments in this subtree with the given name
    pub fn count(&self, name: &str) -> usize {
        let own = usize::from(self.name == name);
        own + self.subsegments.iter().map(|child| child.count(name)).sum::<usize>()
    }

    /// Every segment in this subtree, parents before children
    pub fn walk(&self) -> Vec<&TraceSegment> {
        let mut segments = vec![self];
        for child in &self.subsegments {
            segments.extend(child.walk());
        }
        segments
    }
}

fn epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn segment_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

struct Node {
    segment: TraceSegment,
    children: Vec<usize>,
}

struct TraceState {
    nodes: Vec<Node>,
    /// Indices of open segments, innermost last
    open: Vec<usize>,
}

impl TraceState {
    fn open(&mut self, name: &str, trace_id: &str, parent_override: Option<String>) -> usize {
        let parent = self.open.last().copied();
        let index = self.nodes.len();
        let parent_id = match parent {
            Some(parent) => Some(self.nodes[parent].segment.id.clone()),
            None => parent_override,
        };

        self.nodes.push(Node {
            segment: TraceSegment {
                name: name.to_string(),
                id: segment_id(),
                parent_id,
                trace_id: trace_id.to_string(),
                start_time: epoch_seconds(),
                end_time: None,
                error: false,
                annotations: BTreeMap::new(),
                metadata: Map::new(),
                subsegments: Vec::new(),
            },
            children: Vec::new(),
        });
        if let Some(parent) = parent {
            self.nodes[parent].children.push(index);
        }
        self.open.push(index);
        index
    }

    fn close(&mut self, index: usize) {
        let Some(position) = self.open.iter().position(|open| *open == index) else {
            return;
        };
        let now = epoch_seconds();
        for open in self.open.drain(position..).rev() {
            if open != index {
                tracing::debug!(
                    segment = %self.nodes[open].segment.name,
                    "Closing segment left open by its scope"
                );
            }
            self.nodes[open].segment.end_time = Some(now);
        }
    }

    fn build(&self, index: usize) -> TraceSegment {
        let node = &self.nodes[index];
        let mut segment = node.segment.clone();
        segment.subsegments = node.children.iter().map(|child| self.build(*child)).collect();
        segment
    }
}

struct TraceInner {
    trace_id: String,
    parent_id: Option<String>,
    state: Mutex<TraceState>,
}

impl TraceInner {
    fn state(&self) -> MutexGuard<'_, TraceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Segment tree for one invocation
#[derive(Clone)]
pub struct Trace {
    inner: Option<Arc<TraceInner>>,
}

impl Trace {
    /// Start a trace rooted at `root_name`, or an inert trace when `ctx` has no trace id
    pub fn begin(ctx: &CorrelationContext, root_name: &str) -> (Self, SegmentGuard) {
        let trace = match &ctx.trace_id {
            Some(trace_id) => Trace {
                inner: Some(Arc::new(TraceInner {
                    trace_id: trace_id.clone(),
                    parent_id: ctx.parent_id.clone(),
                    state: Mutex::new(TraceState {
                        nodes: Vec::new(),
                        open: Vec::new(),
                    }),
                })),
            },
            None => Trace::inert(),
        };
        let root = trace.open_segment(root_name);
        (trace, root)
    }

    pub fn inert() -> Self {
        Self { inner: None }
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_some()
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.inner.as_ref().map(|inner| inner.trace_id.as_str())
    }

    /// Open a segment under the innermost open segment
    pub fn open_segment(&self, name: &str) -> SegmentGuard {
        let index = self.inner.as_ref().map(|inner| {
            let parent_id = inner.parent_id.clone();
            inner.state().open(name, &inner.trace_id, parent_id)
        });
        SegmentGuard {
            handle: SegmentHandle {
                trace: self.clone(),
                index,
            },
        }
    }

    /// Close a segment (and any open descendants). Closing twice is a no-op.
    pub fn close_segment(&self, segment: SegmentGuard) {
        segment.close();
    }

    /// Run `f` inside a new segment
    ///
    /// An error returned by `f` is captured into the segment before it closes. A panic
    /// is captured the same way and then resumed, so every enclosing scope records it
    /// too. The future also runs inside a `tracing` span of the same name.
    pub async fn scoped<T, E, F, Fut>(&self, name: &str, f: F) -> Result<T, E>
    where
        F: FnOnce(SegmentHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Error + 'static,
    {
        let guard = self.open_segment(name);
        let span = tracing::info_span!("segment", name = %name);
        let outcome = AssertUnwindSafe(f(guard.handle()).instrument(span))
            .catch_unwind()
            .await;

        match outcome {
            Ok(result) => {
                if let Err(e) = &result {
                    guard.capture_exception(e);
                }
                guard.close();
                result
            }
            Err(payload) => {
                guard.capture_panic(&panic_message(payload.as_ref()));
                guard.close();
                panic::resume_unwind(payload)
            }
        }
    }

    /// Close everything still open and return the finished tree
    pub fn finish(&self) -> Option<TraceSegment> {
        let inner = self.inner.as_ref()?;
        let mut state = inner.state();
        if let Some(root) = state.open.first().copied() {
            state.close(root);
        }
        if state.nodes.is_empty() {
            return None;
        }
        Some(state.build(0))
    }

    fn with_segment(&self, index: Option<usize>, f: impl FnOnce(&mut TraceSegment)) {
        if let (Some(inner), Some(index)) = (&self.inner, index) {
            let mut state = inner.state();
            if let Some(node) = state.nodes.get_mut(index) {
                f(&mut node.segment);
            }
        }
    }
}

/// Non-owning reference to an open segment, for annotating it from inside a scope
#[derive(Clone)]
pub struct SegmentHandle {
    trace: Trace,
    index: Option<usize>,
}

impl SegmentHandle {
    /// Indexed, searchable key/value
    pub fn put_annotation(&self, key: &str, value: impl ToString) {
        let value = value.to_string();
        self.trace.with_segment(self.index, |segment| {
            segment.annotations.insert(key.to_string(), value);
        });
    }

    /// Free-form, non-indexed data
    pub fn put_metadata(&self, key: &str, value: Value) {
        self.trace.with_segment(self.index, |segment| {
            segment.metadata.insert(key.to_string(), value);
        });
    }

    /// Record `err` as `metadata.exception` and flag the segment
    pub fn capture_exception(&self, err: &(dyn Error + 'static)) {
        let exception = json!({
            "message": err.to_string(),
            "chain": error_chain(err),
        });
        self.mark_error(exception);
    }

    /// Record a panic payload message as `metadata.exception` and flag the segment
    pub fn capture_panic(&self, message: &str) {
        self.mark_error(json!({ "message": message, "panic": true }));
    }

    fn mark_error(&self, exception: Value) {
        self.trace.with_segment(self.index, |segment| {
            segment.error = true;
            segment.metadata.insert("exception".to_string(), exception);
        });
    }

    pub fn id(&self) -> Option<String> {
        let inner = self.trace.inner.as_ref()?;
        let index = self.index?;
        let state = inner.state();
        state.nodes.get(index).map(|node| node.segment.id.clone())
    }
}

/// Owning handle for an open segment. Closes the segment when dropped.
pub struct SegmentGuard {
    handle: SegmentHandle,
}

impl SegmentGuard {
    pub fn handle(&self) -> SegmentHandle {
        self.handle.clone()
    }

    pub fn close(self) {
        // Drop does the work
    }
}

impl std::ops::Deref for SegmentGuard {
    type Target = SegmentHandle;

    fn deref(&self) -> &SegmentHandle {
        &self.handle
    }
}

impl Drop for SegmentGuard {
    fn drop(&mut self) {
        if let (Some(inner), Some(index)) = (&self.handle.trace.inner, self.handle.index) {
            inner.state().close(index);
        }
    }
}
