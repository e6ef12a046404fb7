//! # Run tracing
//!
//! Every run records one trace: a flat list of [`Span`]s linked by parent id.
//! The runner opens a `Run` span for the whole call and a `Turn` span per
//! completion round trip; generations, tool invocations, handoffs and
//! guardrail pipelines nest under them.
//!
//! Spans are opened through [`SpanGuard`]. A guard that is dropped without
//! being completed or failed still closes its span, so a span never stays
//! open past the code path that opened it (an early `?` return or a
//! cancelled future included).
//!
//! When the run finishes the trace is handed to a [`TraceExporter`]. How
//! spans are shipped anywhere beyond that is up to the exporter.
//!
//! ```rust
//! use agent_relay::tracing::{SpanGuard, SpanType, TracingContext};
//!
//! let context = TracingContext::shared();
//! let run = SpanGuard::start(&context, SpanType::Run {
//!     agent: "Triage".to_string(),
//!     input: "hello".to_string(),
//! });
//! let turn = SpanGuard::start(&context, SpanType::Turn {
//!     agent: "Triage".to_string(),
//!     turn: 1,
//! });
//! turn.complete();
//! run.fail("boom");
//!
//! let spans = context.lock().spans().to_vec();
//! assert_eq!(spans.len(), 2);
//! assert_eq!(spans[1].parent_id.as_ref(), Some(&spans[0].id));
//! assert_eq!(spans[0].error.as_deref(), Some("boom"));
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::Result;

/// Identifier of one end-to-end run.
pub type TraceId = String;

/// Identifier of one unit of work inside a trace.
pub type SpanId = String;

pub fn gen_trace_id() -> TraceId {
    Uuid::new_v4().to_string()
}

pub fn gen_span_id() -> SpanId {
    Uuid::new_v4().to_string()
}

/// The kinds of work the runner traces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpanType {
    Run { agent: String, input: String },
    Turn { agent: String, turn: usize },
    Generation { model: String },
    Tool { tool: String },
    Handoff { from: String, to: String },
    Guardrail { kind: String, agent: String },
}

impl SpanType {
    pub fn label(&self) -> &'static str {
        match self {
            SpanType::Run { .. } => "run",
            SpanType::Turn { .. } => "turn",
            SpanType::Generation { .. } => "generation",
            SpanType::Tool { .. } => "tool",
            SpanType::Handoff { .. } => "handoff",
            SpanType::Guardrail { .. } => "guardrail",
        }
    }
}

/// A single unit of work within a trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub id: SpanId,
    pub trace_id: TraceId,
    pub parent_id: Option<SpanId>,
    pub span_type: SpanType,
    pub start_time: DateTime<Utc>,
    /// `None` while the span is open.
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub attributes: Map<String, Value>,
}

impl Span {
    pub fn new(trace_id: TraceId, parent_id: Option<SpanId>, span_type: SpanType) -> Self {
        Self {
            id: gen_span_id(),
            trace_id,
            parent_id,
            span_type,
            start_time: Utc::now(),
            end_time: None,
            error: None,
            attributes: Map::new(),
        }
    }

    pub fn complete(&mut self) {
        self.end_time = Some(Utc::now());
    }

    pub fn fail(&mut self, error: String) {
        self.attributes
            .insert("error".to_string(), Value::String(error.clone()));
        self.error = Some(error);
        self.complete();
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }
}

/// Collects the spans of one trace and tracks the innermost open span.
#[derive(Debug)]
pub struct TracingContext {
    trace_id: TraceId,
    current_span_id: Option<SpanId>,
    spans: Vec<Span>,
}

/// A tracing context shared between the runner and the tool services.
pub type SharedTracingContext = Arc<Mutex<TracingContext>>;

impl TracingContext {
    pub fn new() -> Self {
        let trace_id = gen_trace_id();
        debug!(trace_id = %trace_id, "Starting new trace");

        Self {
            trace_id,
            current_span_id: None,
            spans: Vec::new(),
        }
    }

    pub fn shared() -> SharedTracingContext {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Starts a span as a child of the current one.
    pub fn start_span(&mut self, span_type: SpanType) -> SpanId {
        let span = Span::new(
            self.trace_id.clone(),
            self.current_span_id.clone(),
            span_type,
        );
        let span_id = span.id.clone();
        debug!(span_id = %span_id, kind = span.span_type.label(), "Starting span");

        self.spans.push(span);
        self.current_span_id = Some(span_id.clone());
        span_id
    }

    pub fn set_attribute(&mut self, span_id: &str, key: &str, value: Value) {
        if let Some(span) = self.spans.iter_mut().find(|s| s.id == span_id) {
            span.attributes.insert(key.to_string(), value);
        }
    }

    /// Closes a span; closing an already closed span is a no-op.
    pub fn end_span(&mut self, span_id: &str) {
        if let Some(span) = self.spans.iter_mut().find(|s| s.id == span_id) {
            if span.is_open() {
                span.complete();
                if let Some(duration) = span.duration_ms() {
                    debug!(span_id = %span_id, duration_ms = duration, "Span completed");
                }
            }
            if self.current_span_id.as_deref() == Some(span_id) {
                self.current_span_id = span.parent_id.clone();
            }
        }
    }

    /// Records an error on a span and closes it.
    pub fn record_error(&mut self, span_id: &str, error: String) {
        if let Some(span) = self.spans.iter_mut().find(|s| s.id == span_id) {
            error!(span_id = %span_id, kind = span.span_type.label(), error = %error, "Span failed");
            span.fail(error);
            if self.current_span_id.as_deref() == Some(span_id) {
                self.current_span_id = span.parent_id.clone();
            }
        }
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }
}

impl Default for TracingContext {
    fn default() -> Self {
        Self::new()
    }
}

/// An open span; closes it when dropped.
pub struct SpanGuard {
    context: SharedTracingContext,
    span_id: SpanId,
    closed: bool,
}

impl SpanGuard {
    pub fn start(context: &SharedTracingContext, span_type: SpanType) -> Self {
        let span_id = context.lock().start_span(span_type);
        Self {
            context: context.clone(),
            span_id,
            closed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.span_id
    }

    pub fn set_attribute(&self, key: &str, value: impl Into<Value>) {
        self.context
            .lock()
            .set_attribute(&self.span_id, key, value.into());
    }

    pub fn complete(mut self) {
        self.closed = true;
        self.context.lock().end_span(&self.span_id);
    }

    pub fn fail(mut self, error: impl ToString) {
        self.closed = true;
        self.context
            .lock()
            .record_error(&self.span_id, error.to_string());
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if !self.closed {
            self.context.lock().end_span(&self.span_id);
        }
    }
}

/// Receives a finished trace.
pub trait TraceExporter: Send + Sync {
    fn export(&self, trace_id: &str, spans: &[Span]) -> Result<()>;
}

/// Drops every trace.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExporter;

impl TraceExporter for NoopExporter {
    fn export(&self, _trace_id: &str, _spans: &[Span]) -> Result<()> {
        Ok(())
    }
}

/// Emits each span as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogExporter;

impl TraceExporter for LogExporter {
    fn export(&self, trace_id: &str, spans: &[Span]) -> Result<()> {
        for span in spans {
            let attributes = Value::Object(span.attributes.clone());
            match &span.error {
                Some(err) => error!(
                    trace_id,
                    span_id = %span.id,
                    kind = span.span_type.label(),
                    duration_ms = span.duration_ms().unwrap_or(0),
                    error = %err,
                    %attributes,
                    "span"
                ),
                None => info!(
                    trace_id,
                    span_id = %span.id,
                    kind = span.span_type.label(),
                    duration_ms = span.duration_ms().unwrap_or(0),
                    %attributes,
                    "span"
                ),
            }
        }
        Ok(())
    }
}

/// Keeps every exported trace in memory.
#[derive(Debug, Default)]
pub struct InMemoryExporter {
    traces: Mutex<Vec<(TraceId, Vec<Span>)>>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn traces(&self) -> Vec<(TraceId, Vec<Span>)> {
        self.traces.lock().clone()
    }

    /// Spans of the most recent trace.
    pub fn last_spans(&self) -> Vec<Span> {
        self.traces
            .lock()
            .last()
            .map(|(_, spans)| spans.clone())
            .unwrap_or_default()
    }
}

impl TraceExporter for InMemoryExporter {
    fn export(&self, trace_id: &str, spans: &[Span]) -> Result<()> {
        self.traces
            .lock()
            .push((trace_id.to_string(), spans.to_vec()));
        Ok(())
    }
}
