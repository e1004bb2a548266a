//! Abstract span API consumed by the trace correlation middleware.
//!
//! The tracing backend is pluggable: implement [`Tracer`] for your
//! collector. [`TracingTracer`] is the built-in implementation; it speaks
//! W3C `traceparent` on the wire and records spans as `tracing` spans so
//! they show up wherever the process's subscriber sends them.

use std::fmt;
use std::time::Instant;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::field::Empty;

/// The W3C trace-context propagation header.
pub const TRACEPARENT: &str = "traceparent";

/// Identity of a span as it travels between services.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SpanContext {
    /// 32 lowercase hex digits.
    pub trace_id: String,
    /// 16 lowercase hex digits.
    pub span_id: String,
    pub sampled: bool,
}

impl SpanContext {
    /// Parses `00-<trace-id>-<span-id>-<flags>`.
    pub fn from_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;
        if parts.next().is_some() || version != "00" {
            return None;
        }
        let hex = |s: &str, len: usize| {
            s.len() == len && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        };
        if !hex(trace_id, 32) || !hex(span_id, 16) || !hex(flags, 2) {
            return None;
        }
        // W3C forbids all-zero ids.
        if trace_id.bytes().all(|b| b == b'0') || span_id.bytes().all(|b| b == b'0') {
            return None;
        }
        let flags = u8::from_str_radix(flags, 16).ok()?;
        Some(Self { trace_id: trace_id.to_owned(), span_id: span_id.to_owned(), sampled: flags & 1 == 1 })
    }

    pub fn to_traceparent(&self) -> String {
        format!("00-{}-{}-{:02x}", self.trace_id, self.span_id, u8::from(self.sampled))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SpanKind {
    Server,
    Client,
    Internal,
}

impl SpanKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Server   => "server",
            Self::Client   => "client",
            Self::Internal => "internal",
        }
    }
}

/// How to start a span: as a child of `parent` when present, else as a root.
#[derive(Clone, Debug)]
pub struct SpanOptions {
    pub parent: Option<SpanContext>,
    pub kind: SpanKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TagValue {
    Str(String),
    Bool(bool),
    Int(i64),
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Bool(b) => b.fmt(f),
            Self::Int(i) => i.fmt(f),
        }
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self { Self::Str(s.to_owned()) }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self { Self::Str(s) }
}

impl From<bool> for TagValue {
    fn from(b: bool) -> Self { Self::Bool(b) }
}

impl From<i64> for TagValue {
    fn from(i: i64) -> Self { Self::Int(i) }
}

/// A started unit of trace work.
pub trait Span: Send + Sync {
    fn context(&self) -> &SpanContext;
    fn set_tag(&mut self, key: &str, value: TagValue);
    /// Records one timestamped event made of key/value fields.
    fn log(&mut self, fields: &[(&str, String)]);
    fn finish(self: Box<Self>);
}

/// A tracing backend.
pub trait Tracer: Send + Sync + 'static {
    /// Reads an upstream span context from inbound headers.
    fn extract(&self, carrier: &HeaderMap) -> Option<SpanContext>;
    /// Writes `span` into outbound headers.
    fn inject(&self, span: &SpanContext, carrier: &mut HeaderMap);
    fn start_span(&self, operation: &str, options: SpanOptions) -> Box<dyn Span>;
}

// ── TracingTracer ─────────────────────────────────────────────────────────────

/// W3C trace-context propagation backed by `tracing` spans.
///
/// Extraction checks each configured carrier header in order and takes the
/// first value that parses as a `traceparent`.
pub struct TracingTracer {
    carriers: Vec<HeaderName>,
}

impl TracingTracer {
    pub fn new() -> Self {
        Self { carriers: vec![HeaderName::from_static(TRACEPARENT)] }
    }

    /// Replaces the inbound carrier headers.
    pub fn carriers(mut self, headers: impl IntoIterator<Item = HeaderName>) -> Self {
        self.carriers = headers.into_iter().collect();
        self
    }
}

impl Default for TracingTracer {
    fn default() -> Self { Self::new() }
}

impl Tracer for TracingTracer {
    fn extract(&self, carrier: &HeaderMap) -> Option<SpanContext> {
        self.carriers
            .iter()
            .filter_map(|name| carrier.get(name)?.to_str().ok())
            .find_map(SpanContext::from_traceparent)
    }

    fn inject(&self, span: &SpanContext, carrier: &mut HeaderMap) {
        if let Ok(value) = HeaderValue::from_str(&span.to_traceparent()) {
            carrier.insert(HeaderName::from_static(TRACEPARENT), value);
        }
    }

    fn start_span(&self, operation: &str, options: SpanOptions) -> Box<dyn Span> {
        let ids = uuid::Uuid::new_v4().simple().to_string();
        let (trace_id, parent_id) = match &options.parent {
            Some(parent) => (parent.trace_id.clone(), parent.span_id.clone()),
            None => (uuid::Uuid::new_v4().simple().to_string(), String::new()),
        };
        let context = SpanContext {
            trace_id,
            span_id: ids[..16].to_owned(),
            sampled: options.parent.as_ref().is_none_or(|p| p.sampled),
        };
        let span = tracing::info_span!(
            target: "tsu_lifecycle::trace",
            "span",
            otel.name = %operation,
            otel.kind = options.kind.as_str(),
            trace_id = %context.trace_id,
            span_id = %context.span_id,
            parent_span_id = %parent_id,
            rid = Empty,
            error = Empty,
        );
        Box::new(TracingSpan { span, context, started: Instant::now() })
    }
}

struct TracingSpan {
    span: tracing::Span,
    context: SpanContext,
    started: Instant,
}

impl Span for TracingSpan {
    fn context(&self) -> &SpanContext { &self.context }

    fn set_tag(&mut self, key: &str, value: TagValue) {
        match (key, &value) {
            ("x-request-id", _) => {
                self.span.record("rid", tracing::field::display(&value));
            }
            ("error", TagValue::Bool(b)) => {
                self.span.record("error", *b);
            }
            _ => tracing::debug!(parent: &self.span, tag = key, value = %value, "span tag"),
        }
    }

    fn log(&mut self, fields: &[(&str, String)]) {
        let rendered: Vec<String> = fields.iter().map(|(k, v)| format!("{k}={v}")).collect();
        tracing::info!(parent: &self.span, fields = %rendered.join(" "), "span log");
    }

    fn finish(self: Box<Self>) {
        tracing::debug!(
            parent: &self.span,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "span finished"
        );
    }
}
