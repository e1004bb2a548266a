//! Trace correlation.
//!
//! On entry the middleware settles the request's correlation id (inbound
//! `x-request-id`, else a fresh UUID), continues an upstream trace when the
//! tracer can extract one from the headers, starts the request span, tags it
//! with the correlation id and attaches a [`TraceHandle`] to the context.
//!
//! On exit it looks at the error recorded on the context: a client fault is
//! logged on the span as a plain field, a system fault marks the span as an
//! error span. The span is finished exactly once. When the request is
//! cancelled before the middleware gets to run its exit path, the context
//! finishes the span as it goes back to the pool.

use std::fmt;
use std::sync::Arc;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::Context;
use crate::error::Error;
use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::tracer::{Span, SpanContext, SpanKind, SpanOptions, TagValue, Tracer};

/// Inbound header carrying a client-supplied correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

// ── TraceHandle ───────────────────────────────────────────────────────────────

/// Request-scoped handle tying the context to its span.
///
/// Cheap to clone; hand a clone to spawned work that should carry the
/// correlation id or stop when the request ends ([`token`](Self::token) is
/// cancelled when the context is released).
#[derive(Clone)]
pub struct TraceHandle {
    inner: Arc<Inner>,
}

struct Inner {
    rid: String,
    span_context: Option<SpanContext>,
    tracer: Option<Arc<dyn Tracer>>,
    span: Mutex<Option<Box<dyn Span>>>,
    token: CancellationToken,
}

impl TraceHandle {
    fn new(rid: String, tracer: Option<Arc<dyn Tracer>>, span: Option<Box<dyn Span>>) -> Self {
        let span_context = span.as_ref().map(|s| s.context().clone());
        Self {
            inner: Arc::new(Inner {
                rid,
                span_context,
                tracer,
                span: Mutex::new(span),
                token: CancellationToken::new(),
            }),
        }
    }

    pub fn rid(&self) -> &str { &self.inner.rid }

    /// Trace id of the request span, once a tracer is active.
    pub fn trace_id(&self) -> Option<&str> {
        self.inner.span_context.as_ref().map(|c| c.trace_id.as_str())
    }

    pub fn span_context(&self) -> Option<&SpanContext> { self.inner.span_context.as_ref() }

    pub fn token(&self) -> &CancellationToken { &self.inner.token }

    /// Propagates the request span and correlation id into outbound headers.
    pub fn inject(&self, carrier: &mut HeaderMap) {
        if let Ok(value) = self.inner.rid.parse::<HeaderValue>() {
            carrier.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
        }
        if let (Some(tracer), Some(span)) = (&self.inner.tracer, &self.inner.span_context) {
            tracer.inject(span, carrier);
        }
    }

    /// Tags the live span. Ignored after the span finished.
    pub fn tag(&self, key: &str, value: impl Into<TagValue>) {
        if let Some(span) = self.inner.span.lock().as_mut() {
            span.set_tag(key, value.into());
        }
    }

    /// Logs an event on the live span. Ignored after the span finished.
    pub fn log(&self, fields: &[(&str, String)]) {
        if let Some(span) = self.inner.span.lock().as_mut() {
            span.log(fields);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.inner.span.lock().is_none()
    }

    /// Closes the span with `err`. Only the first call has any effect.
    pub(crate) fn finish(&self, err: Option<&Error>, cancelled: bool) {
        let Some(mut span) = self.inner.span.lock().take() else { return };
        if cancelled {
            span.set_tag("cancelled", TagValue::Bool(true));
        }
        if let Some(err) = err {
            if err.is_system() {
                span.set_tag("error", TagValue::Bool(true));
                span.log(&[("event", "error".to_owned()), ("error.object", err.report())]);
            } else {
                span.log(&[("error", err.message().to_owned())]);
            }
        }
        span.finish();
    }

    pub(crate) fn cancel(&self) {
        self.inner.token.cancel();
    }
}

impl fmt::Debug for TraceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceHandle")
            .field("rid", &self.inner.rid)
            .field("span", &self.inner.span_context)
            .finish_non_exhaustive()
    }
}

// ── Trace ─────────────────────────────────────────────────────────────────────

/// The trace correlation middleware. Without a tracer it still settles and
/// propagates the correlation id.
pub struct Trace {
    tracer: Option<Arc<dyn Tracer>>,
    header: HeaderName,
}

impl Trace {
    pub fn new(tracer: Option<Arc<dyn Tracer>>) -> Self {
        Self { tracer, header: HeaderName::from_static(REQUEST_ID_HEADER) }
    }

    /// Reads the inbound correlation id from `header` instead.
    pub fn header(mut self, header: HeaderName) -> Self {
        self.header = header;
        self
    }
}

impl Middleware for Trace {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let rid = ctx
                .request()
                .headers()
                .get(&self.header)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            ctx.set_rid(rid.clone());

            let span = self.tracer.as_ref().map(|tracer| {
                let parent = tracer.extract(ctx.request().headers());
                let operation = format!("{} {}", ctx.request().method(), ctx.request().path());
                let mut span = tracer.start_span(&operation, SpanOptions { parent, kind: SpanKind::Server });
                span.set_tag(REQUEST_ID_HEADER, TagValue::Str(rid.clone()));
                span
            });
            ctx.attach_trace(TraceHandle::new(rid, self.tracer.clone(), span));

            next.run(&mut *ctx).await;

            ctx.finish_trace();
        })
    }
}
