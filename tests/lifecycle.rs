//! End-to-end request lifecycle through a full pipeline.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::HeaderMap;
use http::StatusCode;
use parking_lot::Mutex;
use proptest::prelude::*;
use serde::Deserialize;
use serde_json::{Value, json};
use tsu_lifecycle::{
    BoxFuture, Content, Context, ContextPool, Envelope, Error, FieldViolation, FieldViolations,
    HandlerResult, JsonEnvelope, Payload, Pipeline, RateLimit, RateLimiter, Reply, Request,
    RequestLogger, Response, Settings, Span, SpanContext, SpanOptions, TRACEPARENT, TagValue,
    Tracer, Validate,
};

// ── Recording doubles ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default)]
struct FinishedSpan {
    operation: String,
    parent: Option<SpanContext>,
    tags: Vec<(String, TagValue)>,
    logs: Vec<Vec<(String, String)>>,
}

impl FinishedSpan {
    fn tag(&self, key: &str) -> Option<&TagValue> {
        self.tags.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

#[derive(Clone, Default)]
struct RecordingTracer {
    finished: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl RecordingTracer {
    fn finished(&self) -> Vec<FinishedSpan> {
        self.finished.lock().clone()
    }
}

impl Tracer for RecordingTracer {
    fn extract(&self, carrier: &HeaderMap) -> Option<SpanContext> {
        carrier.get(TRACEPARENT)?.to_str().ok().and_then(SpanContext::from_traceparent)
    }

    fn inject(&self, span: &SpanContext, carrier: &mut HeaderMap) {
        carrier.insert(TRACEPARENT, span.to_traceparent().parse().unwrap());
    }

    fn start_span(&self, operation: &str, options: SpanOptions) -> Box<dyn Span> {
        let trace_id = options
            .parent
            .as_ref()
            .map_or_else(|| "0af7651916cd43dd8448eb211c80319c".to_owned(), |p| p.trace_id.clone());
        Box::new(RecordingSpan {
            context: SpanContext { trace_id, span_id: "b7ad6b7169203331".to_owned(), sampled: true },
            record: FinishedSpan {
                operation: operation.to_owned(),
                parent: options.parent,
                ..FinishedSpan::default()
            },
            sink: Arc::clone(&self.finished),
        })
    }
}

struct RecordingSpan {
    context: SpanContext,
    record: FinishedSpan,
    sink: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl Span for RecordingSpan {
    fn context(&self) -> &SpanContext { &self.context }

    fn set_tag(&mut self, key: &str, value: TagValue) {
        self.record.tags.push((key.to_owned(), value));
    }

    fn log(&mut self, fields: &[(&str, String)]) {
        self.record.logs.push(fields.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect());
    }

    fn finish(self: Box<Self>) {
        let this = *self;
        this.sink.lock().push(this.record);
    }
}

#[derive(Clone, Debug)]
struct Entry {
    rid: String,
    status: u16,
    code: Option<String>,
    fields: Vec<(String, Value)>,
}

#[derive(Clone, Default)]
struct RecordingLogger {
    entries: Arc<Mutex<Vec<Entry>>>,
}

impl RecordingLogger {
    fn entries(&self) -> Vec<Entry> {
        self.entries.lock().clone()
    }
}

impl RequestLogger for RecordingLogger {
    fn log(&self, ctx: &Context) {
        self.entries.lock().push(Entry {
            rid: ctx.rid().to_owned(),
            status: ctx.status().as_u16(),
            code: ctx.err().map(|e| e.code().to_owned()),
            fields: ctx.log_fields().to_vec(),
        });
    }
}

struct Harness {
    pipeline: Pipeline,
    tracer: RecordingTracer,
    logger: RecordingLogger,
}

fn harness(settings: Settings, handler: fn(&mut Context) -> BoxFuture<'_, HandlerResult>) -> Harness {
    let tracer = RecordingTracer::default();
    let logger = RecordingLogger::default();
    let pipeline = Pipeline::builder(settings)
        .tracer(tracer.clone())
        .logger(logger.clone())
        .build(handler);
    Harness { pipeline, tracer, logger }
}

fn request(headers: &[(&str, &str)], body: &'static str) -> Request {
    let mut builder = http::Request::post("/users");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    Request::new(builder.body(Bytes::from(body)).unwrap(), Some(([10, 0, 0, 7], 4100).into()))
}

fn envelope(response: &Response) -> JsonEnvelope {
    serde_json::from_slice(response.body()).unwrap()
}

// ── Handlers ──────────────────────────────────────────────────────────────────

fn explode(message: &str) -> HandlerResult {
    panic!("{message}")
}

fn panics(ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        ctx.add_log_field("step", "before panic");
        explode("boom")
    })
}

fn fails_then_panics(ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        ctx.error(Error::new("bad input").with_code("E1"));
        explode("late")
    })
}

fn client_error(_ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move { Err(Error::new("nope").with_code("E2").into()) })
}

fn system_error(_ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move { Err(Error::system("db down").into()) })
}

fn echo(ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        let rid = ctx.rid().to_owned();
        ctx.add_log_field("rid", rid.clone());
        tokio::task::yield_now().await;
        let seen = ctx.log_fields().iter().find(|(k, _)| k == "rid").map(|(_, v)| v.clone());
        Reply::json(&json!({ "rid": rid, "seen": seen }))
    })
}

fn says_hi(_ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move { Ok(Reply::text("hi")) })
}

fn hangs(_ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
    Box::pin(std::future::pending::<HandlerResult>())
}

#[derive(Default, Deserialize)]
struct Signup {
    name: String,
    age: i64,
}

impl Validate for Signup {
    fn validate(&self) -> Result<(), FieldViolations> {
        let mut v = FieldViolations::new();
        if self.name.is_empty() {
            v.push(FieldViolation::required("name"));
        }
        if self.age <= 0 {
            v.push(FieldViolation::positive("age"));
        }
        v.into_result()
    }
}

fn signup(ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        let input: Signup = ctx.valid_json()?;
        Reply::json(&json!({ "name": input.name, "age": input.age }))
    })
}

/// Writes its message as text; blows up when handed a payload.
#[derive(Default)]
struct ExplodingEnvelope {
    message: String,
}

impl Envelope for ExplodingEnvelope {
    fn set_code(&mut self, _code: &str) {}
    fn set_message(&mut self, message: &str) { self.message = message.to_owned(); }
    fn set_data(&mut self, _data: Payload) { panic!("exploding envelope") }
    fn set_system(&mut self) {}
    fn set_chain(&mut self, _chain: &[String]) {}
    fn set_rid(&mut self, _rid: &str) {}

    fn content(&self) -> Result<Content, Error> {
        Ok(Content::Text(self.message.clone()))
    }
}

fn exploding_envelopes() -> Settings {
    Settings::builder().envelope(|| Box::new(ExplodingEnvelope::default()) as Box<dyn Envelope>).build()
}

// ── Recovery ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn handler_panic_becomes_one_system_error() {
    let h = harness(Settings::default(), panics);
    let res = h.pipeline.dispatch(request(&[("content-type", "application/json")], "")).await;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = envelope(&res);
    assert_eq!(body.message, "boom");
    assert!(body.system);
    assert_eq!(body.code, "100");

    let spans = h.tracer.finished();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].tag("error"), Some(&TagValue::Bool(true)));
    assert!(spans[0].logs.iter().any(|log| log.iter().any(|(k, v)| k == "event" && v == "error")));

    let entries = h.logger.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, 500);
    assert_eq!(entries[0].code.as_deref(), Some("100"));
    assert_eq!(entries[0].fields, vec![("step".to_owned(), json!("before panic"))]);
}

#[tokio::test]
async fn panic_without_content_type_writes_reason_phrase() {
    let h = harness(Settings::default(), panics);
    let res = h.pipeline.dispatch(request(&[("accept", "application/json")], "")).await;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.body(), b"Internal Server Error");
    assert_eq!(h.logger.entries()[0].code.as_deref(), Some("100"));
}

#[tokio::test]
async fn panic_after_explicit_error_keeps_first_response() {
    let h = harness(Settings::default(), fails_then_panics);
    let res = h.pipeline.dispatch(request(&[], "")).await;

    assert_eq!(res.status(), StatusCode::OK);
    let body = envelope(&res);
    assert_eq!(body.code, "E1");
    assert_eq!(body.message, "bad input");
    assert!(!body.system);

    let spans = h.tracer.finished();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].tag("error"), None);
    assert_eq!(h.logger.entries()[0].code.as_deref(), Some("E1"));
}

#[tokio::test]
async fn panic_while_building_success_envelope_is_recovered() {
    let h = harness(exploding_envelopes(), says_hi);
    let res = h.pipeline.dispatch(request(&[], "")).await;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.body(), b"Internal Server Error");

    let spans = h.tracer.finished();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].tag("error"), Some(&TagValue::Bool(true)));

    let entries = h.logger.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, 500);
    assert_eq!(entries[0].code.as_deref(), Some("100"));
}

#[tokio::test]
async fn recovered_envelope_panic_renders_error_for_typed_request() {
    let h = harness(exploding_envelopes(), says_hi);
    let res = h.pipeline.dispatch(request(&[("content-type", "application/json")], "")).await;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.body(), b"exploding envelope");
}

#[tokio::test]
async fn panicking_envelope_factory_in_fallback_is_contained() {
    let settings = Settings::builder()
        .envelope(|| -> Box<dyn Envelope> { panic!("factory down") })
        .build();
    let h = harness(settings, panics);
    let res = h.pipeline.dispatch(request(&[("content-type", "application/json")], "")).await;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.body(), b"Internal Server Error");
    assert_eq!(h.tracer.finished().len(), 1);
    assert_eq!(h.logger.entries().len(), 1);
}

// ── Correlation ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn inbound_request_id_is_propagated() {
    let h = harness(Settings::default(), echo);
    let res = h.pipeline.dispatch(request(&[("x-request-id", "req-123")], "")).await;

    let body = envelope(&res);
    assert_eq!(body.rid.as_deref(), Some("req-123"));
    assert_eq!(body.code, "00");
    assert_eq!(body.data, Some(json!({ "rid": "req-123", "seen": "req-123" })));

    let spans = h.tracer.finished();
    assert_eq!(spans[0].operation, "POST /users");
    assert_eq!(spans[0].tag("x-request-id"), Some(&TagValue::Str("req-123".to_owned())));
    assert_eq!(h.logger.entries()[0].rid, "req-123");
}

#[tokio::test]
async fn missing_request_id_is_generated() {
    let h = harness(Settings::default(), echo);
    let res = h.pipeline.dispatch(request(&[], "")).await;

    let rid = envelope(&res).rid.unwrap();
    assert_eq!(rid.len(), 36);
    assert_eq!(h.logger.entries()[0].rid, rid);
}

#[tokio::test]
async fn upstream_trace_is_continued() {
    let parent = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
    let h = harness(Settings::default(), echo);
    h.pipeline.dispatch(request(&[(TRACEPARENT, parent)], "")).await;

    let spans = h.tracer.finished();
    let upstream = spans[0].parent.as_ref().unwrap();
    assert_eq!(upstream.trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
    assert_eq!(upstream.span_id, "00f067aa0ba902b7");
}

#[tokio::test]
async fn client_error_is_logged_on_span_without_error_tag() {
    let h = harness(Settings::default(), client_error);
    let res = h.pipeline.dispatch(request(&[], "")).await;

    assert_eq!(envelope(&res).code, "E2");
    let spans = h.tracer.finished();
    assert_eq!(spans[0].tag("error"), None);
    assert_eq!(spans[0].logs, vec![vec![("error".to_owned(), "nope".to_owned())]]);
}

// ── Classification and emission ───────────────────────────────────────────────

#[tokio::test]
async fn failed_field_rules_are_all_reported() {
    let h = harness(Settings::default(), signup);
    let res = h.pipeline.dispatch(request(&[], r#"{"name":"","age":0}"#)).await;

    let body = envelope(&res);
    assert_eq!(body.code, "102");
    assert!(body.message.contains("name is required"));
    assert!(body.message.contains("age must be greater than 0"));
    assert_eq!(body.chain.len(), 2);
}

#[tokio::test]
async fn malformed_body_is_read_params_error() {
    let h = harness(Settings::default(), signup);
    let res = h.pipeline.dispatch(request(&[], "{not json")).await;
    assert_eq!(envelope(&res).code, "101");
}

#[tokio::test]
async fn valid_body_round_trips_through_envelope() {
    let h = harness(Settings::default(), signup);
    let res = h.pipeline.dispatch(request(&[], r#"{"name":"ada","age":36}"#)).await;

    assert_eq!(res.content_type(), Some("application/json"));
    let body = envelope(&res);
    assert_eq!(body.data, Some(json!({ "name": "ada", "age": 36 })));
    let again: JsonEnvelope = serde_json::from_slice(&serde_json::to_vec(&body).unwrap()).unwrap();
    assert_eq!(again, body);
}

#[tokio::test]
async fn production_redacts_system_messages() {
    let h = harness(Settings::builder().env("production").build(), system_error);
    let res = h.pipeline.dispatch(request(&[], "")).await;

    let body = envelope(&res);
    assert_eq!(body.message, tsu_lifecycle::REDACTED_MESSAGE);
    assert!(body.system);
    assert_eq!(h.logger.entries()[0].code.as_deref(), Some("100"));
}

// ── Rate limiting ─────────────────────────────────────────────────────────────

struct Deny;

impl RateLimiter for Deny {
    fn check(&self, _identity: &str) -> Result<(), Error> {
        Err(Error::new("slow down").with_code("429"))
    }
}

fn limited(logger: RecordingLogger) -> Pipeline {
    Pipeline::builder(Settings::default()).logger(logger).layer(RateLimit::new(Deny)).build(echo)
}

#[tokio::test]
async fn rejected_api_call_gets_envelope() {
    let logger = RecordingLogger::default();
    let res = limited(logger.clone())
        .dispatch(request(&[("referer", "https://app.example"), ("x-request-id", "r1")], ""))
        .await;

    let body = envelope(&res);
    assert_eq!(body.code, "429");
    assert_eq!(body.message, "slow down");
    assert_eq!(logger.entries()[0].code.as_deref(), Some("429"));
}

#[tokio::test]
async fn rejected_page_load_gets_error_view() {
    let res = limited(RecordingLogger::default())
        .dispatch(request(&[("x-request-id", "r2")], ""))
        .await;

    assert_eq!(res.content_type(), Some("text/html; charset=utf-8"));
    assert_eq!(res.body(), b"<p>[429]slow down rid:r2</p>");
}

// ── Pooling and cancellation ──────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_keep_their_own_state() {
    let h = harness(Settings::default(), echo);
    let pipeline = Arc::new(h.pipeline);

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..64 {
        let pipeline = Arc::clone(&pipeline);
        tasks.spawn(async move {
            let rid = format!("req-{i}");
            let res = pipeline.dispatch(request(&[("x-request-id", rid.as_str())], "")).await;
            (rid, envelope(&res))
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (rid, body) = joined.unwrap();
        assert_eq!(body.rid.as_deref(), Some(rid.as_str()));
        assert_eq!(body.data, Some(json!({ "rid": rid, "seen": rid })));
    }
    assert_eq!(h.logger.entries().len(), 64);
    assert!(pipeline.pool().idle() <= 64);
}

#[tokio::test]
async fn cancelled_request_still_finishes_its_span() {
    let h = harness(Settings::default(), hangs);
    let outcome = tokio::time::timeout(
        Duration::from_millis(20),
        h.pipeline.dispatch(request(&[("x-request-id", "gone")], "")),
    )
    .await;
    assert!(outcome.is_err());

    let spans = h.tracer.finished();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].tag("cancelled"), Some(&TagValue::Bool(true)));
    assert!(h.logger.entries().is_empty());
    assert_eq!(h.pipeline.pool().idle(), 1);
}

proptest! {
    #[test]
    fn pooled_contexts_never_share_state(
        workers in proptest::collection::vec(proptest::collection::vec("[a-z]{1,8}", 1..8), 2..6),
    ) {
        let pool = ContextPool::with_max_idle(Arc::new(Settings::default()), 2);

        let leaks: Vec<String> = std::thread::scope(|scope| {
            let handles: Vec<_> = workers
                .iter()
                .enumerate()
                .map(|(w, values)| {
                    let pool = pool.clone();
                    scope.spawn(move || {
                        let mut leaks = Vec::new();
                        for v in values {
                            let mut ctx = pool.acquire(Request::default());
                            if !ctx.log_fields().is_empty() || ctx.err().is_some() {
                                leaks.push(format!("worker {w} inherited state before {v}"));
                            }
                            let own = Value::from(format!("{w}:{v}"));
                            ctx.add_log_field("who", own.clone());
                            std::thread::yield_now();
                            if ctx.log_fields().to_vec() != vec![("who".to_owned(), own)] {
                                leaks.push(format!("worker {w} saw {:?}", ctx.log_fields()));
                            }
                            ctx.set_err(Error::new(v.clone()));
                            ctx.release();
                        }
                        leaks
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        prop_assert!(leaks.is_empty(), "{:?}", leaks);
        prop_assert!(pool.idle() <= 2);
    }
}
