//! # tsu-lifecycle
//!
//! The request lifecycle core of an HTTP service: a pooled per-request
//! [`Context`], panic recovery, one error classifier feeding one response
//! pipeline, and trace correlation.
//!
//! Routing, authentication and metrics are left to the host. What this
//! crate owns is everything between "a request arrived" and "its response
//! and access log are final":
//!
//! - every request gets a correlation id and, with a [`Tracer`], a span
//! - handler failures are [`Fault`]s, classified into coded [`Error`]s
//! - a panic anywhere below the recovery layer becomes a 500 system error
//! - exactly one body is written per request, redacted in production
//! - contexts are recycled through a [`ContextPool`] and wiped on reuse
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use serde::Deserialize;
//! use tsu_lifecycle::{
//!     BoxFuture, Context, FieldViolation, FieldViolations, HandlerResult, Pipeline, Reply,
//!     Server, SettingsBuilder, TracingTracer, Validate,
//! };
//!
//! #[derive(Default, Deserialize)]
//! struct Greet {
//!     name: String,
//! }
//!
//! impl Validate for Greet {
//!     fn validate(&self) -> Result<(), FieldViolations> {
//!         let mut violations = FieldViolations::new();
//!         if self.name.is_empty() {
//!             violations.push(FieldViolation::required("name"));
//!         }
//!         violations.into_result()
//!     }
//! }
//!
//! fn greet(ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
//!     Box::pin(async move {
//!         let body: Greet = ctx.valid_json()?;
//!         Ok(Reply::text(format!("hello, {}", body.name)))
//!     })
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = SettingsBuilder::from_env().build();
//!     let pipeline = Pipeline::builder(settings)
//!         .tracer(TracingTracer::new())
//!         .build(greet);
//!
//!     Server::bind(([0, 0, 0, 0], 3000).into()).serve(pipeline).await?;
//!     Ok(())
//! }
//! ```

mod classify;
mod context;
mod emit;
mod envelope;
mod error;
mod fault;
mod handler;
mod log;
mod pipeline;
mod pool;
mod request;
mod response;
mod server;
mod settings;
mod tracer;
mod view;

pub mod middleware;

pub use classify::DIAGNOSTIC_TARGET;
pub use context::Context;
pub use emit::REDACTED_MESSAGE;
pub use envelope::{BinaryEnvelope, Content, Envelope, JsonEnvelope, Payload, TextEnvelope};
pub use error::{Error, ServeError, Stack};
pub use fault::{Fault, FieldViolation, FieldViolations, FormErrors, Validate};
pub use handler::{BoxFuture, Handler, HandlerResult, Reply};
pub use log::{ACCESS_TARGET, RequestLogger, TracingLogger};
pub use middleware::{
    Fallback, Middleware, Next, RateLimit, RateLimiter, Recover, RecoveryState, Trace, TraceHandle,
};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use pool::{ContextPool, DEFAULT_MAX_IDLE, Pooled};
pub use request::Request;
pub use response::{ContentType, Response};
pub use server::Server;
pub use settings::{
    DEFAULT_READ_PARAMS_CODE, DEFAULT_SUCCESS_CODE, DEFAULT_SYSTEM_CODE, DEFAULT_VALIDATION_CODE,
    EnvelopeFactory, ErrorCategory, ErrorCodes, PRODUCTION, Settings, SettingsBuilder,
};
pub use tracer::{
    SpanContext, SpanKind, SpanOptions, Span, TRACEPARENT, TagValue, Tracer, TracingTracer,
};
pub use view::{PlainView, ViewRenderer};
