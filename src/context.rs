//! The per-request context.
//!
//! A [`Context`] wraps the raw request and the response being built, plus the
//! request-scoped state every lifecycle component reads or writes: the
//! correlation id, the trace handle, accumulated log fields, an optional
//! envelope override, and the termination pair (`terminated` + recorded
//! error). Deployment-wide [`Settings`] hang off it read-only.
//!
//! Contexts are recycled by the [`ContextPool`](crate::ContextPool). Every
//! per-request field is overwritten on acquisition by [`Context::reset`], so
//! nothing from a previous occupant survives.

use std::sync::Arc;

use http::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::Error;
use crate::fault::{Fault, FormErrors, Validate};
use crate::middleware::trace::TraceHandle;
use crate::request::Request;
use crate::response::Response;
use crate::settings::{EnvelopeFactory, Settings};

pub struct Context {
    settings: Arc<Settings>,
    generation: u64,
    handler_name: &'static str,

    request: Request,
    pub(crate) response: Response,

    rid: String,
    trace: Option<TraceHandle>,
    log_fields: Vec<(String, Value)>,
    log_session_keys: Vec<String>,
    log_context_keys: Vec<String>,
    envelope: Option<EnvelopeFactory>,

    terminated: bool,
    pub(crate) written: bool,
    err: Option<Error>,
}

impl Context {
    /// A blank context seeded only with the deployment settings.
    pub(crate) fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            generation: 0,
            handler_name: "",
            request: Request::default(),
            response: Response::default(),
            rid: String::new(),
            trace: None,
            log_fields: Vec::new(),
            log_session_keys: Vec::new(),
            log_context_keys: Vec::new(),
            envelope: None,
            terminated: false,
            written: false,
            err: None,
        }
    }

    /// Installs a new request and wipes every per-request field.
    pub(crate) fn reset(&mut self, request: Request, generation: u64) {
        self.generation = generation;
        self.handler_name = "";
        self.request = request;
        self.response = Response::default();
        self.rid.clear();
        self.trace = None;
        self.log_fields.clear();
        self.log_session_keys.clear();
        self.log_context_keys.clear();
        self.envelope = None;
        self.terminated = false;
        self.written = false;
        self.err = None;
    }

    /// Runs when the context goes back to the pool. A span the trace
    /// middleware never got to finish (the request was cancelled) is closed
    /// here with whatever error was recorded.
    pub(crate) fn teardown(&mut self) {
        if let Some(trace) = self.trace.take() {
            trace.finish(self.err.as_ref(), true);
            trace.cancel();
        }
        self.request = Request::default();
        self.response = Response::default();
    }

    // ── Deployment settings ──────────────────────────────────────────────────

    pub fn settings(&self) -> &Settings { &self.settings }
    pub fn env(&self) -> &str { self.settings.env() }
    pub fn is_production(&self) -> bool { self.settings.is_production() }

    /// Pool generation of this occupancy. Unique per acquisition.
    pub fn generation(&self) -> u64 { self.generation }

    /// Type name of the business handler serving this request.
    pub fn handler_name(&self) -> &'static str { self.handler_name }

    pub(crate) fn set_handler_name(&mut self, name: &'static str) {
        self.handler_name = name;
    }

    // ── Request / response ───────────────────────────────────────────────────

    pub fn request(&self) -> &Request { &self.request }
    pub fn response(&self) -> &Response { &self.response }

    pub fn status(&self) -> StatusCode { self.response.status() }

    pub fn set_status(&mut self, status: StatusCode) {
        self.response.set_status(status);
    }

    pub(crate) fn take_response(&mut self) -> Response {
        std::mem::take(&mut self.response)
    }

    /// The media type the client sent its request as: `Content-Type` without
    /// parameters, `None` when absent or blank. Clients speaking a structured
    /// format get structured error bodies back.
    pub fn content_type_requested(&self) -> Option<&str> {
        self.request
            .header("content-type")
            .map(|v| v.split(';').next().unwrap_or_default().trim())
            .filter(|v| !v.is_empty())
    }

    // ── Body readers ─────────────────────────────────────────────────────────

    /// Decodes the JSON body. An empty body yields `T::default()`.
    pub fn json<T: DeserializeOwned + Default>(&self) -> Result<T, Fault> {
        if self.request.body().is_empty() {
            return Ok(T::default());
        }
        Ok(serde_json::from_slice(self.request.body())?)
    }

    /// Decodes the JSON body and runs its field rules.
    pub fn valid_json<T: DeserializeOwned + Default + Validate>(&self) -> Result<T, Fault> {
        let value: T = self.json()?;
        value.validate()?;
        Ok(value)
    }

    /// Decodes an urlencoded form from the body, or the query string for
    /// body-less requests.
    pub fn form<T: DeserializeOwned>(&self) -> Result<T, Fault> {
        let raw: &[u8] = if self.request.body().is_empty() {
            self.request.uri().query().unwrap_or_default().as_bytes()
        } else {
            self.request.body()
        };
        serde_urlencoded::from_bytes(raw).map_err(|e| Fault::Form(FormErrors::from(e)))
    }

    // ── Correlation / trace ──────────────────────────────────────────────────

    /// Correlation id, empty until the trace middleware ran.
    pub fn rid(&self) -> &str { &self.rid }

    pub(crate) fn set_rid(&mut self, rid: String) {
        self.rid = rid;
    }

    pub fn trace(&self) -> Option<&TraceHandle> { self.trace.as_ref() }

    pub(crate) fn attach_trace(&mut self, handle: TraceHandle) {
        self.trace = Some(handle);
    }

    /// Finishes the request span with the recorded error. No-op once finished.
    pub(crate) fn finish_trace(&mut self) {
        if let Some(trace) = &self.trace {
            trace.finish(self.err.as_ref(), false);
        }
    }

    // ── Log bag ──────────────────────────────────────────────────────────────

    pub fn add_log_field(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.log_fields.push((key.into(), value.into()));
    }

    pub fn add_log_fields<I, K, V>(&mut self, fields: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.log_fields.extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
    }

    pub fn log_fields(&self) -> &[(String, Value)] { &self.log_fields }

    /// Session keys the request logger may copy into its record.
    pub fn set_log_session_keys<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, keys: I) {
        self.log_session_keys = keys.into_iter().map(Into::into).collect();
    }

    pub fn log_session_keys(&self) -> &[String] { &self.log_session_keys }

    /// Context keys the request logger may copy into its record.
    pub fn set_log_context_keys<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, keys: I) {
        self.log_context_keys = keys.into_iter().map(Into::into).collect();
    }

    pub fn log_context_keys(&self) -> &[String] { &self.log_context_keys }

    // ── Envelopes ────────────────────────────────────────────────────────────

    /// Overrides the envelope factory for this request only.
    pub fn set_envelope<F>(&mut self, factory: F)
    where
        F: Fn() -> Box<dyn Envelope> + Send + Sync + 'static,
    {
        self.envelope = Some(Arc::new(factory));
    }

    /// A fresh envelope from the request override or the deployment default.
    pub fn new_envelope(&self) -> Box<dyn Envelope> {
        match &self.envelope {
            Some(factory) => factory(),
            None => (self.settings.envelope_factory())(),
        }
    }

    // ── Termination ──────────────────────────────────────────────────────────

    /// Whether the pipeline was terminated; downstream work must not run.
    pub fn is_terminated(&self) -> bool { self.terminated }

    /// Terminates the pipeline. Idempotent.
    pub fn terminate(&mut self) {
        self.terminated = true;
    }

    /// Whether the response body has been written.
    pub fn is_written(&self) -> bool { self.written }

    /// The error recorded for this request, if any.
    pub fn err(&self) -> Option<&Error> { self.err.as_ref() }

    /// Records `err`, replacing any earlier one.
    pub fn set_err(&mut self, err: Error) {
        self.err = Some(err);
    }

    /// Records `err` unless one is already recorded.
    pub(crate) fn record_err(&mut self, err: &Error) {
        if self.err.is_none() {
            self.err = Some(err.clone());
        }
    }
}
