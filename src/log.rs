//! Request logging capability.
//!
//! The pipeline calls [`RequestLogger::log`] once per completed request,
//! after the response is final. What ends up where is the sink's business;
//! the context guarantees the correlation id, recorded error, status and
//! accumulated log fields are in place.

use serde_json::{Map, Value};
use tracing::info;

use crate::context::Context;

/// `tracing` target of access records.
pub const ACCESS_TARGET: &str = "tsu_lifecycle::access";

pub trait RequestLogger: Send + Sync + 'static {
    fn log(&self, ctx: &Context);
}

/// Default sink: one `tracing` event per request.
#[derive(Default)]
pub struct TracingLogger;

impl RequestLogger for TracingLogger {
    fn log(&self, ctx: &Context) {
        let req = ctx.request();
        let fields: Map<String, Value> = ctx.log_fields().iter().cloned().collect();
        let err = ctx.err();
        info!(
            target: ACCESS_TARGET,
            app = ctx.settings().application_name(),
            rid = ctx.rid(),
            method = %req.method(),
            path = req.path(),
            ip = %req.ip(),
            status = ctx.status().as_u16(),
            error.code = err.map(|e| e.code()),
            error.message = err.map(|e| e.message()),
            error.system = err.map(|e| e.is_system()),
            fields = %serde_json::Value::Object(fields),
            "request completed"
        );
    }
}
