//! Status fallback.
//!
//! Runs after the rest of the chain. When the request ends with an error
//! status (a recovered panic, a middleware that only set a status) and no
//! body was written, it renders one:
//!
//! - the request declared a content type: the recorded error, or a
//!   synthetic `"<status> <reason>"` error, goes through [`Context::error`]
//!   as an envelope;
//! - otherwise the canonical reason phrase is written as plain text.
//!
//! The status itself is never changed, except when rendering panics.
//!
//! This layer sits outside [`Recover`](super::Recover) so it sees the status
//! recovery sets. Rendering calls user code (envelope factories, view
//! renderers), so it carries its own unwind guard: a panic there records a
//! system error and leaves a plain 500.

use std::panic::AssertUnwindSafe;

use http::StatusCode;
use tracing::error;

use crate::classify::DIAGNOSTIC_TARGET;
use crate::context::Context;
use crate::error::Error;
use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::settings::ErrorCategory;

#[derive(Default)]
pub struct Fallback;

impl Fallback {
    pub fn new() -> Self { Self }
}

impl Middleware for Fallback {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            next.run(&mut *ctx).await;
            render_guarded(ctx);
        })
    }
}

fn render_guarded(ctx: &mut Context) {
    if std::panic::catch_unwind(AssertUnwindSafe(|| render_unwritten(ctx))).is_ok() {
        return;
    }

    error!(target: DIAGNOSTIC_TARGET, rid = ctx.rid(), "panic while rendering fallback response");
    let err = Error::system("panic while rendering fallback response")
        .with_code(ctx.settings().codes().get(ErrorCategory::System));
    ctx.set_err(err);
    ctx.set_status(StatusCode::INTERNAL_SERVER_ERROR);
    ctx.write_text(StatusCode::INTERNAL_SERVER_ERROR.canonical_reason().unwrap_or_default());
}

fn render_unwritten(ctx: &mut Context) {
    let status = ctx.status();
    if ctx.is_written() || !(status.is_client_error() || status.is_server_error()) {
        return;
    }

    let reason = status.canonical_reason().unwrap_or_default();
    let err = ctx
        .err()
        .cloned()
        .unwrap_or_else(|| Error::new(format!("{} {}", status.as_u16(), reason)));

    if ctx.content_type_requested().is_some() {
        ctx.error(err);
    } else {
        ctx.record_err(&err);
        ctx.write_text(reason);
    }
}
