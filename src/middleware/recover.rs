//! Panic recovery.
//!
//! The last line of defence around everything downstream. A panic inside the
//! chain is caught at this boundary and moves the request through:
//!
//! ```text
//! Running ──(no panic)───────────────────────────────► Completed
//!    │
//!    └─(panic)─► Recovering ──(response already written)─► Recovered
//!                    │
//!                    └─ normalize, diagnose, record,
//!                       status 500, terminate ───────────► Recovered
//! ```
//!
//! A request whose response was already written before the panic is left
//! alone: no second response, no second "unhandled" record. Being merely
//! terminated is not enough. Every write path terminates first and only
//! then builds its envelope, so a panic inside a custom envelope or view
//! renderer arrives here terminated but unwritten, and must still become a
//! 500.
//!
//! The boundary is `futures::FutureExt::catch_unwind` over the rest of the
//! chain. The chain's `&mut Context` is not `UnwindSafe` and is asserted to
//! be: after a panic the only reader of the half-updated context is
//! `recover`, which checks `written` and then overwrites status and error.
//! Nothing that happens while recovering may escape as a new panic.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt as _;
use http::StatusCode;
use tracing::{error, trace};

use crate::classify::DIAGNOSTIC_TARGET;
use crate::context::Context;
use crate::error::Error;
use crate::fault::Fault;
use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::settings::ErrorCategory;

/// Frames belonging to the capture machinery, hidden from recovered stacks.
const STACK_SKIP: usize = 3;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecoveryState {
    Running,
    Completed,
    Recovering,
    Recovered,
}

/// The recovery middleware.
#[derive(Default)]
pub struct Recover;

impl Recover {
    pub fn new() -> Self { Self }
}

impl Middleware for Recover {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            trace!(rid = ctx.rid(), state = ?RecoveryState::Running, "entering recovery boundary");
            let outcome = AssertUnwindSafe(next.run(&mut *ctx)).catch_unwind().await;
            let state = match outcome {
                Ok(()) => RecoveryState::Completed,
                Err(payload) => recover(ctx, payload),
            };
            trace!(rid = ctx.rid(), ?state, "recovery boundary exited");
        })
    }
}

/// Drives `Recovering` to `Recovered` for one caught panic.
pub(crate) fn recover(ctx: &mut Context, payload: Box<dyn Any + Send>) -> RecoveryState {
    trace!(rid = ctx.rid(), state = ?RecoveryState::Recovering, "caught panic");

    if ctx.is_written() {
        return RecoveryState::Recovered;
    }

    let handled = std::panic::catch_unwind(AssertUnwindSafe(|| {
        let (kind, mut err) = normalize(payload);
        if err.code().is_empty() {
            err.set_code(ctx.settings().codes().get(ErrorCategory::System));
        }
        if !ctx.is_production() {
            error!(
                target: DIAGNOSTIC_TARGET,
                kind,
                handler = ctx.handler_name(),
                "Recover: {kind}\n{}\n{}",
                ctx.handler_name(),
                err.report()
            );
        }
        err.reported = true;
        ctx.set_err(err);
    }));
    if handled.is_err() {
        // Best effort only; the status below must still be set.
        error!(target: DIAGNOSTIC_TARGET, "panic while recovering from a panic");
        ctx.set_err(Error::system("unrecoverable panic").with_code(&ctx.settings().codes().system));
    }

    ctx.set_status(StatusCode::INTERNAL_SERVER_ERROR);
    ctx.terminate();
    RecoveryState::Recovered
}

/// Turns a panic payload into a system error with the recovery-point stack.
/// Returns the payload's type name alongside.
fn normalize(payload: Box<dyn Any + Send>) -> (&'static str, Error) {
    let (kind, err) = match payload.downcast::<Error>() {
        Ok(err) => ("tsu_lifecycle::Error", *err),
        Err(payload) => match payload.downcast::<Fault>() {
            Ok(fault) => ("tsu_lifecycle::Fault", fault_into_error(*fault)),
            Err(payload) => match payload.downcast::<String>() {
                Ok(msg) => ("alloc::string::String", Error::new(*msg)),
                Err(payload) => match payload.downcast::<&'static str>() {
                    Ok(msg) => ("&str", Error::new(*msg)),
                    Err(_) => ("Box<dyn Any + Send>", Error::new("panic with a non-string payload")),
                },
            },
        },
    };
    (kind, err.into_system().with_forced_stack(STACK_SKIP))
}

fn fault_into_error(fault: Fault) -> Error {
    match fault {
        Fault::Error(e) => e,
        Fault::Syntax(e) => Error::wrap(e),
        Fault::Validation(v) => Error::wrap(v),
        Fault::Form(e) => Error::wrap(e),
        Fault::Opaque { source, .. } => Error::wrap_boxed(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    use crate::context::tests::context_with;
    use crate::settings::Settings;

    fn ctx() -> Context {
        context_with(Settings::default(), http::Request::get("/").body(Bytes::new()).unwrap())
    }

    fn payload<T: Any + Send>(value: T) -> Box<dyn Any + Send> {
        Box::new(value)
    }

    #[test]
    fn string_panic_becomes_system_fault() {
        let mut ctx = ctx();
        assert_eq!(recover(&mut ctx, payload("boom")), RecoveryState::Recovered);
        let err = ctx.err().unwrap();
        assert_eq!(err.message(), "boom");
        assert!(err.is_system());
        assert!(err.stack().is_some());
        assert!(err.reported);
        assert_eq!(ctx.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(ctx.is_terminated());
    }

    #[test]
    fn formatted_panic_message_is_kept() {
        let mut ctx = ctx();
        recover(&mut ctx, payload(format!("index {} out of range", 4)));
        assert_eq!(ctx.err().unwrap().message(), "index 4 out of range");
    }

    #[test]
    fn error_payload_keeps_code_and_chain() {
        let mut ctx = ctx();
        recover(&mut ctx, payload(Error::new("stock negative").with_code("409").chain("reserve")));
        let err = ctx.err().unwrap();
        assert_eq!(err.code(), "409");
        assert_eq!(err.chain_links(), ["reserve".to_owned()]);
        assert!(err.is_system());
    }

    #[test]
    fn opaque_payload_has_generic_message() {
        let mut ctx = ctx();
        recover(&mut ctx, payload(42_u64));
        assert_eq!(ctx.err().unwrap().message(), "panic with a non-string payload");
    }

    #[test]
    fn written_request_is_left_alone() {
        let mut ctx = ctx();
        ctx.write_text("done");
        assert_eq!(recover(&mut ctx, payload("late")), RecoveryState::Recovered);
        assert!(ctx.err().is_none());
        assert_eq!(ctx.status(), StatusCode::OK);
        assert_eq!(ctx.response().body(), b"done");
    }

    #[test]
    fn terminated_but_unwritten_request_is_recovered() {
        let mut ctx = ctx();
        ctx.terminate();
        assert_eq!(recover(&mut ctx, payload("mid-write")), RecoveryState::Recovered);
        assert_eq!(ctx.err().unwrap().message(), "mid-write");
        assert_eq!(ctx.err().unwrap().code(), "100");
        assert_eq!(ctx.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
