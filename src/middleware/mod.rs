//! Middleware layer.
//!
//! Middleware wraps the rest of the chain and is the place for cross-cutting
//! concerns. A [`Pipeline`](crate::Pipeline) always runs, outermost first:
//!
//! 1. [`trace::Trace`]: correlation id, request span and trace handle
//! 2. [`fallback::Fallback`]: renders error statuses nobody wrote a body for
//! 3. [`recover::Recover`]: turns panics into recorded system faults
//! 4. user middleware, in registration order (e.g. [`rate_limit::RateLimit`])
//! 5. the business handler
//!
//! Implement [`Middleware`] for your own layers. Call `next.run(ctx)` to
//! continue the chain, or return without calling it to short-circuit.

use std::sync::Arc;

use crate::context::Context;
use crate::handler::{BoxFuture, Endpoint};

pub mod fallback;
pub mod rate_limit;
pub mod recover;
pub mod trace;

pub use fallback::Fallback;
pub use rate_limit::{RateLimit, RateLimiter};
pub use recover::{Recover, RecoveryState};
pub use trace::{Trace, TraceHandle};

/// One layer of the request chain.
pub trait Middleware: Send + Sync + 'static {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, ()>;
}

/// The remainder of the chain after the current middleware.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
    endpoint: &'a Endpoint,
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn Middleware>], endpoint: &'a Endpoint) -> Self {
        Self { rest: chain, endpoint }
    }

    /// Runs the rest of the chain.
    ///
    /// `Next` itself only borrows the chain for `'a`, the lifetime of the
    /// whole dispatch. The context is passed in separately for a shorter
    /// `'b`, so a layer hands the rest of the chain a reborrow
    /// (`next.run(&mut *ctx)`) and gets its own `&mut Context` back once the
    /// returned future completes. That is what lets [`Recover`] and
    /// [`Fallback`] inspect the context after the inner layers have run.
    pub fn run<'b>(self, ctx: &'b mut Context) -> BoxFuture<'b, ()>
    where
        'a: 'b,
    {
        // Peel one layer per call; an empty remainder means the endpoint.
        match self.rest.split_first() {
            Some((head, rest)) => head.handle(ctx, Next { rest, endpoint: self.endpoint }),
            None => self.endpoint.call(ctx),
        }
    }
}
