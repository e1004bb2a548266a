//! Rate-limit binding.
//!
//! The limiting algorithm lives elsewhere; this layer asks a [`RateLimiter`]
//! about the client IP and routes a rejection through the same
//! classification and emission path as any other error. Browser page loads
//! (no `Referer`) get the error view, API calls get an envelope.

use std::sync::Arc;

use crate::context::Context;
use crate::error::Error;
use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};

/// Decides whether `identity` may proceed.
pub trait RateLimiter: Send + Sync + 'static {
    fn check(&self, identity: &str) -> Result<(), Error>;
}

pub struct RateLimit {
    limiter: Arc<dyn RateLimiter>,
}

impl RateLimit {
    pub fn new(limiter: impl RateLimiter) -> Self {
        Self { limiter: Arc::new(limiter) }
    }
}

impl Middleware for RateLimit {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let identity = ctx.request().ip();
            match self.limiter.check(&identity) {
                Ok(()) => next.run(ctx).await,
                Err(err) if ctx.request().header("referer").is_some() => ctx.error(err),
                Err(err) => ctx.error_view(err),
            }
        })
    }
}
