//! Context pool.
//!
//! Contexts are recycled instead of allocated per request. The free list is
//! the only structure shared between concurrent requests; a borrowed
//! [`Pooled`] context is owned by exactly one request until it drops.
//!
//! Each acquisition stamps the context with a fresh generation and wipes
//! every per-request field, so no state crosses from one occupant to the
//! next. Dropping the guard is the release: it runs even when the request
//! future is cancelled mid-flight.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::context::Context;
use crate::request::Request;
use crate::settings::Settings;

/// Idle contexts kept around by default.
pub const DEFAULT_MAX_IDLE: usize = 1024;

/// A shared pool of request contexts. Cloning shares the pool.
#[derive(Clone)]
pub struct ContextPool {
    shared: Arc<Shared>,
}

struct Shared {
    settings: Arc<Settings>,
    free: Mutex<Vec<Box<Context>>>,
    generation: AtomicU64,
    max_idle: usize,
}

impl ContextPool {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self::with_max_idle(settings, DEFAULT_MAX_IDLE)
    }

    /// A pool that keeps at most `max_idle` released contexts.
    pub fn with_max_idle(settings: Arc<Settings>, max_idle: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                free: Mutex::new(Vec::new()),
                generation: AtomicU64::new(0),
                max_idle,
            }),
        }
    }

    pub fn settings(&self) -> &Arc<Settings> { &self.shared.settings }

    /// Borrows a context for `request`, allocating when the free list is empty.
    pub fn acquire(&self, request: Request) -> Pooled {
        let recycled = self.shared.free.lock().pop();
        let mut ctx = recycled.unwrap_or_else(|| Box::new(Context::new(Arc::clone(&self.shared.settings))));
        let generation = self.shared.generation.fetch_add(1, Ordering::Relaxed) + 1;
        ctx.reset(request, generation);
        Pooled { ctx: Some(ctx), shared: Arc::clone(&self.shared) }
    }

    /// Number of contexts waiting on the free list.
    pub fn idle(&self) -> usize {
        self.shared.free.lock().len()
    }
}

/// A context on loan from a [`ContextPool`]. Returned when dropped.
///
/// Release lives in `Drop` rather than in an explicit call at the end of
/// dispatch. When hyper drops a request future (client gone, connection
/// reset) nothing after the current `.await` runs, but the guard still
/// drops, so the context is torn down and returned either way. The context
/// is boxed so moving it in and out of the free list copies one pointer.
pub struct Pooled {
    ctx: Option<Box<Context>>,
    shared: Arc<Shared>,
}

impl Pooled {
    /// Returns the context to the pool. Same as dropping the guard.
    pub fn release(self) {}
}

impl Deref for Pooled {
    type Target = Context;

    fn deref(&self) -> &Context {
        // Only `Drop` takes the context out.
        self.ctx.as_deref().unwrap_or_else(|| unreachable!("context used after release"))
    }
}

impl DerefMut for Pooled {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx.as_deref_mut().unwrap_or_else(|| unreachable!("context used after release"))
    }
}

impl Drop for Pooled {
    fn drop(&mut self) {
        let Some(mut ctx) = self.ctx.take() else { return };
        // Wipe before the lock: the next occupant must never see this
        // request's body, fields or error.
        ctx.teardown();
        let mut free = self.shared.free.lock();
        // Past the cap the context is simply freed.
        if free.len() < self.shared.max_idle {
            free.push(ctx);
        }
    }
}
