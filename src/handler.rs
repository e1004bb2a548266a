//! Handler trait and type erasure.
//!
//! # How handlers are stored
//!
//! A [`Pipeline`](crate::Pipeline) serves exactly one business handler, but
//! the handler's concrete type must not leak into the pipeline's type. The
//! handler is wrapped and stored behind a trait object:
//!
//! ```text
//! fn get_user(ctx: &mut Context) -> BoxFuture<'_, HandlerResult>   ← user writes this
//!        ↓ Pipeline::builder(..).build(get_user)
//! Endpoint::new(get_user)                                          ← Handler blanket impl
//!        ↓  stored as BoxedHandler = Arc<dyn Handler>
//! endpoint.call(ctx) at request time                               ← one vtable dispatch
//!        ↓
//! Ok(reply) → ctx.success(reply)   Err(fault) → ctx.error(fault)
//! ```
//!
//! The handler borrows the context mutably for the duration of its future,
//! which is why the future type carries the borrow's lifetime. The future
//! of an `async fn(&mut Context)` is an anonymous type that a
//! `for<'a> Fn(&'a mut Context) -> F` bound cannot tie to `'a`, so handlers
//! return a [`BoxFuture<'a, _>`](BoxFuture) whose lifetime names the borrow.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use crate::context::Context;
use crate::envelope::{Envelope, Payload};
use crate::fault::Fault;

/// A heap-allocated, type-erased future borrowing for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a business handler resolves to.
pub type HandlerResult = Result<Reply, Fault>;

// ── Reply ─────────────────────────────────────────────────────────────────────

/// A successful handler outcome.
pub enum Reply {
    /// Payload for a success envelope. `None` omits the data field.
    Data(Option<Payload>),
    /// A fully built envelope, written as-is (the correlation id is still
    /// stamped).
    Envelope(Box<dyn Envelope>),
}

impl Reply {
    /// Success with no payload.
    pub fn none() -> Self { Self::Data(None) }

    /// Success carrying `value` serialized. Values that serialize to `null`
    /// (`None`, `()`) are treated as no payload.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> HandlerResult {
        let payload = Payload::json(value)?;
        Ok(Self::Data(Some(payload).filter(|p| !p.is_nil())))
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Data(Some(Payload::Text(text.into())))
    }

    pub fn bytes(bytes: impl Into<Bytes>) -> Self {
        Self::Data(Some(Payload::Bytes(bytes.into())))
    }

    pub fn envelope(envelope: impl Envelope + 'static) -> Self {
        Self::Envelope(Box::new(envelope))
    }
}

impl From<Payload> for Reply {
    fn from(p: Payload) -> Self { Self::Data(Some(p)) }
}

impl From<Option<Payload>> for Reply {
    fn from(p: Option<Payload>) -> Self { Self::Data(p) }
}

impl From<Box<dyn Envelope>> for Reply {
    fn from(e: Box<dyn Envelope>) -> Self { Self::Envelope(e) }
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid business handler.
///
/// You never implement this yourself. It is satisfied by any function with
/// the signature:
///
/// ```text
/// fn name(ctx: &mut Context) -> BoxFuture<'_, HandlerResult>
/// ```
///
/// The trait is **sealed** (via the private `Sealed` supertrait): only the
/// blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult>;
}

mod private {
    pub trait Sealed {}
}

impl<F> private::Sealed for F where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static
{
}

impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult> {
        (self)(ctx)
    }
}

/// A type-erased handler shared across concurrent requests.
pub(crate) type BoxedHandler = Arc<dyn Handler>;

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// The innermost step of every chain: runs the handler and emits its outcome.
pub(crate) struct Endpoint {
    handler: BoxedHandler,
    name: &'static str,
}

impl Endpoint {
    pub(crate) fn new<H: Handler>(handler: H) -> Self {
        Self { handler: Arc::new(handler), name: std::any::type_name::<H>() }
    }

    pub(crate) fn name(&self) -> &'static str { self.name }

    /// Runs the handler on a reborrow, then emits on the original borrow.
    /// The handler's future must be done with the context before `success`
    /// or `error` can write to it.
    pub(crate) fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            match self.handler.call(&mut *ctx).await {
                Ok(reply) => ctx.success(reply),
                Err(fault) => ctx.error(fault),
            }
        })
    }
}
