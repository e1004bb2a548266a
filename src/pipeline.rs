//! Request pipeline.
//!
//! Binds a context pool, the middleware chain, one business handler and the
//! request logger. [`Pipeline::dispatch`] is the whole lifecycle of one
//! request:
//!
//! ```text
//! acquire context ─► Trace ─► Fallback ─► Recover ─► user layers ─► handler
//!                                                                     │
//! release context ◄─ log request ◄──────────── success / error ◄──────┘
//! ```

use std::sync::Arc;

use http::header::HeaderName;

use crate::handler::{Endpoint, Handler};
use crate::log::{RequestLogger, TracingLogger};
use crate::middleware::{Fallback, Middleware, Next, Recover, Trace};
use crate::pool::{ContextPool, DEFAULT_MAX_IDLE};
use crate::request::Request;
use crate::response::Response;
use crate::settings::Settings;
use crate::tracer::Tracer;

pub struct Pipeline {
    pool: ContextPool,
    chain: Vec<Arc<dyn Middleware>>,
    endpoint: Endpoint,
    logger: Arc<dyn RequestLogger>,
}

impl Pipeline {
    pub fn builder(settings: Settings) -> PipelineBuilder {
        PipelineBuilder {
            settings,
            tracer: None,
            request_id_header: None,
            layers: Vec::new(),
            logger: None,
            max_idle: DEFAULT_MAX_IDLE,
        }
    }

    pub fn pool(&self) -> &ContextPool { &self.pool }

    /// Runs one request through the chain and returns its response.
    pub async fn dispatch(&self, request: Request) -> Response {
        let mut ctx = self.pool.acquire(request);
        ctx.set_handler_name(self.endpoint.name());

        Next::new(&self.chain, &self.endpoint).run(&mut ctx).await;

        self.logger.log(&ctx);
        ctx.take_response()
    }
}

pub struct PipelineBuilder {
    settings: Settings,
    tracer: Option<Arc<dyn Tracer>>,
    request_id_header: Option<HeaderName>,
    layers: Vec<Arc<dyn Middleware>>,
    logger: Option<Arc<dyn RequestLogger>>,
    max_idle: usize,
}

impl PipelineBuilder {
    /// Starts a span per request on `tracer`.
    pub fn tracer(mut self, tracer: impl Tracer) -> Self {
        self.tracer = Some(Arc::new(tracer));
        self
    }

    /// Reads inbound correlation ids from `header` instead of `x-request-id`.
    pub fn request_id_header(mut self, header: HeaderName) -> Self {
        self.request_id_header = Some(header);
        self
    }

    /// Appends a middleware inside the recovery boundary.
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.layers.push(Arc::new(middleware));
        self
    }

    pub fn logger(mut self, logger: impl RequestLogger) -> Self {
        self.logger = Some(Arc::new(logger));
        self
    }

    pub fn max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    pub fn build(self, handler: impl Handler) -> Pipeline {
        let mut trace = Trace::new(self.tracer);
        if let Some(header) = self.request_id_header {
            trace = trace.header(header);
        }

        let mut chain: Vec<Arc<dyn Middleware>> =
            vec![Arc::new(trace), Arc::new(Fallback::new()), Arc::new(Recover::new())];
        chain.extend(self.layers);

        Pipeline {
            pool: ContextPool::with_max_idle(Arc::new(self.settings), self.max_idle),
            chain,
            endpoint: Endpoint::new(handler),
            logger: self.logger.unwrap_or_else(|| Arc::new(TracingLogger)),
        }
    }
}
