//! Host adapter: hyper server and graceful shutdown.
//!
//! Accepts connections, buffers each request body, runs the request through a
//! [`Pipeline`] and hands the finished response back to hyper. On SIGTERM or
//! Ctrl-C the accept loop stops, in-flight connections drain, and
//! [`Server::serve`] returns.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::error::ServeError;
use crate::pipeline::Pipeline;
use crate::request::Request;
use crate::response::Response;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust,no_run
    /// use tsu_lifecycle::Server;
    /// let server = Server::bind(([0, 0, 0, 0], 3000).into());
    /// ```
    pub fn bind(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Starts accepting connections and dispatching them through `pipeline`.
    ///
    /// Returns only after a full graceful shutdown.
    pub async fn serve(self, pipeline: Pipeline) -> Result<(), ServeError> {
        let listener = TcpListener::bind(self.addr).await?;
        // One pipeline (and so one context pool) for every connection task.
        let pipeline = Arc::new(pipeline);

        info!(addr = %self.addr, "lifecycle server listening");

        // Every connection task lives in the JoinSet so shutdown can wait for
        // all of them. Dropping a JoinSet aborts its tasks, so it must outlive
        // the drain loop below.
        let mut tasks = tokio::task::JoinSet::new();

        // Polled once per loop iteration by reference, so it must not move
        // between polls: pin it on the stack.
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Arms are checked top to bottom. Shutdown comes first so a
                // signal stops accepting even while connections keep queueing.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let pipeline = Arc::clone(&pipeline);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on this connection. Each
                        // call dispatches on its own pooled context.
                        let svc = service_fn(move |req| {
                            let pipeline = Arc::clone(&pipeline);
                            async move { dispatch(pipeline, req, remote_addr).await }
                        });

                        // HTTP/1.1 or HTTP/2, whichever the client speaks.
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connections so the set stays bounded by the
                // live connection count on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Drain: in-flight requests finish, run their logger and release
        // their contexts before we return.
        while tasks.join_next().await.is_some() {}

        info!("lifecycle server stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Buffers one request and runs it through the pipeline.
///
/// The body is collected up front: body readers on the context decode from a
/// byte slice, and a half-read body must never reach a handler. A transport
/// error while reading is answered with a bare 400 without touching the pool.
///
/// The error type is [`Infallible`]: the pipeline turns every failure,
/// panics included, into a response, so hyper never sees an error.
async fn dispatch(
    pipeline: Arc<Pipeline>,
    req: hyper::Request<hyper::body::Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(peer = %remote_addr, "failed to read request body: {e}");
            return Ok(Response::with_status(StatusCode::BAD_REQUEST).into_inner());
        }
    };

    let request = Request::new(http::Request::from_parts(parts, body), Some(remote_addr));
    Ok(pipeline.dispatch(request).await.into_inner())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on SIGTERM or Ctrl-C. A handler that cannot be installed never
/// fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
