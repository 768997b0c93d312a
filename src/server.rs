//! HTTP server and graceful shutdown.
//!
//! Each request is buffered, routed, and driven through a pooled
//! [`Context`](crate::Context) writing into a [`Recorder`]; the recording
//! becomes the hyper response.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! The server reacts by:
//! 1. Immediately stopping `listener.accept()`, so no new connections are made.
//! 2. Letting every in-flight connection task run to completion.
//! 3. Returning from [`Server::serve`], which lets `main` exit cleanly.

use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::context::Incoming;
use crate::error::Error;
use crate::middleware::panic_message;
use crate::params::Params;
use crate::pool::ContextPool;
use crate::response::Recorder;
use crate::router::Router;

/// The HTTP server.
pub struct Server {
    config: Config,
}

/// Drives buffered requests through the router with pooled contexts.
///
/// [`Server`] shares one behind an `Arc` across all connection tasks; it can
/// also be used on its own to serve requests without a socket.
pub struct Dispatcher {
    router: Router,
    pool: Arc<ContextPool>,
    request_id_header: HeaderName,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called, with default settings otherwise.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    ///
    /// ```rust,no_run
    /// use keel::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        let addr = addr.parse().expect("invalid socket address");
        Self { config: Config { addr, ..Config::default() } }
    }

    pub fn with_config(config: Config) -> Self {
        Self { config }
    }

    /// Starts accepting connections and dispatching them through `router`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        let Config { addr, pool_size, request_id_header } = self.config;

        let app = Arc::new(Dispatcher::new(router, pool_size, &request_id_header)?);

        let listener = TcpListener::bind(addr).await?;
        info!(%addr, pool_size, "keel listening");

        // Every spawned connection task is tracked so shutdown can wait for it.
        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Check shutdown first so a SIGTERM stops accepting at once,
                // even if more connections are queued.
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

                    let app = Arc::clone(&app);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| {
                            let app = Arc::clone(&app);
                            async move { serve_one(app, req).await }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the set does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("keel stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

impl Dispatcher {
    /// # Errors
    ///
    /// Fails if `request_id_header` is not a valid header name.
    pub fn new(router: Router, pool_size: usize, request_id_header: &str) -> Result<Self, Error> {
        Ok(Self {
            router,
            pool: ContextPool::new(pool_size),
            request_id_header: HeaderName::try_from(request_id_header)?,
        })
    }

    pub fn from_config(router: Router, config: &Config) -> Result<Self, Error> {
        Self::new(router, config.pool_size, &config.request_id_header)
    }

    pub fn pool(&self) -> &Arc<ContextPool> {
        &self.pool
    }

    /// Routes one request through a leased context and produces one response.
    ///
    /// A panic that escaped every middleware becomes a bare `500` when
    /// nothing was sent yet; otherwise the partial response is returned.
    pub async fn dispatch(&self, request: http::Request<Bytes>) -> http::Response<Full<Bytes>> {
        let request_id = request
            .headers()
            .get(&self.request_id_header)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let (route, path_params) = self.router.lookup(request.method(), request.uri().path());
        let params = Params::new(path_params, request.uri().query());

        let recorder = Recorder::new();
        let mut ctx = self.pool.checkout();
        let incoming = Incoming { request, params, request_id: request_id.clone() };

        let outcome = AssertUnwindSafe(ctx.run(recorder.clone(), incoming, &route))
            .catch_unwind()
            .await;
        drop(ctx);

        let mut res = match outcome {
            Ok(()) => recorder.into_response(),
            Err(panic) => {
                error!(request_id = %request_id, "request panicked: {}", panic_message(&*panic));
                if recorder.head_count() == 0 {
                    bare(StatusCode::INTERNAL_SERVER_ERROR)
                } else {
                    recorder.into_response()
                }
            }
        };

        if let Ok(value) = HeaderValue::try_from(request_id) {
            res.headers_mut().insert(self.request_id_header.clone(), value);
        }
        res
    }
}

/// Buffers the body of a hyper request and dispatches it.
///
/// Unreadable bodies are answered with `400`, so hyper never sees an error.
async fn serve_one(
    app: Arc<Dispatcher>,
    req: hyper::Request<hyper::body::Incoming>,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("failed to read request body: {e}");
            return Ok(bare(StatusCode::BAD_REQUEST));
        }
    };

    Ok(app.dispatch(http::Request::from_parts(parts, body)).await)
}

fn bare(status: StatusCode) -> http::Response<Full<Bytes>> {
    let mut res = http::Response::new(Full::new(Bytes::new()));
    *res.status_mut() = status;
    res
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** and **SIGINT** (Ctrl-C).
/// On Windows only Ctrl-C is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
