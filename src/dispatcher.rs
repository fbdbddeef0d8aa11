//! The request dispatcher.
//!
//! [`App`] ties a [`Router`] to the application-wide middleware chain and
//! turns one raw `http::Request` into exactly one `http::Response`:
//!
//! ```text
//! read body (limit) → parse query → eager body parse → route lookup
//!        ↓
//! global chain → route chain → handler       (panic guard)
//!        ↓
//! finalize: finished response, or translated error
//! ```
//!
//! The request deadline starts before the body is read and covers every
//! step up to finalize.
//!
//! Failures anywhere in that pipeline end as a single JSON error response.
//! Nothing here panics on bad input and nothing is returned to hyper as an
//! error.

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use http_body_util::Full;
use hyper::body::Body;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, warn};

use crate::body;
use crate::config::Config;
use crate::context::Context;
use crate::error::{ConfigError, Error, HttpError};
use crate::metrics::Metrics;
use crate::middleware::cors::Cors;
use crate::middleware::rate_limit::{FixedWindow, RateLimit, Sweeper};
use crate::middleware::trace::Trace;
use crate::middleware::{Chain, Middleware, Next, Prefix};
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;

/// A router plus everything needed to serve it.
///
/// Built once at startup, then shared immutably by every in-flight request.
pub struct App {
    router: Router,
    chain: Chain,
    metrics: Arc<Metrics>,
    limiters: Vec<Arc<FixedWindow>>,
    dev_mode: bool,
    body_limit: usize,
    timeout: Option<Duration>,
    eager_body: bool,
}

impl App {
    /// An app with an empty chain and the default [`Config`] limits.
    pub fn new(router: Router) -> Self {
        let defaults = Config::default();
        Self {
            router,
            chain: Chain::new(),
            metrics: Arc::new(Metrics::new()),
            limiters: Vec::new(),
            dev_mode: defaults.dev_mode,
            body_limit: defaults.body_limit,
            timeout: defaults.request_timeout(),
            eager_body: defaults.eager_body,
        }
    }

    /// An app configured from `config`, with request tracing, CORS and rate
    /// limiting registered in that order.
    pub fn from_config(router: Router, config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let limits = &config.security.rate_limit;
        let limiter = Arc::new(FixedWindow::new(limits.max, limits.window())?);

        Ok(Self::new(router)
            .dev_mode(config.dev_mode)
            .body_limit(config.body_limit)
            .timeout(config.request_timeout())
            .eager_body(config.eager_body)
            .layer(Trace::new())
            .layer(Cors::new(config.security.cors.origin.clone()))
            .rate_limit(RateLimit::new(limiter)))
    }

    // ── Chain ─────────────────────────────────────────────────────────────────

    /// Appends a unit that runs for every request.
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.chain.push(None, Arc::new(middleware));
        self
    }

    /// Appends a unit that runs only for paths under `prefix`, at this
    /// position in the chain.
    pub fn layer_at(mut self, prefix: &str, middleware: impl Middleware) -> Result<Self, ConfigError> {
        self.chain.push(Prefix::parse(prefix)?, Arc::new(middleware));
        Ok(self)
    }

    /// Splices every unit of `chain` at this position, scoped to `prefix`.
    pub fn mount(mut self, prefix: &str, chain: Chain) -> Result<Self, ConfigError> {
        self.chain.splice(Prefix::parse(prefix)?, chain);
        Ok(self)
    }

    /// Appends a rate-limiting unit. Its limiter is swept by
    /// [`spawn_background`](Self::spawn_background).
    pub fn rate_limit(mut self, middleware: RateLimit) -> Self {
        self.limiters.push(Arc::clone(middleware.limiter()));
        self.layer(middleware)
    }

    // ── Options ───────────────────────────────────────────────────────────────

    /// Include error `detail` in response bodies.
    pub fn dev_mode(mut self, on: bool) -> Self {
        self.dev_mode = on;
        self
    }

    pub fn body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    /// Per-request deadline; `None` disables it.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn eager_body(mut self, on: bool) -> Self {
        self.eager_body = on;
        self
    }

    /// Records into `metrics` instead of a private set of counters.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Starts background upkeep (rate-limiter sweeps). Must be called from
    /// inside a tokio runtime; the tasks stop when the handles are dropped.
    pub fn spawn_background(&self) -> Vec<Sweeper> {
        self.limiters
            .iter()
            .map(|limiter| limiter.spawn_sweeper(limiter.window()))
            .collect()
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    /// Handles one request end to end. Always yields a response.
    ///
    /// Dropping the returned future (the client went away) stops the chain
    /// where it is; the request is then counted as cancelled.
    pub async fn dispatch<B>(&self, req: http::Request<B>, remote_addr: Option<SocketAddr>) -> http::Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let in_flight = self.metrics.begin();
        let response = self.handle(req, remote_addr).await;
        in_flight.complete(response.status_code());
        response.into_http()
    }

    async fn handle<B>(&self, req: http::Request<B>, remote_addr: Option<SocketAddr>) -> Response
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = req.into_parts();
        let method = parts.method.clone();
        let path = parts.uri.path().to_owned();

        // One deadline for the whole request, body reading included.
        let deadline = self.timeout.map(|limit| (Instant::now() + limit, limit));

        let read = self.read(parts, body, remote_addr);
        let read = match deadline {
            Some((at, limit)) => timeout_at(at, read).await.unwrap_or_else(|_| Err(timed_out(limit))),
            None => read.await,
        };
        let request = match read {
            Ok(request) => request,
            Err(err) => {
                debug!(%method, path = %path, code = err.code(), "request rejected before dispatch");
                return err.to_response(self.dev_mode);
            }
        };

        let mut ctx = Context::new(request);
        let (endpoint, route_layers) = match self.router.lookup(ctx.method(), ctx.segments()) {
            Some((route, params)) => {
                ctx.set_params(params);
                (&route.handler, route.layers.as_slice())
            }
            None => (self.router.fallback_handler(), &[][..]),
        };

        let next = Next::new(self.chain.layers(), route_layers, endpoint);
        let run = AssertUnwindSafe(async { next.run(&mut ctx).await }).catch_unwind();
        let outcome = match deadline {
            Some((at, limit)) => match timeout_at(at, run).await {
                Ok(outcome) => outcome,
                Err(_) => Ok(Err(timed_out(limit).into())),
            },
            None => run.await,
        };

        let result = outcome.unwrap_or_else(|panic| {
            let reason = panic_message(&*panic);
            error!(%method, path = %path, %reason, "panic while handling request");
            Err(HttpError::internal("Internal server error").with_detail(reason.into()).into())
        });

        self.finalize(&mut ctx, result);
        ctx.into_response()
    }

    async fn read<B>(
        &self,
        parts: http::request::Parts,
        body: B,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Request, HttpError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let body = body::read(&parts.headers, body, self.body_limit).await?;
        let query = body::query(parts.uri.query())?;
        let parsed = if self.eager_body { body::parse(&parts.headers, &body)? } else { None };

        Ok(Request {
            path: parts.uri.path().to_owned(),
            method: parts.method,
            headers: parts.headers,
            query,
            body,
            parsed,
            params: HashMap::new(),
            remote_addr,
        })
    }

    /// Makes sure `ctx` holds exactly one response.
    fn finalize(&self, ctx: &mut Context, result: Result<(), Error>) {
        match result {
            Ok(()) if ctx.is_finished() => {}
            Ok(()) => {
                error!(method = %ctx.method(), path = ctx.path(), "chain completed without a response");
                let err = HttpError::internal("Internal server error")
                    .with_detail("no middleware or handler produced a response".into());
                ctx.respond(err.to_response(self.dev_mode));
            }
            Err(err) if ctx.is_finished() => {
                warn!(method = %ctx.method(), path = ctx.path(), error = %err, "error after response was sent; dropped");
            }
            Err(err) => {
                let err = err.into_http();
                if err.status().is_server_error() {
                    error!(method = %ctx.method(), path = ctx.path(), error = %err, detail = ?err.detail(), "request failed");
                } else {
                    debug!(method = %ctx.method(), path = ctx.path(), error = %err, "request rejected");
                }
                ctx.respond(err.to_response(self.dev_mode));
            }
        }
    }
}

fn timed_out(limit: Duration) -> HttpError {
    HttpError::timeout("Request timed out")
        .with_detail(format!("no response within {} ms", limit.as_millis()).into())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("router", &self.router)
            .field("chain", &self.chain)
            .field("dev_mode", &self.dev_mode)
            .field("body_limit", &self.body_limit)
            .field("timeout", &self.timeout)
            .field("eager_body", &self.eager_body)
            .finish_non_exhaustive()
    }
}
