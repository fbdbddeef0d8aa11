//! Request tracing.
//!
//! Emits one `info` event per completed request with the method, path,
//! final draft status and elapsed time. Failures are logged at `warn` and
//! handed on unchanged; the dispatcher still owns translating them.

use std::time::Instant;

use futures::future::BoxFuture;
use tracing::{info, warn};

use super::{Context, Middleware, Next};
use crate::error::Error;

/// Logging middleware. Register it first so the timing covers the whole chain.
#[derive(Clone, Copy, Debug, Default)]
pub struct Trace;

impl Trace {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for Trace {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            let method = ctx.method().clone();
            let path = ctx.path().to_owned();
            let start = Instant::now();

            let result = next.run(ctx).await;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

            match &result {
                Ok(()) => info!(
                    %method,
                    path = %path,
                    status = ctx.status().as_u16(),
                    elapsed_ms,
                    "request completed",
                ),
                Err(err) => warn!(
                    %method,
                    path = %path,
                    error = %err,
                    elapsed_ms,
                    "request failed",
                ),
            }
            result
        })
    }
}
