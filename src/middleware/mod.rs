//! Middleware layer.
//!
//! Middleware intercepts requests on the way in and responses on the way out.
//! It is the right place for cross-cutting concerns: tracing, rate limiting,
//! CORS, authentication.
//!
//! # Onion order
//!
//! Units run in registration order on the way in and in reverse on the way
//! out. For `A`, `B`, `C` that each record before and after calling `next`:
//!
//! ```text
//! A-pre → B-pre → C-pre → handler → C-post → B-post → A-post
//! ```
//!
//! A unit may also answer by itself (write a response and skip `next`), or
//! fail with an [`Error`]. Failures unwind through the units that called
//! `next`, untouched unless one of them decides to handle it, and are turned
//! into a response once, by the dispatcher.
//!
//! # Writing middleware
//!
//! Implement [`Middleware`] for a type, or wrap a closure with [`from_fn`]:
//!
//! ```rust
//! use gantry::middleware;
//!
//! let stamp = middleware::from_fn(|ctx, next| {
//!     Box::pin(async move {
//!         ctx.set_header("x-powered-by", "gantry");
//!         next.run(ctx).await
//!     })
//! });
//! # let _ = stamp;
//! ```
//!
//! # Scoping
//!
//! A unit registered with a mount prefix only runs for paths under that
//! prefix (segment boundary: `/api` covers `/api` and `/api/x`, not `/apix`).
//! Prefixes are compared against the percent-decoded path, the same one the
//! router matches, so `/%61pi` cannot sneak past middleware mounted on `/api`.

pub mod cors;
pub mod rate_limit;
pub mod trace;

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::{ConfigError, Error};
use crate::handler::SharedEndpoint;

pub use crate::context::Context;

// ── Middleware trait ──────────────────────────────────────────────────────────

/// A unit of request processing with access to the rest of the chain.
///
/// Implementations receive the request [`Context`] and a one-shot [`Next`].
/// They may:
///
/// - **Pass through** — `next.run(ctx).await`.
/// - **Decorate** — do work before and/or after `next.run(ctx).await`.
/// - **Short-circuit** — finish the response on `ctx` and return `Ok(())`
///   without calling `next`.
/// - **Fail** — return `Err(..)`; the dispatcher translates it.
///
/// `Next::run` takes `self`, so the rest of the chain can run at most once
/// per invocation; the compiler enforces it.
pub trait Middleware: Send + Sync + 'static {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Error>>;
}

impl<M: Middleware + ?Sized> Middleware for Arc<M> {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Error>> {
        (**self).handle(ctx, next)
    }
}

/// Wraps a closure as [`Middleware`].
///
/// The closure has to return a boxed future; `Box::pin(async move { .. })`
/// does it.
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<(), Error>> + Send + Sync + 'static,
{
    FromFn(f)
}

/// Middleware built by [`from_fn`].
pub struct FromFn<F>(F);

impl<F> Middleware for FromFn<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<(), Error>> + Send + Sync + 'static,
{
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Error>> {
        (self.0)(ctx, next)
    }
}

impl<F> fmt::Debug for FromFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FromFn")
    }
}

// ── Prefix ────────────────────────────────────────────────────────────────────

/// A mount prefix, stored as decoded segments.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Prefix(Vec<String>);

impl Prefix {
    /// `/` (or an empty prefix) means "everywhere" and yields `None`.
    pub(crate) fn parse(prefix: &str) -> Result<Option<Self>, ConfigError> {
        let invalid = || ConfigError::InvalidPrefix(prefix.to_owned());
        if !prefix.starts_with('/') && !prefix.is_empty() {
            return Err(invalid());
        }
        let segments = crate::router::decode_path(prefix.trim_end_matches('/'))
            .into_iter()
            .collect::<Option<Vec<String>>>()
            .ok_or_else(invalid)?;
        if segments.iter().any(String::is_empty) {
            return Err(invalid());
        }
        Ok((!segments.is_empty()).then_some(Self(segments)))
    }

    fn covers(&self, path: &[Option<String>]) -> bool {
        self.0.len() <= path.len()
            && self.0.iter().zip(path).all(|(want, got)| got.as_deref() == Some(want.as_str()))
    }

    /// `outer` + `self`, for sub-chains mounted inside a prefix.
    fn under(&self, outer: &Self) -> Self {
        Self(outer.0.iter().chain(&self.0).cloned().collect())
    }
}

// ── Layer / Chain ─────────────────────────────────────────────────────────────

/// One registered unit and the prefix it is scoped to.
#[derive(Clone)]
pub(crate) struct Layer {
    prefix: Option<Prefix>,
    middleware: Arc<dyn Middleware>,
}

impl Layer {
    fn applies_to(&self, path: &[Option<String>]) -> bool {
        self.prefix.as_ref().is_none_or(|p| p.covers(path))
    }
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layer").field("prefix", &self.prefix).finish_non_exhaustive()
    }
}

/// An ordered list of middleware, some possibly scoped to a prefix.
///
/// Used for route-scoped middleware
/// ([`Router::on_with`](crate::Router::on_with)) and for building a group of
/// units to splice into an application with [`App::mount`](crate::App::mount).
#[derive(Clone, Debug, Default)]
pub struct Chain {
    layers: Vec<Layer>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a unit that runs for every request reaching this chain.
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.push(None, Arc::new(middleware));
        self
    }

    /// Appends a unit that runs only for paths under `prefix`.
    pub fn layer_at(mut self, prefix: &str, middleware: impl Middleware) -> Result<Self, ConfigError> {
        self.push(Prefix::parse(prefix)?, Arc::new(middleware));
        Ok(self)
    }

    /// Splices every unit of `chain` here, each additionally scoped to `prefix`.
    pub fn mount(mut self, prefix: &str, chain: Chain) -> Result<Self, ConfigError> {
        self.splice(Prefix::parse(prefix)?, chain);
        Ok(self)
    }

    pub fn len(&self) -> usize { self.layers.len() }
    pub fn is_empty(&self) -> bool { self.layers.is_empty() }

    pub(crate) fn push(&mut self, prefix: Option<Prefix>, middleware: Arc<dyn Middleware>) {
        self.layers.push(Layer { prefix, middleware });
    }

    pub(crate) fn splice(&mut self, outer: Option<Prefix>, chain: Chain) {
        self.layers.extend(chain.layers.into_iter().map(|layer| Layer {
            prefix: match (&outer, layer.prefix) {
                (Some(outer), Some(inner)) => Some(inner.under(outer)),
                (Some(outer), None) => Some(outer.clone()),
                (None, inner) => inner,
            },
            middleware: layer.middleware,
        }));
    }

    pub(crate) fn layers(&self) -> &[Layer] { &self.layers }
    pub(crate) fn into_layers(self) -> Vec<Layer> { self.layers }
}

// ── Next ──────────────────────────────────────────────────────────────────────

/// The rest of the chain, from the current unit's point of view.
///
/// Holds the remaining application-wide units, the remaining route-scoped
/// units, and the terminal handler. [`run`](Self::run) consumes it.
pub struct Next<'a> {
    global: &'a [Layer],
    route: &'a [Layer],
    endpoint: &'a SharedEndpoint,
}

impl<'a> Next<'a> {
    pub(crate) fn new(global: &'a [Layer], route: &'a [Layer], endpoint: &'a SharedEndpoint) -> Self {
        Self { global, route, endpoint }
    }

    /// Runs the remainder of the chain and returns once it has completed or
    /// failed.
    ///
    /// Units whose prefix does not cover the request path are skipped. When
    /// no unit is left, the handler runs and its response finishes `ctx`.
    pub fn run<'b>(self, ctx: &'b mut Context) -> BoxFuture<'b, Result<(), Error>>
    where
        'a: 'b,
    {
        let Next { global, route, endpoint } = self;

        if let Some(i) = global.iter().position(|l| l.applies_to(ctx.segments())) {
            let next = Next { global: &global[i + 1..], route, endpoint };
            return global[i].middleware.handle(ctx, next);
        }
        if let Some(i) = route.iter().position(|l| l.applies_to(ctx.segments())) {
            let next = Next { global: &[], route: &route[i + 1..], endpoint };
            return route[i].middleware.handle(ctx, next);
        }

        let reply = endpoint.invoke(ctx.request().clone());
        Box::pin(async move {
            let response = reply.await?;
            ctx.respond(response);
            Ok(())
        })
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("global", &self.global.len())
            .field("route", &self.route.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> Vec<Option<String>> {
        crate::router::decode_path(p)
    }

    #[test]
    fn prefix_respects_segment_boundaries() {
        let prefix = Prefix::parse("/api/").unwrap().unwrap();
        assert!(prefix.covers(&path("/api")));
        assert!(prefix.covers(&path("/api/users")));
        assert!(prefix.covers(&path("/%61pi/users")));
        assert!(!prefix.covers(&path("/apix")));
        assert!(!prefix.covers(&path("/")));
    }

    #[test]
    fn root_prefix_means_everywhere() {
        assert_eq!(Prefix::parse("/").unwrap(), None);
        assert_eq!(Prefix::parse("").unwrap(), None);
    }

    #[test]
    fn invalid_prefixes_are_rejected() {
        for bad in ["api", "/a//b", "/%zz"] {
            assert!(Prefix::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn nested_mounts_join_prefixes() {
        struct Noop;
        impl Middleware for Noop {
            fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Error>> {
                next.run(ctx)
            }
        }

        let inner = Chain::new().layer(Noop).layer_at("/v1", Noop).unwrap();
        let chain = Chain::new().layer(Noop).mount("/api", inner).unwrap();

        let prefixes: Vec<_> = chain.layers().iter().map(|l| l.prefix.clone()).collect();
        assert_eq!(prefixes, vec![
            None,
            Prefix::parse("/api").unwrap(),
            Prefix::parse("/api/v1").unwrap(),
        ]);
    }
}
