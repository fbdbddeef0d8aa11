//! Fixed-window rate limiting.
//!
//! Each client key gets a counter and the instant its window started. The
//! first request after a window ends opens a new one; within a window, the
//! request that pushes the count past `max` and every one after it are
//! rejected with `429` until the window ends.
//!
//! Fixed windows allow up to 2× `max` in a burst straddling a boundary. In
//! exchange each check is O(1) in time and each client costs one small record.
//!
//! Records live in a [`DashMap`]; each check holds that key's entry lock for
//! the read-modify-write, so two concurrent requests from one client cannot
//! lose an update. Idle records are evicted by [`FixedWindow::sweep`], which a
//! background task runs periodically (see [`FixedWindow::spawn_sweeper`]).

use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::{Context, Middleware, Next};
use crate::error::{ConfigError, Error, HttpError};

/// A record idle for this many windows is stale.
const STALE_AFTER_WINDOWS: u32 = 3;

#[derive(Clone, Copy, Debug)]
struct Window {
    start: Instant,
    count: u32,
    last_seen: Instant,
}

/// Result of an admission check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Admitted { remaining: u32 },
    Rejected { retry_after: Duration },
}

// ── FixedWindow ───────────────────────────────────────────────────────────────

/// Shared per-key fixed-window counters.
#[derive(Debug)]
pub struct FixedWindow {
    max: u32,
    window: Duration,
    records: DashMap<String, Window>,
}

impl FixedWindow {
    /// Admits at most `max` requests per key per `window`.
    ///
    /// Both must be non-zero: a zero window would open a fresh window on
    /// every request and admit everything.
    pub fn new(max: u32, window: Duration) -> Result<Self, ConfigError> {
        if max == 0 {
            return Err(ConfigError::Invalid("rate limit max must be greater than zero".to_owned()));
        }
        if window.is_zero() {
            return Err(ConfigError::Invalid("rate limit window must be greater than zero".to_owned()));
        }
        Ok(Self { max, window, records: DashMap::new() })
    }

    pub fn max(&self) -> u32 { self.max }
    pub fn window(&self) -> Duration { self.window }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize { self.records.len() }

    pub fn check(&self, key: &str) -> Admission {
        self.check_at(key, Instant::now())
    }

    pub(crate) fn check_at(&self, key: &str, now: Instant) -> Admission {
        let fresh = Window { start: now, count: 0, last_seen: now };
        let mut record = match self.records.get_mut(key) {
            Some(record) => record,
            None => self.records.entry(key.to_owned()).or_insert(fresh),
        };

        let window_end = record.start + self.window;
        if now >= window_end {
            *record = fresh;
        }
        record.count = record.count.saturating_add(1);
        record.last_seen = now;

        if record.count > self.max {
            Admission::Rejected { retry_after: (record.start + self.window) - now }
        } else {
            Admission::Admitted { remaining: self.max - record.count }
        }
    }

    /// Drops records idle for several windows. Returns how many went.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub(crate) fn sweep_at(&self, now: Instant) -> usize {
        let stale_after = self.window.saturating_mul(STALE_AFTER_WINDOWS);
        let before = self.records.len();
        self.records.retain(|_, w| now.saturating_duration_since(w.last_seen) < stale_after);
        before.saturating_sub(self.records.len())
    }

    /// Starts a background task that calls [`sweep`](Self::sweep) every
    /// `every`. A zero period means once per window.
    ///
    /// The task holds only a weak reference, so it ends by itself once the
    /// limiter is dropped; dropping the returned [`Sweeper`] stops it at once.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> Sweeper {
        let every = if every.is_zero() { self.window } else { every };
        let limiter: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else { break };
                let evicted = limiter.sweep();
                if evicted > 0 {
                    debug!(evicted, tracked = limiter.tracked(), "rate limiter sweep");
                }
            }
        });
        Sweeper(task)
    }
}

/// Handle to a sweeper task. Aborts the task when dropped.
#[derive(Debug)]
pub struct Sweeper(JoinHandle<()>);

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// ── RateLimit middleware ──────────────────────────────────────────────────────

type KeyFn = dyn Fn(&Context) -> Option<String> + Send + Sync;

/// Middleware gating requests through a [`FixedWindow`].
///
/// Admitted responses carry `x-ratelimit-limit` and `x-ratelimit-remaining`.
/// Rejections are `429 RATE_LIMIT_EXCEEDED` with `retry-after`.
pub struct RateLimit {
    limiter: Arc<FixedWindow>,
    key: Box<KeyFn>,
}

impl RateLimit {
    /// Keys requests by client IP.
    pub fn new(limiter: Arc<FixedWindow>) -> Self {
        Self { limiter, key: Box::new(client_ip) }
    }

    /// Keys requests with `key`. Returning `None` lets the request through
    /// unmetered.
    pub fn keyed_by<F>(limiter: Arc<FixedWindow>, key: F) -> Self
    where
        F: Fn(&Context) -> Option<String> + Send + Sync + 'static,
    {
        Self { limiter, key: Box::new(key) }
    }

    pub fn limiter(&self) -> &Arc<FixedWindow> { &self.limiter }
}

fn client_ip(ctx: &Context) -> Option<String> {
    ctx.remote_addr().map(|addr| IpAddr::to_string(&addr.ip()))
}

impl Middleware for RateLimit {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Error>> {
        let Some(key) = (self.key)(&*ctx) else {
            return next.run(ctx);
        };

        match self.limiter.check(&key) {
            Admission::Admitted { remaining } => {
                ctx.set_header("x-ratelimit-limit", &self.limiter.max().to_string());
                ctx.set_header("x-ratelimit-remaining", &remaining.to_string());
                next.run(ctx)
            }
            Admission::Rejected { retry_after } => {
                warn!(client = %key, path = ctx.path(), ?retry_after, "rate limit exceeded");
                ctx.set_header("x-ratelimit-limit", &self.limiter.max().to_string());
                ctx.set_header("x-ratelimit-remaining", "0");
                let err = HttpError::rate_limited("Too many requests, please try again later", retry_after);
                Box::pin(async move { Err(err.into()) })
            }
        }
    }
}

impl std::fmt::Debug for RateLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimit").field("limiter", &self.limiter).finish_non_exhaustive()
    }
}
