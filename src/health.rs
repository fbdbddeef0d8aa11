//! Built-in health and metrics handlers.
//!
//! | Probe | Suggested path | Answer |
//! |---|---|---|
//! | **Liveness** | `/healthz` | The process can serve HTTP at all. |
//! | **Readiness** | `/readyz` | The instance may receive traffic. |
//! | **Metrics** | `/metrics` | JSON [`MetricsSnapshot`](crate::MetricsSnapshot). |
//!
//! ```rust,no_run
//! use gantry::{health, App, Router};
//!
//! let router = Router::new()
//!     .get("/healthz", health::liveness)
//!     .get("/readyz", health::readiness);
//! let app = App::new(router);
//! # let _ = app;
//! ```
//!
//! The metrics handler reads the same counters the app records into, so
//! create them first and hand them to both:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gantry::{health, App, Metrics, Router};
//!
//! let metrics = Arc::new(Metrics::new());
//! let router = Router::new().get("/metrics", health::metrics(Arc::clone(&metrics)));
//! let app = App::new(router).with_metrics(metrics);
//! # let _ = app;
//! ```
//!
//! Replace `readiness` with your own handler to gate on dependencies.

use std::sync::Arc;

use crate::metrics::Metrics;
use crate::{Handler, Json, Request, Response};

/// Liveness probe. Always `200 OK`, body `ok`.
pub async fn liveness(_req: Request) -> Response {
    Response::text("ok")
}

/// Readiness probe (default). Always `200 OK`, body `ready`.
pub async fn readiness(_req: Request) -> Response {
    Response::text("ready")
}

/// A handler reporting `metrics` as JSON.
pub fn metrics(metrics: Arc<Metrics>) -> impl Handler {
    move |_req: Request| {
        let snapshot = metrics.snapshot();
        async move { Json(snapshot) }
    }
}
