//! Request counters.
//!
//! All counters are atomics; recording never takes a lock. In-flight
//! tracking is scoped: [`Metrics::begin`] hands out a guard whose `Drop`
//! decrements the gauge, so a request that is cancelled (the client went
//! away and its dispatch future was dropped) is still accounted for.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use http::StatusCode;
use serde::Serialize;

const FIRST_STATUS: u16 = 100;
const STATUS_SLOTS: usize = 500;

/// Live counters for one application.
#[derive(Debug)]
pub struct Metrics {
    in_flight: AtomicUsize,
    total: AtomicU64,
    cancelled: AtomicU64,
    statuses: [AtomicU64; STATUS_SLOTS],
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            total: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            statuses: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a request as started.
    pub fn begin(&self) -> InFlight<'_> {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        InFlight { metrics: self, completed: false }
    }

    pub fn in_flight(&self) -> usize { self.in_flight.load(Ordering::Relaxed) }
    pub fn total(&self) -> u64 { self.total.load(Ordering::Relaxed) }
    pub fn cancelled(&self) -> u64 { self.cancelled.load(Ordering::Relaxed) }

    /// Responses sent with `status` so far.
    pub fn count(&self, status: StatusCode) -> u64 {
        slot(status).map_or(0, |i| self.statuses[i].load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let statuses = self
            .statuses
            .iter()
            .enumerate()
            .filter_map(|(i, n)| {
                let n = n.load(Ordering::Relaxed);
                (n > 0).then(|| (FIRST_STATUS + i as u16, n))
            })
            .collect();

        MetricsSnapshot {
            in_flight: self.in_flight(),
            total: self.total(),
            cancelled: self.cancelled(),
            statuses,
        }
    }
}

fn slot(status: StatusCode) -> Option<usize> {
    let i = status.as_u16().checked_sub(FIRST_STATUS)? as usize;
    (i < STATUS_SLOTS).then_some(i)
}

/// Guard for one in-flight request. See [`Metrics::begin`].
#[derive(Debug)]
pub struct InFlight<'a> {
    metrics: &'a Metrics,
    completed: bool,
}

impl InFlight<'_> {
    /// Records the response status. A guard dropped without this counts as
    /// cancelled.
    pub fn complete(mut self, status: StatusCode) {
        if let Some(i) = slot(status) {
            self.metrics.statuses[i].fetch_add(1, Ordering::Relaxed);
        }
        self.completed = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.metrics.in_flight.fetch_sub(1, Ordering::Relaxed);
        if !self.completed {
            self.metrics.cancelled.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of [`Metrics`], serialisable for a metrics endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub in_flight: usize,
    pub total: u64,
    pub cancelled: u64,
    /// Status code → responses sent. Only codes seen at least once.
    pub statuses: BTreeMap<u16, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_tracks_in_flight_and_status() {
        let metrics = Metrics::new();

        let a = metrics.begin();
        let b = metrics.begin();
        assert_eq!(metrics.in_flight(), 2);

        a.complete(StatusCode::OK);
        b.complete(StatusCode::NOT_FOUND);

        let snap = metrics.snapshot();
        assert_eq!(snap.in_flight, 0);
        assert_eq!(snap.total, 2);
        assert_eq!(snap.cancelled, 0);
        assert_eq!(snap.statuses, BTreeMap::from([(200, 1), (404, 1)]));
    }

    #[test]
    fn dropped_guard_counts_as_cancelled() {
        let metrics = Metrics::new();
        drop(metrics.begin());

        assert_eq!(metrics.in_flight(), 0);
        assert_eq!(metrics.cancelled(), 1);
        assert!(metrics.snapshot().statuses.is_empty());
    }

    #[test]
    fn snapshot_serialises_camel_case() {
        let metrics = Metrics::new();
        metrics.begin().complete(StatusCode::CREATED);

        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json, serde_json::json!({
            "inFlight": 0,
            "total": 1,
            "cancelled": 0,
            "statuses": { "201": 1 },
        }));
    }
}
