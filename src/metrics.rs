// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the plan sync engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding process chooses the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `plan_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `operation`: save, delete (feed events), create, get, patch, delete (service)
//! - `outcome`: saved, deleted, dropped, failed
//! - `backend`: redis, memory, elastic

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record the outcome of one feed event.
pub fn record_event(operation: &str, outcome: &str) {
    counter!(
        "plan_sync_events_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record time spent applying one feed event.
pub fn record_event_latency(operation: &str, duration: Duration) {
    histogram!(
        "plan_sync_event_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record index entries written for one SAVE.
pub fn record_index_upserts(count: usize) {
    counter!("plan_sync_index_upserts_total").increment(count as u64);
}

/// Record index deletes, split by whether the entry was there.
pub fn record_index_deletes(deleted: usize, missing: usize) {
    counter!("plan_sync_index_deletes_total", "result" => "deleted").increment(deleted as u64);
    counter!("plan_sync_index_deletes_total", "result" => "not_found").increment(missing as u64);
}

/// Record an index bootstrap attempt.
pub fn record_bootstrap(outcome: &str) {
    counter!(
        "plan_sync_index_bootstrap_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a write-service request.
pub fn record_service_request(operation: &str, status: &str) {
    counter!(
        "plan_sync_service_requests_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record an event published to the change feed.
pub fn record_published(operation: &str) {
    counter!(
        "plan_sync_published_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a stored value that failed to parse.
pub fn record_corruption(backend: &str) {
    counter!(
        "plan_sync_corruption_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Record a feed read or ack failure.
pub fn record_feed_error(stage: &str) {
    counter!(
        "plan_sync_feed_errors_total",
        "stage" => stage.to_string()
    )
    .increment(1);
}

/// Record stream entries claimed from idle consumers.
pub fn record_claimed(count: usize) {
    counter!("plan_sync_feed_claimed_total").increment(count as u64);
}

/// Set number of events currently being applied.
pub fn set_in_flight(count: usize) {
    gauge!("plan_sync_events_in_flight").set(count as f64);
}

/// Timer that records event latency on drop.
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_event_latency(self.operation, self.start.elapsed());
    }
}
