// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for error-insights.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `error_insights_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `store`: records, index, cache
//! - `namespace`: search, stats
//! - `outcome`: committed, skipped, failed / hit, miss, error

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record the outcome of one consumed batch
pub fn record_batch(outcome: &str) {
    counter!(
        "error_insights_batches_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record how many raw messages a batch carried
pub fn record_batch_size(count: usize) {
    histogram!("error_insights_batch_size").record(count as f64);
}

/// Record approximate event bytes written in a batch
pub fn record_batch_bytes(bytes: usize) {
    histogram!("error_insights_batch_bytes").record(bytes as f64);
}

/// Record events handed to a store
pub fn record_events_written(store: &str, count: usize) {
    counter!(
        "error_insights_events_written_total",
        "store" => store.to_string()
    )
    .increment(count as u64);
}

/// Record messages dropped before reaching either store
pub fn record_dropped_messages(reason: &str, count: usize) {
    counter!(
        "error_insights_messages_dropped_total",
        "reason" => reason.to_string()
    )
    .increment(count as u64);
}

/// Record per-item failures inside an otherwise successful bulk call
pub fn record_partial_failures(store: &str, count: usize) {
    counter!(
        "error_insights_partial_failures_total",
        "store" => store.to_string()
    )
    .increment(count as u64);
}

/// Record a cache lookup outcome
pub fn record_cache(namespace: &str, outcome: &str) {
    counter!(
        "error_insights_cache_lookups_total",
        "namespace" => namespace.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a swallowed cache error
pub fn record_cache_error(operation: &str) {
    counter!(
        "error_insights_cache_errors_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record cache keys removed by an invalidation sweep
pub fn record_cache_invalidated(namespace: &str, count: usize) {
    counter!(
        "error_insights_cache_invalidated_total",
        "namespace" => namespace.to_string()
    )
    .increment(count as u64);
}

/// Record a search index query
pub fn record_query(kind: &str, status: &str) {
    counter!(
        "error_insights_queries_total",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record search index query latency
pub fn record_query_latency(kind: &str, duration: Duration) {
    histogram!(
        "error_insights_query_seconds",
        "kind" => kind.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a connection failure to a backend
pub fn record_connection_error(backend: &str) {
    counter!(
        "error_insights_connection_errors_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Set consumer state (0 = Idle .. 6 = Terminated)
pub fn set_consumer_state(state: u8) {
    gauge!("error_insights_consumer_state").set(state as f64);
}

/// Record how long a startup phase took
pub fn record_startup_phase(phase: &str, duration: Duration) {
    histogram!(
        "error_insights_startup_phase_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

/// RAII timer that records query latency when dropped
pub struct LatencyTimer {
    kind: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_query_latency(self.kind, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These only verify the calls don't panic without an installed recorder.

    #[test]
    fn test_record_batch_metrics() {
        record_batch("committed");
        record_batch("skipped");
        record_batch_size(10);
        record_batch_bytes(4096);
        record_events_written("records", 10);
        record_dropped_messages("malformed", 1);
        record_partial_failures("index", 1);
    }

    #[test]
    fn test_record_cache_metrics() {
        record_cache("search", "hit");
        record_cache("stats", "miss");
        record_cache_error("read");
        record_cache_invalidated("search", 3);
    }

    #[test]
    fn test_latency_timer() {
        {
            let _timer = LatencyTimer::new("search");
            std::thread::sleep(Duration::from_millis(1));
        }
        record_query("stats", "success");
        set_consumer_state(0);
        record_connection_error("redis");
        record_startup_phase("connect", Duration::from_millis(5));
    }
}
