//! Metrics collection and exposition.
//!
//! # Metrics
//! - `dispatch_requests_total` (counter): requests by method, status, cached
//! - `dispatch_request_duration_seconds` (histogram): latency distribution
//! - `dispatch_cache_lookups_total` (counter): cache lookups by result
//! - `dispatch_preflight_total` (counter): preflight outcomes
//! - `dispatch_cleanup_failures_total` (counter): failed dependency releases
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Recording without an installed exporter is a no-op

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished request.
pub fn record_request(method: &str, status: u16, cached: bool, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("cached", cached.to_string()),
    ];
    counter!("dispatch_requests_total", &labels).increment(1);
    histogram!("dispatch_request_duration_seconds", &labels[..1])
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("dispatch_cache_lookups_total", "result" => result).increment(1);
}

/// Record a preflight outcome (`no_cors`, `allowed`, `denied`).
pub fn record_preflight(outcome: &str) {
    counter!("dispatch_preflight_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn record_cleanup_failures(count: usize) {
    if count > 0 {
        counter!("dispatch_cleanup_failures_total").increment(count as u64);
    }
}
