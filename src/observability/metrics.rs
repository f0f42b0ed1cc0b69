//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define governor metrics (requests, latency, rejections, cache behaviour)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `governor_requests_total` (counter): requests by endpoint, status
//! - `governor_request_duration_seconds` (histogram): latency distribution
//! - `governor_rate_limited_total` (counter): rejections by limit scope
//! - `governor_blocked_requests_total` (counter): requests refused for a blocked origin
//! - `governor_origins_blocked_total` (counter): blocklist promotions
//! - `governor_cache_lookups_total` (counter): lookups by result
//! - `governor_cache_entries` (gauge): stored entries
//! - `governor_cache_evictions_total` (counter): removals by phase
//! - `governor_cache_invalidations_total` (counter): entries removed by prefix
//!
//! # Design Decisions
//! - Recording without an installed exporter is a no-op
//! - Exporter install failure is logged, never fatal

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`. Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            register_metrics();
            tracing::info!(address = %addr, "Prometheus exporter listening");
        }
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install Prometheus exporter");
        }
    }
}

fn register_metrics() {
    describe_counter!("governor_requests_total", "Governed requests by endpoint and status");
    describe_histogram!(
        "governor_request_duration_seconds",
        "Time spent serving governed requests"
    );
    describe_counter!("governor_rate_limited_total", "Requests rejected by a rate limit");
    describe_counter!(
        "governor_blocked_requests_total",
        "Requests refused because the origin is blocklisted"
    );
    describe_counter!("governor_origins_blocked_total", "Origins promoted to the blocklist");
    describe_counter!("governor_cache_lookups_total", "Response cache lookups by result");
    describe_gauge!("governor_cache_entries", "Entries held by the response cache");
    describe_counter!("governor_cache_evictions_total", "Cache entries removed by eviction");
    describe_counter!(
        "governor_cache_invalidations_total",
        "Cache entries removed by prefix invalidation"
    );
}

pub fn record_request(endpoint: &str, status: u16, duration_ms: f64) {
    counter!(
        "governor_requests_total",
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("governor_request_duration_seconds", "endpoint" => endpoint.to_string())
        .record(duration_ms / 1000.0);
}

pub fn record_rate_limited(scope: &'static str) {
    counter!("governor_rate_limited_total", "scope" => scope).increment(1);
}

pub fn record_blocked_request() {
    counter!("governor_blocked_requests_total").increment(1);
}

pub fn record_origin_blocked() {
    counter!("governor_origins_blocked_total").increment(1);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("governor_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_size(entries: usize) {
    gauge!("governor_cache_entries").set(entries as f64);
}

pub fn record_cache_eviction(phase: &'static str, removed: usize) {
    counter!("governor_cache_evictions_total", "phase" => phase).increment(removed as u64);
}

pub fn record_cache_invalidation(removed: usize) {
    counter!("governor_cache_invalidations_total").increment(removed as u64);
}
