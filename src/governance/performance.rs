//! Per-endpoint performance records.
//!
//! # Responsibilities
//! - Count requests and errors per endpoint
//! - Keep an exact running mean of latency
//! - Serve the snapshot, slowest-endpoints and error-rate views
//!
//! # Design Decisions
//! - Running mean: `avg' = avg + (sample - avg) / count'`, no sample buffer
//! - Bad samples are logged and dropped; recording never fails the request
//! - Records are purged once older than the retention window

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::clock::Clock;

/// Aggregates for one endpoint since its window started.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceRecord {
    pub endpoint: String,
    pub request_count: u64,
    pub error_count: u64,
    pub avg_response_time_ms: f64,
    pub max_response_time_ms: f64,
    pub window_started_at_ms: u64,
    pub error_rate: f64,
}

impl PerformanceRecord {
    fn new(endpoint: &str, now: u64) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            request_count: 0,
            error_count: 0,
            avg_response_time_ms: 0.0,
            max_response_time_ms: 0.0,
            window_started_at_ms: now,
            error_rate: 0.0,
        }
    }

    fn observe(&mut self, duration_ms: f64, is_error: bool) {
        self.request_count += 1;
        if is_error {
            self.error_count += 1;
        }
        self.avg_response_time_ms += (duration_ms - self.avg_response_time_ms) / self.request_count as f64;
        self.max_response_time_ms = self.max_response_time_ms.max(duration_ms);
        self.error_rate = self.error_count as f64 / self.request_count as f64;
    }
}

/// Process-wide performance records keyed by endpoint.
#[derive(Debug)]
pub struct PerformanceCollector {
    records: DashMap<String, PerformanceRecord>,
    retention_ms: u64,
    clock: Arc<dyn Clock>,
}

impl PerformanceCollector {
    pub fn new(retention_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            retention_ms: retention_secs.saturating_mul(1000),
            clock,
        }
    }

    pub fn record(&self, endpoint: &str, duration_ms: f64, is_error: bool) {
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            tracing::warn!(endpoint = %endpoint, duration_ms, "Dropping invalid latency sample");
            return;
        }

        let now = self.clock.now_ms();
        self.records
            .entry(endpoint.to_string())
            .or_insert_with(|| PerformanceRecord::new(endpoint, now))
            .observe(duration_ms, is_error);
    }

    /// Copy of every record, ordered by endpoint.
    pub fn snapshot(&self) -> BTreeMap<String, PerformanceRecord> {
        self.records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Top `limit` endpoints by average latency.
    pub fn slowest(&self, limit: usize) -> Vec<PerformanceRecord> {
        let mut records: Vec<PerformanceRecord> = self.records.iter().map(|e| e.value().clone()).collect();
        records.sort_by(|a, b| {
            b.avg_response_time_ms
                .total_cmp(&a.avg_response_time_ms)
                .then_with(|| a.endpoint.cmp(&b.endpoint))
        });
        records.truncate(limit);
        records
    }

    pub fn error_rate(&self, endpoint: &str) -> Option<f64> {
        self.records.get(endpoint).map(|record| record.error_rate)
    }

    /// Drop all records. Returns how many were cleared.
    pub fn reset(&self) -> usize {
        let cleared = self.records.len();
        self.records.clear();
        cleared
    }

    /// Drop records older than the retention window.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.records.len();
        self.records
            .retain(|_, record| now.saturating_sub(record.window_started_at_ms) <= self.retention_ms);
        before.saturating_sub(self.records.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn collector() -> (Arc<ManualClock>, PerformanceCollector) {
        let clock = Arc::new(ManualClock::new(0));
        (clock.clone(), PerformanceCollector::new(24 * 3600, clock))
    }

    #[test]
    fn test_running_mean_is_exact() {
        let (_clock, collector) = collector();
        for sample in [10.0, 20.0, 30.0, 40.0] {
            collector.record("GET /a", sample, false);
        }
        collector.record("GET /a", 150.0, true);

        let record = &collector.snapshot()["GET /a"];
        assert_eq!(record.request_count, 5);
        assert_eq!(record.error_count, 1);
        assert!((record.avg_response_time_ms - 50.0).abs() < 1e-9);
        assert_eq!(record.max_response_time_ms, 150.0);
        assert!((record.error_rate - 0.2).abs() < 1e-9);
        assert_eq!(collector.error_rate("GET /a"), Some(record.error_rate));
        assert_eq!(collector.error_rate("GET /b"), None);
    }

    #[test]
    fn test_slowest_orders_by_average() {
        let (_clock, collector) = collector();
        collector.record("fast", 5.0, false);
        collector.record("slow", 500.0, false);
        collector.record("medium", 50.0, false);

        let slowest: Vec<String> = collector.slowest(2).into_iter().map(|r| r.endpoint).collect();
        assert_eq!(slowest, vec!["slow".to_string(), "medium".to_string()]);
        assert_eq!(collector.slowest(10).len(), 3);
    }

    #[test]
    fn test_invalid_samples_are_dropped() {
        let (_clock, collector) = collector();
        collector.record("GET /a", f64::NAN, false);
        collector.record("GET /a", -1.0, false);
        assert!(collector.is_empty());
    }

    #[test]
    fn test_sweep_and_reset() {
        let (clock, collector) = collector();
        collector.record("old", 1.0, false);
        clock.advance_secs(12 * 3600);
        collector.record("new", 1.0, false);

        clock.advance_secs(12 * 3600 + 1);
        assert_eq!(collector.sweep_expired(), 1);
        assert!(collector.snapshot().contains_key("new"));

        assert_eq!(collector.reset(), 1);
        assert!(collector.is_empty());
    }

    #[test]
    fn test_concurrent_recording_counts_every_sample() {
        let clock = Arc::new(ManualClock::new(0));
        let collector = Arc::new(PerformanceCollector::new(3600, clock));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let collector = collector.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        collector.record("GET /shared", 4.0, false);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let record = &collector.snapshot()["GET /shared"];
        assert_eq!(record.request_count, 2000);
        assert!((record.avg_response_time_ms - 4.0).abs() < 1e-9);
    }
}
