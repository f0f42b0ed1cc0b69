//! The four process-wide governance stores, owned together.
//!
//! One `GovernanceStore` is built at startup and injected everywhere it is
//! needed; tests build a fresh one each.

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use serde::Serialize;

use crate::clock::Clock;
use crate::config::GovernorConfig;
use crate::governance::abuse::AbuseTracker;
use crate::governance::cache::ResponseCache;
use crate::governance::invalidation::CacheInvalidator;
use crate::governance::performance::PerformanceCollector;
use crate::governance::rate_limit::RateLimiter;

/// A response body and the headers worth replaying, as held by the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Store sizes for status endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreSizes {
    pub rate_buckets: usize,
    pub abuse_records: usize,
    pub blocked_origins: usize,
    pub cache_entries: usize,
    pub performance_records: usize,
}

#[derive(Debug)]
pub struct GovernanceStore {
    rate_limiter: RateLimiter,
    abuse: AbuseTracker,
    cache: Arc<ResponseCache<CachedResponse>>,
    performance: PerformanceCollector,
}

impl GovernanceStore {
    pub fn new(config: &GovernorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            rate_limiter: RateLimiter::new(clock.clone()),
            abuse: AbuseTracker::new(&config.abuse, clock.clone()),
            cache: Arc::new(ResponseCache::new(
                config.cache.high_water,
                config.cache.low_water,
                clock.clone(),
            )),
            performance: PerformanceCollector::new(config.metrics.retention_secs, clock),
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn abuse(&self) -> &AbuseTracker {
        &self.abuse
    }

    pub fn cache(&self) -> &ResponseCache<CachedResponse> {
        &self.cache
    }

    pub fn performance(&self) -> &PerformanceCollector {
        &self.performance
    }

    /// A handle write-path code can keep to clear cache namespaces.
    pub fn invalidator(&self) -> CacheInvalidator<CachedResponse> {
        CacheInvalidator::new(self.cache.clone())
    }

    pub fn sizes(&self) -> StoreSizes {
        StoreSizes {
            rate_buckets: self.rate_limiter.len(),
            abuse_records: self.abuse.tracked_origins(),
            blocked_origins: self.abuse.blocked_count(),
            cache_entries: self.cache.len(),
            performance_records: self.performance.len(),
        }
    }
}
