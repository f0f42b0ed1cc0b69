//! Per-origin volume tracking and blocklisting.
//!
//! # Responsibilities
//! - Count raw requests per origin over a fixed period, across all endpoints
//! - Promote an origin to the blocklist once its count exceeds the threshold
//! - Short-circuit blocklisted origins before any other governance work
//!
//! # Design Decisions
//! - Coarser than the rate limiter on purpose: a breaker against sustained abuse
//! - Blocklist entries live for the process lifetime unless an operator clears them
//! - Records and blocklist are sharded maps; each origin's update is atomic under
//!   its shard lock

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::clock::Clock;
use crate::config::AbuseConfig;
use crate::observability::metrics;

/// Outcome of recording one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbuseVerdict {
    Allowed,
    Blocked,
}

#[derive(Debug, Clone)]
struct AbuseRecord {
    count: u64,
    window_started_at: u64,
    last_seen_at: u64,
}

impl AbuseRecord {
    fn new(now: u64) -> Self {
        Self {
            count: 0,
            window_started_at: now,
            last_seen_at: now,
        }
    }

    fn is_stale(&self, now: u64, period_ms: u64) -> bool {
        now.saturating_sub(self.last_seen_at) > period_ms
            || now.saturating_sub(self.window_started_at) > period_ms
    }
}

/// A blocklisted origin, as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedOrigin {
    pub origin: String,
    pub blocked_at_ms: u64,
}

/// Tracks request volume per origin.
#[derive(Debug)]
pub struct AbuseTracker {
    records: DashMap<String, AbuseRecord>,
    blocklist: DashMap<String, u64>,
    exempt: HashSet<String>,
    threshold: u64,
    period_ms: u64,
    clock: Arc<dyn Clock>,
}

impl AbuseTracker {
    pub fn new(config: &AbuseConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            blocklist: DashMap::new(),
            exempt: config.exempt_origins.iter().cloned().collect(),
            threshold: config.threshold,
            period_ms: config.period_secs.saturating_mul(1000),
            clock,
        }
    }

    /// Count one request from `origin`.
    pub fn record(&self, origin: &str) -> AbuseVerdict {
        if self.exempt.contains(origin) {
            return AbuseVerdict::Allowed;
        }
        if self.is_blocked(origin) {
            return AbuseVerdict::Blocked;
        }

        let now = self.clock.now_ms();
        let count = {
            let mut record = self
                .records
                .entry(origin.to_string())
                .or_insert_with(|| AbuseRecord::new(now));
            if record.is_stale(now, self.period_ms) {
                *record = AbuseRecord::new(now);
            }
            record.count += 1;
            record.last_seen_at = now;
            record.count
        };

        if count <= self.threshold {
            return AbuseVerdict::Allowed;
        }

        // Racing requests past the threshold all land here; only the first
        // stamps the blocklist entry.
        let mut newly_blocked = false;
        self.blocklist.entry(origin.to_string()).or_insert_with(|| {
            newly_blocked = true;
            now
        });
        if newly_blocked {
            tracing::warn!(
                origin = %origin,
                count,
                threshold = self.threshold,
                "Origin exceeded abuse threshold, blocklisted"
            );
            metrics::record_origin_blocked();
        }
        AbuseVerdict::Blocked
    }

    pub fn is_blocked(&self, origin: &str) -> bool {
        self.blocklist.contains_key(origin)
    }

    /// Operator action: lift a block and restart the origin's count.
    /// Returns whether the origin was blocked.
    pub fn unblock(&self, origin: &str) -> bool {
        let removed = self.blocklist.remove(origin).is_some();
        if removed {
            self.records.remove(origin);
            tracing::info!(origin = %origin, "Origin removed from blocklist");
        }
        removed
    }

    /// Current blocklist, oldest first.
    pub fn blocklist(&self) -> Vec<BlockedOrigin> {
        let mut entries: Vec<BlockedOrigin> = self
            .blocklist
            .iter()
            .map(|entry| BlockedOrigin {
                origin: entry.key().clone(),
                blocked_at_ms: *entry.value(),
            })
            .collect();
        entries.sort_by(|a, b| {
            a.blocked_at_ms
                .cmp(&b.blocked_at_ms)
                .then_with(|| a.origin.cmp(&b.origin))
        });
        entries
    }

    /// Drop records not seen for a full period. Blocklist entries are kept.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.records.len();
        self.records
            .retain(|_, record| !record.is_stale(now, self.period_ms));
        before.saturating_sub(self.records.len())
    }

    pub fn tracked_origins(&self) -> usize {
        self.records.len()
    }

    pub fn blocked_count(&self) -> usize {
        self.blocklist.len()
    }
}
