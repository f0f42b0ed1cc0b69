//! Fixed-window rate limiting with role tiers and endpoint overrides.
//!
//! # Algorithm
//! ```text
//! bucket missing or now > window_reset_at
//!     → count = 0, window_reset_at = now + window_ms
//! count >= max_requests
//!     → Rejected, retry_after = ceil((window_reset_at - now) / 1000)
//! otherwise
//!     → count += 1, Allowed
//! ```
//!
//! # Design Decisions
//! - One mutex over the bucket map; the reset/compare/increment sequence runs
//!   under it, so concurrent callers can't both take the last slot
//! - An endpoint override replaces the role quota for that path, it never stacks
//! - Unknown or missing roles get the most restrictive role quota

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::clock::Clock;
use crate::config::{LimitRule, RateLimitConfig};
use crate::governance::keys::LimitScope;

/// Counter for one governance key.
#[derive(Debug, Clone)]
struct RateBucket {
    count: u32,
    window_reset_at: u64,
}

impl RateBucket {
    fn new(now: u64, window_ms: u64) -> Self {
        Self {
            count: 0,
            window_reset_at: now + window_ms,
        }
    }

    fn try_acquire(&mut self, now: u64, rule: LimitRule) -> bool {
        if now > self.window_reset_at {
            self.count = 0;
            self.window_reset_at = now + rule.window_ms;
        }

        if self.count >= rule.max_requests {
            false
        } else {
            self.count += 1;
            true
        }
    }
}

/// Quota state after a check, for response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at_ms: u64,
}

impl QuotaSnapshot {
    /// Reset time as epoch seconds, rounded up.
    pub fn reset_at_secs(&self) -> u64 {
        self.reset_at_ms.div_ceil(1000)
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed(QuotaSnapshot),
    Rejected {
        quota: QuotaSnapshot,
        retry_after_secs: u64,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed(_))
    }

    pub fn quota(&self) -> QuotaSnapshot {
        match self {
            RateDecision::Allowed(quota) | RateDecision::Rejected { quota, .. } => *quota,
        }
    }
}

/// Process-wide fixed-window counters.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, RateBucket>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Count one request against `key` under `rule`.
    pub fn check(&self, key: &str, rule: LimitRule) -> RateDecision {
        let now = self.clock.now_ms();

        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| RateBucket::new(now, rule.window_ms));

        let allowed = bucket.try_acquire(now, rule);
        let quota = QuotaSnapshot {
            limit: rule.max_requests,
            remaining: rule.max_requests.saturating_sub(bucket.count),
            reset_at_ms: bucket.window_reset_at,
        };

        if allowed {
            RateDecision::Allowed(quota)
        } else {
            let wait_ms = bucket.window_reset_at.saturating_sub(now);
            RateDecision::Rejected {
                quota,
                retry_after_secs: wait_ms.div_ceil(1000).max(1),
            }
        }
    }

    /// Drop buckets whose window has passed. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();
        buckets.retain(|_, bucket| now <= bucket.window_reset_at);
        before - buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Quota chosen for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLimit {
    pub scope: LimitScope,
    pub rule: LimitRule,
}

/// Role and endpoint quota tables, fixed at startup.
#[derive(Debug, Clone)]
pub struct LimitPolicy {
    roles: HashMap<String, LimitRule>,
    endpoints: HashMap<String, LimitRule>,
    fallback_role: String,
    fallback_rule: LimitRule,
}

const FALLBACK_ROLE: &str = "anonymous";
const FALLBACK_RULE: LimitRule = LimitRule::new(15 * 60 * 1000, 100);

impl LimitPolicy {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        let (fallback_role, fallback_rule) = most_restrictive(&config.roles)
            .map(|(role, rule)| (role.to_string(), rule))
            .unwrap_or_else(|| (FALLBACK_ROLE.to_string(), FALLBACK_RULE));

        Self {
            roles: config.roles.clone(),
            endpoints: config.endpoints.clone(),
            fallback_role,
            fallback_rule,
        }
    }

    /// Pick the quota for a caller with `role` hitting `path`.
    pub fn resolve(&self, role: Option<&str>, path: &str) -> ResolvedLimit {
        if let Some(rule) = self.endpoints.get(path) {
            return ResolvedLimit {
                scope: LimitScope::Endpoint(path.to_string()),
                rule: *rule,
            };
        }

        match role.and_then(|r| self.roles.get_key_value(r)) {
            Some((name, rule)) => ResolvedLimit {
                scope: LimitScope::Role(name.clone()),
                rule: *rule,
            },
            None => ResolvedLimit {
                scope: LimitScope::Role(self.fallback_role.clone()),
                rule: self.fallback_rule,
            },
        }
    }

    /// The role applied to unauthenticated or unknown callers.
    pub fn fallback_role(&self) -> &str {
        &self.fallback_role
    }
}

/// Role with the lowest allowed rate; ties go to the smaller `max_requests`,
/// then to the name so the choice is stable.
fn most_restrictive(roles: &HashMap<String, LimitRule>) -> Option<(&str, LimitRule)> {
    roles
        .iter()
        .min_by(|(a_name, a), (b_name, b)| {
            // a.max / a.window vs b.max / b.window without floats
            let lhs = u128::from(a.max_requests) * u128::from(b.window_ms);
            let rhs = u128::from(b.max_requests) * u128::from(a.window_ms);
            lhs.cmp(&rhs)
                .then(a.max_requests.cmp(&b.max_requests))
                .then(a_name.cmp(b_name))
        })
        .map(|(name, rule)| (name.as_str(), *rule))
}
