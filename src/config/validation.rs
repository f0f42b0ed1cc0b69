//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows > 0, limits > 0, water marks ordered)
//! - Upstream timeout must expire before the whole-request timeout
//! - Catch unsafe admin settings
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GovernorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use axum::http::uri::Authority;
use thiserror::Error;

use crate::config::schema::{GovernorConfig, LimitRule, PLACEHOLDER_API_KEY};

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("upstream.address '{0}' is not a valid host:port authority")]
    InvalidUpstream(String),

    #[error("timeouts.upstream_secs ({upstream}) must be below timeouts.request_secs ({request})")]
    UpstreamOutlivesRequest { upstream: u64, request: u64 },

    #[error("rate_limit.roles must define at least one role")]
    NoRoles,

    #[error("{0}: window_ms must be greater than zero")]
    ZeroWindow(String),

    #[error("{0}: max_requests must be greater than zero")]
    ZeroLimit(String),

    #[error("abuse.threshold must be greater than zero")]
    ZeroAbuseThreshold,

    #[error("abuse.period_secs must be greater than zero")]
    ZeroAbusePeriod,

    #[error("cache.low_water ({low}) must be below cache.high_water ({high})")]
    WaterMarks { low: usize, high: usize },

    #[error("cache.routes[{0}]: namespace must not be empty")]
    EmptyNamespace(usize),

    #[error("cache.default_ttl_secs must be greater than zero")]
    ZeroDefaultTtl,

    #[error("cache.routes[{0}]: ttl_secs must be greater than zero")]
    ZeroTtl(usize),

    #[error("sweep.{0} must be greater than zero")]
    ZeroSweepInterval(&'static str),

    #[error("admin.api_key must be changed before enabling the admin API")]
    PlaceholderApiKey,
}

fn check_rule(label: String, rule: &LimitRule, errors: &mut Vec<ValidationError>) {
    if rule.window_ms == 0 {
        errors.push(ValidationError::ZeroWindow(label.clone()));
    }
    if rule.max_requests == 0 {
        errors.push(ValidationError::ZeroLimit(label));
    }
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &GovernorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.upstream.address.parse::<Authority>().is_err() {
        errors.push(ValidationError::InvalidUpstream(config.upstream.address.clone()));
    }

    let timeouts = &config.timeouts;
    if timeouts.upstream_secs >= timeouts.request_secs {
        errors.push(ValidationError::UpstreamOutlivesRequest {
            upstream: timeouts.upstream_secs,
            request: timeouts.request_secs,
        });
    }

    let rate_limit = &config.rate_limit;
    if rate_limit.roles.is_empty() {
        errors.push(ValidationError::NoRoles);
    }
    for (role, rule) in &rate_limit.roles {
        check_rule(format!("rate_limit.roles.{role}"), rule, &mut errors);
    }
    for (path, rule) in &rate_limit.endpoints {
        check_rule(format!("rate_limit.endpoints.\"{path}\""), rule, &mut errors);
    }

    if config.abuse.threshold == 0 {
        errors.push(ValidationError::ZeroAbuseThreshold);
    }
    if config.abuse.period_secs == 0 {
        errors.push(ValidationError::ZeroAbusePeriod);
    }

    let cache = &config.cache;
    if cache.low_water >= cache.high_water {
        errors.push(ValidationError::WaterMarks {
            low: cache.low_water,
            high: cache.high_water,
        });
    }
    if cache.default_ttl_secs == 0 {
        errors.push(ValidationError::ZeroDefaultTtl);
    }
    for (i, route) in cache.routes.iter().enumerate() {
        if route.namespace.trim().is_empty() {
            errors.push(ValidationError::EmptyNamespace(i));
        }
        if route.ttl_secs == Some(0) {
            errors.push(ValidationError::ZeroTtl(i));
        }
    }

    let sweep = &config.sweep;
    for (name, secs) in [
        ("rate_buckets_secs", sweep.rate_buckets_secs),
        ("cache_secs", sweep.cache_secs),
        ("abuse_secs", sweep.abuse_secs),
        ("metrics_secs", sweep.metrics_secs),
    ] {
        if secs == 0 {
            errors.push(ValidationError::ZeroSweepInterval(name));
        }
    }

    if config.admin.enabled && config.admin.api_key == PLACEHOLDER_API_KEY {
        errors.push(ValidationError::PlaceholderApiKey);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
