//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the governor.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the request governor.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GovernorConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// The application the gateway forwards to on a cache miss.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// How caller identity is read from inbound requests.
    pub identity: IdentityConfig,

    /// Role-based and endpoint-specific rate limits.
    pub rate_limit: RateLimitConfig,

    /// Per-origin volume tracking and blocklisting.
    pub abuse: AbuseConfig,

    /// Response cache sizing and cacheable routes.
    pub cache: CacheConfig,

    /// Per-endpoint performance records.
    pub metrics: MetricsConfig,

    /// Periodic sweep intervals.
    pub sweep: SweepConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upstream application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream address (e.g., "127.0.0.1:3000").
    pub address: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:3000".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time for a governed request/response in seconds.
    pub request_secs: u64,

    /// Time allowed for the upstream to answer in seconds.
    pub upstream_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            upstream_secs: 20,
        }
    }
}

/// Identity headers supplied by the authentication layer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Header carrying the authenticated user id.
    pub user_header: String,

    /// Header carrying the caller's subscription tier.
    pub role_header: String,

    /// Use the first `X-Forwarded-For` entry as the origin.
    pub trust_forwarded_for: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_header: "x-user-id".to_string(),
            role_header: "x-user-role".to_string(),
            trust_forwarded_for: false,
        }
    }
}

/// A fixed-window quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct LimitRule {
    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Requests allowed per window.
    pub max_requests: u32,
}

impl LimitRule {
    pub const fn new(window_ms: u64, max_requests: u32) -> Self {
        Self {
            window_ms,
            max_requests,
        }
    }
}

const FIFTEEN_MINUTES_MS: u64 = 15 * 60 * 1000;

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Role name -> quota.
    pub roles: HashMap<String, LimitRule>,

    /// Exact request path -> quota. Replaces the role quota for that path.
    pub endpoints: HashMap<String, LimitRule>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let roles = HashMap::from([
            ("anonymous".to_string(), LimitRule::new(FIFTEEN_MINUTES_MS, 100)),
            ("basic".to_string(), LimitRule::new(FIFTEEN_MINUTES_MS, 1000)),
            ("premium".to_string(), LimitRule::new(FIFTEEN_MINUTES_MS, 5000)),
        ]);
        let endpoints = HashMap::from([(
            "/auth/login".to_string(),
            LimitRule::new(FIFTEEN_MINUTES_MS, 5),
        )]);

        Self {
            enabled: true,
            roles,
            endpoints,
        }
    }
}

/// Abuse tracking configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AbuseConfig {
    /// Enable abuse tracking.
    pub enabled: bool,

    /// Requests per period above which an origin is blocklisted.
    pub threshold: u64,

    /// Tracking period in seconds.
    pub period_secs: u64,

    /// Origins that are never counted or blocked (e.g. internal health checkers).
    pub exempt_origins: Vec<String>,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 1000,
            period_secs: 3600,
            exempt_origins: Vec::new(),
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable response caching.
    pub enabled: bool,

    /// Entry count that triggers an eviction pass.
    pub high_water: usize,

    /// Entry count an eviction pass prunes down to.
    pub low_water: usize,

    /// TTL for routes that don't set their own.
    pub default_ttl_secs: u64,

    /// Largest response body that will be cached.
    pub max_body_bytes: usize,

    /// Cacheable routes.
    pub routes: Vec<CacheRouteConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            high_water: 10_000,
            low_water: 8_000,
            default_ttl_secs: 300,
            max_body_bytes: 1024 * 1024,
            routes: Vec::new(),
        }
    }
}

/// A cacheable route.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheRouteConfig {
    /// Path prefix served from this namespace.
    pub path_prefix: String,

    /// Logical namespace used as the cache key prefix (e.g. "properties:list").
    pub namespace: String,

    /// Entry TTL; falls back to `cache.default_ttl_secs`.
    #[serde(default)]
    pub ttl_secs: Option<u64>,

    /// Cache per caller instead of sharing one entry across callers.
    #[serde(default)]
    pub vary_by_identity: bool,

    /// Extra namespaces cleared when a write succeeds on this route.
    #[serde(default)]
    pub invalidates: Vec<String>,
}

/// Performance record configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Records older than this are purged by the metrics sweep.
    pub retention_secs: u64,

    /// Default size of the slowest-endpoints view.
    pub slowest_limit: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            retention_secs: 24 * 3600,
            slowest_limit: 10,
        }
    }
}

/// Sweep intervals in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SweepConfig {
    pub rate_buckets_secs: u64,
    pub cache_secs: u64,
    pub abuse_secs: u64,
    pub metrics_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            rate_buckets_secs: 60,
            cache_secs: 60,
            abuse_secs: 3600,
            metrics_secs: 3600,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

/// Placeholder key rejected by validation when the admin API is enabled.
pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_API_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
