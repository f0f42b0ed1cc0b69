//! Request governance subsystem.
//!
//! # Data Flow
//! ```text
//! CallerIdentity + RequestDescriptor
//!     → pipeline.rs    (orders the steps below)
//!         → abuse.rs        (per-origin volume, blocklist)
//!         → rate_limit.rs   (fixed-window quotas: endpoint override, else role)
//!         → cache.rs        (TTL response cache, two-phase eviction)
//!         → invalidation.rs (namespace removal after writes)
//!         → performance.rs  (per-endpoint latency and error rate)
//!
//! store.rs owns one instance of each store.
//! sweeper.rs clears expired state on a timer.
//! keys.rs builds every bucket and cache key.
//! ```
//!
//! # Design Decisions
//! - All state is in-memory and process-local
//! - Time comes from an injected `Clock` so windows and TTLs are testable
//! - Each store serializes its own mutations; there is no cross-store lock

pub mod abuse;
pub mod cache;
pub mod invalidation;
pub mod keys;
pub mod performance;
pub mod pipeline;
pub mod rate_limit;
pub mod routes;
pub mod store;
pub mod sweeper;

pub use abuse::{AbuseTracker, AbuseVerdict, BlockedOrigin};
pub use cache::{CacheLookup, CacheStats, ResponseCache};
pub use invalidation::CacheInvalidator;
pub use performance::{PerformanceCollector, PerformanceRecord};
pub use pipeline::{
    CacheStatus, CaptureRequest, DownstreamResponse, GovernanceMeta, GovernancePipeline, Governed,
    RequestDescriptor, Served,
};
pub use rate_limit::{LimitPolicy, QuotaSnapshot, RateDecision, RateLimiter};
pub use store::{CachedResponse, GovernanceStore, StoreSizes};
pub use sweeper::{SweepKind, SweepReport, Sweeper};
