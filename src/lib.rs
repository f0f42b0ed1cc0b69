//! Request governance for HTTP services.
//!
//! Rate limiting by role and endpoint, per-origin abuse blocking, a TTL
//! response cache with namespace invalidation, and per-endpoint performance
//! records. The components are usable on their own, through
//! [`governance::GovernancePipeline`], or as a governing gateway via
//! [`HttpServer`].

// Core
pub mod clock;
pub mod config;
pub mod error;
pub mod governance;

// Surfaces
pub mod admin;
pub mod http;
pub mod security;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::schema::GovernorConfig;
pub use error::{CacheError, GovernanceError};
pub use governance::{GovernancePipeline, GovernanceStore};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use security::CallerIdentity;
