//! Operator API.
//!
//! # Endpoints
//! ```text
//! GET    /admin/status               version, uptime, store sizes, fallback role
//! GET    /admin/cache                hit/miss stats
//! POST   /admin/cache/invalidate     {"prefix": "..."} → removed count
//! GET    /admin/metrics              per-endpoint records
//! GET    /admin/metrics/slowest      ?limit=N
//! POST   /admin/metrics/reset
//! GET    /admin/blocklist
//! DELETE /admin/blocklist/{origin}
//! POST   /admin/sweep/{kind}         rate_buckets | cache | abuse | metrics
//! ```
//!
//! Every route requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::governance::{CacheInvalidator, CachedResponse, GovernanceStore, LimitPolicy, Sweeper};
use self::auth::admin_auth_middleware;
use self::handlers::*;

#[derive(Debug, Clone)]
pub struct AdminState {
    pub store: Arc<GovernanceStore>,
    pub policy: Arc<LimitPolicy>,
    pub invalidator: CacheInvalidator<CachedResponse>,
    pub sweeper: Arc<Sweeper>,
    pub api_key: Arc<str>,
    pub slowest_limit: usize,
    pub started_at: Instant,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/cache", get(get_cache))
        .route("/admin/cache/invalidate", post(invalidate_cache))
        .route("/admin/metrics", get(get_metrics))
        .route("/admin/metrics/slowest", get(get_slowest))
        .route("/admin/metrics/reset", post(reset_metrics))
        .route("/admin/blocklist", get(get_blocklist))
        .route("/admin/blocklist/{origin}", delete(unblock_origin))
        .route("/admin/sweep/{kind}", post(run_sweep))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
