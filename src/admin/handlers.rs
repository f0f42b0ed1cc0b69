use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::admin::AdminState;
use crate::governance::{BlockedOrigin, CacheStats, PerformanceRecord, StoreSizes, SweepKind, SweepReport};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdminError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AdminError::NotFound(_) => StatusCode::NOT_FOUND,
            AdminError::Conflict(_) => StatusCode::CONFLICT,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    /// Role applied to callers with no or an unknown role.
    pub fallback_role: String,
    pub stores: StoreSizes,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        fallback_role: state.policy.fallback_role().to_string(),
        stores: state.store.sizes(),
    })
}

pub async fn get_cache(State(state): State<AdminState>) -> Json<CacheStats> {
    Json(state.store.cache().stats())
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub prefix: String,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub prefix: String,
    pub removed: usize,
}

pub async fn invalidate_cache(
    State(state): State<AdminState>,
    Json(body): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>, AdminError> {
    // An empty prefix would wipe the whole cache.
    if body.prefix.is_empty() {
        return Err(AdminError::BadRequest("prefix must not be empty".into()));
    }
    let removed = state.invalidator.invalidate_by_prefix(&body.prefix);
    tracing::info!(prefix = %body.prefix, removed, "Admin cache invalidation");
    Ok(Json(InvalidateResponse {
        prefix: body.prefix,
        removed,
    }))
}

pub async fn get_metrics(State(state): State<AdminState>) -> Json<BTreeMap<String, PerformanceRecord>> {
    Json(state.store.performance().snapshot())
}

#[derive(Debug, Deserialize)]
pub struct SlowestQuery {
    pub limit: Option<usize>,
}

pub async fn get_slowest(
    State(state): State<AdminState>,
    Query(query): Query<SlowestQuery>,
) -> Json<Vec<PerformanceRecord>> {
    let limit = query.limit.unwrap_or(state.slowest_limit);
    Json(state.store.performance().slowest(limit))
}

pub async fn reset_metrics(State(state): State<AdminState>) -> Json<serde_json::Value> {
    let cleared = state.store.performance().reset();
    tracing::info!(cleared, "Performance records reset");
    Json(serde_json::json!({ "cleared": cleared }))
}

pub async fn get_blocklist(State(state): State<AdminState>) -> Json<Vec<BlockedOrigin>> {
    Json(state.store.abuse().blocklist())
}

pub async fn unblock_origin(
    State(state): State<AdminState>,
    Path(origin): Path<String>,
) -> Result<StatusCode, AdminError> {
    if state.store.abuse().unblock(&origin) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AdminError::NotFound(format!("origin {origin} is not blocked")))
    }
}

pub async fn run_sweep(
    State(state): State<AdminState>,
    Path(kind): Path<String>,
) -> Result<Json<SweepReport>, AdminError> {
    let kind: SweepKind = kind.parse().map_err(|e: crate::governance::sweeper::UnknownSweepKind| {
        AdminError::NotFound(e.to_string())
    })?;
    state
        .sweeper
        .run_once(kind)
        .map(Json)
        .ok_or_else(|| AdminError::Conflict(format!("{kind} sweep already in flight")))
}
