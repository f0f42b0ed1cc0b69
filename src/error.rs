//! Governance error taxonomy.
//!
//! Only [`GovernanceError`] ever reaches a caller. Cache and metrics failures
//! are logged where they happen and degrade to "feature disabled".

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::http::response::{RETRY_AFTER, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET};

/// A terminal governance decision for one request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GovernanceError {
    /// The caller used up its window quota.
    #[error("rate limit of {limit} requests exceeded, retry after {retry_after_secs}s")]
    QuotaExceeded {
        limit: u32,
        retry_after_secs: u64,
        reset_at_ms: u64,
    },

    /// The origin crossed the abuse threshold and sits on the blocklist.
    #[error("origin {origin} is blocked")]
    OriginBlocked { origin: String },
}

impl GovernanceError {
    pub fn status(&self) -> StatusCode {
        match self {
            GovernanceError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            GovernanceError::OriginBlocked { .. } => StatusCode::FORBIDDEN,
        }
    }

    /// Machine-readable code for the rejection body.
    pub fn code(&self) -> &'static str {
        match self {
            GovernanceError::QuotaExceeded { .. } => "RATE_LIMITED",
            GovernanceError::OriginBlocked { .. } => "ORIGIN_BLOCKED",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}

impl IntoResponse for GovernanceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after_secs = match &self {
            GovernanceError::QuotaExceeded { retry_after_secs, .. } => Some(*retry_after_secs),
            GovernanceError::OriginBlocked { .. } => None,
        };
        let body = Json(ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
                retry_after_secs,
            },
        });

        let mut response = (status, body).into_response();
        if let GovernanceError::QuotaExceeded {
            limit,
            retry_after_secs,
            reset_at_ms,
        } = self
        {
            let headers = response.headers_mut();
            headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u32));
            headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset_at_ms.div_ceil(1000)));
        }
        response
    }
}

/// Internal cache failures. Always converted into a cache bypass.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("response body of {size} bytes exceeds the {limit} byte cache limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("response body has no usable length")]
    UnknownLength,

    #[error("failed to buffer response body: {0}")]
    Body(#[from] axum::Error),
}
