//! Response handling and transformation.
//!
//! # Responsibilities
//! - Attach quota and cache headers to governed responses
//! - Buffer cacheable responses into a [`CachedResponse`]
//! - Replay cached payloads as responses
//!
//! # Design Decisions
//! - Only responses of known length within the limit are buffered;
//!   everything else streams through untouched
//! - `Set-Cookie` and hop-by-hop headers are never stored

use axum::{
    body::{Body, HttpBody},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use crate::error::CacheError;
use crate::governance::{CachedResponse, GovernanceMeta};

pub const RETRY_AFTER: HeaderName = header::RETRY_AFTER;
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Headers that describe the connection, not the resource.
const UNCACHEABLE_HEADERS: [HeaderName; 9] = [
    header::CONNECTION,
    header::SET_COOKIE,
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    HeaderName::from_static("keep-alive"),
];

/// Write quota and cache status headers.
pub fn apply_governance_headers(headers: &mut HeaderMap, meta: &GovernanceMeta) {
    if let Some(quota) = meta.quota {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(quota.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(quota.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(quota.reset_at_secs()));
    }
    headers.insert(X_CACHE, HeaderValue::from_static(meta.cache.as_str()));
}

/// Rebuild a response from a cached payload.
pub fn cached_to_response(cached: CachedResponse) -> Response {
    let mut response = (cached.status, cached.body).into_response();
    for (name, value) in cached.headers.iter() {
        response.headers_mut().insert(name.clone(), value.clone());
    }
    response
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn storable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut stored = headers.clone();
    for name in &UNCACHEABLE_HEADERS {
        stored.remove(name);
    }
    stored
}

/// Buffer `response` for the cache when its size allows.
///
/// Cache problems never change what the client gets: an oversized or
/// unsized body is passed through untouched as a plain miss. The one
/// exception is an upstream body that fails while being read. The stream is
/// already consumed and broken at that point, so the client gets a 502
/// instead of a truncated copy of the upstream response.
pub async fn capture_response(
    response: Response,
    max_body_bytes: usize,
) -> (Response, Option<Result<CachedResponse, CacheError>>) {
    if !response.status().is_success() {
        return (response, None);
    }

    let known_length = content_length(response.headers())
        .or_else(|| response.body().size_hint().exact().and_then(|n| usize::try_from(n).ok()));
    let size = match known_length {
        Some(size) if size > max_body_bytes => {
            return (
                response,
                Some(Err(CacheError::PayloadTooLarge {
                    size,
                    limit: max_body_bytes,
                })),
            )
        }
        Some(size) => size,
        None => return (response, Some(Err(CacheError::UnknownLength))),
    };

    let (parts, body) = response.into_parts();
    match axum::body::to_bytes(body, size.max(1)).await {
        Ok(bytes) => {
            let cached = CachedResponse {
                status: parts.status,
                headers: storable_headers(&parts.headers),
                body: bytes.clone(),
            };
            (Response::from_parts(parts, Body::from(bytes)), Some(Ok(cached)))
        }
        // Upstream failure, not a cache failure: nothing is left to pass through.
        Err(e) => (
            (StatusCode::BAD_GATEWAY, "Upstream response body failed").into_response(),
            Some(Err(CacheError::Body(e))),
        ),
    }
}
