//! Governance as axum middleware.
//!
//! # Data Flow
//! ```text
//! Request
//!     → caller identity (extension, else headers + peer address)
//!     → GovernancePipeline::execute
//!         → rejected: 429 / 403 JSON body
//!         → cache hit: replay stored payload
//!         → otherwise: next handler, capture body when cacheable
//!     → X-RateLimit-* / X-Cache headers
//! ```
//!
//! Install with `route_layer` so the matched route is known.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::IdentityConfig;
use crate::governance::{DownstreamResponse, GovernancePipeline, RequestDescriptor, Served};
use crate::http::request::request_id_of;
use crate::http::response::{apply_governance_headers, cached_to_response, capture_response};
use crate::security::identity::{resolve_identity, CallerIdentity};

/// State for [`governance_middleware`].
#[derive(Debug, Clone)]
pub struct GovernanceState {
    pub pipeline: GovernancePipeline,
    pub identity: Arc<IdentityConfig>,
}

fn caller_of(state: &GovernanceState, request: &Request) -> CallerIdentity {
    if let Some(caller) = request.extensions().get::<CallerIdentity>() {
        return caller.clone();
    }
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    resolve_identity(&state.identity, request.headers(), peer)
}

fn descriptor_of(request: &Request) -> RequestDescriptor {
    let descriptor = RequestDescriptor::new(
        request.method().clone(),
        request.uri().path(),
        request.uri().query().map(str::to_string),
    );
    // Catch-all patterns say nothing about the endpoint; use the path.
    match request.extensions().get::<MatchedPath>() {
        Some(route) if !route.as_str().contains("{*") => descriptor.with_route(route.as_str()),
        _ => descriptor,
    }
}

pub async fn governance_middleware(
    State(state): State<GovernanceState>,
    request: Request,
    next: Next,
) -> Response {
    let caller = caller_of(&state, &request);
    let descriptor = descriptor_of(&request);
    let request_id = request_id_of(&request).to_string();

    tracing::debug!(
        request_id = %request_id,
        method = %descriptor.method,
        path = %descriptor.path,
        subject = %caller.subject(),
        "Governing request"
    );

    let outcome = state
        .pipeline
        .execute(&caller, &descriptor, |capture| async move {
            let response = next.run(request).await;
            match capture {
                Some(capture) => {
                    let (response, payload) = capture_response(response, capture.max_body_bytes).await;
                    let status = response.status();
                    DownstreamResponse {
                        response,
                        status,
                        payload,
                    }
                }
                None => {
                    let status = response.status();
                    DownstreamResponse::uncaptured(response, status)
                }
            }
        })
        .await;

    match outcome {
        Ok(governed) => {
            let mut response = match governed.served {
                Served::Cached(cached) => cached_to_response(cached),
                Served::Fresh(response) => response,
            };
            apply_governance_headers(response.headers_mut(), &governed.meta);
            response
        }
        Err(err) => {
            tracing::debug!(request_id = %request_id, code = err.code(), "Request rejected");
            err.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware::from_fn_with_state, routing::get, Router};
    use tower::ServiceExt;

    use crate::clock::ManualClock;
    use crate::config::{CacheRouteConfig, GovernorConfig, LimitRule};
    use crate::governance::GovernanceStore;
    use crate::http::response::{X_CACHE, X_RATELIMIT_REMAINING};

    fn app(config: GovernorConfig) -> Router {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = Arc::new(GovernanceStore::new(&config, clock));
        let state = GovernanceState {
            pipeline: GovernancePipeline::new(&config, store),
            identity: Arc::new(config.identity.clone()),
        };
        Router::new()
            .route("/items/{id}", get(|| async { "item" }))
            .route("/echo", get(|| async { "echo" }))
            .route_layer(from_fn_with_state(state, governance_middleware))
    }

    fn request(uri: &str, caller: &CallerIdentity) -> Request {
        let mut request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        request.extensions_mut().insert(caller.clone());
        request
    }

    #[tokio::test]
    async fn test_extension_identity_and_headers() {
        let mut config = GovernorConfig::default();
        config.rate_limit.roles.insert("basic".into(), LimitRule::new(60_000, 2));
        config.cache.routes.push(CacheRouteConfig {
            path_prefix: "/items".into(),
            namespace: "items".into(),
            ttl_secs: None,
            vary_by_identity: true,
            invalidates: Vec::new(),
        });
        let app = app(config);
        let caller = CallerIdentity::authenticated("10.0.0.1", "u1", Some("basic".into()));

        let first = app.clone().oneshot(request("/items/7", &caller)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()[X_CACHE], "MISS");
        assert_eq!(first.headers()[X_RATELIMIT_REMAINING], "1");

        let second = app.clone().oneshot(request("/items/7", &caller)).await.unwrap();
        assert_eq!(second.headers()[X_CACHE], "HIT");
        let body = axum::body::to_bytes(second.into_body(), 1024).await.unwrap();
        assert_eq!(body, "item");

        let third = app.clone().oneshot(request("/echo", &caller)).await.unwrap();
        assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_missing_peer_is_governed_as_unknown_origin() {
        let app = app(GovernorConfig::default());
        let response = app
            .oneshot(Request::builder().uri("/echo").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_CACHE], "BYPASS");
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "99");
    }
}
