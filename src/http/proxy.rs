//! Forwarding to the upstream application.
//!
//! # Responsibilities
//! - Rewrite the request URI to the configured upstream
//! - Forward with a bounded wait
//! - Map upstream failures to gateway status codes
//!
//! # Design Decisions
//! - Bodies stream in both directions; only the cache layer ever buffers
//! - Upstream timeout → 504, connection or protocol failure → 502
//! - No retries: a governed request is counted once

use std::time::Duration;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{
        header,
        uri::{Authority, PathAndQuery, Scheme},
        HeaderValue, StatusCode, Uri,
    },
    response::{IntoResponse, Response},
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::config::GovernorConfig;
use crate::http::request::request_id_of;

/// State for [`forward`].
#[derive(Debug, Clone)]
pub struct ProxyState {
    client: Client<HttpConnector, Body>,
    upstream: Authority,
    timeout: Duration,
}

impl ProxyState {
    /// Fails only when `upstream.address` is not a valid authority, which
    /// config validation already rules out.
    pub fn new(config: &GovernorConfig) -> Result<Self, axum::http::uri::InvalidUri> {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Ok(Self {
            client,
            upstream: config.upstream.address.parse()?,
            timeout: Duration::from_secs(config.timeouts.upstream_secs),
        })
    }

    pub fn upstream(&self) -> &Authority {
        &self.upstream
    }
}

fn upstream_uri(uri: &Uri, upstream: &Authority) -> Result<Uri, axum::http::uri::InvalidUriParts> {
    let mut parts = uri.clone().into_parts();
    parts.scheme = Some(Scheme::HTTP);
    parts.authority = Some(upstream.clone());
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    Uri::from_parts(parts)
}

/// Proxy the request to the upstream application.
pub async fn forward(State(state): State<ProxyState>, request: Request) -> Response {
    let request_id = request_id_of(&request).to_string();
    let (mut parts, body) = request.into_parts();

    parts.uri = match upstream_uri(&parts.uri, &state.upstream) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Failed to build upstream URI");
            return (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response();
        }
    };
    if let Ok(host) = HeaderValue::from_str(state.upstream.as_str()) {
        parts.headers.insert(header::HOST, host);
    }

    tracing::debug!(request_id = %request_id, uri = %parts.uri, "Forwarding upstream");

    let upstream_request = Request::from_parts(parts, body);
    match tokio::time::timeout(state.timeout, state.client.request(upstream_request)).await {
        Ok(Ok(response)) => {
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Ok(Err(e)) => {
            tracing::error!(request_id = %request_id, error = %e, "Upstream error");
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
        Err(_) => {
            tracing::warn!(
                request_id = %request_id,
                timeout_secs = state.timeout.as_secs(),
                "Upstream timed out"
            );
            (StatusCode::GATEWAY_TIMEOUT, "Upstream timed out").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_uri_keeps_path_and_query() {
        let upstream: Authority = "127.0.0.1:3000".parse().unwrap();
        let uri: Uri = "/properties?page=2".parse().unwrap();
        assert_eq!(
            upstream_uri(&uri, &upstream).unwrap(),
            "http://127.0.0.1:3000/properties?page=2"
        );
    }

    #[test]
    fn test_rejects_invalid_upstream() {
        let mut config = GovernorConfig::default();
        config.upstream.address = "not a host".into();
        assert!(ProxyState::new(&config).is_err());
    }
}
