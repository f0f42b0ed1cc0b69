//! Caller identity at the authentication boundary.
//!
//! Authentication itself happens upstream of the governor. It hands over the
//! authenticated user and subscription tier as request headers, or an
//! embedding application inserts a [`CallerIdentity`] extension directly.

use std::net::SocketAddr;

use axum::http::HeaderMap;

use crate::config::IdentityConfig;

/// Who is calling, as far as governance is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    /// Network origin, used for abuse tracking.
    pub origin: String,
    /// Authenticated user, if any.
    pub user_id: Option<String>,
    /// Subscription tier. `None` gets the most restrictive tier.
    pub role: Option<String>,
}

impl CallerIdentity {
    pub fn anonymous(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            user_id: None,
            role: None,
        }
    }

    pub fn authenticated(origin: impl Into<String>, user_id: impl Into<String>, role: Option<String>) -> Self {
        Self {
            origin: origin.into(),
            user_id: Some(user_id.into()),
            role,
        }
    }

    /// Rate-limit identity: the user when known, the origin otherwise.
    pub fn subject(&self) -> &str {
        self.user_id.as_deref().unwrap_or(&self.origin)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Build the caller identity from request headers and the peer address.
pub fn resolve_identity(config: &IdentityConfig, headers: &HeaderMap, peer: Option<SocketAddr>) -> CallerIdentity {
    let forwarded = config
        .trust_forwarded_for
        .then(|| header_str(headers, "x-forwarded-for"))
        .flatten()
        .and_then(|v| v.split(',').map(str::trim).find(|ip| !ip.is_empty()));

    let origin = match (forwarded, peer) {
        (Some(ip), _) => ip.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    };

    match header_str(headers, &config.user_header) {
        Some(user) => CallerIdentity::authenticated(
            origin,
            user,
            header_str(headers, &config.role_header).map(str::to_string),
        ),
        None => CallerIdentity::anonymous(origin),
    }
}
