//! Governance key construction.
//!
//! Keys are opaque to the stores; everything that decides what shares a
//! bucket or a cache entry lives here.

use std::fmt;

/// Rate-limit key prefix.
pub const RATE_LIMIT_PREFIX: &str = "rl:";

/// Separator between a cache namespace and the rest of the key.
pub const NAMESPACE_SEPARATOR: char = ':';

/// What a rate-limit bucket counts against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitScope {
    /// An endpoint-specific override, keyed by exact path.
    Endpoint(String),
    /// The caller's role-based default.
    Role(String),
}

impl LimitScope {
    /// Short label for logs and metric tags.
    pub fn kind(&self) -> &'static str {
        match self {
            LimitScope::Endpoint(_) => "endpoint",
            LimitScope::Role(_) => "role",
        }
    }
}

impl fmt::Display for LimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitScope::Endpoint(path) => write!(f, "path:{path}"),
            LimitScope::Role(role) => write!(f, "role:{role}"),
        }
    }
}

/// Bucket key for `identity` (user id or origin) under `scope`.
pub fn rate_limit_key(identity: &str, scope: &LimitScope) -> String {
    format!("{RATE_LIMIT_PREFIX}{identity}:{scope}")
}

/// Prefix matching every key in `namespace`.
pub fn namespace_prefix(namespace: &str) -> String {
    format!("{namespace}{NAMESPACE_SEPARATOR}")
}

/// Sort query pairs so `?b=2&a=1` and `?a=1&b=2` share an entry.
///
/// Pairs without a name are dropped. Values are kept as sent (no decoding).
pub fn normalize_query(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return String::new();
    };

    let mut pairs: Vec<(&str, &str)> = raw
        .split('&')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (!name.is_empty()).then_some((name, value))
        })
        .collect();
    pairs.sort_unstable();

    pairs
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Cache key for a resource read.
///
/// `namespace:path?sorted-query`, with `@identity` appended for per-caller
/// entries.
pub fn cache_key(namespace: &str, path: &str, query: Option<&str>, vary_by: Option<&str>) -> String {
    let mut key = format!("{}{path}", namespace_prefix(namespace));

    let query = normalize_query(query);
    if !query.is_empty() {
        key.push('?');
        key.push_str(&query);
    }
    if let Some(identity) = vary_by {
        key.push('@');
        key.push_str(identity);
    }
    key
}
