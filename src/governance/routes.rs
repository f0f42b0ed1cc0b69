//! Cacheable route matching.
//!
//! # Design Decisions
//! - Path prefix matching, case-sensitive
//! - Longest prefix wins when routes overlap
//! - No regex to keep matching O(n) in the number of routes

use crate::config::{CacheConfig, CacheRouteConfig};

/// A cacheable route with its TTL resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRoute {
    pub path_prefix: String,
    pub namespace: String,
    pub ttl_secs: u64,
    pub vary_by_identity: bool,
    pub invalidates: Vec<String>,
}

impl CacheRoute {
    fn from_config(config: &CacheRouteConfig, default_ttl_secs: u64) -> Self {
        Self {
            path_prefix: config.path_prefix.clone(),
            namespace: config.namespace.clone(),
            ttl_secs: config.ttl_secs.unwrap_or(default_ttl_secs),
            vary_by_identity: config.vary_by_identity,
            invalidates: config.invalidates.clone(),
        }
    }

    /// Namespaces to clear after a successful write on this route.
    pub fn write_invalidations(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.namespace.as_str()).chain(self.invalidates.iter().map(String::as_str))
    }
}

/// Routes ordered longest prefix first.
#[derive(Debug, Clone, Default)]
pub struct CacheRouteTable {
    routes: Vec<CacheRoute>,
}

impl CacheRouteTable {
    pub fn from_config(config: &CacheConfig) -> Self {
        let mut routes: Vec<CacheRoute> = config
            .routes
            .iter()
            .map(|route| CacheRoute::from_config(route, config.default_ttl_secs))
            .collect();
        routes.sort_by(|a, b| b.path_prefix.len().cmp(&a.path_prefix.len()));
        Self { routes }
    }

    pub fn match_path(&self, path: &str) -> Option<&CacheRoute> {
        self.routes.iter().find(|route| path.starts_with(&route.path_prefix))
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
