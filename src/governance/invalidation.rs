//! Namespace invalidation for the response cache.
//!
//! Write-path handlers hold a [`CacheInvalidator`] and call it after a
//! mutating operation succeeds. Removal is immediate: the next read of any
//! removed key is a miss.

use std::sync::Arc;

use crate::governance::cache::ResponseCache;
use crate::governance::keys::namespace_prefix;
use crate::observability::metrics;

/// Cloneable handle that removes cache entries by key prefix.
#[derive(Debug)]
pub struct CacheInvalidator<V> {
    cache: Arc<ResponseCache<V>>,
}

impl<V> Clone for CacheInvalidator<V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }
}

impl<V: Clone> CacheInvalidator<V> {
    pub fn new(cache: Arc<ResponseCache<V>>) -> Self {
        Self { cache }
    }

    /// Remove every entry whose key starts with `prefix`.
    pub fn invalidate_by_prefix(&self, prefix: &str) -> usize {
        let removed = self.cache.remove_prefix(prefix);
        metrics::record_cache_invalidation(removed);
        tracing::debug!(prefix = %prefix, removed, "Cache prefix invalidated");
        removed
    }

    /// Remove every entry in a logical namespace (e.g. "properties:list").
    pub fn invalidate_namespace(&self, namespace: &str) -> usize {
        self.invalidate_by_prefix(&namespace_prefix(namespace))
    }

    /// Remove several namespaces, returning the total removed.
    pub fn invalidate_namespaces<'a, I>(&self, namespaces: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        namespaces
            .into_iter()
            .map(|namespace| self.invalidate_namespace(namespace))
            .sum()
    }
}
