//! Readiness cache for broker and router workloads.
//!
//! The watcher keeps this cache current so readiness checks during a
//! reconciliation pass do not hit the Kubernetes API for every broker.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::types::Readiness;

/// A cache of workload readiness, keyed by object name.
#[derive(Debug, Default)]
pub struct ReadinessCache {
    cache: RwLock<HashMap<String, Readiness>>,
}

impl ReadinessCache {
    /// Create a new empty readiness cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the readiness of a workload, if cached.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Readiness> {
        self.cache.read().get(name).copied()
    }

    /// Insert or update the readiness of a workload.
    ///
    /// Returns true if the stored value changed.
    pub fn insert(&self, name: String, readiness: Readiness) -> bool {
        self.cache.write().insert(name, readiness) != Some(readiness)
    }

    /// Remove a workload from the cache.
    pub fn remove(&self, name: &str) -> Option<Readiness> {
        self.cache.write().remove(name)
    }

    /// Get the number of cached workloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_insert_and_get() {
        let cache = ReadinessCache::new();
        assert!(cache.get("broker-a-0").is_none());

        let changed = cache.insert(
            "broker-a-0".to_string(),
            Readiness {
                desired: 1,
                ready: 0,
            },
        );
        assert!(changed);
        assert!(!cache.get("broker-a-0").unwrap().is_ready());
    }

    #[test]
    fn cache_reports_unchanged_updates() {
        let cache = ReadinessCache::new();
        let ready = Readiness {
            desired: 1,
            ready: 1,
        };

        assert!(cache.insert("router-a".to_string(), ready));
        assert!(!cache.insert("router-a".to_string(), ready));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_remove() {
        let cache = ReadinessCache::new();
        cache.insert("broker-a-0".to_string(), Readiness::default());

        assert!(cache.remove("broker-a-0").is_some());
        assert!(cache.is_empty());
    }
}
