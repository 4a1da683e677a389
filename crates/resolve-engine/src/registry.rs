//! Resolver registry
//!
//! Maps `TYPE:namespace` to a shared [`Resolver`]. Registration may happen
//! while resolutions are in flight; readers clone the `Arc` out of the map.

use dashmap::DashMap;
use resolve_core::{Resolver, ResolverKey};
use std::fmt;
use std::sync::Arc;

/// Registry of resolvers keyed by `TYPE:namespace`
#[derive(Default, Clone)]
pub struct ResolverRegistry {
    resolvers: Arc<DashMap<ResolverKey, Arc<dyn Resolver>>>,
}

impl ResolverRegistry {
    /// Create new empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver under its key, returning the one it replaces
    pub fn register(&self, resolver: Arc<dyn Resolver>) -> Option<Arc<dyn Resolver>> {
        self.resolvers.insert(resolver.key(), resolver)
    }

    /// Remove resolver
    pub fn unregister(&self, key: &ResolverKey) -> Option<Arc<dyn Resolver>> {
        self.resolvers.remove(key).map(|(_, resolver)| resolver)
    }

    /// Resolver for key
    #[must_use]
    pub fn get(&self, key: &ResolverKey) -> Option<Arc<dyn Resolver>> {
        self.resolvers.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Check if a resolver is registered
    #[inline]
    #[must_use]
    pub fn contains(&self, key: &ResolverKey) -> bool {
        self.resolvers.contains_key(key)
    }

    /// Registered keys, sorted
    #[must_use]
    pub fn keys(&self) -> Vec<ResolverKey> {
        let mut keys: Vec<ResolverKey> = self.resolvers.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Get number of registered resolvers
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

impl fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}
