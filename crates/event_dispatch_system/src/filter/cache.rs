//! Weak, concurrent cache keyed by method identity
//!
//! Compiled filters and adapters are shared structurally: registrations of
//! the same captureless listener function, across all plugins, reuse one
//! compiled pipeline. A `TypeId` only pins down behavior for zero-sized
//! handler types, so the dispatcher never caches closures that carry
//! captured state. Entries are held weakly so that dropping the last
//! registration lets the compiled artifact be collected; stale entries are
//! pruned when they are next touched.

use dashmap::DashMap;
use std::any::TypeId;
use std::sync::{Arc, Weak};

/// Concurrent weak cache from method identity (the `TypeId` of the handler
/// function/closure type) to a shared artifact.
///
/// Concurrent first access by two threads may compute redundantly, but both
/// converge on a single stored value and a partially-built artifact is never
/// observable.
pub struct MethodCache<V> {
    entries: DashMap<TypeId, Weak<V>>,
}

impl<V> MethodCache<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Live entry for the key, pruning it when the artifact is gone.
    pub fn get(&self, key: TypeId) -> Option<Arc<V>> {
        // The guard from `get` must be dropped before `remove_if` touches the
        // same shard.
        let upgraded = self.entries.get(&key).and_then(|weak| weak.upgrade());
        if upgraded.is_none() {
            self.entries.remove_if(&key, |_, weak| weak.strong_count() == 0);
        }
        upgraded
    }

    /// Infallible variant of [`MethodCache::get_or_try_insert_with`].
    pub fn get_or_insert_with(&self, key: TypeId, build: impl FnOnce() -> Arc<V>) -> Arc<V> {
        self.get_or_try_insert_with::<std::convert::Infallible>(key, || Ok(build()))
            .unwrap_or_else(|never| match never {})
    }

    /// Returns the cached artifact or builds one with `build`. Build failures
    /// leave the cache untouched.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: TypeId,
        build: impl FnOnce() -> Result<Arc<V>, E>,
    ) -> Result<Arc<V>, E> {
        if let Some(existing) = self.get(key) {
            return Ok(existing);
        }
        let built = build()?;
        // Another thread may have won the race; converge on whichever value
        // is stored.
        let entry = self
            .entries
            .entry(key)
            .and_modify(|weak| {
                if weak.upgrade().is_none() {
                    *weak = Arc::downgrade(&built);
                }
            })
            .or_insert_with(|| Arc::downgrade(&built));
        Ok(entry.upgrade().unwrap_or(built))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.value().strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every dead entry, returning how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        before - self.entries.len()
    }
}

impl<V> Default for MethodCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for MethodCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}
