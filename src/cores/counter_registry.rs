use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::cores::CounterState;
use crate::types::{duration_to_nanos, Nanos};

/// Concurrent map from counter name to [`CounterState`].
///
/// Counters are created on first use and dropped by [`evict_stale`](Self::evict_stale)
/// once idle. The map is sharded, so the insert path only serializes callers
/// whose keys hash to the same shard, and only for the length of the insert.
///
/// # Example
///
/// ```rust
/// use rate_guard_admission::cores::CounterRegistry;
/// use std::sync::Arc;
///
/// let registry = CounterRegistry::new();
/// let a = registry.get_or_create("orders", 0);
/// let b = registry.get_or_create("orders", 5);
/// assert!(Arc::ptr_eq(&a, &b));
/// assert_eq!(registry.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct CounterRegistry {
    counters: DashMap<String, Arc<CounterState>>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter for `key`, creating it if it does not exist yet.
    ///
    /// Exactly one counter is ever created per key, even when many threads
    /// race on first access.
    pub fn get_or_create(&self, key: &str, now: Nanos) -> Arc<CounterState> {
        if let Some(existing) = self.counters.get(key) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .counters
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(CounterState::new(key, now)));
        Arc::clone(entry.value())
    }

    /// Returns the counter for `key` without creating it.
    pub fn get(&self, key: &str) -> Option<Arc<CounterState>> {
        self.counters.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.counters.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Removes counters idle for longer than `ttl` that have nothing in flight.
    ///
    /// Takes a snapshot of the keys first, then checks and removes each one
    /// under its own lock. A counter with in-flight work is never removed, no
    /// matter how stale. Not meant to run concurrently with itself.
    ///
    /// Returns the number of counters removed.
    pub fn evict_stale(&self, ttl: Duration, now: Nanos) -> usize {
        let cutoff = now.saturating_sub(duration_to_nanos(ttl));
        let keys: Vec<String> = self.counters.iter().map(|entry| entry.key().clone()).collect();

        let mut evicted = 0;
        for key in keys {
            if self.counters.remove_if(&key, |_, counter| counter.try_retire(cutoff)).is_some() {
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.counters.len(), "evicted stale counters");
        }
        evicted
    }
}
