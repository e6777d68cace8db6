use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Opaque value held in an auxiliary store
pub type StoreValue = Arc<dyn Any + Send + Sync>;

struct Entry {
    value: StoreValue,
    /// `None` when the TTL reaches past what `Instant` can represent
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Named key/value store whose entries expire after a fixed TTL
pub struct TtlStore {
    name: String,
    ttl: Duration,
    entries: HashMap<String, Entry>,
}

impl TtlStore {
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live value under `key`; expired entries are invisible even before a sweep
    pub fn get(&self, key: &str, now: Instant) -> Option<StoreValue> {
        self.entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone())
    }

    /// Insert or replace, restarting the entry's TTL
    pub fn put(&mut self, key: impl Into<String>, value: StoreValue, now: Instant) {
        self.entries.insert(
            key.into(),
            Entry {
                value,
                expires_at: now.checked_add(self.ttl),
            },
        );
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop expired entries, returning how many were removed
    pub fn cleanup_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before - self.entries.len()
    }

    /// Read-only copy of the live entries
    pub fn view(&self, now: Instant) -> StoreView {
        StoreView {
            name: self.name.clone(),
            entries: self
                .entries
                .iter()
                .filter(|(_, e)| !e.is_expired(now))
                .map(|(k, e)| (k.clone(), e.value.clone()))
                .collect(),
        }
    }
}

/// Frozen copy of a store, embedded in a snapshot
#[derive(Clone)]
pub struct StoreView {
    name: String,
    entries: HashMap<String, StoreValue>,
}

impl StoreView {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_raw(&self, key: &str) -> Option<&StoreValue> {
        self.entries.get(key)
    }

    /// Typed lookup; `None` when missing or of a different type
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.entries
            .get(key)
            .and_then(|v| v.clone().downcast::<T>().ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for StoreView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreView")
            .field("name", &self.name)
            .field("entries", &self.entries.len())
            .finish()
    }
}
