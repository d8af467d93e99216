//! In-memory KV store implementation using `DashMap`.
//!
//! Data is lost on process restart. Expired entries are invisible to reads
//! and are removed lazily when touched or by `purge_expired`.

use super::KvStore;
use crate::Result;
use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-memory key-value store with per-key expiry.
///
/// # Example
///
/// ```rust
/// use trueno_cache::kv::{KvStore, MemoryKvStore};
///
/// # async fn example() -> trueno_cache::Result<()> {
/// let store = MemoryKvStore::new();
/// store.set("hello", b"world".to_vec()).await?;
/// assert_eq!(store.get("hello").await?, Some(b"world".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    store: DashMap<String, Entry>,
}

impl MemoryKvStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: DashMap::new(),
        }
    }

    /// Empty store sized for `capacity` keys.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            store: DashMap::with_capacity(capacity),
        }
    }

    /// Number of stored entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether no entries (live or expired) remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.store.len();
        self.store.retain(|_, e| e.is_live(now));
        before.saturating_sub(self.store.len())
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.store.clear();
    }

    fn insert(&self, key: &str, value: Vec<u8>, expires_at: Option<Instant>) {
        self.store
            .insert(key.to_string(), Entry { value, expires_at });
    }
}

impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let hit = self
            .store
            .get(key)
            .map(|e| e.is_live(now).then(|| e.value.clone()));
        match hit {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.store.remove_if(key, |_, e| !e.is_live(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.insert(key, value, None);
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.insert(key, value, Instant::now().checked_add(ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self.store.get(key).is_some_and(|e| e.is_live(now)))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .store
            .iter()
            .filter(|e| e.key().starts_with(prefix) && e.value().is_live(now))
            .map(|e| e.key().clone())
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }
}
