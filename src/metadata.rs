//! Artifact metadata: the in-process index and its persisted mirror.
//!
//! [`MetadataIndex`] is the source of truth while the process runs and is
//! guarded by a single `parking_lot::Mutex` in the cache. [`MetadataStore`]
//! mirrors each entry to the external KV store as JSON under `meta:{id}`.

use crate::access;
use crate::codec::Compression;
use crate::kv::KvStore;
use crate::pool::with_timeout;
use crate::tensor::ElementType;
use crate::tier::Tier;
use crate::Result;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// KV key prefix for artifact metadata.
pub const META_PREFIX: &str = "meta:";

/// Descriptive record for one cached artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Unique artifact id
    pub id: String,
    /// Tensor shape
    pub shape: Vec<usize>,
    /// Element type
    pub element_type: ElementType,
    /// Codec that produced the stored bytes
    pub compression: Compression,
    /// Where the bytes live
    pub tier: Tier,
    /// Stored (encoded) size in bytes
    pub size_bytes: u64,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last read or write
    pub last_accessed: DateTime<Utc>,
    /// Number of accesses, starting at 1
    pub access_count: u64,
    /// Computation that produced this artifact
    pub parent_computation: Option<String>,
    /// Learned value estimate in [0, 1]
    pub learned_value: Option<f64>,
}

impl ArtifactMetadata {
    /// Fresh metadata for an artifact written at `now`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        shape: Vec<usize>,
        compression: Compression,
        tier: Tier,
        size_bytes: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            shape,
            element_type: ElementType::Float32,
            compression,
            tier,
            size_bytes,
            created_at: now,
            last_accessed: now,
            access_count: 1,
            parent_computation: None,
            learned_value: None,
        }
    }

    /// Attach a parent computation id.
    #[must_use]
    pub fn with_parent(mut self, parent: Option<String>) -> Self {
        self.parent_computation = parent;
        self
    }

    /// Attach a learned value, clamped to [0, 1].
    #[must_use]
    pub fn with_learned_value(mut self, value: Option<f64>) -> Self {
        self.learned_value = value.filter(|v| !v.is_nan()).map(|v| v.clamp(0.0, 1.0));
        self
    }
}

struct Indexed {
    meta: ArtifactMetadata,
    tick: u64,
}

/// Per-tier entry count and bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierCount {
    /// Artifacts on the tier
    pub count: usize,
    /// Stored bytes on the tier
    pub bytes: u64,
}

/// In-process metadata map with LRU order and byte accounting.
#[derive(Default)]
pub struct MetadataIndex {
    entries: FxHashMap<String, Indexed>,
    lru: BTreeMap<u64, String>,
    tick: u64,
    total_bytes: u64,
}

impl MetadataIndex {
    /// Empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Insert or replace, returning the previous entry.
    pub fn insert(&mut self, meta: ArtifactMetadata) -> Option<ArtifactMetadata> {
        let previous = self.remove(&meta.id);
        let tick = self.next_tick();
        self.total_bytes += meta.size_bytes;
        self.lru.insert(tick, meta.id.clone());
        self.entries.insert(meta.id.clone(), Indexed { meta, tick });
        previous
    }

    /// Remove and return an entry.
    pub fn remove(&mut self, id: &str) -> Option<ArtifactMetadata> {
        let old = self.entries.remove(id)?;
        self.lru.remove(&old.tick);
        self.total_bytes = self.total_bytes.saturating_sub(old.meta.size_bytes);
        Some(old.meta)
    }

    /// Snapshot of one entry.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<ArtifactMetadata> {
        self.entries.get(id).map(|e| e.meta.clone())
    }

    /// Whether `id` is indexed.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Record an access at `now` and move the entry to most-recent.
    pub fn touch(&mut self, id: &str, now: DateTime<Utc>) -> Option<ArtifactMetadata> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(id)?;
        self.lru.remove(&entry.tick);
        entry.tick = tick;
        self.lru.insert(tick, id.to_string());
        access::record_access(&mut entry.meta, now);
        Some(entry.meta.clone())
    }

    /// Relocate an entry after a migration or recompression.
    pub fn relocate(
        &mut self,
        id: &str,
        tier: Tier,
        compression: Compression,
        size_bytes: u64,
    ) -> Option<ArtifactMetadata> {
        let entry = self.entries.get_mut(id)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.meta.size_bytes) + size_bytes;
        entry.meta.tier = tier;
        entry.meta.compression = compression;
        entry.meta.size_bytes = size_bytes;
        Some(entry.meta.clone())
    }

    /// All entries.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ArtifactMetadata> {
        self.entries.values().map(|e| e.meta.clone()).collect()
    }

    /// Ids on `tier`, least recently used first.
    #[must_use]
    pub fn least_recent(&self, tier: Tier) -> Vec<String> {
        self.lru
            .values()
            .filter(|id| self.entries.get(*id).is_some_and(|e| e.meta.tier == tier))
            .cloned()
            .collect()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of `size_bytes` over all entries.
    #[must_use]
    pub const fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Count and bytes per tier.
    #[must_use]
    pub fn tier_distribution(&self) -> BTreeMap<Tier, TierCount> {
        let mut out: BTreeMap<Tier, TierCount> =
            Tier::ALL.iter().map(|t| (*t, TierCount::default())).collect();
        for e in self.entries.values() {
            let slot = out.entry(e.meta.tier).or_default();
            slot.count += 1;
            slot.bytes += e.meta.size_bytes;
        }
        out
    }
}

/// Persists metadata to the KV store with a TTL.
pub struct MetadataStore<K: KvStore> {
    kv: Arc<K>,
    ttl: Duration,
    timeout: Duration,
}

impl<K: KvStore> MetadataStore<K> {
    /// Store writing through `kv`.
    #[must_use]
    pub const fn new(kv: Arc<K>, ttl: Duration, timeout: Duration) -> Self {
        Self { kv, ttl, timeout }
    }

    fn key(id: &str) -> String {
        format!("{META_PREFIX}{id}")
    }

    /// Write one entry.
    ///
    /// # Errors
    /// Serialization, KV, or timeout errors.
    pub async fn save(&self, meta: &ArtifactMetadata) -> Result<()> {
        let body = serde_json::to_vec(meta)?;
        let key = Self::key(&meta.id);
        with_timeout(
            "kv.set_with_ttl",
            self.timeout,
            self.kv.set_with_ttl(&key, body, self.ttl),
        )
        .await
    }

    /// Read one entry.
    ///
    /// # Errors
    /// Deserialization, KV, or timeout errors.
    pub async fn load(&self, id: &str) -> Result<Option<ArtifactMetadata>> {
        let key = Self::key(id);
        let raw = with_timeout("kv.get", self.timeout, self.kv.get(&key)).await?;
        raw.map(|bytes| serde_json::from_slice(&bytes).map_err(Into::into))
            .transpose()
    }

    /// Delete one entry.
    ///
    /// # Errors
    /// KV or timeout errors.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let key = Self::key(id);
        with_timeout("kv.delete", self.timeout, self.kv.delete(&key)).await
    }

    /// Every persisted entry, skipping unreadable ones.
    ///
    /// # Errors
    /// KV or timeout errors from the scan.
    pub async fn load_all(&self) -> Result<Vec<ArtifactMetadata>> {
        let keys = with_timeout("kv.scan_prefix", self.timeout, self.kv.scan_prefix(META_PREFIX))
            .await?;
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let values =
            with_timeout("kv.batch_get", self.timeout, self.kv.batch_get(&refs)).await?;

        let mut out = Vec::with_capacity(keys.len());
        for (key, raw) in keys.iter().zip(values) {
            // Expired between scan and read
            let Some(bytes) = raw else { continue };
            match serde_json::from_slice::<ArtifactMetadata>(&bytes) {
                Ok(meta) => out.push(meta),
                Err(e) => tracing::warn!(key = %key, error = %e, "skipping unreadable metadata"),
            }
        }
        Ok(out)
    }
}

impl<K: KvStore> std::fmt::Debug for MetadataStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("ttl", &self.ttl)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
