//! Tensor Cache
//!
//! The facade tying the pieces together:
//!
//! ```text
//!   store ──► encode (WorkerPool) ──► placement ──► TierSet.put ──► metadata
//!   get   ──► metadata ──► TierSet.get ──► decode (WorkerPool) ──► touch
//!                                              └──► migrate / promote
//! ```
//!
//! Placement follows the size/value thresholds in [`crate::placement`], or in
//! `Learned` mode the policy's greedy action once no threshold applies. A tier
//! that is out of room hands the write to the next one down
//! (Accelerator → FastMemory → DiskMmap).

use crate::access::{self, AccessPattern};
use crate::codec::{CodecRegistry, Compression};
use crate::config::CacheConfig;
use crate::graph::{
    ComputationGraphRecord, ComputationPerf, ComputationPerformance, GraphConfig, GraphIndex,
};
use crate::kv::KvStore;
use crate::metadata::{ArtifactMetadata, MetadataIndex, MetadataStore, TierCount};
use crate::placement::{hard_tier, select_tier, select_tier_learned, PlacementMode, MIB};
use crate::policy::{
    ActionKind, Experience, OptimizedParams, Policy, PolicyStatus, RlAction, RlState, StateInputs,
    TaskPriority,
};
use crate::pool::WorkerPool;
use crate::reward::{compute_reward, PerformanceMetrics, RewardBreakdown, RewardWeights, UserFeedback};
use crate::tensor::Tensor;
use crate::tier::accelerator::AcceleratorTier;
use crate::tier::disk::DiskTier;
use crate::tier::memory::MemoryTier;
use crate::tier::shared::SharedTier;
use crate::tier::{LockTable, PayloadHeader, Tier, TierSet, TierUsage};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Hot artifacts above this learned value are promoted by `optimize_layout`.
pub const PROMOTE_VALUE: f64 = 0.7;
/// Uncompressed artifacts above this size are recompression candidates.
pub const RECOMPRESS_MIN_BYTES: u64 = 10 * MIB;
/// Recompression only touches artifacts read fewer times than this.
pub const RECOMPRESS_MAX_ACCESSES: u64 = 5;

/// Arguments of [`TensorCache::store`].
#[derive(Debug, Clone)]
pub struct StoreRequest {
    /// Artifact id
    pub id: String,
    /// Payload
    pub tensor: Tensor,
    /// Tier used when no threshold applies
    pub tier_preference: Tier,
    /// Requested codec
    pub compression: Compression,
    /// Computation that produced the artifact
    pub parent_computation: Option<String>,
    /// Learned value estimate in [0, 1]
    pub learned_value: Option<f64>,
}

impl StoreRequest {
    /// Request with fast-memory preference and no compression.
    #[must_use]
    pub fn new(id: impl Into<String>, tensor: Tensor) -> Self {
        Self {
            id: id.into(),
            tensor,
            tier_preference: Tier::FastMemory,
            compression: Compression::Identity,
            parent_computation: None,
            learned_value: None,
        }
    }

    /// Set the preferred tier.
    #[must_use]
    pub const fn with_tier(mut self, tier: Tier) -> Self {
        self.tier_preference = tier;
        self
    }

    /// Set the codec.
    #[must_use]
    pub const fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the parent computation.
    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_computation = Some(parent.into());
        self
    }

    /// Set the learned value.
    #[must_use]
    pub const fn with_learned_value(mut self, value: f64) -> Self {
        self.learned_value = Some(value);
        self
    }
}

/// Outcome of [`TensorCache::optimize_layout`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LayoutReport {
    /// Ids moved to the accelerator
    pub promoted: Vec<String>,
    /// Ids moved off the accelerator
    pub demoted: Vec<String>,
    /// Ids recompressed to lz4
    pub compressed: Vec<String>,
    /// Bytes saved by recompression
    pub bytes_saved: u64,
}

/// Per-tier view in [`CacheStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierStatus {
    /// Indexed artifacts and their bytes
    pub artifacts: TierCount,
    /// Backend usage
    pub usage: TierUsage,
}

/// Everything the cache has observed, for training a policy offline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingData {
    /// One entry per indexed artifact, ordered by id
    pub access_patterns: Vec<AccessPattern>,
    /// One entry per live computation record, ordered by id
    pub computations: Vec<ComputationPerformance>,
    /// Summed access counts per tier
    pub tier_accesses: BTreeMap<Tier, u64>,
    /// Observed read hit rate, if any reads happened
    pub hit_rate: Option<f64>,
    /// Up to `limit` most recent experiences, oldest first
    pub experiences: Vec<Experience>,
}

/// Cache diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatus {
    /// Indexed artifacts
    pub artifact_count: usize,
    /// Sum of stored payload bytes
    pub total_bytes: u64,
    /// Per-tier distribution
    pub tiers: BTreeMap<Tier, TierStatus>,
    /// Successful reads
    pub hits: u64,
    /// Reads of unknown ids
    pub misses: u64,
    /// `hits / (hits + misses)`, if any reads happened
    pub hit_rate: Option<f64>,
    /// Live computation records
    pub computation_records: usize,
    /// "gpu" or "host"
    pub accelerator_backend: &'static str,
    /// Open disk-tier maps
    pub open_disk_handles: usize,
    /// Policy diagnostics
    pub policy: PolicyStatus,
}

/// Multi-tier tensor cache with a learned placement policy.
pub struct TensorCache<K: KvStore> {
    config: CacheConfig,
    kv: Arc<K>,
    codecs: CodecRegistry,
    tiers: TierSet,
    index: Mutex<MetadataIndex>,
    metadata: MetadataStore<K>,
    graphs: GraphIndex<K>,
    locks: LockTable,
    pool: WorkerPool,
    policy: Policy,
    task_requests: DashMap<String, u64>,
    priorities: DashMap<String, TaskPriority>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K: KvStore> TensorCache<K> {
    /// Open the tiers, restore the policy and recover disk artifacts.
    ///
    /// # Errors
    /// Invalid configuration, tier initialisation failures, or
    /// `GpuInitFailed` when a GPU accelerator is required but missing.
    pub async fn open(config: CacheConfig, kv: Arc<K>) -> Result<Self> {
        config.validate()?;
        let timeout = config.io_timeout();

        let accelerator =
            AcceleratorTier::open(config.accelerator, config.accelerator_capacity).await?;
        let memory = MemoryTier::new(config.memory_capacity);
        let disk = DiskTier::open(
            &config.base_path,
            config.disk_capacity,
            config.max_open_disk_handles,
        )?;
        let shared = SharedTier::open(&config.base_path, config.shared_capacity)?;
        let tiers = TierSet::new(accelerator, memory, disk, shared, timeout);

        let policy = Policy::load_or_new(config.policy.clone(), kv.as_ref(), timeout).await;
        let cache = Self {
            codecs: CodecRegistry::new(),
            tiers,
            index: Mutex::new(MetadataIndex::new()),
            metadata: MetadataStore::new(Arc::clone(&kv), config.metadata_ttl(), timeout),
            graphs: GraphIndex::new(Arc::clone(&kv), config.graph_ttl(), timeout),
            locks: LockTable::new(),
            pool: WorkerPool::new(config.worker_threads)?,
            policy,
            task_requests: DashMap::new(),
            priorities: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            kv,
            config,
        };

        if cache.config.recover_on_open {
            let recovered = cache.recover().await?;
            if recovered > 0 {
                info!(recovered, "re-indexed disk artifacts");
            }
        }
        info!(
            base = %cache.config.base_path.display(),
            accelerator = cache.tiers.accelerator.backend_name(),
            placement = ?cache.config.placement,
            "tensor cache open"
        );
        Ok(cache)
    }

    /// Re-index disk artifacts recorded in the KV store; drop stale records.
    async fn recover(&self) -> Result<usize> {
        let mut recovered = 0;
        for meta in self.metadata.load_all().await? {
            if self.index.lock().contains(&meta.id) {
                continue;
            }
            let usable = meta.tier == Tier::DiskMmap
                && match self.tiers.disk.read_header(&meta.id) {
                    Ok(Some(h)) => {
                        h.payload_len == meta.size_bytes && h.compression == meta.compression
                    }
                    Ok(None) => false,
                    Err(e) => {
                        warn!(id = %meta.id, error = %e, "unreadable disk artifact");
                        false
                    }
                };
            if usable && self.tiers.disk.adopt(meta.size_bytes).is_ok() {
                self.index.lock().insert(meta);
                recovered += 1;
            } else {
                debug!(id = %meta.id, tier = %meta.tier, "dropping stale metadata");
                if let Err(e) = self.metadata.delete(&meta.id).await {
                    warn!(id = %meta.id, error = %e, "failed to drop stale metadata");
                }
            }
        }
        Ok(recovered)
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The placement policy.
    #[must_use]
    pub const fn policy(&self) -> &Policy {
        &self.policy
    }

    // =========================================================================
    // Artifacts
    // =========================================================================

    /// Compress, place and index an artifact, replacing any with the same id.
    ///
    /// A failed replacement leaves the previous artifact readable.
    ///
    /// # Errors
    /// - `InvalidInput` for an empty id
    /// - `CapacityExceeded` when no tier down the fallback chain has room
    /// - tier, KV or timeout errors
    #[tracing::instrument(skip(self, request), fields(id = %request.id, codec = %request.compression))]
    pub async fn store(&self, request: StoreRequest) -> Result<ArtifactMetadata> {
        if request.id.is_empty() {
            return Err(Error::InvalidInput("artifact id must not be empty".into()));
        }
        let id = request.id.clone();
        let stored = self.store_locked(request).await;
        if stored.is_err() && !self.contains(&id) {
            self.locks.forget(&id);
        }
        stored
    }

    async fn store_locked(&self, request: StoreRequest) -> Result<ArtifactMetadata> {
        let StoreRequest {
            id,
            tensor,
            tier_preference,
            compression,
            parent_computation,
            learned_value,
        } = request;
        let _guard = self.locks.write(&id).await;

        let shape = tensor.shape().to_vec();
        let element_type = tensor.dtype();
        let codecs = self.codecs.clone();
        let encoded = self
            .pool
            .run(move || codecs.encode(compression, &tensor))
            .await?;
        let size = encoded.bytes.len() as u64;
        let learned_value = learned_value
            .filter(|v| !v.is_nan())
            .map(|v| v.clamp(0.0, 1.0));

        let chosen = self.place(size, learned_value, tier_preference);
        let header = PayloadHeader {
            id: id.clone(),
            shape: shape.clone(),
            element_type,
            compression: encoded.compression,
            payload_len: size,
        };

        // Backends overwrite in place, so keep the old bytes until the new
        // metadata is durable.
        let previous = self.index.lock().get(&id);
        let backup = match &previous {
            Some(prev) => self.tiers.get(prev.tier, &id).await?,
            None => None,
        };

        let tier = match self.put_with_fallback(chosen, &header, encoded.bytes).await {
            Ok(tier) => tier,
            Err(e) => {
                self.restore_previous(previous.as_ref(), backup).await;
                return Err(e);
            }
        };

        let meta = ArtifactMetadata::new(&id, shape, encoded.compression, tier, size, Utc::now())
            .with_parent(parent_computation)
            .with_learned_value(learned_value);
        if let Err(e) = self.metadata.save(&meta).await {
            if let Err(re) = self.tiers.remove(tier, &id).await {
                warn!(id = %id, error = %re, "rollback after metadata failure failed");
            }
            self.restore_previous(previous.as_ref(), backup).await;
            return Err(e);
        }

        if let Some(prev) = previous.filter(|p| p.tier != tier) {
            if let Err(e) = self.tiers.remove(prev.tier, &id).await {
                warn!(id = %id, tier = %prev.tier, error = %e, "failed to release replaced payload");
            }
        }
        self.index.lock().insert(meta.clone());
        debug!(tier = %tier, bytes = size, stored_as = %meta.compression, "stored");
        Ok(meta)
    }

    /// Put the displaced payload back where the index still says it lives.
    async fn restore_previous(&self, previous: Option<&ArtifactMetadata>, backup: Option<Vec<u8>>) {
        let (Some(prev), Some(bytes)) = (previous, backup) else {
            return;
        };
        let header = PayloadHeader {
            id: prev.id.clone(),
            shape: prev.shape.clone(),
            element_type: prev.element_type,
            compression: prev.compression,
            payload_len: prev.size_bytes,
        };
        match self.tiers.put(prev.tier, &header, bytes).await {
            Ok(()) => debug!(id = %prev.id, tier = %prev.tier, "previous payload restored"),
            Err(e) => warn!(id = %prev.id, tier = %prev.tier, error = %e, "failed to restore previous payload"),
        }
    }

    fn place(&self, size: u64, learned_value: Option<f64>, preference: Tier) -> Tier {
        match self.config.placement {
            PlacementMode::Heuristic => select_tier(size, learned_value, preference),
            PlacementMode::Learned => hard_tier(size, learned_value).unwrap_or_else(|| {
                let state = self.observe(0, 0, TaskPriority::default(), &PerformanceMetrics::default());
                let action = self.policy.greedy_action(&state);
                select_tier_learned(size, learned_value, preference, action)
            }),
        }
    }

    async fn put_with_fallback(
        &self,
        mut tier: Tier,
        header: &PayloadHeader,
        mut payload: Vec<u8>,
    ) -> Result<Tier> {
        loop {
            let next = tier.fallback();
            let attempt = if next.is_some() {
                payload.clone()
            } else {
                std::mem::take(&mut payload)
            };
            match self.tiers.put(tier, header, attempt).await {
                Ok(()) => return Ok(tier),
                Err(e @ Error::CapacityExceeded { .. }) => match next {
                    Some(lower) => {
                        warn!(id = %header.id, from = %tier, to = %lower, error = %e, "tier full, degrading");
                        tier = lower;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Read an artifact.
    ///
    /// `target_tier` migrates it after the read; `promote` is shorthand for
    /// the accelerator. Migration failures are logged and leave the artifact
    /// where it was.
    ///
    /// # Errors
    /// Tier, codec or timeout errors.
    #[tracing::instrument(skip(self))]
    pub async fn get(
        &self,
        id: &str,
        target_tier: Option<Tier>,
        promote: bool,
    ) -> Result<Option<Tensor>> {
        // Unknown ids never get a lock entry
        if !self.contains(id) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }
        let guard = self.locks.read(id).await;
        let Some(meta) = self.index.lock().get(id) else {
            drop(guard);
            self.locks.forget(id);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };
        let Some(bytes) = self.tiers.get(meta.tier, id).await? else {
            warn!(tier = %meta.tier, "indexed artifact missing from its tier");
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let codecs = self.codecs.clone();
        let (kind, shape, dtype) = (meta.compression, meta.shape.clone(), meta.element_type);
        let tensor = self
            .pool
            .run(move || codecs.decode(kind, &bytes, &shape, dtype))
            .await??;
        self.hits.fetch_add(1, Ordering::Relaxed);

        let touched = self.index.lock().touch(id, Utc::now());
        if let Some(touched) = touched {
            if let Err(e) = self.metadata.save(&touched).await {
                warn!(error = %e, "failed to persist access stats");
            }
        }
        drop(guard);

        let target = target_tier.or(promote.then_some(Tier::Accelerator));
        if let Some(to) = target.filter(|t| *t != meta.tier) {
            if let Err(e) = self.migrate(id, to).await {
                warn!(from = %meta.tier, to = %to, error = %e, "migration failed");
            }
        }
        Ok(Some(tensor))
    }

    /// Move an artifact to another tier.
    ///
    /// # Errors
    /// `InvalidInput` for unknown ids; tier or KV errors leave the artifact on
    /// its original tier.
    pub async fn migrate(&self, id: &str, to: Tier) -> Result<ArtifactMetadata> {
        if !self.contains(id) {
            return Err(Error::InvalidInput(format!("unknown artifact {id}")));
        }
        let _guard = self.locks.write(id).await;
        let meta = self
            .index
            .lock()
            .get(id)
            .ok_or_else(|| Error::InvalidInput(format!("unknown artifact {id}")))?;
        if meta.tier == to {
            return Ok(meta);
        }
        let bytes = self
            .tiers
            .get(meta.tier, id)
            .await?
            .ok_or_else(|| Error::storage(meta.tier.as_str(), format!("{id} missing")))?;
        let header = PayloadHeader {
            id: id.to_string(),
            shape: meta.shape.clone(),
            element_type: meta.element_type,
            compression: meta.compression,
            payload_len: meta.size_bytes,
        };
        self.tiers.put(to, &header, bytes).await?;
        if let Err(e) = self.tiers.remove(meta.tier, id).await {
            warn!(id, tier = %meta.tier, error = %e, "failed to release old copy");
        }

        let moved = self
            .index
            .lock()
            .relocate(id, to, meta.compression, meta.size_bytes)
            .ok_or_else(|| Error::Other(format!("{id} vanished during migration")))?;
        if let Err(e) = self.metadata.save(&moved).await {
            warn!(id, error = %e, "failed to persist relocation");
        }
        debug!(id, from = %meta.tier, to = %to, "migrated");
        Ok(moved)
    }

    /// Re-encode an artifact in place. Returns bytes saved.
    async fn recompress(&self, id: &str, kind: Compression) -> Result<u64> {
        if !self.contains(id) {
            return Err(Error::InvalidInput(format!("unknown artifact {id}")));
        }
        let _guard = self.locks.write(id).await;
        let meta = self
            .index
            .lock()
            .get(id)
            .ok_or_else(|| Error::InvalidInput(format!("unknown artifact {id}")))?;
        let bytes = self
            .tiers
            .get(meta.tier, id)
            .await?
            .ok_or_else(|| Error::storage(meta.tier.as_str(), format!("{id} missing")))?;

        let codecs = self.codecs.clone();
        let (from, shape, dtype) = (meta.compression, meta.shape.clone(), meta.element_type);
        let encoded = self
            .pool
            .run(move || {
                codecs
                    .decode(from, &bytes, &shape, dtype)
                    .map(|t| codecs.encode(kind, &t))
            })
            .await??;
        if encoded.compression != kind {
            return Err(Error::UnsupportedCompression(kind.as_str().to_string()));
        }

        let size = encoded.bytes.len() as u64;
        let header = PayloadHeader {
            id: id.to_string(),
            shape: meta.shape.clone(),
            element_type: meta.element_type,
            compression: kind,
            payload_len: size,
        };
        self.tiers.put(meta.tier, &header, encoded.bytes).await?;
        let updated = self.index.lock().relocate(id, meta.tier, kind, size);
        if let Some(updated) = updated {
            if let Err(e) = self.metadata.save(&updated).await {
                warn!(id, error = %e, "failed to persist recompression");
            }
        }
        Ok(meta.size_bytes.saturating_sub(size))
    }

    /// Remove an artifact everywhere. Returns whether it existed.
    ///
    /// # Errors
    /// Tier, KV or timeout errors.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<bool> {
        if !self.contains(id) {
            return Ok(false);
        }
        let guard = self.locks.write(id).await;
        let removed = self.index.lock().remove(id);
        let Some(meta) = removed else {
            drop(guard);
            self.locks.forget(id);
            return Ok(false);
        };
        self.tiers.remove(meta.tier, id).await?;
        self.metadata.delete(id).await?;
        drop(guard);
        self.locks.forget(id);
        debug!(tier = %meta.tier, "deleted");
        Ok(true)
    }

    /// Whether `id` is indexed.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.lock().contains(id)
    }

    /// Metadata snapshot for `id`.
    #[must_use]
    pub fn metadata(&self, id: &str) -> Option<ArtifactMetadata> {
        self.index.lock().get(id)
    }

    // =========================================================================
    // Computation reuse
    // =========================================================================

    /// Record a computation for later reuse.
    ///
    /// # Errors
    /// KV or timeout errors from the mirror write.
    pub async fn record_computation(
        &self,
        id: impl Into<String>,
        inputs: Vec<String>,
        outputs: Vec<String>,
        op_kind: impl Into<String>,
        config: GraphConfig,
        perf: ComputationPerf,
    ) -> Result<ComputationGraphRecord> {
        let record = ComputationGraphRecord::new(id, inputs, outputs, op_kind, config, perf);
        self.graphs.record(record).await
    }

    /// Earlier computations similar enough to reuse, best first (at most 5).
    #[must_use]
    pub fn find_reusable(
        &self,
        op_kind: &str,
        config: &GraphConfig,
        threshold: f64,
    ) -> Vec<ComputationGraphRecord> {
        self.graphs.find_reusable(op_kind, config, threshold)
    }

    // =========================================================================
    // Layout
    // =========================================================================

    /// Promote hot valuable artifacts, demote cold accelerator residents and
    /// recompress large rarely-read ones.
    ///
    /// # Errors
    /// Never for individual artifacts (those are logged and skipped).
    pub async fn optimize_layout(&self) -> Result<LayoutReport> {
        self.optimize_layout_at(Utc::now()).await
    }

    /// [`Self::optimize_layout`] evaluated at `now`.
    ///
    /// # Errors
    /// Never for individual artifacts (those are logged and skipped).
    #[tracing::instrument(skip(self))]
    pub async fn optimize_layout_at(&self, now: DateTime<Utc>) -> Result<LayoutReport> {
        let mut report = LayoutReport::default();
        let entries = self.index.lock().snapshot();
        let by_id: BTreeMap<&str, &ArtifactMetadata> =
            entries.iter().map(|m| (m.id.as_str(), m)).collect();

        for id in access::hot_artifacts(&entries, self.config.hot_top_n, now) {
            let Some(meta) = by_id.get(id.as_str()) else {
                continue;
            };
            if meta.tier == Tier::Accelerator
                || !meta.learned_value.is_some_and(|v| v > PROMOTE_VALUE)
            {
                continue;
            }
            match self.migrate(&id, Tier::Accelerator).await {
                Ok(_) => report.promoted.push(id),
                Err(e) => warn!(id = %id, error = %e, "promotion skipped"),
            }
        }

        let cold = access::cold_artifacts(&entries, self.config.cold_threshold_hours, now);
        let resident = self.index.lock().least_recent(Tier::Accelerator);
        for id in resident.into_iter().filter(|id| cold.binary_search(id).is_ok()) {
            let Some(meta) = by_id.get(id.as_str()) else {
                continue;
            };
            let to = select_tier(meta.size_bytes, None, Tier::FastMemory);
            match self.migrate(&id, to).await {
                Ok(_) => report.demoted.push(id),
                Err(e) => warn!(id = %id, error = %e, "demotion skipped"),
            }
        }

        let candidates = entries.iter().filter(|m| {
            m.size_bytes > RECOMPRESS_MIN_BYTES
                && m.access_count < RECOMPRESS_MAX_ACCESSES
                && m.compression == Compression::Identity
        });
        for meta in candidates {
            match self.recompress(&meta.id, Compression::Lz4).await {
                Ok(saved) => {
                    report.bytes_saved += saved;
                    report.compressed.push(meta.id.clone());
                }
                Err(e) => warn!(id = %meta.id, error = %e, "recompression skipped"),
            }
        }

        info!(
            promoted = report.promoted.len(),
            demoted = report.demoted.len(),
            compressed = report.compressed.len(),
            bytes_saved = report.bytes_saved,
            "layout optimized"
        );
        Ok(report)
    }

    // =========================================================================
    // Policy
    // =========================================================================

    #[allow(clippy::cast_precision_loss)]
    fn hit_rate(&self) -> Option<f64> {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        (total > 0).then(|| hits as f64 / total as f64)
    }

    fn observe(
        &self,
        task_requests: u64,
        request_chars: usize,
        priority: TaskPriority,
        metrics: &PerformanceMetrics,
    ) -> RlState {
        let usage = self.tiers.usage(Tier::Accelerator);
        StateInputs {
            accelerator_used_bytes: usage.used_bytes,
            accelerator_capacity_bytes: usage.capacity_bytes,
            observed_hit_rate: self.hit_rate(),
            task_requests,
            request_chars,
            priority,
            metrics: *metrics,
            now: Utc::now(),
        }
        .to_state()
    }

    fn priority_of(&self, task_id: &str) -> TaskPriority {
        self.priorities
            .get(task_id)
            .map(|p| *p)
            .unwrap_or_default()
    }

    /// Set the priority used for a task's state.
    pub fn set_task_priority(&self, task_id: &str, priority: TaskPriority) {
        self.priorities.insert(task_id.to_string(), priority);
    }

    /// Choose an action for a task and translate it into runtime parameters.
    #[tracing::instrument(skip(self, request_text, metrics))]
    pub fn get_optimized_params(
        &self,
        task_id: &str,
        request_text: &str,
        metrics: Option<&PerformanceMetrics>,
    ) -> OptimizedParams {
        let requests = {
            let mut count = self.task_requests.entry(task_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let metrics = metrics.copied().unwrap_or_default();
        let state = self.observe(
            requests,
            request_text.chars().count(),
            self.priority_of(task_id),
            &metrics,
        );
        let kind = self.policy.select_action(&state);
        self.policy.begin(task_id, state, kind);

        let mut action = RlAction::new(kind);
        let now = Utc::now();
        match kind {
            ActionKind::Prefetch => {
                let entries = self.index.lock().snapshot();
                action.artifact_ids = access::hot_artifacts(&entries, self.config.hot_top_n, now);
            }
            ActionKind::EvictAccelerator => {
                action.artifact_ids = self.index.lock().least_recent(Tier::Accelerator);
            }
            _ => {}
        }
        debug!(action = %kind, epsilon = self.policy.epsilon(), "selected action");
        OptimizedParams::from_action(&action)
    }

    /// Score the task's pending action and learn from it.
    ///
    /// Returns the reward breakdown, or `None` when the task has no pending
    /// decision.
    ///
    /// # Errors
    /// `WorkerPool` if the training step panicked.
    #[tracing::instrument(skip(self, metrics, feedback))]
    pub async fn record_performance(
        &self,
        task_id: &str,
        metrics: &PerformanceMetrics,
        feedback: Option<&UserFeedback>,
    ) -> Result<Option<RewardBreakdown>> {
        let Some(pending) = self.policy.take_pending(task_id) else {
            debug!("no pending decision");
            return Ok(None);
        };
        let breakdown = compute_reward(metrics, feedback, &RewardWeights::default());
        let requests = self.task_requests.get(task_id).map_or(0, |c| *c);
        let next_state = self.observe(requests, 0, self.priority_of(task_id), metrics);

        #[allow(clippy::cast_possible_truncation)]
        let reward = breakdown.total as f32;
        self.policy.remember(Experience {
            state: pending.state,
            action: pending.action,
            reward,
            next_state,
            terminal: true,
            timestamp: Utc::now(),
        });

        if let Some(loss) = self.policy.train(&self.pool).await? {
            debug!(loss, "policy updated");
        }
        if self.policy.finish_episode(breakdown.total) {
            if let Err(e) = self.policy.save(self.kv.as_ref(), self.config.io_timeout()).await {
                warn!(error = %e, "periodic policy save failed");
            }
        }
        Ok(Some(breakdown))
    }

    /// Export access features, computation costs and recent experiences.
    ///
    /// `limit` bounds the experiences only.
    #[must_use]
    pub fn training_data(&self, limit: usize) -> TrainingData {
        let now = Utc::now();
        let mut metas = self.index.lock().snapshot();
        metas.sort_by(|a, b| a.id.cmp(&b.id));

        let mut tier_accesses = BTreeMap::new();
        for meta in &metas {
            let count = tier_accesses.entry(meta.tier).or_insert(0u64);
            *count = count.saturating_add(meta.access_count);
        }
        let access_patterns = metas
            .iter()
            .map(|m| AccessPattern::from_metadata(m, now))
            .collect();

        let mut records = self.graphs.records();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        let computations = records.iter().map(ComputationPerformance::from).collect();

        TrainingData {
            access_patterns,
            computations,
            tier_accesses,
            hit_rate: self.hit_rate(),
            experiences: self.policy.recent_experiences(limit),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Diagnostics snapshot.
    #[must_use]
    pub fn status(&self) -> CacheStatus {
        let (artifact_count, total_bytes, distribution) = {
            let index = self.index.lock();
            (index.len(), index.total_bytes(), index.tier_distribution())
        };
        let tiers = distribution
            .into_iter()
            .map(|(tier, artifacts)| {
                (
                    tier,
                    TierStatus {
                        artifacts,
                        usage: self.tiers.usage(tier),
                    },
                )
            })
            .collect();
        CacheStatus {
            artifact_count,
            total_bytes,
            tiers,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
            computation_records: self.graphs.len(),
            accelerator_backend: self.tiers.accelerator.backend_name(),
            open_disk_handles: self.tiers.disk.open_handles(),
            policy: self.policy.status(),
        }
    }

    /// Flush tier handles and persist the policy.
    ///
    /// # Errors
    /// Flush, KV or timeout errors.
    pub async fn close(&self) -> Result<()> {
        self.tiers.flush().await?;
        self.policy
            .save(self.kv.as_ref(), self.config.io_timeout())
            .await?;
        info!("tensor cache closed");
        Ok(())
    }
}

impl<K: KvStore> std::fmt::Debug for TensorCache<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorCache")
            .field("base_path", &self.config.base_path)
            .field("artifacts", &self.index.lock().len())
            .field("tiers", &self.tiers)
            .finish_non_exhaustive()
    }
}
