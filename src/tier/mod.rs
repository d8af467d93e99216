//! Tier Storage Backends
//!
//! Four physical tiers, fastest first:
//!
//! | Tier           | Backend                         | Survives restart |
//! |----------------|---------------------------------|------------------|
//! | `Accelerator`  | wgpu buffers or host-resident   | no               |
//! | `FastMemory`   | in-process `DashMap`            | no               |
//! | `SharedMemory` | file-backed `MmapMut` segment   | no               |
//! | `DiskMmap`     | one memory-mapped file per id   | yes              |
//!
//! Every backend implements [`TierBackend`]; [`TierSet`] dispatches by
//! [`Tier`] and applies the I/O timeout.

pub mod accelerator;
pub mod disk;
pub mod memory;
pub mod shared;

pub use accelerator::{AcceleratorKind, AcceleratorTier};
pub use disk::DiskTier;
pub use memory::MemoryTier;
pub use shared::SharedTier;

use crate::codec::Compression;
use crate::pool::with_timeout;
use crate::tensor::ElementType;
use crate::{Error, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Physical storage location of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum Tier {
    /// Accelerator-resident memory
    Accelerator,
    /// Host RAM
    FastMemory,
    /// Memory-mapped file per artifact
    DiskMmap,
    /// Shared file-backed segment
    SharedMemory,
}

impl Tier {
    /// All tiers.
    pub const ALL: [Self; 4] = [
        Self::Accelerator,
        Self::FastMemory,
        Self::DiskMmap,
        Self::SharedMemory,
    ];

    /// Stable name used in metadata and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Accelerator => "accelerator",
            Self::FastMemory => "memory",
            Self::DiskMmap => "disk",
            Self::SharedMemory => "shared",
        }
    }

    /// Tier to try when this one is out of capacity.
    #[must_use]
    pub const fn fallback(&self) -> Option<Self> {
        match self {
            Self::Accelerator => Some(Self::FastMemory),
            Self::FastMemory | Self::SharedMemory => Some(Self::DiskMmap),
            Self::DiskMmap => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "accelerator" | "gpu" => Ok(Self::Accelerator),
            "memory" | "fast_memory" => Ok(Self::FastMemory),
            "disk" | "disk_mmap" => Ok(Self::DiskMmap),
            "shared" | "shared_memory" => Ok(Self::SharedMemory),
            other => Err(Error::InvalidInput(format!("unknown tier: {other}"))),
        }
    }
}

/// Self-describing header written with each payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadHeader {
    /// Artifact id
    pub id: String,
    /// Tensor shape
    pub shape: Vec<usize>,
    /// Element type
    pub element_type: ElementType,
    /// Codec that produced the payload
    pub compression: Compression,
    /// Payload length in bytes
    pub payload_len: u64,
}

/// Storage backend for one tier.
pub trait TierBackend: Send + Sync {
    /// Tier served by this backend.
    fn tier(&self) -> Tier;

    /// Store `payload`, replacing any previous payload for the same id.
    ///
    /// Fails with `CapacityExceeded` when the tier has no room.
    fn put(
        &self,
        header: &PayloadHeader,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Fetch the payload for `id`.
    fn get(&self, id: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Release the payload for `id`. Returns whether anything was removed.
    fn remove(&self, id: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Bytes currently held.
    fn used_bytes(&self) -> u64;

    /// Configured capacity in bytes.
    fn capacity_bytes(&self) -> u64;

    /// Flush pending state. Default: nothing to do.
    fn flush(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

/// Atomic byte accounting against a fixed capacity.
#[derive(Debug)]
pub(crate) struct ByteBudget {
    tier: Tier,
    capacity: u64,
    used: AtomicU64,
}

impl ByteBudget {
    pub(crate) const fn new(tier: Tier, capacity: u64) -> Self {
        Self {
            tier,
            capacity,
            used: AtomicU64::new(0),
        }
    }

    /// Reserve `bytes` or fail with `CapacityExceeded`.
    pub(crate) fn reserve(&self, bytes: u64) -> Result<()> {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&n| n <= self.capacity)
            })
            .map(|_| ())
            .map_err(|used| Error::CapacityExceeded {
                tier: self.tier.as_str().to_string(),
                requested: bytes,
                available: self.capacity.saturating_sub(used),
            })
    }

    pub(crate) fn release(&self, bytes: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(bytes))
            });
    }

    pub(crate) fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    pub(crate) const fn capacity(&self) -> u64 {
        self.capacity
    }
}

/// Per-artifact reader/writer locks.
///
/// Readers of one id share the lock; writers, migrations and deletes are
/// exclusive. Different ids never contend.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: DashMap<String, Arc<RwLock<()>>>,
}

impl LockTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, id: &str) -> Arc<RwLock<()>> {
        Arc::clone(self.locks.entry(id.to_string()).or_default().value())
    }

    /// Shared access to `id`.
    pub async fn read(&self, id: &str) -> OwnedRwLockReadGuard<()> {
        self.lock_for(id).read_owned().await
    }

    /// Exclusive access to `id`.
    pub async fn write(&self, id: &str) -> OwnedRwLockWriteGuard<()> {
        self.lock_for(id).write_owned().await
    }

    /// Drop the lock entry for `id` if nobody holds it.
    pub fn forget(&self, id: &str) {
        self.locks.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Number of tracked ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no ids are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Usage snapshot for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierUsage {
    /// Tier
    pub tier: Tier,
    /// Bytes held
    pub used_bytes: u64,
    /// Capacity
    pub capacity_bytes: u64,
}

/// All tier backends plus the I/O timeout applied to them.
#[derive(Debug)]
pub struct TierSet {
    /// Accelerator tier
    pub accelerator: AcceleratorTier,
    /// Host RAM tier
    pub memory: MemoryTier,
    /// Memory-mapped file tier
    pub disk: DiskTier,
    /// Shared segment tier
    pub shared: SharedTier,
    timeout: Duration,
}

impl TierSet {
    /// Bundle backends with an I/O timeout.
    #[must_use]
    pub const fn new(
        accelerator: AcceleratorTier,
        memory: MemoryTier,
        disk: DiskTier,
        shared: SharedTier,
        timeout: Duration,
    ) -> Self {
        Self {
            accelerator,
            memory,
            disk,
            shared,
            timeout,
        }
    }

    /// Write a payload to `tier`.
    ///
    /// # Errors
    /// Backend errors, `CapacityExceeded`, or `DependencyTimeout`.
    pub async fn put(&self, tier: Tier, header: &PayloadHeader, payload: Vec<u8>) -> Result<()> {
        let op = format!("{tier}.put");
        with_timeout(&op, self.timeout, async {
            match tier {
                Tier::Accelerator => self.accelerator.put(header, payload).await,
                Tier::FastMemory => self.memory.put(header, payload).await,
                Tier::DiskMmap => self.disk.put(header, payload).await,
                Tier::SharedMemory => self.shared.put(header, payload).await,
            }
        })
        .await
    }

    /// Read a payload from `tier`.
    ///
    /// # Errors
    /// Backend errors or `DependencyTimeout`.
    pub async fn get(&self, tier: Tier, id: &str) -> Result<Option<Vec<u8>>> {
        let op = format!("{tier}.get");
        with_timeout(&op, self.timeout, async {
            match tier {
                Tier::Accelerator => self.accelerator.get(id).await,
                Tier::FastMemory => self.memory.get(id).await,
                Tier::DiskMmap => self.disk.get(id).await,
                Tier::SharedMemory => self.shared.get(id).await,
            }
        })
        .await
    }

    /// Remove a payload from `tier`.
    ///
    /// # Errors
    /// Backend errors or `DependencyTimeout`.
    pub async fn remove(&self, tier: Tier, id: &str) -> Result<bool> {
        let op = format!("{tier}.remove");
        with_timeout(&op, self.timeout, async {
            match tier {
                Tier::Accelerator => self.accelerator.remove(id).await,
                Tier::FastMemory => self.memory.remove(id).await,
                Tier::DiskMmap => self.disk.remove(id).await,
                Tier::SharedMemory => self.shared.remove(id).await,
            }
        })
        .await
    }

    /// Flush every backend.
    ///
    /// # Errors
    /// First backend error encountered.
    pub async fn flush(&self) -> Result<()> {
        with_timeout("tiers.flush", self.timeout, async {
            self.accelerator.flush().await?;
            self.memory.flush().await?;
            self.shared.flush().await?;
            self.disk.flush().await
        })
        .await
    }

    /// Current usage of `tier`.
    #[must_use]
    pub fn usage(&self, tier: Tier) -> TierUsage {
        let (used_bytes, capacity_bytes) = match tier {
            Tier::Accelerator => (
                self.accelerator.used_bytes(),
                self.accelerator.capacity_bytes(),
            ),
            Tier::FastMemory => (self.memory.used_bytes(), self.memory.capacity_bytes()),
            Tier::DiskMmap => (self.disk.used_bytes(), self.disk.capacity_bytes()),
            Tier::SharedMemory => (self.shared.used_bytes(), self.shared.capacity_bytes()),
        };
        TierUsage {
            tier,
            used_bytes,
            capacity_bytes,
        }
    }
}
