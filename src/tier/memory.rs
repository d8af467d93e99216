//! Host RAM tier backed by `DashMap`.

use super::{ByteBudget, PayloadHeader, Tier, TierBackend};
use crate::Result;
use dashmap::DashMap;

/// In-process payload store with a byte budget.
///
/// Also serves as the host-resident accelerator tier when no device is
/// available, in which case it reports `Tier::Accelerator`.
#[derive(Debug)]
pub struct MemoryTier {
    tier: Tier,
    entries: DashMap<String, Vec<u8>>,
    budget: ByteBudget,
}

impl MemoryTier {
    /// Fast-memory tier with `capacity` bytes.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self::for_tier(Tier::FastMemory, capacity)
    }

    /// Memory-backed store reporting as `tier`.
    #[must_use]
    pub fn for_tier(tier: Tier, capacity: u64) -> Self {
        Self {
            tier,
            entries: DashMap::new(),
            budget: ByteBudget::new(tier, capacity),
        }
    }

    /// Number of payloads held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no payloads are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn take(&self, id: &str) -> bool {
        if let Some((_, old)) = self.entries.remove(id) {
            self.budget.release(old.len() as u64);
            true
        } else {
            false
        }
    }
}

impl TierBackend for MemoryTier {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn put(&self, header: &PayloadHeader, payload: Vec<u8>) -> Result<()> {
        self.take(&header.id);
        self.budget.reserve(payload.len() as u64)?;
        self.entries.insert(header.id.clone(), payload);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(id).map(|e| e.value().clone()))
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        Ok(self.take(id))
    }

    fn used_bytes(&self) -> u64 {
        self.budget.used()
    }

    fn capacity_bytes(&self) -> u64 {
        self.budget.capacity()
    }
}
