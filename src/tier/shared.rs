//! Shared-memory tier
//!
//! A single fixed-size segment file (`{base}/shm/segment.bin`) mapped
//! read-write. Payloads are placed with a first-fit allocator over the
//! segment; the allocation table lives in process memory, so the segment is
//! scratch space and is not recovered after restart.

use super::{ByteBudget, PayloadHeader, Tier, TierBackend};
use crate::{Error, Result};
use memmap2::MmapMut;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// First-fit allocator over `[0, capacity)`.
#[derive(Debug, Default)]
pub struct SegmentAllocator {
    capacity: u64,
    /// offset -> len of live allocations
    used: BTreeMap<u64, u64>,
}

impl SegmentAllocator {
    /// Allocator over `capacity` bytes.
    #[must_use]
    pub const fn new(capacity: u64) -> Self {
        Self {
            capacity,
            used: BTreeMap::new(),
        }
    }

    /// Lowest offset with `len` free bytes.
    pub fn allocate(&mut self, len: u64) -> Option<u64> {
        if len == 0 {
            return Some(0);
        }
        let mut cursor = 0_u64;
        for (&offset, &size) in &self.used {
            if offset - cursor >= len {
                break;
            }
            cursor = offset + size;
        }
        if cursor.checked_add(len)? > self.capacity {
            return None;
        }
        self.used.insert(cursor, len);
        Some(cursor)
    }

    /// Free the allocation starting at `offset`.
    pub fn free(&mut self, offset: u64) {
        self.used.remove(&offset);
    }

    /// Largest contiguous free run.
    #[must_use]
    pub fn largest_free(&self) -> u64 {
        let mut cursor = 0_u64;
        let mut best = 0_u64;
        for (&offset, &size) in &self.used {
            best = best.max(offset - cursor);
            cursor = offset + size;
        }
        best.max(self.capacity - cursor)
    }
}

struct Segment {
    map: Option<MmapMut>,
    allocator: SegmentAllocator,
    /// id -> (offset, len)
    index: FxHashMap<String, (u64, u64)>,
}

/// File-backed shared segment tier.
pub struct SharedTier {
    path: PathBuf,
    segment: Mutex<Segment>,
    budget: ByteBudget,
}

impl SharedTier {
    /// Create or reset the segment under `base/shm`.
    ///
    /// # Errors
    /// Returns `StorageIo` if the segment cannot be created or mapped.
    pub fn open(base: &Path, capacity: u64) -> Result<Self> {
        let dir = base.join("shm");
        let io = |what: &str, e: std::io::Error| Error::storage("shared", format!("{what}: {e}"));
        fs::create_dir_all(&dir).map_err(|e| io("create dir", e))?;
        let path = dir.join("segment.bin");

        let map = if capacity == 0 {
            None
        } else {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)
                .map_err(|e| io("open segment", e))?;
            file.set_len(capacity).map_err(|e| io("size segment", e))?;
            // SAFETY: the segment file is owned by this tier for its lifetime.
            Some(unsafe { MmapMut::map_mut(&file) }.map_err(|e| io("map segment", e))?)
        };

        tracing::debug!(path = %path.display(), capacity, "shared segment mapped");
        Ok(Self {
            path,
            segment: Mutex::new(Segment {
                map,
                allocator: SegmentAllocator::new(capacity),
                index: FxHashMap::default(),
            }),
            budget: ByteBudget::new(Tier::SharedMemory, capacity),
        })
    }

    /// Segment file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Largest payload that would currently fit.
    #[must_use]
    pub fn largest_free(&self) -> u64 {
        self.segment.lock().allocator.largest_free()
    }

    fn release(&self, seg: &mut Segment, id: &str) -> bool {
        match seg.index.remove(id) {
            Some((offset, len)) => {
                if len > 0 {
                    seg.allocator.free(offset);
                }
                self.budget.release(len);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for SharedTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTier")
            .field("path", &self.path)
            .field("used", &self.budget.used())
            .field("capacity", &self.budget.capacity())
            .finish()
    }
}

impl TierBackend for SharedTier {
    fn tier(&self) -> Tier {
        Tier::SharedMemory
    }

    async fn put(&self, header: &PayloadHeader, payload: Vec<u8>) -> Result<()> {
        let len = payload.len() as u64;
        let mut seg = self.segment.lock();
        self.release(&mut seg, &header.id);
        self.budget.reserve(len)?;

        let Some(offset) = seg.allocator.allocate(len) else {
            self.budget.release(len);
            return Err(Error::CapacityExceeded {
                tier: Tier::SharedMemory.as_str().to_string(),
                requested: len,
                available: seg.allocator.largest_free(),
            });
        };
        if len > 0 {
            let map = seg
                .map
                .as_mut()
                .ok_or_else(|| Error::storage("shared", "segment not mapped"))?;
            let start = usize::try_from(offset)
                .map_err(|_| Error::storage("shared", "offset exceeds address space"))?;
            map[start..start + payload.len()].copy_from_slice(&payload);
        }
        seg.index.insert(header.id.clone(), (offset, len));
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let seg = self.segment.lock();
        let Some(&(offset, len)) = seg.index.get(id) else {
            return Ok(None);
        };
        if len == 0 {
            return Ok(Some(Vec::new()));
        }
        let map = seg
            .map
            .as_ref()
            .ok_or_else(|| Error::storage("shared", "segment not mapped"))?;
        let start = usize::try_from(offset)
            .map_err(|_| Error::storage("shared", "offset exceeds address space"))?;
        let end = start + usize::try_from(len).unwrap_or(usize::MAX);
        Ok(map.get(start..end).map(<[u8]>::to_vec))
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let mut seg = self.segment.lock();
        Ok(self.release(&mut seg, id))
    }

    fn used_bytes(&self) -> u64 {
        self.budget.used()
    }

    fn capacity_bytes(&self) -> u64 {
        self.budget.capacity()
    }

    async fn flush(&self) -> Result<()> {
        let seg = self.segment.lock();
        if let Some(map) = seg.map.as_ref() {
            map.flush()
                .map_err(|e| Error::storage("shared", format!("flush segment: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Compression;
    use crate::tensor::ElementType;
    use tempfile::TempDir;

    fn header(id: &str) -> PayloadHeader {
        PayloadHeader {
            id: id.to_string(),
            shape: vec![1],
            element_type: ElementType::Float32,
            compression: Compression::Identity,
            payload_len: 0,
        }
    }

    #[test]
    fn test_allocator_first_fit() {
        let mut alloc = SegmentAllocator::new(100);
        assert_eq!(alloc.allocate(30), Some(0));
        assert_eq!(alloc.allocate(30), Some(30));
        assert_eq!(alloc.allocate(30), Some(60));
        assert_eq!(alloc.allocate(30), None);
        assert_eq!(alloc.largest_free(), 10);

        alloc.free(30);
        assert_eq!(alloc.largest_free(), 30);
        assert_eq!(alloc.allocate(20), Some(30));
        assert_eq!(alloc.allocate(10), Some(50));
        assert_eq!(alloc.allocate(10), Some(90));
        assert_eq!(alloc.largest_free(), 0);
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let dir = TempDir::new().unwrap();
        let tier = SharedTier::open(dir.path(), 64).unwrap();
        assert!(tier.path().ends_with("shm/segment.bin"));

        tier.put(&header("a"), vec![1; 16]).await.unwrap();
        tier.put(&header("b"), vec![2; 16]).await.unwrap();
        assert_eq!(tier.get("a").await.unwrap(), Some(vec![1; 16]));
        assert_eq!(tier.get("b").await.unwrap(), Some(vec![2; 16]));
        assert_eq!(tier.used_bytes(), 32);

        assert!(tier.remove("a").await.unwrap());
        assert_eq!(tier.get("a").await.unwrap(), None);
        tier.put(&header("c"), vec![3; 16]).await.unwrap();
        assert_eq!(tier.get("c").await.unwrap(), Some(vec![3; 16]));
        tier.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_fragmentation_reports_capacity() {
        let dir = TempDir::new().unwrap();
        let tier = SharedTier::open(dir.path(), 48).unwrap();
        tier.put(&header("a"), vec![0; 16]).await.unwrap();
        tier.put(&header("b"), vec![0; 16]).await.unwrap();
        tier.put(&header("c"), vec![0; 16]).await.unwrap();
        tier.remove("a").await.unwrap();
        tier.remove("c").await.unwrap();

        // 32 bytes free but in two 16-byte holes
        let err = tier.put(&header("d"), vec![0; 24]).await.unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded { available: 16, .. }));
        assert_eq!(tier.used_bytes(), 16);
    }

    #[tokio::test]
    async fn test_zero_capacity_segment() {
        let dir = TempDir::new().unwrap();
        let tier = SharedTier::open(dir.path(), 0).unwrap();
        tier.put(&header("empty"), Vec::new()).await.unwrap();
        assert_eq!(tier.get("empty").await.unwrap(), Some(Vec::new()));
        assert!(tier.put(&header("x"), vec![1]).await.is_err());
    }
}
