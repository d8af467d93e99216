//! Memory-mapped disk tier
//!
//! One file per artifact under `{base}/disk/`:
//!
//! ```text
//! +-------------+---------------------------+-----------------+
//! | u32 LE hlen | bincode PayloadHeader     | payload bytes   |
//! +-------------+---------------------------+-----------------+
//! ```
//!
//! Writes go to a temporary file that is renamed into place, so a crash
//! never leaves a torn artifact. Reads go through a read-only memory map kept
//! in a bounded [`HandleArena`].

use super::{ByteBudget, PayloadHeader, Tier, TierBackend};
use crate::kv::hash_key;
use crate::pool::blocking;
use crate::{Error, Result};
use memmap2::Mmap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const FILE_EXTENSION: &str = "tcache";
const MAX_STEM_CHARS: usize = 64;

/// Map an artifact id to a filesystem-safe, collision-resistant file name.
#[must_use]
pub fn file_name_for(id: &str) -> String {
    let stem: String = id
        .chars()
        .take(MAX_STEM_CHARS)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{stem}-{:016x}.{FILE_EXTENSION}", hash_key(id))
}

struct Slot {
    id: String,
    map: Arc<Mmap>,
    last_used: u64,
}

/// Bounded table of open memory maps.
///
/// Slots are reused after close; when every slot is busy the least recently
/// used map is closed to make room.
pub struct HandleArena {
    slots: Vec<Option<Slot>>,
    index: FxHashMap<String, usize>,
    free: Vec<usize>,
    tick: u64,
    max_open: usize,
}

impl HandleArena {
    /// Arena holding at most `max_open` maps (minimum 1).
    #[must_use]
    pub fn new(max_open: usize) -> Self {
        Self {
            slots: Vec::new(),
            index: FxHashMap::default(),
            free: Vec::new(),
            tick: 0,
            max_open: max_open.max(1),
        }
    }

    /// Currently open maps.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.index.len()
    }

    /// Whether `id` has an open map.
    #[must_use]
    pub fn is_open(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Cached map for `id`, refreshing its recency.
    pub fn lookup(&mut self, id: &str) -> Option<Arc<Mmap>> {
        let slot = *self.index.get(id)?;
        self.tick += 1;
        let tick = self.tick;
        self.slots[slot].as_mut().map(|s| {
            s.last_used = tick;
            Arc::clone(&s.map)
        })
    }

    /// Register a freshly opened map, closing the oldest if full.
    pub fn insert(&mut self, id: &str, map: Arc<Mmap>) {
        self.close(id);
        if self.index.len() >= self.max_open {
            self.close_oldest();
        }
        self.tick += 1;
        let slot = Slot {
            id: id.to_string(),
            map,
            last_used: self.tick,
        };
        let pos = if let Some(pos) = self.free.pop() {
            self.slots[pos] = Some(slot);
            pos
        } else {
            self.slots.push(Some(slot));
            self.slots.len() - 1
        };
        self.index.insert(id.to_string(), pos);
    }

    /// Close the map for `id`. Returns whether one was open.
    pub fn close(&mut self, id: &str) -> bool {
        match self.index.remove(id) {
            Some(pos) => {
                self.slots[pos] = None;
                self.free.push(pos);
                true
            }
            None => false,
        }
    }

    /// Close every map.
    pub fn close_all(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.free.clear();
    }

    fn close_oldest(&mut self) {
        let oldest = self
            .slots
            .iter()
            .flatten()
            .min_by_key(|s| s.last_used)
            .map(|s| s.id.clone());
        if let Some(id) = oldest {
            tracing::trace!(id = %id, "closing least recently used disk map");
            self.close(&id);
        }
    }
}

impl std::fmt::Debug for HandleArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleArena")
            .field("open", &self.index.len())
            .field("max_open", &self.max_open)
            .finish()
    }
}

/// One memory-mapped file per artifact.
#[derive(Debug)]
pub struct DiskTier {
    dir: PathBuf,
    arena: Arc<Mutex<HandleArena>>,
    budget: ByteBudget,
}

impl DiskTier {
    /// Open (creating if needed) the disk tier under `base/disk`.
    ///
    /// # Errors
    /// Returns `StorageIo` if the directory cannot be created.
    pub fn open(base: &Path, capacity: u64, max_open_handles: usize) -> Result<Self> {
        let dir = base.join("disk");
        fs::create_dir_all(&dir)
            .map_err(|e| Error::storage("disk", format!("create {}: {e}", dir.display())))?;
        Ok(Self {
            dir,
            arena: Arc::new(Mutex::new(HandleArena::new(max_open_handles))),
            budget: ByteBudget::new(Tier::DiskMmap, capacity),
        })
    }

    /// Directory holding artifact files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file for `id`.
    #[must_use]
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(file_name_for(id))
    }

    /// Whether a file for `id` exists.
    #[must_use]
    pub fn has_file(&self, id: &str) -> bool {
        self.path_for(id).is_file()
    }

    /// Account for an artifact found on disk at startup.
    ///
    /// # Errors
    /// Returns `CapacityExceeded` if it no longer fits the budget.
    pub fn adopt(&self, payload_len: u64) -> Result<()> {
        self.budget.reserve(payload_len)
    }

    /// Number of open memory maps.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.arena.lock().open_count()
    }

    /// Read and validate the header of an artifact file.
    ///
    /// # Errors
    /// Returns `StorageIo` for truncated or inconsistent files.
    pub fn read_header(&self, id: &str) -> Result<Option<PayloadHeader>> {
        let Some(map) = self.map_for(id)? else {
            return Ok(None);
        };
        parse(id, &map).map(|(header, _)| Some(header))
    }

    fn map_for(&self, id: &str) -> Result<Option<Arc<Mmap>>> {
        if let Some(map) = self.arena.lock().lookup(id) {
            return Ok(Some(map));
        }
        let path = self.path_for(id);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::storage(
                    "disk",
                    format!("open {}: {e}", path.display()),
                ))
            }
        };
        // SAFETY: files are only ever replaced by rename, never truncated in place.
        let map = unsafe { Mmap::map(&file) }
            .map_err(|e| Error::storage("disk", format!("mmap {}: {e}", path.display())))?;
        let map = Arc::new(map);
        self.arena.lock().insert(id, Arc::clone(&map));
        Ok(Some(map))
    }
}

/// Split a mapped file into header and payload, validating both.
fn parse<'a>(id: &str, bytes: &'a [u8]) -> Result<(PayloadHeader, &'a [u8])> {
    let corrupt = |what: &str| Error::storage("disk", format!("{id}: {what}"));
    if bytes.len() < 4 {
        return Err(corrupt("file shorter than header length"));
    }
    let hlen = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let body = &bytes[4..];
    if body.len() < hlen {
        return Err(corrupt("truncated header"));
    }
    let header: PayloadHeader = bincode::deserialize(&body[..hlen])?;
    let payload = &body[hlen..];
    if header.id != id {
        return Err(corrupt(&format!("header names {}", header.id)));
    }
    if header.payload_len != payload.len() as u64 {
        return Err(corrupt(&format!(
            "payload is {} bytes, header says {}",
            payload.len(),
            header.payload_len
        )));
    }
    Ok((header, payload))
}

fn write_atomically(path: &Path, header: &PayloadHeader, payload: &[u8]) -> Result<()> {
    let encoded = bincode::serialize(header)?;
    let hlen = u32::try_from(encoded.len())
        .map_err(|_| Error::storage("disk", "header larger than 4 GiB"))?;
    let tmp = path.with_extension(format!("{FILE_EXTENSION}.tmp"));
    let io = |e: std::io::Error| Error::storage("disk", format!("write {}: {e}", tmp.display()));

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp)
        .map_err(io)?;
    file.write_all(&hlen.to_le_bytes()).map_err(io)?;
    file.write_all(&encoded).map_err(io)?;
    file.write_all(payload).map_err(io)?;
    file.sync_all().map_err(io)?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        Error::storage("disk", format!("rename into {}: {e}", path.display()))
    })
}

impl TierBackend for DiskTier {
    fn tier(&self) -> Tier {
        Tier::DiskMmap
    }

    async fn put(&self, header: &PayloadHeader, payload: Vec<u8>) -> Result<()> {
        // A replacement only needs room for its growth
        let prev_len = self
            .read_header(&header.id)
            .ok()
            .flatten()
            .map_or(0, |h| h.payload_len);
        let len = payload.len() as u64;
        let growth = len.saturating_sub(prev_len);
        self.budget.reserve(growth)?;

        let path = self.path_for(&header.id);
        let owned = header.clone();
        let written = blocking("disk.put", move || write_atomically(&path, &owned, &payload)).await;
        match written {
            Ok(()) => {
                self.arena.lock().close(&header.id);
                self.budget.release(prev_len.saturating_sub(len));
                Ok(())
            }
            Err(e) => {
                self.budget.release(growth);
                Err(e)
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let Some(map) = self.map_for(id)? else {
            return Ok(None);
        };
        let owned_id = id.to_string();
        blocking("disk.get", move || {
            parse(&owned_id, &map).map(|(_, payload)| Some(payload.to_vec()))
        })
        .await
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let previous = self.read_header(id).ok().flatten();
        self.arena.lock().close(id);
        let path = self.path_for(id);
        let removed = blocking("disk.remove", move || match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::storage(
                "disk",
                format!("remove {}: {e}", path.display()),
            )),
        })
        .await?;
        if removed {
            if let Some(prev) = previous {
                self.budget.release(prev.payload_len);
            }
        }
        Ok(removed)
    }

    fn used_bytes(&self) -> u64 {
        self.budget.used()
    }

    fn capacity_bytes(&self) -> u64 {
        self.budget.capacity()
    }

    async fn flush(&self) -> Result<()> {
        self.arena.lock().close_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Compression;
    use crate::tensor::ElementType;
    use tempfile::TempDir;

    fn header(id: &str, len: usize) -> PayloadHeader {
        PayloadHeader {
            id: id.to_string(),
            shape: vec![len],
            element_type: ElementType::Float32,
            compression: Compression::Int8,
            payload_len: len as u64,
        }
    }

    #[test]
    fn test_file_name_sanitized() {
        let name = file_name_for("../etc/passwd");
        assert!(name.starts_with("___etc_passwd-"));
        assert!(name.ends_with(".tcache"));
        assert_ne!(file_name_for("a/b"), file_name_for("a_b"));
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::open(dir.path(), u64::MAX, 4).unwrap();

        tier.put(&header("t1", 5), vec![1, 2, 3, 4, 5]).await.unwrap();
        assert!(tier.has_file("t1"));
        assert_eq!(tier.get("t1").await.unwrap(), Some(vec![1, 2, 3, 4, 5]));
        assert_eq!(tier.used_bytes(), 5);

        let h = tier.read_header("t1").unwrap().unwrap();
        assert_eq!(h.compression, Compression::Int8);
    }

    #[tokio::test]
    async fn test_replace_on_full_tier_needs_only_growth() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::open(dir.path(), 100, 4).unwrap();

        tier.put(&header("t", 80), vec![1; 80]).await.unwrap();
        tier.put(&header("t", 90), vec![2; 90]).await.unwrap();
        assert_eq!(tier.used_bytes(), 90);

        tier.put(&header("t", 60), vec![3; 60]).await.unwrap();
        assert_eq!(tier.used_bytes(), 60);
        assert_eq!(tier.get("t").await.unwrap(), Some(vec![3; 60]));

        let err = tier.put(&header("t", 120), vec![4; 120]).await.unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded { requested: 60, .. }));
        assert_eq!(tier.used_bytes(), 60);
        assert_eq!(tier.get("t").await.unwrap(), Some(vec![3; 60]));
    }

    #[tokio::test]
    async fn test_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::open(dir.path(), u64::MAX, 4).unwrap();
        assert_eq!(tier.get("nope").await.unwrap(), None);
        assert!(!tier.remove("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_and_reaccounts() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::open(dir.path(), u64::MAX, 4).unwrap();

        tier.put(&header("t", 3), vec![9; 3]).await.unwrap();
        assert_eq!(tier.get("t").await.unwrap(), Some(vec![9; 3]));
        tier.put(&header("t", 2), vec![7; 2]).await.unwrap();

        assert_eq!(tier.get("t").await.unwrap(), Some(vec![7; 2]));
        assert_eq!(tier.used_bytes(), 2);
    }

    #[tokio::test]
    async fn test_remove_releases_budget() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::open(dir.path(), 10, 4).unwrap();
        tier.put(&header("t", 8), vec![0; 8]).await.unwrap();
        assert!(tier.put(&header("u", 8), vec![0; 8]).await.is_err());
        assert!(tier.remove("t").await.unwrap());
        assert_eq!(tier.used_bytes(), 0);
        tier.put(&header("u", 8), vec![0; 8]).await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_file_detected() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::open(dir.path(), u64::MAX, 4).unwrap();
        tier.put(&header("t", 4), vec![0; 4]).await.unwrap();
        tier.flush().await.unwrap();

        // Chop the last byte off the payload
        let path = tier.path_for("t");
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();

        let err = tier.get("t").await.unwrap_err();
        assert!(matches!(err, Error::StorageIo { .. }));
    }

    #[tokio::test]
    async fn test_handle_arena_is_bounded() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::open(dir.path(), u64::MAX, 2).unwrap();
        for i in 0..5 {
            let id = format!("t{i}");
            tier.put(&header(&id, 1), vec![i]).await.unwrap();
            assert_eq!(tier.get(&id).await.unwrap(), Some(vec![i]));
        }
        assert_eq!(tier.open_handles(), 2);
    }

    #[test]
    fn test_arena_evicts_least_recent() {
        let dir = TempDir::new().unwrap();
        let mut arena = HandleArena::new(2);
        let mut maps = Vec::new();
        for name in ["a", "b", "c"] {
            let path = dir.path().join(name);
            std::fs::write(&path, b"x").unwrap();
            let file = File::open(&path).unwrap();
            maps.push(Arc::new(unsafe { Mmap::map(&file) }.unwrap()));
        }
        arena.insert("a", Arc::clone(&maps[0]));
        arena.insert("b", Arc::clone(&maps[1]));
        assert!(arena.lookup("a").is_some());
        arena.insert("c", Arc::clone(&maps[2]));

        assert!(arena.is_open("a"));
        assert!(!arena.is_open("b"));
        assert!(arena.is_open("c"));
        assert!(arena.close("a"));
        assert_eq!(arena.open_count(), 1);
    }
}
