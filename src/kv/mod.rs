//! Key-Value Store Module
//!
//! The cache persists metadata, computation graphs and the policy blob through
//! an external key-value store. This module defines that seam:
//! - `KvStore` trait with TTL writes and prefix scans
//! - `MemoryKvStore`, an in-process `DashMap` backend
//! - `hash_key` (from `trueno`) for stable on-disk names
//!
//! # Example
//!
//! ```rust,no_run
//! use trueno_cache::kv::{KvStore, MemoryKvStore};
//! use std::time::Duration;
//!
//! # async fn example() -> trueno_cache::Result<()> {
//! let store = MemoryKvStore::new();
//!
//! store.set("key", b"value".to_vec()).await?;
//! assert_eq!(store.get("key").await?, Some(b"value".to_vec()));
//!
//! store
//!     .set_with_ttl("meta:a", b"{}".to_vec(), Duration::from_secs(60))
//!     .await?;
//! assert_eq!(store.scan_prefix("meta:").await?, vec!["meta:a".to_string()]);
//!
//! store.delete("key").await?;
//! assert!(!store.exists("key").await?);
//! # Ok(())
//! # }
//! ```

mod memory;

pub use memory::MemoryKvStore;

pub use trueno::hash_key;

use crate::Result;
use std::future::Future;
use std::time::Duration;

/// Key-value store used for metadata, graph records and policy state.
pub trait KvStore: Send + Sync {
    /// Value stored under `key`, or `None` if absent or expired.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Store `value` with no expiry, replacing any previous value and TTL.
    fn set(&self, key: &str, value: Vec<u8>) -> impl Future<Output = Result<()>> + Send;

    /// Set a value that expires after `ttl`.
    fn set_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove `key`. Missing keys are not an error.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Check if a live key exists.
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Live keys starting with `prefix`, sorted.
    fn scan_prefix(&self, prefix: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Values for `keys`, positionally. Absent or expired keys yield `None`.
    ///
    /// The default issues one `get` per key; remote stores should pipeline.
    fn batch_get(
        &self,
        keys: &[&str],
    ) -> impl Future<Output = Result<Vec<Option<Vec<u8>>>>> + Send {
        async move {
            let mut results = Vec::with_capacity(keys.len());
            for key in keys {
                results.push(self.get(key).await?);
            }
            Ok(results)
        }
    }
}
