//! # Trueno-Cache: Learned Multi-Tier Tensor Cache
//!
//! **Version**: 0.1.0
//!
//! Trueno-Cache stores large `f32` tensors across four storage tiers
//! (accelerator, fast memory, memory-mapped disk, shared memory), compresses
//! them with pluggable codecs, remembers prior computations for reuse, and
//! lets an online reinforcement-learning policy adapt placement from observed
//! performance.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Muda elimination**: Lossy codecs (fp16, bf16, int8) cut bytes moved between tiers
//! - **Poka-Yoke safety**: Byte budgets per tier; a full tier degrades instead of failing
//! - **Genchi Genbutsu**: Placement learns from measured latency and hit rate
//! - **Jidoka**: Every dependency call is bounded by a timeout
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trueno_cache::{CacheConfig, Compression, StoreRequest, Tensor, TensorCache};
//! use trueno_cache::kv::MemoryKvStore;
//!
//! # async fn example() -> trueno_cache::Result<()> {
//! let cache = TensorCache::open(
//!     CacheConfig::new("/tmp/trueno-cache"),
//!     Arc::new(MemoryKvStore::new()),
//! )
//! .await?;
//!
//! let tensor = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])?;
//! let meta = cache
//!     .store(StoreRequest::new("embeddings/doc-1", tensor).with_compression(Compression::Float16))
//!     .await?;
//! println!("stored on {} ({} bytes)", meta.tier, meta.size_bytes);
//!
//! let restored = cache.get("embeddings/doc-1", None, true).await?;
//! assert!(restored.is_some());
//! cache.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod access;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod graph;
pub mod kv;
pub mod logging;
pub mod metadata;
pub mod placement;
pub mod policy;
pub mod pool;
pub mod reward;
pub mod tensor;
pub mod tier;

pub use cache::{CacheStatus, LayoutReport, StoreRequest, TensorCache, TrainingData};
pub use codec::{CodecRegistry, Compression};
pub use config::{CacheConfig, PolicyConfig};
pub use error::{Error, Result};
pub use graph::{ComputationGraphRecord, ComputationPerf, GraphConfig};
pub use metadata::ArtifactMetadata;
pub use placement::PlacementMode;
pub use policy::{ActionKind, OptimizedParams, TaskPriority};
pub use reward::{PerformanceMetrics, RewardBreakdown, UserFeedback};
pub use tensor::{ElementType, Tensor};
pub use tier::Tier;
