//! Cache Configuration
//!
//! Sensible defaults, `with_*` builders, JSON loading.
//!
//! # Example
//!
//! ```rust
//! use trueno_cache::config::{CacheConfig, PolicyConfig};
//! use trueno_cache::placement::PlacementMode;
//!
//! let config = CacheConfig::new("/tmp/trueno-cache")
//!     .with_memory_capacity(256 * 1024 * 1024)
//!     .with_placement(PlacementMode::Learned)
//!     .with_policy(PolicyConfig::default().with_seed(7));
//! assert!(config.validate().is_ok());
//! ```

use crate::placement::{PlacementMode, MIB};
use crate::tier::accelerator::AcceleratorKind;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// PolicyConfig
// =============================================================================

/// Hyperparameters of the placement policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Trunk width of the Q-network.
    ///
    /// Default: 64
    pub hidden_dim: usize,
    /// Adam learning rate.
    ///
    /// Default: 3e-4
    pub learning_rate: f32,
    /// Discount factor.
    ///
    /// Default: 0.99
    pub gamma: f32,
    /// Initial exploration rate.
    pub epsilon_start: f64,
    /// Exploration floor.
    pub epsilon_floor: f64,
    /// Per-decision exploration decay.
    pub epsilon_decay: f64,
    /// Replay buffer capacity.
    ///
    /// Default: 100 000
    pub replay_capacity: usize,
    /// Training batch size.
    ///
    /// Default: 64
    pub batch_size: usize,
    /// Decisions between target network syncs.
    ///
    /// Default: 1000
    pub target_sync_interval: u64,
    /// Episodes between policy saves.
    ///
    /// Default: 100
    pub save_interval: u64,
    /// RNG seed; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 64,
            learning_rate: 3e-4,
            gamma: 0.99,
            epsilon_start: 1.0,
            epsilon_floor: 0.01,
            epsilon_decay: 0.995,
            replay_capacity: 100_000,
            batch_size: 64,
            target_sync_interval: 1000,
            save_interval: 100,
            seed: None,
        }
    }
}

impl PolicyConfig {
    /// Set the trunk width.
    #[must_use]
    pub const fn with_hidden_dim(mut self, hidden_dim: usize) -> Self {
        self.hidden_dim = hidden_dim;
        self
    }

    /// Set the learning rate.
    #[must_use]
    pub const fn with_learning_rate(mut self, lr: f32) -> Self {
        self.learning_rate = lr;
        self
    }

    /// Set start, floor and decay of epsilon.
    #[must_use]
    pub const fn with_epsilon(mut self, start: f64, floor: f64, decay: f64) -> Self {
        self.epsilon_start = start;
        self.epsilon_floor = floor;
        self.epsilon_decay = decay;
        self
    }

    /// Set replay capacity.
    #[must_use]
    pub const fn with_replay_capacity(mut self, capacity: usize) -> Self {
        self.replay_capacity = capacity;
        self
    }

    /// Set batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set target sync interval.
    #[must_use]
    pub const fn with_target_sync_interval(mut self, decisions: u64) -> Self {
        self.target_sync_interval = decisions;
        self
    }

    /// Set save interval.
    #[must_use]
    pub const fn with_save_interval(mut self, episodes: u64) -> Self {
        self.save_interval = episodes;
        self
    }

    /// Fix the RNG seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Check invariants.
    ///
    /// # Errors
    /// Returns `InvalidInput` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(Error::InvalidInput(format!("policy: {msg}")));
        if self.hidden_dim < 4 {
            return fail("hidden_dim must be at least 4");
        }
        if !(self.learning_rate > 0.0) {
            return fail("learning_rate must be positive");
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return fail("gamma must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.epsilon_floor)
            || !(self.epsilon_floor..=1.0).contains(&self.epsilon_start)
        {
            return fail("epsilon must satisfy 0 <= floor <= start <= 1");
        }
        if !(self.epsilon_decay > 0.0 && self.epsilon_decay <= 1.0) {
            return fail("epsilon_decay must be in (0, 1]");
        }
        if self.batch_size == 0 || self.replay_capacity < self.batch_size {
            return fail("replay_capacity must be >= batch_size > 0");
        }
        if self.target_sync_interval == 0 || self.save_interval == 0 {
            return fail("intervals must be positive");
        }
        Ok(())
    }
}

// =============================================================================
// CacheConfig
// =============================================================================

/// Configuration for [`crate::TensorCache`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory for the disk and shared-memory tiers.
    pub base_path: PathBuf,
    /// Which accelerator backend to use.
    pub accelerator: AcceleratorKind,
    /// Accelerator tier capacity in bytes.
    ///
    /// Default: 512 MiB
    pub accelerator_capacity: u64,
    /// Fast memory tier capacity in bytes.
    ///
    /// Default: 1 GiB
    pub memory_capacity: u64,
    /// Disk tier capacity in bytes.
    ///
    /// Default: 16 GiB
    pub disk_capacity: u64,
    /// Shared-memory segment size in bytes. 0 disables the tier.
    ///
    /// Default: 256 MiB
    pub shared_capacity: u64,
    /// Open mmap handles kept by the disk tier.
    pub max_open_disk_handles: usize,
    /// Timeout for every KV and tier operation.
    pub io_timeout_ms: u64,
    /// Codec/training worker threads; 0 uses the number of CPUs.
    pub worker_threads: usize,
    /// How `store` chooses a tier.
    pub placement: PlacementMode,
    /// Hot artifacts considered by `optimize_layout`.
    pub hot_top_n: usize,
    /// Idle hours after which an artifact is cold.
    pub cold_threshold_hours: f64,
    /// TTL of metadata records in the KV store.
    pub metadata_ttl_secs: u64,
    /// TTL of computation graph records.
    pub graph_ttl_secs: u64,
    /// Re-index disk artifacts found in the KV store at open.
    pub recover_on_open: bool,
    /// Policy hyperparameters.
    pub policy: PolicyConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_path: std::env::temp_dir().join("trueno-cache"),
            accelerator: AcceleratorKind::Auto,
            accelerator_capacity: 512 * MIB,
            memory_capacity: 1024 * MIB,
            disk_capacity: 16 * 1024 * MIB,
            shared_capacity: 256 * MIB,
            max_open_disk_handles: 256,
            io_timeout_ms: 5_000,
            worker_threads: 0,
            placement: PlacementMode::Heuristic,
            hot_top_n: crate::access::DEFAULT_HOT_TOP_N,
            cold_threshold_hours: crate::access::DEFAULT_COLD_THRESHOLD_HOURS,
            metadata_ttl_secs: 86_400,
            graph_ttl_secs: 86_400,
            recover_on_open: true,
            policy: PolicyConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Defaults rooted at `base_path`.
    #[must_use]
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    /// Parse from JSON; missing fields take defaults.
    ///
    /// # Errors
    /// Returns `Serialization` for malformed JSON, `InvalidInput` for
    /// out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the accelerator backend.
    #[must_use]
    pub const fn with_accelerator(mut self, kind: AcceleratorKind) -> Self {
        self.accelerator = kind;
        self
    }

    /// Set accelerator capacity.
    #[must_use]
    pub const fn with_accelerator_capacity(mut self, bytes: u64) -> Self {
        self.accelerator_capacity = bytes;
        self
    }

    /// Set fast memory capacity.
    #[must_use]
    pub const fn with_memory_capacity(mut self, bytes: u64) -> Self {
        self.memory_capacity = bytes;
        self
    }

    /// Set disk capacity.
    #[must_use]
    pub const fn with_disk_capacity(mut self, bytes: u64) -> Self {
        self.disk_capacity = bytes;
        self
    }

    /// Set the shared segment size.
    #[must_use]
    pub const fn with_shared_capacity(mut self, bytes: u64) -> Self {
        self.shared_capacity = bytes;
        self
    }

    /// Set the I/O timeout.
    #[must_use]
    pub const fn with_io_timeout_ms(mut self, ms: u64) -> Self {
        self.io_timeout_ms = ms;
        self
    }

    /// Set worker thread count.
    #[must_use]
    pub const fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set placement mode.
    #[must_use]
    pub const fn with_placement(mut self, mode: PlacementMode) -> Self {
        self.placement = mode;
        self
    }

    /// Set the cold threshold.
    #[must_use]
    pub const fn with_cold_threshold_hours(mut self, hours: f64) -> Self {
        self.cold_threshold_hours = hours;
        self
    }

    /// Enable or disable startup recovery.
    #[must_use]
    pub const fn with_recovery(mut self, enabled: bool) -> Self {
        self.recover_on_open = enabled;
        self
    }

    /// Set policy hyperparameters.
    #[must_use]
    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    /// I/O timeout as a `Duration`.
    #[must_use]
    pub const fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Metadata TTL as a `Duration`.
    #[must_use]
    pub const fn metadata_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_ttl_secs)
    }

    /// Graph TTL as a `Duration`.
    #[must_use]
    pub const fn graph_ttl(&self) -> Duration {
        Duration::from_secs(self.graph_ttl_secs)
    }

    /// Check invariants.
    ///
    /// # Errors
    /// Returns `InvalidInput` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.io_timeout_ms == 0 {
            return Err(Error::InvalidInput("io_timeout_ms must be positive".into()));
        }
        if self.max_open_disk_handles == 0 {
            return Err(Error::InvalidInput(
                "max_open_disk_handles must be positive".into(),
            ));
        }
        if !(self.cold_threshold_hours >= 0.0) {
            return Err(Error::InvalidInput(
                "cold_threshold_hours must be non-negative".into(),
            ));
        }
        self.policy.validate()
    }
}
