//! Accelerator tier
//!
//! The device is chosen once when the cache is opened:
//! - `AcceleratorKind::Gpu` requires a wgpu device (feature `gpu`)
//! - `AcceleratorKind::Host` keeps payloads in host RAM under the
//!   accelerator budget
//! - `AcceleratorKind::Auto` tries the GPU and falls back to host

use super::{MemoryTier, PayloadHeader, Tier, TierBackend};
#[cfg(not(feature = "gpu"))]
use crate::Error;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Which accelerator backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceleratorKind {
    /// GPU if available, else host
    #[default]
    Auto,
    /// GPU only
    Gpu,
    /// Host-resident
    Host,
}

#[derive(Debug)]
enum Backend {
    Host(MemoryTier),
    #[cfg(feature = "gpu")]
    Gpu(crate::gpu::GpuBufferStore),
}

/// Accelerator-resident payloads.
#[derive(Debug)]
pub struct AcceleratorTier {
    backend: Backend,
}

impl AcceleratorTier {
    /// Select and initialize the accelerator backend.
    ///
    /// # Errors
    /// Returns `GpuInitFailed` when `Gpu` is requested but unavailable.
    pub async fn open(kind: AcceleratorKind, capacity: u64) -> Result<Self> {
        let backend = match kind {
            AcceleratorKind::Host => Backend::Host(MemoryTier::for_tier(Tier::Accelerator, capacity)),
            AcceleratorKind::Gpu => Self::gpu(capacity).await?,
            AcceleratorKind::Auto => match Self::gpu(capacity).await {
                Ok(backend) => backend,
                Err(e) => {
                    tracing::info!(error = %e, "no GPU accelerator, using host-resident tier");
                    Backend::Host(MemoryTier::for_tier(Tier::Accelerator, capacity))
                }
            },
        };
        let tier = Self { backend };
        tracing::info!(backend = tier.backend_name(), capacity, "accelerator tier ready");
        Ok(tier)
    }

    /// Host-resident accelerator tier.
    #[must_use]
    pub fn host(capacity: u64) -> Self {
        Self {
            backend: Backend::Host(MemoryTier::for_tier(Tier::Accelerator, capacity)),
        }
    }

    #[cfg(feature = "gpu")]
    async fn gpu(capacity: u64) -> Result<Backend> {
        crate::gpu::GpuBufferStore::new(capacity)
            .await
            .map(Backend::Gpu)
    }

    #[cfg(not(feature = "gpu"))]
    #[allow(clippy::unused_async)]
    async fn gpu(_capacity: u64) -> Result<Backend> {
        Err(Error::GpuInitFailed(
            "built without the `gpu` feature".to_string(),
        ))
    }

    /// Whether payloads live in device memory.
    #[must_use]
    pub const fn is_gpu(&self) -> bool {
        match self.backend {
            Backend::Host(_) => false,
            #[cfg(feature = "gpu")]
            Backend::Gpu(_) => true,
        }
    }

    /// Backend name for logs and status.
    #[must_use]
    pub const fn backend_name(&self) -> &'static str {
        if self.is_gpu() {
            "gpu"
        } else {
            "host"
        }
    }
}

impl TierBackend for AcceleratorTier {
    fn tier(&self) -> Tier {
        Tier::Accelerator
    }

    async fn put(&self, header: &PayloadHeader, payload: Vec<u8>) -> Result<()> {
        match &self.backend {
            Backend::Host(m) => m.put(header, payload).await,
            #[cfg(feature = "gpu")]
            Backend::Gpu(g) => g.put(&header.id, &payload),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>> {
        match &self.backend {
            Backend::Host(m) => m.get(id).await,
            #[cfg(feature = "gpu")]
            Backend::Gpu(g) => g.get(id).await,
        }
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        match &self.backend {
            Backend::Host(m) => m.remove(id).await,
            #[cfg(feature = "gpu")]
            Backend::Gpu(g) => Ok(g.remove(id)),
        }
    }

    fn used_bytes(&self) -> u64 {
        match &self.backend {
            Backend::Host(m) => m.used_bytes(),
            #[cfg(feature = "gpu")]
            Backend::Gpu(g) => g.used_bytes(),
        }
    }

    fn capacity_bytes(&self) -> u64 {
        match &self.backend {
            Backend::Host(m) => m.capacity_bytes(),
            #[cfg(feature = "gpu")]
            Backend::Gpu(g) => g.capacity_bytes(),
        }
    }
}
