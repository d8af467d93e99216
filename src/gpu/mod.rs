//! GPU-resident payload store using wgpu (WebGPU)
//!
//! Toyota Way Principles:
//! - Muda elimination: payloads stay on the device until read back
//! - Jidoka: capacity is enforced before any device allocation
//!
//! Payloads are uploaded once into `STORAGE | COPY_SRC` buffers (padded to
//! `wgpu::COPY_BUFFER_ALIGNMENT`) and read back through a mapped staging
//! buffer.

use crate::tier::{ByteBudget, Tier};
use crate::{Error, Result};
use dashmap::DashMap;
use wgpu::util::DeviceExt;

/// wgpu device and queue.
pub struct GpuDevice {
    /// GPU device handle
    pub device: wgpu::Device,
    /// GPU command queue
    pub queue: wgpu::Queue,
    /// Adapter name, e.g. "NVIDIA RTX 4090"
    pub name: String,
}

impl GpuDevice {
    /// Initialize a high-performance adapter.
    ///
    /// # Errors
    /// Returns error if GPU initialization fails (no GPU available, driver issues, etc.)
    pub async fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| Error::GpuInitFailed("No GPU adapter found".to_string()))?;
        let name = adapter.get_info().name;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Trueno-Cache GPU Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|e| Error::GpuInitFailed(format!("Failed to create device: {e}")))?;

        Ok(Self {
            device,
            queue,
            name,
        })
    }
}

struct Resident {
    buffer: Option<wgpu::Buffer>,
    len: u64,
}

/// Payloads held in device buffers.
pub struct GpuBufferStore {
    gpu: GpuDevice,
    buffers: DashMap<String, Resident>,
    budget: ByteBudget,
}

fn padded(len: u64) -> u64 {
    len.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT
}

impl GpuBufferStore {
    /// Open a device and a store with `capacity` bytes.
    ///
    /// # Errors
    /// Returns `GpuInitFailed` if no device is available.
    pub async fn new(capacity: u64) -> Result<Self> {
        let gpu = GpuDevice::new().await?;
        tracing::info!(adapter = %gpu.name, "GPU accelerator tier initialized");
        Ok(Self {
            gpu,
            buffers: DashMap::new(),
            budget: ByteBudget::new(Tier::Accelerator, capacity),
        })
    }

    /// Upload `payload` for `id`, replacing any previous buffer.
    ///
    /// # Errors
    /// Returns `CapacityExceeded` when the device budget is full.
    pub fn put(&self, id: &str, payload: &[u8]) -> Result<()> {
        self.remove(id);
        let len = payload.len() as u64;
        self.budget.reserve(len)?;

        let buffer = (len > 0).then(|| {
            let mut contents = payload.to_vec();
            contents.resize(usize::try_from(padded(len)).unwrap_or(payload.len()), 0);
            self.gpu
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(id),
                    contents: &contents,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                })
        });
        self.buffers
            .insert(id.to_string(), Resident { buffer, len });
        Ok(())
    }

    /// Read the payload for `id` back to host memory.
    ///
    /// # Errors
    /// Returns error if the staging buffer cannot be mapped.
    pub async fn get(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let staging = {
            let Some(entry) = self.buffers.get(id) else {
                return Ok(None);
            };
            let Some(buffer) = entry.buffer.as_ref() else {
                return Ok(Some(Vec::new()));
            };
            let size = padded(entry.len);
            let staging = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Trueno-Cache Staging Buffer"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let mut encoder =
                self.gpu
                    .device
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                        label: Some("Trueno-Cache Readback Encoder"),
                    });
            encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
            self.gpu.queue.submit(Some(encoder.finish()));
            (staging, entry.len)
        };
        let (staging_buffer, len) = staging;

        let buffer_slice = staging_buffer.slice(..);
        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            tx.send(result).ok();
        });

        self.gpu.device.poll(wgpu::Maintain::Wait);

        rx.receive()
            .await
            .ok_or_else(|| Error::Other("Failed to receive buffer map result".to_string()))?
            .map_err(|e| Error::Other(format!("Buffer mapping failed: {e}")))?;

        let data_view = buffer_slice.get_mapped_range();
        let out = data_view[..usize::try_from(len).unwrap_or(data_view.len())].to_vec();

        drop(data_view);
        staging_buffer.unmap();

        Ok(Some(out))
    }

    /// Drop the buffer for `id`.
    pub fn remove(&self, id: &str) -> bool {
        match self.buffers.remove(id) {
            Some((_, resident)) => {
                if let Some(buffer) = resident.buffer {
                    buffer.destroy();
                }
                self.budget.release(resident.len);
                true
            }
            None => false,
        }
    }

    /// Bytes resident on the device.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.budget.used()
    }

    /// Device budget.
    #[must_use]
    pub const fn capacity_bytes(&self) -> u64 {
        self.budget.capacity()
    }
}

impl std::fmt::Debug for GpuBufferStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBufferStore")
            .field("adapter", &self.gpu.name)
            .field("buffers", &self.buffers.len())
            .field("used", &self.budget.used())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding() {
        assert_eq!(padded(0), 0);
        assert_eq!(padded(1), 4);
        assert_eq!(padded(4), 4);
        assert_eq!(padded(5), 8);
    }

    #[tokio::test]
    async fn test_gpu_roundtrip() {
        // This test may fail on machines without GPU
        match GpuBufferStore::new(1024).await {
            Ok(store) => {
                store.put("a", &[1, 2, 3, 4, 5]).unwrap();
                assert_eq!(store.get("a").await.unwrap(), Some(vec![1, 2, 3, 4, 5]));
                assert_eq!(store.used_bytes(), 5);
                assert!(store.remove("a"));
                assert_eq!(store.get("a").await.unwrap(), None);
            }
            Err(e) => {
                eprintln!("GPU not available (expected in CI): {e}");
            }
        }
    }
}
