//! Lossless codecs: raw bytes and LZ4/ZSTD block compression.

use super::{expect_len, Codec, Compression};
use crate::tensor::Tensor;
use crate::Result;
#[cfg(feature = "compression")]
use crate::Error;

/// Native little-endian bytes of the elements.
pub(crate) fn identity_bytes(data: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(data).to_vec()
}

fn identity_decode(codec: Compression, bytes: &[u8], elements: usize) -> Result<Vec<f32>> {
    expect_len(codec, bytes, elements * 4)?;
    Ok(bytemuck::pod_collect_to_vec::<u8, f32>(bytes))
}

/// Stores the raw element bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl Codec for IdentityCodec {
    fn kind(&self) -> Compression {
        Compression::Identity
    }

    fn encode(&self, tensor: &Tensor) -> Result<Vec<u8>> {
        Ok(identity_bytes(tensor.data()))
    }

    fn decode(&self, bytes: &[u8], elements: usize) -> Result<Vec<f32>> {
        identity_decode(Compression::Identity, bytes, elements)
    }
}

/// LZ4 over the raw bytes, size-prepended.
#[cfg(feature = "compression")]
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Codec;

#[cfg(feature = "compression")]
impl Codec for Lz4Codec {
    fn kind(&self) -> Compression {
        Compression::Lz4
    }

    fn encode(&self, tensor: &Tensor) -> Result<Vec<u8>> {
        if tensor.is_empty() {
            return Ok(Vec::new());
        }
        Ok(lz4_flex::compress_prepend_size(bytemuck::cast_slice(
            tensor.data(),
        )))
    }

    fn decode(&self, bytes: &[u8], elements: usize) -> Result<Vec<f32>> {
        if bytes.is_empty() {
            return identity_decode(Compression::Lz4, bytes, elements);
        }
        let raw = lz4_flex::decompress_size_prepended(bytes)
            .map_err(|e| Error::Codec(format!("LZ4 decompression failed: {e}")))?;
        identity_decode(Compression::Lz4, &raw, elements)
    }
}

/// ZSTD over the raw bytes.
#[cfg(feature = "compression")]
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

#[cfg(feature = "compression")]
impl ZstdCodec {
    /// Codec at a specific compression level.
    #[must_use]
    pub const fn with_level(level: i32) -> Self {
        Self { level }
    }
}

#[cfg(feature = "compression")]
impl Default for ZstdCodec {
    fn default() -> Self {
        Self::with_level(3)
    }
}

#[cfg(feature = "compression")]
impl Codec for ZstdCodec {
    fn kind(&self) -> Compression {
        Compression::Zstd
    }

    fn encode(&self, tensor: &Tensor) -> Result<Vec<u8>> {
        if tensor.is_empty() {
            return Ok(Vec::new());
        }
        zstd::encode_all(bytemuck::cast_slice::<f32, u8>(tensor.data()), self.level)
            .map_err(|e| Error::Codec(format!("ZSTD compression failed: {e}")))
    }

    fn decode(&self, bytes: &[u8], elements: usize) -> Result<Vec<f32>> {
        if bytes.is_empty() {
            return identity_decode(Compression::Zstd, bytes, elements);
        }
        let raw = zstd::decode_all(bytes)
            .map_err(|e| Error::Codec(format!("ZSTD decompression failed: {e}")))?;
        identity_decode(Compression::Zstd, &raw, elements)
    }
}
