//! Codec Registry - pluggable tensor compression
//!
//! Every cached artifact is encoded by exactly one codec and the codec kind is
//! recorded in its metadata, so decode always uses the codec that produced the
//! bytes.
//!
//! | Kind       | Loss                      | Bytes/elem |
//! |------------|---------------------------|------------|
//! | `none`     | exact                     | 4          |
//! | `float16`  | ~3 significant digits     | 2          |
//! | `int8`     | ≤ scale/2 absolute        | 1 (+4)     |
//! | `lz4`      | exact                     | varies     |
//! | `zstd`     | exact                     | varies     |
//! | `bfloat16` | low 16 mantissa bits lost | 2          |
//!
//! # Example
//!
//! ```rust
//! use trueno_cache::codec::{CodecRegistry, Compression};
//! use trueno_cache::tensor::{ElementType, Tensor};
//!
//! # fn main() -> trueno_cache::Result<()> {
//! let registry = CodecRegistry::new();
//! let tensor = Tensor::new(vec![2, 2], vec![1.0, -2.0, 3.5, 0.25])?;
//!
//! let encoded = registry.encode(Compression::Float16, &tensor);
//! assert_eq!(encoded.compression, Compression::Float16);
//!
//! let decoded = registry.decode(
//!     encoded.compression,
//!     &encoded.bytes,
//!     tensor.shape(),
//!     ElementType::Float32,
//! )?;
//! assert_eq!(decoded.shape(), &[2, 2]);
//! # Ok(())
//! # }
//! ```

pub mod half;
mod lossless;
mod lossy;

pub use lossless::IdentityCodec;
#[cfg(feature = "compression")]
pub use lossless::{Lz4Codec, ZstdCodec};
pub use lossy::{BFloat16Codec, Float16Codec, Int8Codec};

use crate::tensor::{element_count, ElementType, Tensor};
use crate::{Error, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Compression kind recorded alongside every stored artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Compression {
    /// Raw native bytes
    #[default]
    Identity,
    /// IEEE binary16
    Float16,
    /// Per-tensor symmetric int8 quantization
    Int8,
    /// LZ4 block compression of the raw bytes
    Lz4,
    /// High 16 bits of each f32
    BFloat16,
    /// ZSTD block compression of the raw bytes
    Zstd,
}

impl Compression {
    /// All kinds, in wire-id order.
    pub const ALL: [Self; 6] = [
        Self::Identity,
        Self::Float16,
        Self::Int8,
        Self::Lz4,
        Self::BFloat16,
        Self::Zstd,
    ];

    /// Get codec name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "none",
            Self::Float16 => "float16",
            Self::Int8 => "int8",
            Self::Lz4 => "lz4",
            Self::BFloat16 => "bfloat16",
            Self::Zstd => "zstd",
        }
    }

    /// Whether decode reproduces the input bit for bit.
    #[must_use]
    pub const fn is_lossless(&self) -> bool {
        matches!(self, Self::Identity | Self::Lz4 | Self::Zstd)
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" | "identity" => Ok(Self::Identity),
            "float16" | "fp16" => Ok(Self::Float16),
            "int8" => Ok(Self::Int8),
            "lz4" => Ok(Self::Lz4),
            "bfloat16" | "bf16" => Ok(Self::BFloat16),
            "zstd" => Ok(Self::Zstd),
            other => Err(Error::UnsupportedCompression(other.to_string())),
        }
    }
}

/// A named compress/decompress pair.
pub trait Codec: Send + Sync {
    /// Kind this codec implements.
    fn kind(&self) -> Compression;

    /// Encode the tensor's elements.
    ///
    /// # Errors
    /// Returns error if the underlying compressor fails.
    fn encode(&self, tensor: &Tensor) -> Result<Vec<u8>>;

    /// Decode `elements` values from `bytes`.
    ///
    /// # Errors
    /// Returns `Codec` if the payload is malformed.
    fn decode(&self, bytes: &[u8], elements: usize) -> Result<Vec<f32>>;
}

/// Bytes produced by [`CodecRegistry::encode`] and the codec that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    /// Encoded payload
    pub bytes: Vec<u8>,
    /// Codec actually used (may differ from the request after fallback)
    pub compression: Compression,
}

/// Registry of available codecs keyed by kind.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: FxHashMap<Compression, Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// Registry with every codec compiled into this build.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(IdentityCodec));
        registry.register(Arc::new(Float16Codec));
        registry.register(Arc::new(Int8Codec));
        registry.register(Arc::new(BFloat16Codec));
        #[cfg(feature = "compression")]
        {
            registry.register(Arc::new(Lz4Codec));
            registry.register(Arc::new(ZstdCodec::default()));
        }
        registry
    }

    /// Registry holding only the identity codec.
    #[must_use]
    pub fn empty() -> Self {
        let mut codecs: FxHashMap<Compression, Arc<dyn Codec>> = FxHashMap::default();
        codecs.insert(Compression::Identity, Arc::new(IdentityCodec));
        Self { codecs }
    }

    /// Register (or replace) a codec.
    pub fn register(&mut self, codec: Arc<dyn Codec>) {
        self.codecs.insert(codec.kind(), codec);
    }

    /// Whether a codec for `kind` is available.
    #[must_use]
    pub fn supports(&self, kind: Compression) -> bool {
        self.codecs.contains_key(&kind)
    }

    /// Kinds currently registered.
    #[must_use]
    pub fn kinds(&self) -> Vec<Compression> {
        Compression::ALL
            .into_iter()
            .filter(|k| self.supports(*k))
            .collect()
    }

    /// Encode with `kind`, falling back to identity if it is unavailable.
    ///
    /// Never fails: a missing or failing codec degrades to raw bytes.
    #[must_use]
    pub fn encode(&self, kind: Compression, tensor: &Tensor) -> Encoded {
        if let Some(codec) = self.codecs.get(&kind) {
            match codec.encode(tensor) {
                Ok(bytes) => {
                    return Encoded {
                        bytes,
                        compression: kind,
                    }
                }
                Err(e) => {
                    tracing::warn!(codec = %kind, error = %e, "encode failed, storing raw bytes");
                }
            }
        } else {
            tracing::debug!(codec = %kind, "codec not registered, storing raw bytes");
        }
        Encoded {
            bytes: lossless::identity_bytes(tensor.data()),
            compression: Compression::Identity,
        }
    }

    /// Decode bytes produced by `kind` into a tensor of `shape`.
    ///
    /// # Errors
    /// - `UnsupportedCompression` if `kind` is not registered
    /// - `Codec` if the payload does not match the shape
    pub fn decode(
        &self,
        kind: Compression,
        bytes: &[u8],
        shape: &[usize],
        dtype: ElementType,
    ) -> Result<Tensor> {
        let codec = self
            .codecs
            .get(&kind)
            .ok_or_else(|| Error::UnsupportedCompression(kind.as_str().to_string()))?;
        debug_assert_eq!(dtype, ElementType::Float32);
        let elements = element_count(shape)?;
        let data = codec.decode(bytes, elements)?;
        Tensor::new(shape.to_vec(), data)
    }

    /// Decode using a codec given by wire name.
    ///
    /// # Errors
    /// Returns `UnsupportedCompression` for unknown names.
    pub fn decode_named(
        &self,
        name: &str,
        bytes: &[u8],
        shape: &[usize],
        dtype: ElementType,
    ) -> Result<Tensor> {
        let kind = name.parse::<Compression>()?;
        self.decode(kind, bytes, shape, dtype)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Check that a fixed-width payload holds exactly `elements` values.
pub(crate) fn expect_len(codec: Compression, bytes: &[u8], expected: usize) -> Result<()> {
    if bytes.len() == expected {
        Ok(())
    } else {
        Err(Error::Codec(format!(
            "{codec} payload is {} bytes, expected {expected}",
            bytes.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Tensor {
        Tensor::new(vec![2, 3], vec![0.5, -1.25, 3.0, 100.0, -0.001, 0.0]).unwrap()
    }

    #[test]
    fn test_compression_as_str() {
        assert_eq!(Compression::Identity.as_str(), "none");
        assert_eq!(Compression::Float16.as_str(), "float16");
        assert_eq!(Compression::Int8.as_str(), "int8");
        assert_eq!(Compression::Lz4.as_str(), "lz4");
        assert_eq!(Compression::BFloat16.as_str(), "bfloat16");
        assert_eq!(Compression::Zstd.as_str(), "zstd");
    }

    #[test]
    fn test_compression_parse() {
        for kind in Compression::ALL {
            assert_eq!(kind.as_str().parse::<Compression>().unwrap(), kind);
        }
        let err = "snappy".parse::<Compression>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedCompression(_)));
    }

    #[test]
    fn test_compression_default() {
        assert_eq!(Compression::default(), Compression::Identity);
    }

    #[test]
    fn test_identity_exact() {
        let registry = CodecRegistry::new();
        let t = sample();
        let enc = registry.encode(Compression::Identity, &t);
        assert_eq!(enc.bytes.len(), t.nbytes());
        let dec = registry
            .decode(enc.compression, &enc.bytes, t.shape(), ElementType::Float32)
            .unwrap();
        assert_eq!(dec, t);
    }

    #[test]
    fn test_unregistered_kind_falls_back_on_encode() {
        let registry = CodecRegistry::empty();
        let t = sample();
        let enc = registry.encode(Compression::Int8, &t);
        assert_eq!(enc.compression, Compression::Identity);
        assert_eq!(enc.bytes.len(), t.nbytes());
    }

    #[test]
    fn test_unregistered_kind_fails_on_decode() {
        let registry = CodecRegistry::empty();
        let err = registry
            .decode(Compression::Int8, &[0; 10], &[6], ElementType::Float32)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedCompression(ref k) if k == "int8"));
    }

    #[test]
    fn test_decode_named_unknown() {
        let registry = CodecRegistry::new();
        let err = registry
            .decode_named("brotli", &[], &[0], ElementType::Float32)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedCompression(_)));
    }

    #[test]
    fn test_decode_length_mismatch() {
        let registry = CodecRegistry::new();
        let err = registry
            .decode(Compression::Identity, &[0; 7], &[2], ElementType::Float32)
            .unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn test_registry_kinds() {
        let registry = CodecRegistry::new();
        assert!(registry.supports(Compression::Float16));
        assert!(registry.supports(Compression::BFloat16));
        #[cfg(feature = "compression")]
        assert_eq!(registry.kinds().len(), 6);
        #[cfg(not(feature = "compression"))]
        assert_eq!(registry.kinds().len(), 4);
    }

    #[test]
    fn test_int8_payload_size() {
        let registry = CodecRegistry::new();
        let t = sample();
        let enc = registry.encode(Compression::Int8, &t);
        assert_eq!(enc.bytes.len(), 4 + t.len());
    }

    #[test]
    fn test_half_payload_size() {
        let registry = CodecRegistry::new();
        let t = sample();
        assert_eq!(registry.encode(Compression::Float16, &t).bytes.len(), 2 * t.len());
        assert_eq!(registry.encode(Compression::BFloat16, &t).bytes.len(), 2 * t.len());
    }
}
