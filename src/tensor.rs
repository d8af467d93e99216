//! Dense tensor payloads stored by the cache.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Element type of a cached tensor.
///
/// Lossy codecs (half precision, int8, bfloat16) are defined over 32-bit
/// floats, so `Float32` is the only storage element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[non_exhaustive]
pub enum ElementType {
    /// IEEE-754 binary32
    #[default]
    Float32,
}

impl ElementType {
    /// Wire name used in metadata and disk headers.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Float32 => "float32",
        }
    }

    /// Width of one element in bytes.
    #[must_use]
    pub const fn size_bytes(&self) -> usize {
        match self {
            Self::Float32 => 4,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "float32" | "f32" => Ok(Self::Float32),
            other => Err(Error::InvalidInput(format!("unknown element type: {other}"))),
        }
    }
}

/// Row-major dense tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    dtype: ElementType,
    data: Vec<f32>,
}

impl Tensor {
    /// Create a tensor, validating that `data` fills `shape` exactly.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the element count disagrees with the shape.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected = element_count(&shape)?;
        if expected != data.len() {
            return Err(Error::InvalidInput(format!(
                "shape {shape:?} needs {expected} elements, got {}",
                data.len()
            )));
        }
        Ok(Self {
            shape,
            dtype: ElementType::Float32,
            data,
        })
    }

    /// One-dimensional tensor over `data`.
    #[must_use]
    pub fn from_vec(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            dtype: ElementType::Float32,
            data,
        }
    }

    /// Zero-filled tensor.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the shape overflows `usize`.
    pub fn zeros(shape: Vec<usize>) -> Result<Self> {
        let n = element_count(&shape)?;
        Self::new(shape, vec![0.0; n])
    }

    /// Tensor dimensions.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Element type.
    #[must_use]
    pub const fn dtype(&self) -> ElementType {
        self.dtype
    }

    /// Flat element view.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Consume the tensor, returning its flat elements.
    #[must_use]
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the tensor holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size of the uncompressed native representation.
    #[must_use]
    pub fn nbytes(&self) -> usize {
        self.data.len() * self.dtype.size_bytes()
    }

    /// Largest absolute element, 0 for an empty tensor.
    #[must_use]
    pub fn max_abs(&self) -> f32 {
        self.data.iter().fold(0.0_f32, |acc, x| acc.max(x.abs()))
    }
}

/// Product of the dimensions, checked for overflow.
///
/// # Errors
/// Returns `InvalidInput` on overflow.
pub fn element_count(shape: &[usize]) -> Result<usize> {
    shape.iter().try_fold(1_usize, |acc, &d| {
        acc.checked_mul(d)
            .ok_or_else(|| Error::InvalidInput(format!("shape {shape:?} overflows usize")))
    })
}
