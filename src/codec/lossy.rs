//! Lossy codecs: float16, int8 and bfloat16.

use super::half::{f16_bits_to_f32, f32_to_f16_bits};
use super::{expect_len, Codec, Compression};
use crate::tensor::Tensor;
use crate::{Error, Result};

/// IEEE binary16, two little-endian bytes per element.
#[derive(Debug, Clone, Copy, Default)]
pub struct Float16Codec;

impl Codec for Float16Codec {
    fn kind(&self) -> Compression {
        Compression::Float16
    }

    fn encode(&self, tensor: &Tensor) -> Result<Vec<u8>> {
        Ok(tensor
            .data()
            .iter()
            .flat_map(|&x| f32_to_f16_bits(x).to_le_bytes())
            .collect())
    }

    fn decode(&self, bytes: &[u8], elements: usize) -> Result<Vec<f32>> {
        expect_len(Compression::Float16, bytes, elements * 2)?;
        Ok(bytes
            .chunks_exact(2)
            .map(|c| f16_bits_to_f32(u16::from_le_bytes([c[0], c[1]])))
            .collect())
    }
}

/// Symmetric per-tensor int8 quantization.
///
/// Layout: `scale: f32 LE` followed by one `i8` per element, where
/// `scale = max|x| / 127` (1.0 for an all-zero tensor) and
/// `q = clamp(round(x / scale), -127, 127)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Int8Codec;

impl Int8Codec {
    /// Quantization step for `tensor`.
    #[must_use]
    pub fn scale_for(tensor: &Tensor) -> f32 {
        let max = tensor.max_abs();
        if max > 0.0 && max.is_finite() {
            max / 127.0
        } else {
            1.0
        }
    }
}

impl Codec for Int8Codec {
    fn kind(&self) -> Compression {
        Compression::Int8
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode(&self, tensor: &Tensor) -> Result<Vec<u8>> {
        let scale = Self::scale_for(tensor);
        let mut out = Vec::with_capacity(4 + tensor.len());
        out.extend_from_slice(&scale.to_le_bytes());
        out.extend(tensor.data().iter().map(|&x| {
            let q = (x / scale).round().clamp(-127.0, 127.0) as i8;
            q.to_le_bytes()[0]
        }));
        Ok(out)
    }

    fn decode(&self, bytes: &[u8], elements: usize) -> Result<Vec<f32>> {
        if bytes.len() < 4 {
            return Err(Error::Codec(format!(
                "int8 payload is {} bytes, missing scale",
                bytes.len()
            )));
        }
        let (head, body) = bytes.split_at(4);
        expect_len(Compression::Int8, body, elements)?;
        let scale = f32::from_le_bytes([head[0], head[1], head[2], head[3]]);
        Ok(body
            .iter()
            .map(|&b| f32::from(i8::from_le_bytes([b])) * scale)
            .collect())
    }
}

/// High 16 bits of each element, two little-endian bytes per element.
#[derive(Debug, Clone, Copy, Default)]
pub struct BFloat16Codec;

impl Codec for BFloat16Codec {
    fn kind(&self) -> Compression {
        Compression::BFloat16
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode(&self, tensor: &Tensor) -> Result<Vec<u8>> {
        Ok(tensor
            .data()
            .iter()
            .flat_map(|&x| ((x.to_bits() >> 16) as u16).to_le_bytes())
            .collect())
    }

    fn decode(&self, bytes: &[u8], elements: usize) -> Result<Vec<f32>> {
        expect_len(Compression::BFloat16, bytes, elements * 2)?;
        Ok(bytes
            .chunks_exact(2)
            .map(|c| f32::from_bits(u32::from(u16::from_le_bytes([c[0], c[1]])) << 16))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float16_relative_error() {
        let t = Tensor::from_vec(vec![0.1, -3.14159, 1234.5, 0.000_123, -65000.0]);
        let bytes = Float16Codec.encode(&t).unwrap();
        let back = Float16Codec.decode(&bytes, t.len()).unwrap();
        for (a, b) in t.data().iter().zip(&back) {
            assert!(((a - b) / a).abs() <= 1.0 / 1024.0, "{a} -> {b}");
        }
    }

    #[test]
    fn test_int8_error_bound() {
        let t = Tensor::from_vec(vec![0.0, 1.0, -2.5, 3.3, -12.7, 0.05]);
        let scale = Int8Codec::scale_for(&t);
        let bytes = Int8Codec.encode(&t).unwrap();
        let back = Int8Codec.decode(&bytes, t.len()).unwrap();
        for (a, b) in t.data().iter().zip(&back) {
            assert!((a - b).abs() <= scale / 2.0 + 1e-6, "{a} -> {b}");
        }
    }

    #[test]
    fn test_int8_extremes_map_to_127() {
        let t = Tensor::from_vec(vec![-4.0, 4.0]);
        let bytes = Int8Codec.encode(&t).unwrap();
        assert_eq!(i8::from_le_bytes([bytes[4]]), -127);
        assert_eq!(i8::from_le_bytes([bytes[5]]), 127);
    }

    #[test]
    fn test_int8_all_zero_uses_unit_scale() {
        let t = Tensor::from_vec(vec![0.0; 8]);
        let bytes = Int8Codec.encode(&t).unwrap();
        assert_eq!(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 1.0);
        assert_eq!(Int8Codec.decode(&bytes, 8).unwrap(), vec![0.0; 8]);
    }

    #[test]
    fn test_int8_truncated_payload() {
        assert!(Int8Codec.decode(&[0, 0], 0).is_err());
        assert!(Int8Codec.decode(&[0, 0, 128, 63, 1], 2).is_err());
    }

    #[test]
    fn test_bfloat16_truncates_mantissa() {
        let x = 1.0_f32 + 2.0_f32.powi(-10);
        let t = Tensor::from_vec(vec![x, -2.0]);
        let bytes = BFloat16Codec.encode(&t).unwrap();
        let back = BFloat16Codec.decode(&bytes, 2).unwrap();
        assert_eq!(back, vec![1.0, -2.0]);
    }

    #[test]
    fn test_bfloat16_relative_error() {
        let t = Tensor::from_vec(vec![0.3, -7.77, 1.0e20, -1.0e-20]);
        let bytes = BFloat16Codec.encode(&t).unwrap();
        let back = BFloat16Codec.decode(&bytes, t.len()).unwrap();
        for (a, b) in t.data().iter().zip(&back) {
            assert!(((a - b) / a).abs() < 1.0 / 128.0);
        }
    }
}
