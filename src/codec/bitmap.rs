//! Null bitmap
//!
//! One bit per row, LSB-first within each byte. A set bit marks a null.

use crate::error::{DistribuitoError, Result};
use crate::schema::Value;

/// Per-row null flags preceding every column block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullBitmap {
    bits: Vec<u8>,
    len: usize,
}

impl NullBitmap {
    /// Number of bytes needed for `len` rows
    pub fn byte_len(len: usize) -> usize {
        len.div_ceil(8)
    }

    pub fn from_values(values: &[Value]) -> Self {
        let mut bits = vec![0u8; Self::byte_len(values.len())];
        for (i, value) in values.iter().enumerate() {
            if value.is_null() {
                bits[i / 8] |= 1 << (i % 8);
            }
        }
        Self {
            bits,
            len: values.len(),
        }
    }

    /// Parse the bitmap of a `len`-row block; `bytes` must be exactly `byte_len(len)` long
    pub fn from_bytes(bytes: &[u8], len: usize) -> Result<Self> {
        if bytes.len() != Self::byte_len(len) {
            return Err(DistribuitoError::Codec(format!(
                "null bitmap for {} rows must be {} bytes, got {}",
                len,
                Self::byte_len(len),
                bytes.len()
            )));
        }
        Ok(Self {
            bits: bytes.to_vec(),
            len,
        })
    }

    pub fn is_null(&self, index: usize) -> bool {
        index < self.len && self.bits[index / 8] & (1 << (index % 8)) != 0
    }

    pub fn null_count(&self) -> usize {
        (0..self.len).filter(|&i| self.is_null(i)).count()
    }

    pub fn present_count(&self) -> usize {
        self.len - self.null_count()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }
}
