//! Compression stage wrapped around encoded payloads

use serde::{Deserialize, Serialize};

use crate::error::{DistribuitoError, Result};

/// Compression applied to a column payload, recorded per block in the footer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Compression {
    None = 0,
    #[default]
    Lz4 = 1,
}

impl Compression {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Compression::None),
            1 => Some(Compression::Lz4),
            _ => None,
        }
    }

    /// Implementation for this variant
    pub fn compressor(self) -> &'static dyn Compressor {
        match self {
            Compression::None => &NoCompression,
            Compression::Lz4 => &Lz4Compression,
        }
    }

    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>> {
        self.compressor().compress(data)
    }

    pub fn decompress(self, data: &[u8]) -> Result<Vec<u8>> {
        self.compressor().decompress(data)
    }
}

/// A byte-level compressor
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Identity transform
pub struct NoCompression;

impl Compressor for NoCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// LZ4 block format with the uncompressed size prepended
pub struct Lz4Compression;

impl Compressor for Lz4Compression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(lz4_flex::compress_prepend_size(data))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4_flex::decompress_size_prepended(data)
            .map_err(|e| DistribuitoError::Compression(e.to_string()))
    }
}
