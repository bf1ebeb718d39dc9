//! Segment Module
//!
//! Immutable columnar segment files.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ Column Blocks (variable)                                        │
//! │   [null bitmap][compressed payload]   ... one per column ...    │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Footer (variable)                                               │
//! │   RowCount: u64 | ColumnCount: u32                              │
//! │   Entry × ColumnCount:                                          │
//! │     ColumnId u32 | Offset u64 | Length u64 | Codec u8 |         │
//! │     Compression u8 | RowCount u64 | NullCount u64 |             │
//! │     BlockCRC u32 | HasStats u8 | [Min | Max]                    │
//! │   FooterCRC: u32                                                │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Trailer (26 bytes)                                              │
//! │   Magic "DSTOSEG\x01" (8) | Version u16 | FooterOffset u64 |    │
//! │   FooterLength u64                                              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Min/max are typed by the codec's value type: i64 for int64 and
//! timestamp, f64 bits for float64, u32 length + utf8 for strings.

mod handle;
mod reader;
mod writer;

use std::collections::BTreeMap;
use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};

use crate::codec::{get_str, put_str, Codec, ColumnStats, Compression};
use crate::error::{DistribuitoError, Result};
use crate::schema::{ColumnId, Value, ValueType};

pub use handle::{Segment, SegmentHandle, SegmentStats};
pub use reader::SegmentReader;
pub use writer::{write_segment_file, SegmentSink, SegmentSummary, SegmentWriter, WriteOptions};

pub(crate) use writer::sync_parent_dir;

// =============================================================================
// Shared Constants (used by writer, reader)
// =============================================================================

/// Magic bytes identifying a Distribuito segment file
pub(crate) const MAGIC: &[u8; 8] = b"DSTOSEG\x01";

/// Current segment format version
pub const FORMAT_VERSION: u16 = 1;

/// Trailer size: Magic (8) + Version (2) + FooterOffset (8) + FooterLength (8)
pub(crate) const TRAILER_SIZE: u64 = 26;

/// Smallest valid footer: RowCount (8) + ColumnCount (4) + FooterCRC (4)
const MIN_FOOTER_SIZE: u64 = 16;

/// Segment identifier, unique and never reused within a table
pub type SegmentId = u64;

// =============================================================================
// Footer
// =============================================================================

/// Location and description of one column block
#[derive(Debug, Clone, PartialEq)]
pub struct FooterEntry {
    pub column_id: ColumnId,
    pub offset: u64,
    pub length: u64,
    pub codec: Codec,
    pub compression: Compression,
    pub row_count: u64,
    pub null_count: u64,
    pub block_crc: u32,
    pub min: Option<Value>,
    pub max: Option<Value>,
}

impl FooterEntry {
    pub fn stats(&self) -> ColumnStats {
        ColumnStats {
            min: self.min.clone(),
            max: self.max.clone(),
            null_count: self.null_count,
            row_count: self.row_count,
        }
    }
}

/// Parsed footer index of a segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentFooter {
    pub row_count: u64,
    pub entries: BTreeMap<ColumnId, FooterEntry>,
}

impl SegmentFooter {
    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        let mut out = BytesMut::new();
        out.put_u64_le(self.row_count);
        out.put_u32_le(self.entries.len() as u32);

        for entry in self.entries.values() {
            out.put_u32_le(entry.column_id.0);
            out.put_u64_le(entry.offset);
            out.put_u64_le(entry.length);
            out.put_u8(entry.codec.id());
            out.put_u8(entry.compression.id());
            out.put_u64_le(entry.row_count);
            out.put_u64_le(entry.null_count);
            out.put_u32_le(entry.block_crc);
            match (&entry.min, &entry.max) {
                (Some(min), Some(max)) => {
                    out.put_u8(1);
                    put_stat(&mut out, min)?;
                    put_stat(&mut out, max)?;
                }
                _ => out.put_u8(0),
            }
        }

        let crc = crc32fast::hash(&out);
        out.put_u32_le(crc);
        Ok(out.to_vec())
    }

    /// Parse footer bytes; `blocks_end` is the footer's own offset, which no block may cross
    pub(crate) fn decode(bytes: &[u8], blocks_end: u64, path: &Path) -> Result<Self> {
        let corrupt = |reason: String| DistribuitoError::corrupt(path, reason);

        if (bytes.len() as u64) < MIN_FOOTER_SIZE {
            return Err(corrupt(format!("footer of {} bytes is truncated", bytes.len())));
        }
        let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if crc32fast::hash(body) != stored_crc {
            return Err(corrupt("footer checksum mismatch".to_string()));
        }

        let mut buf = body;
        let row_count = buf.get_u64_le();
        let column_count = buf.get_u32_le();
        let mut entries = BTreeMap::new();

        for _ in 0..column_count {
            // Fixed part: 4 + 8 + 8 + 1 + 1 + 8 + 8 + 4 + 1
            if buf.remaining() < 43 {
                return Err(corrupt("footer entry is truncated".to_string()));
            }
            let column_id = ColumnId(buf.get_u32_le());
            let offset = buf.get_u64_le();
            let length = buf.get_u64_le();
            let codec_id = buf.get_u8();
            let compression_id = buf.get_u8();
            let entry_rows = buf.get_u64_le();
            let null_count = buf.get_u64_le();
            let block_crc = buf.get_u32_le();
            let has_stats = buf.get_u8();

            let codec = Codec::from_id(codec_id)
                .ok_or_else(|| corrupt(format!("unknown codec id {}", codec_id)))?;
            let compression = Compression::from_id(compression_id)
                .ok_or_else(|| corrupt(format!("unknown compression id {}", compression_id)))?;

            let (min, max) = match has_stats {
                0 => (None, None),
                1 => {
                    let value_type = codec.value_type();
                    let min = get_stat(&mut buf, value_type).map_err(|e| corrupt(e.to_string()))?;
                    let max = get_stat(&mut buf, value_type).map_err(|e| corrupt(e.to_string()))?;
                    (Some(min), Some(max))
                }
                other => return Err(corrupt(format!("invalid has_stats flag {}", other))),
            };

            if entry_rows != row_count {
                return Err(corrupt(format!(
                    "column {} has {} rows, segment has {}",
                    column_id, entry_rows, row_count
                )));
            }
            if null_count > row_count {
                return Err(corrupt(format!(
                    "column {} reports {} nulls in {} rows",
                    column_id, null_count, row_count
                )));
            }
            if offset.checked_add(length).map_or(true, |end| end > blocks_end) {
                return Err(corrupt(format!(
                    "column {} block [{}, +{}) overruns the block region",
                    column_id, offset, length
                )));
            }

            let entry = FooterEntry {
                column_id,
                offset,
                length,
                codec,
                compression,
                row_count: entry_rows,
                null_count,
                block_crc,
                min,
                max,
            };
            if entries.insert(column_id, entry).is_some() {
                return Err(corrupt(format!("column {} listed twice", column_id)));
            }
        }

        if buf.has_remaining() {
            return Err(corrupt(format!(
                "{} unexpected bytes after footer entries",
                buf.remaining()
            )));
        }

        Ok(Self { row_count, entries })
    }
}

// =============================================================================
// Trailer
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Trailer {
    pub footer_offset: u64,
    pub footer_length: u64,
}

impl Trailer {
    pub(crate) fn encode(&self) -> [u8; TRAILER_SIZE as usize] {
        let mut out = [0u8; TRAILER_SIZE as usize];
        out[0..8].copy_from_slice(MAGIC);
        out[8..10].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        out[10..18].copy_from_slice(&self.footer_offset.to_le_bytes());
        out[18..26].copy_from_slice(&self.footer_length.to_le_bytes());
        out
    }

    pub(crate) fn decode(bytes: &[u8; TRAILER_SIZE as usize], path: &Path) -> Result<Self> {
        if &bytes[0..8] != MAGIC {
            return Err(DistribuitoError::corrupt(
                path,
                format!("invalid segment magic {:?}", &bytes[0..8]),
            ));
        }
        let version = u16::from_le_bytes([bytes[8], bytes[9]]);
        if version != FORMAT_VERSION {
            return Err(DistribuitoError::corrupt(
                path,
                format!("unsupported segment format version {}", version),
            ));
        }
        let mut rest = &bytes[10..];
        Ok(Self {
            footer_offset: rest.get_u64_le(),
            footer_length: rest.get_u64_le(),
        })
    }
}

// =============================================================================
// Typed statistic values
// =============================================================================

fn put_stat(out: &mut BytesMut, value: &Value) -> Result<()> {
    match value {
        Value::Int64(v) | Value::Timestamp(v) => out.put_i64_le(*v),
        Value::Float64(v) => out.put_u64_le(v.to_bits()),
        Value::String(s) => put_str(out, s),
        other => {
            return Err(DistribuitoError::Codec(format!(
                "{} values carry no statistics",
                other.value_type()
            )))
        }
    }
    Ok(())
}

fn get_stat(buf: &mut &[u8], value_type: ValueType) -> Result<Value> {
    match value_type {
        ValueType::Int64 | ValueType::Timestamp | ValueType::Float64 => {
            if buf.remaining() < 8 {
                return Err(DistribuitoError::Codec("statistic value is truncated".to_string()));
            }
            let raw = buf.get_i64_le();
            Ok(match value_type {
                ValueType::Int64 => Value::Int64(raw),
                ValueType::Timestamp => Value::Timestamp(raw),
                _ => Value::Float64(f64::from_bits(raw as u64)),
            })
        }
        ValueType::String => get_str(buf).map(Value::String),
        other => Err(DistribuitoError::Codec(format!(
            "{} columns carry no statistics",
            other
        ))),
    }
}
