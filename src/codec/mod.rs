//! Column Codec Module
//!
//! Turns one column's values into a self-describing byte block and back.
//!
//! ## Block Layout
//! ```text
//! ┌────────────────────────────┬──────────────────────────────────────┐
//! │ Null bitmap                │ Compressed payload                   │
//! │ ceil(rows / 8) bytes       │ compression(codec(non-null values))  │
//! └────────────────────────────┴──────────────────────────────────────┘
//! ```
//!
//! The codec id and compression id are not stored in the block itself; the
//! segment footer records them next to the block's offset, so decode needs
//! no out-of-band configuration.

mod bitmap;
mod compression;
mod stats;
mod values;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use crate::error::{DistribuitoError, Result};
use crate::schema::{Value, ValueType};

pub use bitmap::NullBitmap;
pub use compression::{Compression, Compressor, Lz4Compression, NoCompression};
pub use stats::ColumnStats;
pub use values::{
    DeltaInteger, DictionaryString, NullCodec, PlainBoolean, PlainFloat64, PlainInteger,
    PlainString, ValueCodec,
};

pub(crate) use values::{get_str, put_str};

static NULL: NullCodec = NullCodec;
static PLAIN_INT64: PlainInteger = PlainInteger(ValueType::Int64);
static PLAIN_FLOAT64: PlainFloat64 = PlainFloat64;
static PLAIN_BOOL: PlainBoolean = PlainBoolean;
static PLAIN_STRING: PlainString = PlainString;
static PLAIN_TIMESTAMP: PlainInteger = PlainInteger(ValueType::Timestamp);
static DELTA_INT64: DeltaInteger = DeltaInteger(ValueType::Int64);
static DELTA_TIMESTAMP: DeltaInteger = DeltaInteger(ValueType::Timestamp);
static DICT_STRING: DictionaryString = DictionaryString;

/// Codec identifier stored in the footer
///
/// Ids are a reserved byte space; new variants take new ids so old files stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Codec {
    Null = 0,
    PlainInt64 = 1,
    PlainFloat64 = 2,
    PlainBool = 3,
    PlainString = 4,
    PlainTimestamp = 5,
    DeltaInt64 = 6,
    DeltaTimestamp = 7,
    DictString = 8,
}

impl Codec {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            0 => Codec::Null,
            1 => Codec::PlainInt64,
            2 => Codec::PlainFloat64,
            3 => Codec::PlainBool,
            4 => Codec::PlainString,
            5 => Codec::PlainTimestamp,
            6 => Codec::DeltaInt64,
            7 => Codec::DeltaTimestamp,
            8 => Codec::DictString,
            _ => return None,
        })
    }

    /// Implementation for this codec id
    pub fn implementation(self) -> &'static dyn ValueCodec {
        match self {
            Codec::Null => &NULL,
            Codec::PlainInt64 => &PLAIN_INT64,
            Codec::PlainFloat64 => &PLAIN_FLOAT64,
            Codec::PlainBool => &PLAIN_BOOL,
            Codec::PlainString => &PLAIN_STRING,
            Codec::PlainTimestamp => &PLAIN_TIMESTAMP,
            Codec::DeltaInt64 => &DELTA_INT64,
            Codec::DeltaTimestamp => &DELTA_TIMESTAMP,
            Codec::DictString => &DICT_STRING,
        }
    }

    pub fn value_type(self) -> ValueType {
        self.implementation().value_type()
    }

    /// The plain codec for a value type
    pub fn plain_for(value_type: ValueType) -> Codec {
        match value_type {
            ValueType::Null => Codec::Null,
            ValueType::Int64 => Codec::PlainInt64,
            ValueType::Float64 => Codec::PlainFloat64,
            ValueType::Boolean => Codec::PlainBool,
            ValueType::String => Codec::PlainString,
            ValueType::Timestamp => Codec::PlainTimestamp,
        }
    }
}

/// How the writer picks a codec for each column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingPolicy {
    /// Always the fixed-width / length-prefixed codec
    Plain,
    /// Try delta (integers) or dictionary (strings) and keep the smallest output
    #[default]
    Compact,
}

impl EncodingPolicy {
    /// Codecs to try for `value_type`, plain first
    pub fn candidates(self, value_type: ValueType) -> &'static [Codec] {
        match (self, value_type) {
            (EncodingPolicy::Compact, ValueType::Int64) => {
                &[Codec::PlainInt64, Codec::DeltaInt64]
            }
            (EncodingPolicy::Compact, ValueType::Timestamp) => {
                &[Codec::PlainTimestamp, Codec::DeltaTimestamp]
            }
            (EncodingPolicy::Compact, ValueType::String) => {
                &[Codec::PlainString, Codec::DictString]
            }
            (_, ValueType::Null) => &[Codec::Null],
            (_, ValueType::Int64) => &[Codec::PlainInt64],
            (_, ValueType::Float64) => &[Codec::PlainFloat64],
            (_, ValueType::Boolean) => &[Codec::PlainBool],
            (_, ValueType::String) => &[Codec::PlainString],
            (_, ValueType::Timestamp) => &[Codec::PlainTimestamp],
        }
    }
}

/// One encoded column block plus what the footer needs to describe it
#[derive(Debug, Clone)]
pub struct EncodedColumn {
    /// `[null bitmap][compressed payload]`
    pub block: Vec<u8>,
    pub codec: Codec,
    pub compression: Compression,
    pub stats: ColumnStats,
}

/// Encode a full column (nulls included) declared as `value_type`
pub fn encode_column(
    values: &[Value],
    value_type: ValueType,
    policy: EncodingPolicy,
    compression: Compression,
) -> Result<EncodedColumn> {
    let present: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
    if let Some(bad) = present.iter().find(|v| v.value_type() != value_type) {
        return Err(DistribuitoError::Codec(format!(
            "column declared {} contains a {} value",
            value_type,
            bad.value_type()
        )));
    }

    let mut best: Option<(Codec, BytesMut)> = None;
    for &codec in policy.candidates(value_type) {
        let mut raw = BytesMut::new();
        codec.implementation().encode(&present, &mut raw)?;
        if best.as_ref().map_or(true, |(_, b)| raw.len() < b.len()) {
            best = Some((codec, raw));
        }
    }
    let (codec, raw) = best.ok_or_else(|| {
        DistribuitoError::Codec(format!("no codec available for {}", value_type))
    })?;

    let bitmap = NullBitmap::from_values(values);
    let payload = compression.compress(&raw)?;

    let mut block = Vec::with_capacity(bitmap.as_bytes().len() + payload.len());
    block.extend_from_slice(bitmap.as_bytes());
    block.extend_from_slice(&payload);

    Ok(EncodedColumn {
        block,
        codec,
        compression,
        stats: ColumnStats::compute(value_type, values),
    })
}

/// Decode a block written by [`encode_column`]
pub fn decode_column(
    block: &[u8],
    codec: Codec,
    compression: Compression,
    row_count: usize,
) -> Result<Vec<Value>> {
    let bitmap_len = NullBitmap::byte_len(row_count);
    if block.len() < bitmap_len {
        return Err(DistribuitoError::Codec(format!(
            "block of {} bytes too short for a {}-row null bitmap",
            block.len(),
            row_count
        )));
    }
    let bitmap = NullBitmap::from_bytes(&block[..bitmap_len], row_count)?;
    let raw = compression.decompress(&block[bitmap_len..])?;
    let present = codec
        .implementation()
        .decode(&raw, bitmap.present_count())?;

    let mut present = present.into_iter();
    let mut out = Vec::with_capacity(row_count);
    for i in 0..row_count {
        if bitmap.is_null(i) {
            out.push(Value::Null);
        } else {
            // decode() returned exactly present_count() values
            out.push(present.next().unwrap_or(Value::Null));
        }
    }
    Ok(out)
}
