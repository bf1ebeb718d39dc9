//! Value codecs
//!
//! Each codec encodes only the NON-NULL values of a column, in row order.
//! Nulls are carried by the block's null bitmap.
//!
//! | id | codec            | layout                                          |
//! |----|------------------|-------------------------------------------------|
//! | 0  | null             | empty                                           |
//! | 1  | plain_int64      | i64 LE per value                                |
//! | 2  | plain_float64    | f64 LE per value                                |
//! | 3  | plain_bool       | u8 (0/1) per value                              |
//! | 4  | plain_string     | u32 len + utf8 per value                        |
//! | 5  | plain_timestamp  | i64 LE per value                                |
//! | 6  | delta_int64      | first i64 LE, then zigzag varint deltas         |
//! | 7  | delta_timestamp  | same as delta_int64                             |
//! | 8  | dict_string      | u32 n + n × (u32 len + utf8) + varint code each |

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{DistribuitoError, Result};
use crate::schema::{Value, ValueType};

/// Encodes and decodes the non-null values of one column
pub trait ValueCodec: Send + Sync {
    /// Type every value handled by this codec must have
    fn value_type(&self) -> ValueType;

    fn encode(&self, values: &[&Value], out: &mut BytesMut) -> Result<()>;

    /// Decode exactly `count` values; trailing bytes are an error
    fn decode(&self, data: &[u8], count: usize) -> Result<Vec<Value>>;
}

// =============================================================================
// Null
// =============================================================================

pub struct NullCodec;

impl ValueCodec for NullCodec {
    fn value_type(&self) -> ValueType {
        ValueType::Null
    }

    fn encode(&self, values: &[&Value], _out: &mut BytesMut) -> Result<()> {
        match values.first() {
            None => Ok(()),
            Some(v) => Err(mismatch(ValueType::Null, v)),
        }
    }

    fn decode(&self, data: &[u8], count: usize) -> Result<Vec<Value>> {
        if count != 0 || !data.is_empty() {
            return Err(DistribuitoError::Codec(format!(
                "null column cannot hold {} values ({} payload bytes)",
                count,
                data.len()
            )));
        }
        Ok(Vec::new())
    }
}

// =============================================================================
// Plain fixed-width
// =============================================================================

/// Fixed 8-byte integers; used for both int64 and timestamp columns
pub struct PlainInteger(pub ValueType);

impl ValueCodec for PlainInteger {
    fn value_type(&self) -> ValueType {
        self.0
    }

    fn encode(&self, values: &[&Value], out: &mut BytesMut) -> Result<()> {
        out.reserve(values.len() * 8);
        for v in values {
            out.put_i64_le(integer_of(self.0, v)?);
        }
        Ok(())
    }

    fn decode(&self, mut data: &[u8], count: usize) -> Result<Vec<Value>> {
        ensure_exact(data.len(), count * 8, "plain integer")?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(make_integer(self.0, data.get_i64_le()));
        }
        Ok(out)
    }
}

pub struct PlainFloat64;

impl ValueCodec for PlainFloat64 {
    fn value_type(&self) -> ValueType {
        ValueType::Float64
    }

    fn encode(&self, values: &[&Value], out: &mut BytesMut) -> Result<()> {
        out.reserve(values.len() * 8);
        for v in values {
            match v {
                Value::Float64(f) => out.put_u64_le(f.to_bits()),
                other => return Err(mismatch(ValueType::Float64, other)),
            }
        }
        Ok(())
    }

    fn decode(&self, mut data: &[u8], count: usize) -> Result<Vec<Value>> {
        ensure_exact(data.len(), count * 8, "plain float64")?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(Value::Float64(f64::from_bits(data.get_u64_le())));
        }
        Ok(out)
    }
}

pub struct PlainBoolean;

impl ValueCodec for PlainBoolean {
    fn value_type(&self) -> ValueType {
        ValueType::Boolean
    }

    fn encode(&self, values: &[&Value], out: &mut BytesMut) -> Result<()> {
        out.reserve(values.len());
        for v in values {
            match v {
                Value::Boolean(b) => out.put_u8(*b as u8),
                other => return Err(mismatch(ValueType::Boolean, other)),
            }
        }
        Ok(())
    }

    fn decode(&self, data: &[u8], count: usize) -> Result<Vec<Value>> {
        ensure_exact(data.len(), count, "plain boolean")?;
        data.iter()
            .map(|b| match b {
                0 => Ok(Value::Boolean(false)),
                1 => Ok(Value::Boolean(true)),
                other => Err(DistribuitoError::Codec(format!(
                    "invalid boolean byte 0x{:02x}",
                    other
                ))),
            })
            .collect()
    }
}

// =============================================================================
// Length-prefixed strings
// =============================================================================

pub struct PlainString;

impl ValueCodec for PlainString {
    fn value_type(&self) -> ValueType {
        ValueType::String
    }

    fn encode(&self, values: &[&Value], out: &mut BytesMut) -> Result<()> {
        for v in values {
            put_str(out, string_of(v)?);
        }
        Ok(())
    }

    fn decode(&self, mut data: &[u8], count: usize) -> Result<Vec<Value>> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(Value::String(get_str(&mut data)?));
        }
        ensure_exact(data.len(), 0, "plain string trailer")?;
        Ok(out)
    }
}

// =============================================================================
// Delta integers
// =============================================================================

/// First value verbatim, then zigzag-varint deltas (wrapping arithmetic)
pub struct DeltaInteger(pub ValueType);

impl ValueCodec for DeltaInteger {
    fn value_type(&self) -> ValueType {
        self.0
    }

    fn encode(&self, values: &[&Value], out: &mut BytesMut) -> Result<()> {
        let mut prev: Option<i64> = None;
        for v in values {
            let x = integer_of(self.0, v)?;
            match prev {
                None => out.put_i64_le(x),
                Some(p) => put_uvarint(out, zigzag(x.wrapping_sub(p))),
            }
            prev = Some(x);
        }
        Ok(())
    }

    fn decode(&self, mut data: &[u8], count: usize) -> Result<Vec<Value>> {
        let mut out = Vec::with_capacity(count);
        if count == 0 {
            ensure_exact(data.len(), 0, "delta integer")?;
            return Ok(out);
        }
        if data.remaining() < 8 {
            return Err(truncated("delta integer base"));
        }
        let mut prev = data.get_i64_le();
        out.push(make_integer(self.0, prev));
        for _ in 1..count {
            prev = prev.wrapping_add(unzigzag(get_uvarint(&mut data)?));
            out.push(make_integer(self.0, prev));
        }
        ensure_exact(data.len(), 0, "delta integer trailer")?;
        Ok(out)
    }
}

// =============================================================================
// Dictionary strings
// =============================================================================

pub struct DictionaryString;

impl ValueCodec for DictionaryString {
    fn value_type(&self) -> ValueType {
        ValueType::String
    }

    fn encode(&self, values: &[&Value], out: &mut BytesMut) -> Result<()> {
        let mut dict: Vec<&str> = Vec::new();
        let mut positions: std::collections::HashMap<&str, u64> = std::collections::HashMap::new();
        let mut codes = Vec::with_capacity(values.len());
        for v in values {
            let s = string_of(v)?;
            let code = *positions.entry(s).or_insert_with(|| {
                dict.push(s);
                (dict.len() - 1) as u64
            });
            codes.push(code);
        }

        out.put_u32_le(dict.len() as u32);
        for entry in &dict {
            put_str(out, entry);
        }
        for code in codes {
            put_uvarint(out, code);
        }
        Ok(())
    }

    fn decode(&self, mut data: &[u8], count: usize) -> Result<Vec<Value>> {
        if data.remaining() < 4 {
            return Err(truncated("dictionary length"));
        }
        let dict_len = data.get_u32_le() as usize;
        let mut dict = Vec::with_capacity(dict_len.min(count));
        for _ in 0..dict_len {
            dict.push(get_str(&mut data)?);
        }

        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let code = get_uvarint(&mut data)? as usize;
            let entry = dict.get(code).ok_or_else(|| {
                DistribuitoError::Codec(format!(
                    "dictionary code {} out of range ({} entries)",
                    code, dict_len
                ))
            })?;
            out.push(Value::String(entry.clone()));
        }
        ensure_exact(data.len(), 0, "dictionary trailer")?;
        Ok(out)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn integer_of(expected: ValueType, v: &Value) -> Result<i64> {
    match (expected, v) {
        (ValueType::Int64, Value::Int64(x)) => Ok(*x),
        (ValueType::Timestamp, Value::Timestamp(x)) => Ok(*x),
        (_, other) => Err(mismatch(expected, other)),
    }
}

fn make_integer(value_type: ValueType, x: i64) -> Value {
    match value_type {
        ValueType::Timestamp => Value::Timestamp(x),
        _ => Value::Int64(x),
    }
}

fn string_of(v: &Value) -> Result<&str> {
    match v {
        Value::String(s) => Ok(s.as_str()),
        other => Err(mismatch(ValueType::String, other)),
    }
}

pub(crate) fn put_str(out: &mut BytesMut, s: &str) {
    out.put_u32_le(s.len() as u32);
    out.put_slice(s.as_bytes());
}

pub(crate) fn get_str(data: &mut &[u8]) -> Result<String> {
    if data.remaining() < 4 {
        return Err(truncated("string length"));
    }
    let len = data.get_u32_le() as usize;
    if data.remaining() < len {
        return Err(truncated("string bytes"));
    }
    let s = std::str::from_utf8(&data[..len])
        .map_err(|e| DistribuitoError::Codec(format!("invalid utf-8 string: {}", e)))?
        .to_string();
    data.advance(len);
    Ok(s)
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

fn put_uvarint(out: &mut BytesMut, mut v: u64) {
    while v >= 0x80 {
        out.put_u8((v as u8) | 0x80);
        v >>= 7;
    }
    out.put_u8(v as u8);
}

fn get_uvarint(data: &mut &[u8]) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        if !data.has_remaining() {
            return Err(truncated("varint"));
        }
        let byte = data.get_u8();
        if shift == 63 && byte > 1 {
            return Err(DistribuitoError::Codec("varint overflows u64".to_string()));
        }
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift > 63 {
            return Err(DistribuitoError::Codec("varint overflows u64".to_string()));
        }
    }
}

fn ensure_exact(actual: usize, expected: usize, what: &str) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(DistribuitoError::Codec(format!(
            "{}: expected {} bytes, found {}",
            what, expected, actual
        )))
    }
}

fn truncated(what: &str) -> DistribuitoError {
    DistribuitoError::Codec(format!("truncated payload while reading {}", what))
}

fn mismatch(expected: ValueType, got: &Value) -> DistribuitoError {
    DistribuitoError::Codec(format!(
        "expected {} value, got {}",
        expected,
        got.value_type()
    ))
}
