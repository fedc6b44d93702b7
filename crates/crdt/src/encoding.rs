//! Order-preserving field-value encoding for index keys (spec §4.2): a
//! byte-wise comparison of two encoded values must agree with the natural
//! ordering of the values they represent, in either direction.
//!
//! Each encoding starts with a one-byte tag identifying the value's kind,
//! followed by a kind-specific payload. The *descending* variant of every
//! encoding is the bitwise complement of every byte of the ascending form
//! (tag included), which trivially reverses lexicographic order and keeps
//! `encode`/`decode` exact inverses of each other without a second set of
//! payload-shaping rules.

use std::fmt;

use defra_primitives::Value;

/// Tag for an encoded `null`.
pub const TAG_NULL: u8 = 0x00;

/// Start of the integer tag family (mirrors the `IntMin`/`IntMax` range
/// convention used to keep integers, floats and byte strings in disjoint,
/// orderable tag bands).
pub const INT_MIN: u8 = 0x80;
/// End of the integer tag family.
pub const INT_MAX: u8 = 0xfd;
/// The single tag this implementation uses within the integer band. All
/// `int64` values are encoded at a fixed width (sign-biased big-endian u64)
/// rather than the variable-width small-integer buckets a production
/// key-compaction scheme would use — see `DESIGN.md`.
pub const TAG_INT: u8 = 0x84;

pub const TAG_FLOAT_NAN: u8 = 0x20;
pub const TAG_FLOAT_NEG: u8 = 0x21;
pub const TAG_FLOAT_ZERO: u8 = 0x22;
pub const TAG_FLOAT_POS: u8 = 0x23;
pub const TAG_FLOAT_INF: u8 = 0x24;

/// Marker byte opening a byte-stuffed string/bytes encoding.
pub const BYTES_MARKER: u8 = 0x12;

const SIGN_BIT: u64 = 0x8000_0000_0000_0000;

#[derive(Debug, thiserror::Error)]
pub enum FieldValueError {
    #[error("can not decode field value")]
    CanNotDecodeFieldValue,
    #[error("value of kind {0} is not indexable")]
    Unsupported(&'static str),
}

/// A decoded field value. Booleans and strings collapse into `Int` and
/// `Bytes` respectively on decode, since both share their wire
/// representation exactly with an encoding-level sibling kind and the
/// encoding carries no separate "was originally a bool/string" bit.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    Null,
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bytes(b) => write!(f, "{b:?}"),
        }
    }
}

fn invert_if(byte: u8, descending: bool) -> u8 {
    if descending {
        !byte
    } else {
        byte
    }
}

fn invert_all(buf: &mut [u8]) {
    for b in buf {
        *b = !*b;
    }
}

#[must_use]
pub fn encode_null_ascending() -> Vec<u8> {
    vec![TAG_NULL]
}

#[must_use]
pub fn encode_null_descending() -> Vec<u8> {
    vec![!TAG_NULL]
}

#[must_use]
pub fn encode_varint_ascending(v: i64) -> Vec<u8> {
    encode_varint(v, false)
}

#[must_use]
pub fn encode_varint_descending(v: i64) -> Vec<u8> {
    encode_varint(v, true)
}

fn encode_varint(v: i64, descending: bool) -> Vec<u8> {
    let biased = (v as u64) ^ SIGN_BIT;
    let mut out = Vec::with_capacity(9);
    out.push(TAG_INT);
    out.extend_from_slice(&biased.to_be_bytes());
    if descending {
        invert_all(&mut out);
    }
    out
}

fn decode_varint(data: &[u8], descending: bool) -> Result<(&[u8], i64), FieldValueError> {
    if data.len() < 9 {
        return Err(FieldValueError::CanNotDecodeFieldValue);
    }
    if invert_if(data[0], descending) != TAG_INT {
        return Err(FieldValueError::CanNotDecodeFieldValue);
    }
    let mut buf = [0u8; 8];
    for (i, slot) in buf.iter_mut().enumerate() {
        *slot = invert_if(data[1 + i], descending);
    }
    let biased = u64::from_be_bytes(buf);
    Ok((&data[9..], (biased ^ SIGN_BIT) as i64))
}

#[must_use]
pub fn encode_float_ascending(v: f64) -> Vec<u8> {
    encode_float(v, false)
}

#[must_use]
pub fn encode_float_descending(v: f64) -> Vec<u8> {
    encode_float(v, true)
}

fn encode_float(v: f64, descending: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    if v.is_nan() {
        out.push(TAG_FLOAT_NAN);
    } else if v == f64::INFINITY {
        out.push(TAG_FLOAT_INF);
    } else if v == 0.0 {
        out.push(TAG_FLOAT_ZERO);
    } else if v < 0.0 {
        out.push(TAG_FLOAT_NEG);
        out.extend_from_slice(&(!v.to_bits()).to_be_bytes());
    } else {
        out.push(TAG_FLOAT_POS);
        out.extend_from_slice(&v.to_bits().to_be_bytes());
    }
    if descending {
        invert_all(&mut out);
    }
    out
}

fn decode_float(data: &[u8], descending: bool) -> Result<(&[u8], f64), FieldValueError> {
    if data.is_empty() {
        return Err(FieldValueError::CanNotDecodeFieldValue);
    }
    let tag = invert_if(data[0], descending);
    match tag {
        TAG_FLOAT_NAN => Ok((&data[1..], f64::NAN)),
        TAG_FLOAT_ZERO => Ok((&data[1..], 0.0)),
        TAG_FLOAT_INF => Ok((&data[1..], f64::INFINITY)),
        TAG_FLOAT_NEG | TAG_FLOAT_POS => {
            if data.len() < 9 {
                return Err(FieldValueError::CanNotDecodeFieldValue);
            }
            let mut buf = [0u8; 8];
            for (i, slot) in buf.iter_mut().enumerate() {
                *slot = invert_if(data[1 + i], descending);
            }
            let raw = u64::from_be_bytes(buf);
            let bits = if tag == TAG_FLOAT_NEG { !raw } else { raw };
            Ok((&data[9..], f64::from_bits(bits)))
        }
        _ => Err(FieldValueError::CanNotDecodeFieldValue),
    }
}

#[must_use]
pub fn encode_bytes_ascending(value: &[u8]) -> Vec<u8> {
    encode_bytes(value, false)
}

#[must_use]
pub fn encode_bytes_descending(value: &[u8]) -> Vec<u8> {
    encode_bytes(value, true)
}

fn encode_bytes(value: &[u8], descending: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 3);
    out.push(BYTES_MARKER);
    for &b in value {
        if b == 0x00 {
            out.push(0x00);
            out.push(0xff);
        } else {
            out.push(b);
        }
    }
    out.push(0x00);
    out.push(0x01);
    if descending {
        invert_all(&mut out);
    }
    out
}

fn decode_bytes(data: &[u8], descending: bool) -> Result<(&[u8], Vec<u8>), FieldValueError> {
    if data.is_empty() || invert_if(data[0], descending) != BYTES_MARKER {
        return Err(FieldValueError::CanNotDecodeFieldValue);
    }
    let mut value = Vec::new();
    let mut i = 1;
    loop {
        if i >= data.len() {
            return Err(FieldValueError::CanNotDecodeFieldValue);
        }
        let b = invert_if(data[i], descending);
        if b == 0x00 {
            if i + 1 >= data.len() {
                return Err(FieldValueError::CanNotDecodeFieldValue);
            }
            match invert_if(data[i + 1], descending) {
                0xff => {
                    value.push(0x00);
                    i += 2;
                }
                0x01 => {
                    i += 2;
                    break;
                }
                _ => return Err(FieldValueError::CanNotDecodeFieldValue),
            }
        } else {
            value.push(b);
            i += 1;
        }
    }
    Ok((&data[i..], value))
}

/// Encodes a document field value for use in an index key. `Object` and
/// `Array` have no scalar ordering and are rejected; indexes only ever
/// cover leaf fields.
pub fn encode_field_value(value: &Value, descending: bool) -> Result<Vec<u8>, FieldValueError> {
    Ok(match value {
        Value::Null => {
            if descending {
                encode_null_descending()
            } else {
                encode_null_ascending()
            }
        }
        Value::Bool(b) => {
            let n = i64::from(*b);
            if descending {
                encode_varint_descending(n)
            } else {
                encode_varint_ascending(n)
            }
        }
        Value::Int(n) => {
            if descending {
                encode_varint_descending(*n)
            } else {
                encode_varint_ascending(*n)
            }
        }
        Value::Float(f) => {
            if descending {
                encode_float_descending(*f)
            } else {
                encode_float_ascending(*f)
            }
        }
        Value::String(s) => {
            if descending {
                encode_bytes_descending(s.as_bytes())
            } else {
                encode_bytes_ascending(s.as_bytes())
            }
        }
        Value::Bytes(b) => {
            if descending {
                encode_bytes_descending(b)
            } else {
                encode_bytes_ascending(b)
            }
        }
        Value::Object(_) => return Err(FieldValueError::Unsupported("object")),
        Value::Array(_) => return Err(FieldValueError::Unsupported("array")),
    })
}

/// Decodes one field value from the front of `data`, returning the
/// remaining bytes so composite index keys can be decoded field by field.
pub fn decode_field_value(
    data: &[u8],
    descending: bool,
) -> Result<(&[u8], DecodedValue), FieldValueError> {
    if data.is_empty() {
        return Err(FieldValueError::CanNotDecodeFieldValue);
    }
    let tag = invert_if(data[0], descending);
    match tag {
        TAG_NULL => Ok((&data[1..], DecodedValue::Null)),
        TAG_FLOAT_NAN | TAG_FLOAT_NEG | TAG_FLOAT_ZERO | TAG_FLOAT_POS | TAG_FLOAT_INF => {
            decode_float(data, descending).map(|(rest, v)| (rest, DecodedValue::Float(v)))
        }
        BYTES_MARKER => decode_bytes(data, descending).map(|(rest, v)| (rest, DecodedValue::Bytes(v))),
        t if (INT_MIN..=INT_MAX).contains(&t) => {
            decode_varint(data, descending).map(|(rest, v)| (rest, DecodedValue::Int(v)))
        }
        _ => Err(FieldValueError::CanNotDecodeFieldValue),
    }
}
