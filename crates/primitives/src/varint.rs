//! Minimal LEB128 unsigned varint codec.
//!
//! The key-space and DocID wire form both need a varint exactly matching
//! Go's `encoding/binary.{Uvarint,PutUvarint}`
//! (LEB128 with a continuation bit per byte). Kept dependency-free since
//! it's a handful of lines and every example repo that needs one
//! (`calimero-dag`'s CIDs, `calimero-store`'s sequence keys) hand-rolls
//! something equivalent rather than pulling in a crate for it.

/// Encodes `value` as an unsigned LEB128 varint, appending to `buf`.
pub fn write_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VarintError {
    #[error("truncated varint")]
    Truncated,
    #[error("varint overflows u64")]
    Overflow,
}

/// Decodes an unsigned LEB128 varint from the front of `buf`, returning
/// the value and the remaining bytes.
pub fn read_uvarint(buf: &[u8]) -> Result<(u64, &[u8]), VarintError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 64 {
            return Err(VarintError::Overflow);
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, &buf[i + 1..]));
        }
        shift += 7;
    }
    Err(VarintError::Truncated)
}
