//! Content identifiers: `sha256` multihash wrapped in a minimal CIDv1 frame.
//!
//! Blocks (§3 DAG Block) and the DocID derivation (§3 DocID) both need a
//! deterministic content address. We encode CIDs the way `go-cid`/
//! `go-multihash` do: `version || codec || multihash(code || length ||
//! digest)`, printed with a
//! multibase `b` (base32, lowercase, no padding) prefix, matching DocID's
//! own `multibase` requirement.
use std::fmt;
use std::str::FromStr;

use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CoreError;

/// CIDv1, raw-binary codec (0x55) — used for opaque canonical payload bytes.
pub const CODEC_RAW: u64 = 0x55;
/// CIDv1, DAG-CBOR codec (0x71) — used for DAG block framing.
pub const CODEC_DAG_CBOR: u64 = 0x71;

const SHA2_256_CODE: u64 = 0x12;
const SHA2_256_LEN: u64 = 32;

#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Cid(#[serde(with = "cid_bytes")] [u8; 32]);

mod cid_bytes {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let v: Vec<u8> = serde::Deserialize::deserialize(d)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32-byte digest"))
    }
}

impl Cid {
    /// Computes the CID of `payload` under `codec`. The codec only affects
    /// the printed multihash frame; the digest itself is over the raw
    /// bytes given, matching DefraDB's use of the payload CID (not a
    /// codec-tagged frame) as the DocID seed.
    #[must_use]
    pub fn of(codec: u64, payload: &[u8]) -> Self {
        let digest = Sha256::digest(payload);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        let _ = codec; // codec is carried in the printed frame, not the digest
        Self(bytes)
    }

    #[must_use]
    pub fn digest(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full CIDv1 multihash frame: `varint(version=1) ++ varint(codec) ++
    /// varint(sha2-256 code) ++ varint(32) ++ digest`.
    #[must_use]
    pub fn frame(&self, codec: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 32);
        crate::varint::write_uvarint(&mut buf, 1); // CIDv1
        crate::varint::write_uvarint(&mut buf, codec);
        crate::varint::write_uvarint(&mut buf, SHA2_256_CODE);
        crate::varint::write_uvarint(&mut buf, SHA2_256_LEN);
        buf.extend_from_slice(&self.0);
        buf
    }

    #[must_use]
    pub fn to_string_with_codec(&self, codec: u64) -> String {
        format!("b{}", BASE32_NOPAD.encode(&self.frame(codec)).to_lowercase())
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_with_codec(CODEC_DAG_CBOR))
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({self})")
    }
}

impl FromStr for Cid {
    type Err = CoreError;

    /// Parses a CID printed by `Display`/`to_string_with_codec`: a
    /// multibase `b` (base32, lowercase, no padding) prefix over the
    /// CIDv1 frame. The codec byte is read and discarded — the digest is
    /// all this type retains.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix('b')
            .ok_or_else(|| CoreError::validation("cid is missing the multibase 'b' prefix"))?;
        let frame = BASE32_NOPAD
            .decode(body.to_uppercase().as_bytes())
            .map_err(|e| CoreError::validation(format!("invalid cid encoding: {e}")))?;

        let (_version, rest) = crate::varint::read_uvarint(&frame)
            .map_err(|e| CoreError::validation(format!("invalid cid frame: {e}")))?;
        let (_codec, rest) = crate::varint::read_uvarint(rest)
            .map_err(|e| CoreError::validation(format!("invalid cid frame: {e}")))?;
        let (hash_code, rest) = crate::varint::read_uvarint(rest)
            .map_err(|e| CoreError::validation(format!("invalid cid frame: {e}")))?;
        let (len, rest) = crate::varint::read_uvarint(rest)
            .map_err(|e| CoreError::validation(format!("invalid cid frame: {e}")))?;

        if hash_code != SHA2_256_CODE || len != SHA2_256_LEN || rest.len() != len as usize {
            return Err(CoreError::validation("unsupported or truncated cid digest"));
        }

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(rest);
        Ok(Self(bytes))
    }
}
