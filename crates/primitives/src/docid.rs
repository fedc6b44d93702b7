//! Document identifiers (spec §3 DocID, §6 wire form).
//!
//! Grounded in `examples/original_source/client/docID.go`: the namespace
//! UUID, the "name the uuid5 after the CID's *string* form" detail, and
//! the `varint(version) ++ uuid` byte layout are all load-bearing and are
//! not derivable from the data model description alone.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cid::Cid;
use crate::error::CoreError;
use crate::varint::{read_uvarint, write_uvarint};

/// The only DocID version this implementation accepts on ingest.
pub const DOC_ID_V0: u16 = 0x01;

/// Fixed namespace UUID for Source Data Network v0 DocIDs, copied verbatim
/// from the upstream `SDNNamespaceV0` constant.
pub const SDN_NAMESPACE_V0: Uuid = Uuid::from_bytes([
    0xc9, 0x4a, 0xcb, 0xfa, 0xdd, 0x53, 0x40, 0xd0, 0x97, 0xf3, 0x29, 0xce, 0x16, 0xc3, 0x33, 0xfc,
]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocId {
    version: u16,
    uuid: Uuid,
}

impl DocId {
    /// Derives a v0 DocID from the CID of a document's initial content.
    /// The UUIDv5 name is the CID's *string* representation, matching
    /// `uuid.NewV5(SDNNamespaceV0, dataCID.String())` upstream.
    #[must_use]
    pub fn new_v0(initial_content_cid: &Cid) -> Self {
        let name = initial_content_cid.to_string();
        Self {
            version: DOC_ID_V0,
            uuid: Uuid::new_v5(&SDN_NAMESPACE_V0, name.as_bytes()),
        }
    }

    #[must_use]
    pub const fn version(&self) -> u16 {
        self.version
    }

    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// `varint(version) ++ uuid.as_bytes()`.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3 + 16);
        write_uvarint(&mut buf, u64::from(self.version));
        buf.extend_from_slice(self.uuid.as_bytes());
        buf
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut version_bytes = Vec::new();
        write_uvarint(&mut version_bytes, u64::from(self.version));
        let version_str = data_encoding::BASE32_NOPAD
            .encode(&version_bytes)
            .to_lowercase();
        write!(f, "b{version_str}-{}", self.uuid)
    }
}

impl FromStr for DocId {
    type Err = CoreError;

    /// Parses `multibase(base32, varint(version)) + "-" + uuid-canonical`,
    /// rejecting unknown versions (spec §3, §6).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (version_part, uuid_part) = s
            .split_once('-')
            .ok_or_else(|| CoreError::validation("malformed DocID: missing '-' separator"))?;

        let prefix = version_part
            .strip_prefix('b')
            .ok_or_else(|| CoreError::validation("malformed DocID: expected multibase 'b' prefix"))?;

        let version_bytes = data_encoding::BASE32_NOPAD
            .decode(prefix.to_uppercase().as_bytes())
            .map_err(|e| CoreError::validation(format!("malformed DocID version: {e}")))?;

        let (version, rest) = read_uvarint(&version_bytes)
            .map_err(|e| CoreError::validation(format!("malformed DocID version varint: {e}")))?;
        if !rest.is_empty() {
            return Err(CoreError::validation("trailing bytes after DocID version"));
        }
        let version: u16 = version
            .try_into()
            .map_err(|_| CoreError::validation("DocID version out of range"))?;
        if version != DOC_ID_V0 {
            return Err(CoreError::validation(format!(
                "unknown DocID version: {version}"
            )));
        }

        // uuid_part may contain further '-' separators (canonical UUID form).
        let uuid = Uuid::parse_str(uuid_part)
            .map_err(|e| CoreError::validation(format!("malformed DocID uuid: {e}")))?;

        Ok(Self { version, uuid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid::CODEC_DAG_CBOR;

    /// Pins spec §8's worked DocID derivation example: a `User{Name:
    /// String, Age:Int}` document carrying `{"Name":"John","Age":26}`
    /// must derive exactly this id. `defra-engine::canonical_content_bytes`
    /// CBOR-encodes a document's fields the same way — as an ordered list
    /// of `(field_name, value)` pairs, walked in schema-declaration order
    /// — so reproducing that shape here pins the CID-seed derivation
    /// without needing a `SchemaVersion` in this crate.
    #[test]
    fn doc_id_matches_the_known_worked_example() {
        let ordered: Vec<(&str, &crate::value::Value)> = vec![
            ("Name", &crate::value::Value::String("John".to_owned())),
            ("Age", &crate::value::Value::Int(26)),
        ];
        let mut content = Vec::new();
        ciborium::into_writer(&ordered, &mut content).unwrap();

        let cid = Cid::of(crate::cid::CODEC_RAW, &content);
        let doc_id = DocId::new_v0(&cid);

        assert_eq!(doc_id.to_string(), "bae-e933420a-988a-56f8-8952-6c245aebd519");
    }

    #[test]
    fn doc_id_derivation_is_pure_content_function() {
        let cid = Cid::of(CODEC_DAG_CBOR, br#"{"Age":26,"Name":"John"}"#);
        let a = DocId::new_v0(&cid);
        let b = DocId::new_v0(&cid);
        assert_eq!(a, b);
    }

    #[test]
    fn round_trips_through_string_form() {
        let cid = Cid::of(CODEC_DAG_CBOR, b"payload");
        let doc_id = DocId::new_v0(&cid);
        let printed = doc_id.to_string();
        let parsed: DocId = printed.parse().unwrap();
        assert_eq!(doc_id, parsed);
    }

    #[test]
    fn rejects_unknown_version() {
        let cid = Cid::of(CODEC_DAG_CBOR, b"payload");
        let doc_id = DocId::new_v0(&cid);
        let printed = doc_id.to_string();
        let (_, uuid_part) = printed.split_once('-').unwrap();
        // version 99 encoded as a varint, base32-nopad, lowercased
        let bad = format!(
            "b{}-{}",
            data_encoding::BASE32_NOPAD.encode(&[99]).to_lowercase(),
            uuid_part
        );
        let err = bad.parse::<DocId>().unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn rejects_missing_separator() {
        let err = "nodashhere".parse::<DocId>().unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
