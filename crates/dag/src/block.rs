//! DAG blocks (spec §3 "DAG Block (Commit)"): one immutable update unit,
//! content-addressed, carrying an opaque CRDT delta payload and links to
//! its causal parents.

use defra_primitives::cid::{Cid, CODEC_DAG_CBOR};
use serde::{Deserialize, Serialize};

/// A named parent link: the field/slot name this parent is tracked under
/// (`"C"` for the composite field's own parent links) paired with the
/// parent block's CID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub name: String,
    pub cid: Cid,
}

impl Link {
    #[must_use]
    pub fn new(name: impl Into<String>, cid: Cid) -> Self {
        Self { name: name.into(), cid }
    }
}

/// One DAG commit. `delta` is an opaque, CRDT-specific encoded payload;
/// the DAG layer never interprets it, only content-addresses it (Design
/// Note §9: the DAG has no notion of cycles by construction because every
/// block can only link to CIDs that already exist).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub schema_version_id: String,
    pub field_id: String,
    pub delta: Vec<u8>,
    pub links: Vec<Link>,
    pub height: u64,
}

impl Block {
    /// Builds a block whose height is `1 + max(parent heights)`, or `1`
    /// for a root with no parents (spec §3).
    #[must_use]
    pub fn new(
        schema_version_id: impl Into<String>,
        field_id: impl Into<String>,
        delta: Vec<u8>,
        links: Vec<Link>,
        parent_heights: &[u64],
    ) -> Self {
        let height = 1 + parent_heights.iter().copied().max().unwrap_or(0);
        Self {
            schema_version_id: schema_version_id.into(),
            field_id: field_id.into(),
            delta,
            links,
            height,
        }
    }

    /// Deterministic CBOR encoding of the block (field order is fixed by
    /// the struct definition, so two blocks with identical content always
    /// serialize identically).
    ///
    /// # Panics
    /// Panics only if `ciborium` itself fails to serialize a plain struct
    /// of primitives, which does not happen in practice.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).expect("block serialization cannot fail");
        buf
    }

    #[must_use]
    pub fn cid(&self) -> Cid {
        Cid::of(CODEC_DAG_CBOR, &self.canonical_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_block_has_height_one() {
        let block = Block::new("sv1", "name", vec![1, 2, 3], vec![], &[]);
        assert_eq!(block.height, 1);
    }

    #[test]
    fn height_is_one_plus_max_parent_height() {
        let block = Block::new("sv1", "name", vec![1], vec![], &[3, 5, 2]);
        assert_eq!(block.height, 6);
    }

    #[test]
    fn identical_blocks_have_identical_cids() {
        let a = Block::new("sv1", "name", vec![1, 2], vec![], &[]);
        let b = Block::new("sv1", "name", vec![1, 2], vec![], &[]);
        assert_eq!(a.cid(), b.cid());
    }

    #[test]
    fn different_payloads_have_different_cids() {
        let a = Block::new("sv1", "name", vec![1], vec![], &[]);
        let b = Block::new("sv1", "name", vec![2], vec![], &[]);
        assert_ne!(a.cid(), b.cid());
    }
}
