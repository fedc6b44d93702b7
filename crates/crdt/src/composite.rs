//! Composite register for whole-document merge (spec §4.3 "Composite
//! Register"): the document-level CRDT that links every field's commit
//! into one logical "this document changed" event. Its own parent links
//! live on the wrapping `defra_dag::Block` (field id `"C"`, spec §3's
//! reserved composite field id) rather than being duplicated inside the
//! delta payload.

use serde::{Deserialize, Serialize};

/// Reserved field id for the composite ("whole document") register.
pub const COMPOSITE_FIELD_ID: &str = "C";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocStatus {
    Active,
    Deleted,
}

/// One field's contribution to a composite commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubDelta {
    pub field_id: String,
    pub payload: Vec<u8>,
    pub priority: u64,
}

impl SubDelta {
    #[must_use]
    pub fn new(field_id: impl Into<String>, payload: Vec<u8>, priority: u64) -> Self {
        Self {
            field_id: field_id.into(),
            payload,
            priority,
        }
    }
}

/// What a composite commit block carries (spec §4.3 "Delta").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeDelta {
    pub status: DocStatus,
    pub sub_deltas: Vec<SubDelta>,
}

impl CompositeDelta {
    #[must_use]
    pub fn new(status: DocStatus, sub_deltas: Vec<SubDelta>) -> Self {
        Self { status, sub_deltas }
    }

    /// # Panics
    /// Never, for a plain struct of primitives.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).expect("composite delta serialization cannot fail");
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ciborium::de::Error<std::io::Error>> {
        ciborium::from_reader(bytes)
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        matches!(self.status, DocStatus::Deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_cbor() {
        let delta = CompositeDelta::new(
            DocStatus::Active,
            vec![
                SubDelta::new("name", vec![1, 2, 3], 1),
                SubDelta::new("age", vec![4], 1),
            ],
        );
        let encoded = delta.encode();
        let decoded = CompositeDelta::decode(&encoded).unwrap();
        assert_eq!(decoded, delta);
    }

    #[test]
    fn deleted_status_is_detected() {
        let delta = CompositeDelta::new(DocStatus::Deleted, vec![]);
        assert!(delta.is_deleted());
        let delta = CompositeDelta::new(DocStatus::Active, vec![]);
        assert!(!delta.is_deleted());
    }
}
