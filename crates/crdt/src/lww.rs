//! LWW (last-writer-wins) register for scalar fields (spec §4.3 "LWW
//! Register"). Grounded on `calimero-storage`'s `LwwRegister` test suite
//! (`crates/storage/src/tests/lww_register.rs`) for the register shape —
//! state plus a delta that can be produced and merged — but with a
//! different tie-break: that register compares `(timestamp, node_id)`,
//! this one compares `(priority, cid)`, since priority here is a
//! DAG-derived quantity rather than a wall-clock timestamp.

use defra_primitives::{Cid, Value};
use serde::{Deserialize, Serialize};

/// What a commit block carries for an LWW field (spec §4.3 "Delta").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LwwDelta {
    pub schema_version_id: String,
    pub field_id: String,
    pub value: Value,
    pub priority: u64,
}

impl LwwDelta {
    #[must_use]
    pub fn new(
        schema_version_id: impl Into<String>,
        field_id: impl Into<String>,
        value: Value,
        priority: u64,
    ) -> Self {
        Self {
            schema_version_id: schema_version_id.into(),
            field_id: field_id.into(),
            value,
            priority,
        }
    }

    /// Deterministic CBOR encoding, used as a `Block::delta` payload.
    ///
    /// # Panics
    /// Never, for a plain struct of primitives and closed `Value` variants.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).expect("lww delta serialization cannot fail");
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ciborium::de::Error<std::io::Error>> {
        ciborium::from_reader(bytes)
    }
}

/// What is persisted under `/v/…` (value) and `/p/…` (priority) for a
/// field (spec §4.3 "State"). Carrying the winning delta's CID lets a
/// later equal-priority delta be tie-broken without re-reading the block
/// store.
#[derive(Debug, Clone, PartialEq)]
pub struct LwwState {
    pub value: Value,
    pub priority: u64,
    pub cid: Cid,
}

impl LwwState {
    #[must_use]
    pub fn new(value: Value, priority: u64, cid: Cid) -> Self {
        Self { value, priority, cid }
    }
}

/// Applies spec §4.3's merge rule: a strictly higher priority always
/// wins; a strictly lower priority is ignored; an equal priority is
/// tie-broken by the lexicographically smaller CID.
#[must_use]
pub fn merge(current: Option<&LwwState>, incoming: LwwDelta, incoming_cid: Cid) -> LwwState {
    let Some(current) = current else {
        return LwwState::new(incoming.value, incoming.priority, incoming_cid);
    };

    let replace = match incoming.priority.cmp(&current.priority) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => incoming_cid < current.cid,
    };

    if replace {
        LwwState::new(incoming.value, incoming.priority, incoming_cid)
    } else {
        current.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use defra_primitives::cid::CODEC_RAW;

    fn cid(tag: &str) -> Cid {
        Cid::of(CODEC_RAW, tag.as_bytes())
    }

    #[test]
    fn first_delta_is_accepted_unconditionally() {
        let delta = LwwDelta::new("sv1", "name", Value::String("Alice".into()), 1);
        let state = merge(None, delta, cid("c1"));
        assert_eq!(state.value, Value::String("Alice".into()));
        assert_eq!(state.priority, 1);
    }

    #[test]
    fn higher_priority_replaces_lower() {
        let current = LwwState::new(Value::Int(22), 1, cid("c1"));
        let incoming = LwwDelta::new("sv1", "age", Value::Int(23), 2);
        let state = merge(Some(&current), incoming, cid("c2"));
        assert_eq!(state.value, Value::Int(23));
        assert_eq!(state.priority, 2);
    }

    #[test]
    fn lower_priority_is_ignored() {
        let current = LwwState::new(Value::Int(23), 2, cid("c2"));
        let incoming = LwwDelta::new("sv1", "age", Value::Int(99), 1);
        let state = merge(Some(&current), incoming, cid("c_late"));
        assert_eq!(state, current);
    }

    #[test]
    fn equal_priority_ties_break_on_smaller_cid() {
        // Spec §8 scenario: two replicas concurrently set age=22/age=23,
        // both priority 2; the delta with the smaller CID wins.
        let c2 = cid("c2");
        let c3 = cid("c3");
        let (small, large, small_val, large_val) = if c2 < c3 {
            (c2, c3, Value::Int(22), Value::Int(23))
        } else {
            (c3, c2, Value::Int(23), Value::Int(22))
        };

        let current = LwwState::new(large_val.clone(), 2, large);
        let incoming = LwwDelta::new("sv1", "age", small_val.clone(), 2);
        let state = merge(Some(&current), incoming, small);
        assert_eq!(state.value, small_val);
        assert_eq!(state.cid, small);

        // Applied the other way around: the larger CID never displaces
        // the already-installed smaller one.
        let current2 = LwwState::new(small_val.clone(), 2, small);
        let incoming2 = LwwDelta::new("sv1", "age", large_val, 2);
        let state2 = merge(Some(&current2), incoming2, large);
        assert_eq!(state2.value, small_val);
        assert_eq!(state2.cid, small);
    }

    #[test]
    fn delta_round_trips_through_cbor() {
        let delta = LwwDelta::new("sv1", "name", Value::String("Bob".into()), 3);
        let encoded = delta.encode();
        let decoded = LwwDelta::decode(&encoded).unwrap();
        assert_eq!(decoded, delta);
    }
}
