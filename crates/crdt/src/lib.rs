//! CRDT registers and the ordered field-value encoding that index keys
//! build on (spec §4.2 "Ordered Field-Value Encoding", §4.3 "CRDT
//! Registers"). Sits above `defra-dag` (which only knows about content
//! addressing and head sets) and below `defra-engine` (which drives the
//! document-level state machine using these registers).

pub mod composite;
pub mod encoding;
pub mod lww;
pub mod priority;

pub use composite::{CompositeDelta, DocStatus, SubDelta, COMPOSITE_FIELD_ID};
pub use encoding::{DecodedValue, FieldValueError};
pub use lww::{LwwDelta, LwwState};
pub use priority::next_priority;
