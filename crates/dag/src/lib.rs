//! Content-addressed DAG blocks and per-field head tracking (spec §3 DAG
//! Block/Head, §4.4 `ApplyRemoteBlock`). Independent of the key/value
//! store and the CRDT registers above it — it only knows about blocks,
//! links and head sets, the same separation of concerns
//! `calimero-dag` uses between DAG topology and delta application.

pub mod block;
pub mod heads;
pub mod store;

pub use block::{Block, Link};
pub use heads::{ApplyOutcome, DagStore, FieldKey, PendingStats};
pub use store::{BlockStore, InMemoryBlockStore};
