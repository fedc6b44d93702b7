//! The ordered key/value store and keyspace layout underneath the whole
//! document engine (spec §4.1, §5). `Database` is the backend seam;
//! `Store`/`Txn` add snapshot-isolated, optimistically-committed
//! transactions on top of any backend.

pub mod config;
pub mod db;
pub mod keyspace;
pub mod memory;
pub mod sequence;
pub mod slice;
pub mod txn;

pub use config::StoreConfig;
pub use db::{prefix_end, Column, Database};
pub use keyspace::Key;
pub use memory::InMemoryDb;
pub use slice::Slice;
pub use txn::{Backend, Store, Txn};
