//! Document engine (spec §4.4, §4.6): `CreateDoc`/`UpdateDoc`/`DeleteDoc`/
//! `Get`/`ApplyRemoteBlock` in `document`, index-aware wrappers plus the
//! cancellable `GetAllDocIDs` sequence in `collection`, and the
//! transaction-scoped DAG head tracking both of those sit on in
//! `dag_txn`. Everything below this crate (`defra-crdt`, `defra-dag`,
//! `defra-schema`, `defra-migration`, `defra-store`) is mechanism; this
//! crate is where document operations actually compose.

pub mod cancel;
pub mod collection;
pub mod dag_txn;
pub mod document;

pub use cancel::CancellationToken;
pub use collection::{
    create, create_index, delete, delete_with_keys, drop_index, get, get_all_doc_ids, list_indexes,
    update, update_with_keys, BulkResult,
};
pub use document::{apply_remote_block, canonical_content_bytes, Document};
