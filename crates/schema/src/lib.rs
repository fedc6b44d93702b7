//! Collection descriptors, schema versions and secondary indexes (spec
//! §3, §4.5, §4.6). Sits above `defra-store` (key layout, transactions)
//! and `defra-crdt` (the ordered encoding index keys are built from), and
//! below `defra-engine`, which drives document operations using this
//! crate's registry and index primitives.

pub mod index;
pub mod registry;
pub mod types;

pub use registry::{
    add_schema, add_view, create_index, drop_index, get_collection, get_index, get_schema_version,
    list_indexes, next_schema_version, patch_schema, set_active_schema_version,
};
pub use types::{
    CollectionDescriptor, CollectionSource, CrdtKind, FieldDescriptor, FieldKind, IndexDescriptor,
    IndexedField, PatchOp, SchemaVersion,
};
