//! Collection, schema-version and index descriptors (spec §3 "Collection",
//! "SchemaVersion", "IndexDescriptor"; §4.5 "Collections & Schema
//! Versions").

use std::collections::BTreeMap;

use defra_primitives::{CoreError, CoreResult, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Bool,
    Int,
    Float,
    String,
    DateTime,
    Blob,
    Json,
    ForeignObject,
    ObjectArray,
}

impl FieldKind {
    #[must_use]
    pub const fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Bool, Value::Bool(_))
                | (Self::Int, Value::Int(_))
                | (Self::Float, Value::Float(_))
                | (Self::String | Self::DateTime, Value::String(_))
                | (Self::Blob, Value::Bytes(_))
                | (Self::Json, _)
                | (Self::ForeignObject, Value::String(_) | Value::Object(_))
                | (Self::ObjectArray, Value::Array(_))
        ) || matches!(value, Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrdtKind {
    LwwRegister,
    Composite,
    PnCounter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub crdt_kind: CrdtKind,
}

impl FieldDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind, crdt_kind: CrdtKind) -> Self {
        Self { name: name.into(), kind, crdt_kind }
    }
}

/// An immutable, content-hashed snapshot of a collection's fields (spec
/// GLOSSARY "Schema version"). `schema_root` is the id of the first
/// version in this lineage and never changes across patches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub id: String,
    pub schema_root: String,
    pub collection_name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl SchemaVersion {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Deterministic CBOR encoding of just the field list, used to derive
    /// this version's content-hashed id. Field order is significant and
    /// is the canonical order used by `DocId` derivation too (spec §8
    /// "DocID purity").
    ///
    /// # Panics
    /// Never, for a plain struct of primitives.
    #[must_use]
    pub fn canonical_field_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        ciborium::into_writer(&self.fields, &mut buf).expect("field list serialization cannot fail");
        buf
    }

    /// Type-checks a document payload against this version's fields,
    /// rejecting unknown fields (spec §4.4 `CreateDoc` step 1).
    pub fn type_check(&self, payload: &BTreeMap<String, Value>) -> CoreResult<()> {
        for key in payload.keys() {
            if key == "_docID" || key == "_key" {
                return Err(CoreError::validation(format!(
                    "field {key} is reserved and must not be supplied on ingest"
                )));
            }
            if self.field(key).is_none() {
                return Err(CoreError::validation(format!("unknown field: {key}")));
            }
        }
        for field in &self.fields {
            if let Some(value) = payload.get(&field.name) {
                if !field.kind.accepts(value) {
                    return Err(CoreError::validation(format!(
                        "field {} does not accept a value of type {}",
                        field.name,
                        value.type_name()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Operations a schema patch may apply to a version's field list (spec
/// §4.5: "Schema changes are expressed as JSON Patch operations against
/// the descriptor"). This implementation models the subset of JSON Patch
/// that applies to a field list directly rather than walking arbitrary
/// JSON Pointer paths — see `DESIGN.md`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchOp {
    AddField(FieldDescriptor),
    RemoveField(String),
    RenameField { from: String, to: String },
}

/// `Sources[0]` on a view-backed collection (spec §4.5: "Views are
/// collections whose `Sources[0]` is a `QuerySource`"; "`CollectionSource`
/// declares that this collection is a transformed mirror of another").
/// The query planner this crate sits below is what actually resolves a
/// `Query` string into documents; here the variant is inert descriptor
/// metadata, carried so `AddView`/`CollectionDescriptor` round-trip it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionSource {
    Collection { source_collection_id: u32, transform: Option<String> },
    Query { query: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    pub id: u32,
    pub name: String,
    pub schema_root: String,
    pub active_schema_version_id: String,
    pub sources: Vec<CollectionSource>,
    pub is_materialized: bool,
}

impl CollectionDescriptor {
    #[must_use]
    pub fn is_view(&self) -> bool {
        matches!(self.sources.first(), Some(CollectionSource::Query { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedField {
    pub field_name: String,
    pub descending: bool,
}

impl IndexedField {
    #[must_use]
    pub fn new(field_name: impl Into<String>, descending: bool) -> Self {
        Self { field_name: field_name.into(), descending }
    }
}

/// `/collection/index/<colName>/<indexName>` value (spec §3
/// "IndexDescriptor", §4.6 "Secondary Indexes"). Composite indexes order
/// by the declared field sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub id: u32,
    pub name: String,
    pub fields: Vec<IndexedField>,
    pub unique: bool,
}
