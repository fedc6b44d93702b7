//! Key-space layout (spec §4.1). Every persistent fact lives under one of
//! these key shapes; keys are printable and slash-joined, values are
//! compact binary, matching `examples/original_source/core/key.go`'s
//! `DataStoreKey`/`IndexDataStoreKey`/`PrimaryDataStoreKey` family.

use std::fmt;

use defra_primitives::DocId;

use crate::db::{prefix_end, Column};

pub trait Key: fmt::Debug {
    fn to_bytes(&self) -> Vec<u8>;
    fn column(&self) -> Column;

    /// The end of the lexicographic range covering every key with this
    /// key's bytes as a prefix.
    fn prefix_end(&self) -> Vec<u8> {
        prefix_end(&self.to_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instance {
    Value,
    Priority,
    Deleted,
}

impl Instance {
    const fn tag(self) -> &'static str {
        match self {
            Self::Value => "v",
            Self::Priority => "p",
            Self::Deleted => "d",
        }
    }
}

/// `/<colID>/<v|p|d>/<docID>/<fieldID>`
#[derive(Debug, Clone)]
pub struct DataStoreKey {
    pub col_id: u32,
    pub instance: Instance,
    pub doc_id: DocId,
    pub field_id: String,
}

impl Key for DataStoreKey {
    fn to_bytes(&self) -> Vec<u8> {
        format!(
            "/{}/{}/{}/{}",
            self.col_id,
            self.instance.tag(),
            self.doc_id,
            self.field_id
        )
        .into_bytes()
    }

    fn column(&self) -> Column {
        Column::Documents
    }
}

/// `/<colID>/pk/<docID>`
#[derive(Debug, Clone)]
pub struct PrimaryKey {
    pub col_id: u32,
    pub doc_id: DocId,
}

impl Key for PrimaryKey {
    fn to_bytes(&self) -> Vec<u8> {
        format!("/{}/pk/{}", self.col_id, self.doc_id).into_bytes()
    }

    fn column(&self) -> Column {
        Column::Documents
    }
}

/// `/<docID>/<fieldID>/<cid>` — height (u64) of a DAG head candidate.
#[derive(Debug, Clone)]
pub struct HeadKey {
    pub doc_id: DocId,
    pub field_id: String,
    pub cid: String,
}

impl Key for HeadKey {
    fn to_bytes(&self) -> Vec<u8> {
        format!("/{}/{}/{}", self.doc_id, self.field_id, self.cid).into_bytes()
    }

    fn column(&self) -> Column {
        Column::Heads
    }
}

/// `/<docID>/<fieldID>/` — prefix covering every head of one field.
#[derive(Debug, Clone)]
pub struct HeadPrefix {
    pub doc_id: DocId,
    pub field_id: String,
}

impl Key for HeadPrefix {
    fn to_bytes(&self) -> Vec<u8> {
        format!("/{}/{}/", self.doc_id, self.field_id).into_bytes()
    }

    fn column(&self) -> Column {
        Column::Heads
    }
}

/// `/collection/names/<name>`
#[derive(Debug, Clone)]
pub struct CollectionNameKey(pub String);

impl Key for CollectionNameKey {
    fn to_bytes(&self) -> Vec<u8> {
        format!("/collection/names/{}", self.0).into_bytes()
    }

    fn column(&self) -> Column {
        Column::Collections
    }
}

/// `/collection/schema/<schemaRoot>`
#[derive(Debug, Clone)]
pub struct CollectionSchemaKey(pub String);

impl Key for CollectionSchemaKey {
    fn to_bytes(&self) -> Vec<u8> {
        format!("/collection/schema/{}", self.0).into_bytes()
    }

    fn column(&self) -> Column {
        Column::Collections
    }
}

/// `/collection/version/v/<schemaVersionID>`
#[derive(Debug, Clone)]
pub struct SchemaVersionKey(pub String);

impl Key for SchemaVersionKey {
    fn to_bytes(&self) -> Vec<u8> {
        format!("/collection/version/v/{}", self.0).into_bytes()
    }

    fn column(&self) -> Column {
        Column::Collections
    }
}

/// `/collection/version/h/<schemaRoot>/<prevSchemaVersionID>`
#[derive(Debug, Clone)]
pub struct SchemaHistoryKey {
    pub schema_root: String,
    pub prev_schema_version_id: String,
}

impl Key for SchemaHistoryKey {
    fn to_bytes(&self) -> Vec<u8> {
        format!(
            "/collection/version/h/{}/{}",
            self.schema_root, self.prev_schema_version_id
        )
        .into_bytes()
    }

    fn column(&self) -> Column {
        Column::Collections
    }
}

/// `/collection/index/<colName>/<indexName>`
#[derive(Debug, Clone)]
pub struct IndexDescriptorKey {
    pub col_name: String,
    pub index_name: String,
}

impl Key for IndexDescriptorKey {
    fn to_bytes(&self) -> Vec<u8> {
        format!("/collection/index/{}/{}", self.col_name, self.index_name).into_bytes()
    }

    fn column(&self) -> Column {
        Column::Collections
    }
}

/// `/<colID>/<indexID>/<encField1>/.../<encFieldN>[/<docID>]`
#[derive(Debug, Clone)]
pub struct IndexEntryKey {
    pub col_id: u32,
    pub index_id: u32,
    pub encoded_fields: Vec<Vec<u8>>,
    pub doc_id: Option<DocId>,
}

impl Key for IndexEntryKey {
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = format!("/{}/{}/", self.col_id, self.index_id).into_bytes();
        for field in &self.encoded_fields {
            buf.extend_from_slice(field);
            buf.push(b'/');
        }
        if let Some(doc_id) = &self.doc_id {
            buf.extend_from_slice(doc_id.to_string().as_bytes());
        } else {
            buf.pop(); // drop trailing separator when there's no doc id suffix
        }
        buf
    }

    fn column(&self) -> Column {
        Column::Indexes
    }
}

/// `/schema/migration/<sourceSchemaVersionID>`
#[derive(Debug, Clone)]
pub struct MigrationKey(pub String);

impl Key for MigrationKey {
    fn to_bytes(&self) -> Vec<u8> {
        format!("/schema/migration/{}", self.0).into_bytes()
    }

    fn column(&self) -> Column {
        Column::Migrations
    }
}

/// `/seq/<name>`
#[derive(Debug, Clone)]
pub struct SeqKey(pub String);

impl Key for SeqKey {
    fn to_bytes(&self) -> Vec<u8> {
        format!("/seq/{}", self.0).into_bytes()
    }

    fn column(&self) -> Column {
        Column::Sequences
    }
}

/// `/p2p/collection/<colID>`
#[derive(Debug, Clone)]
pub struct P2pCollectionKey(pub u32);

impl Key for P2pCollectionKey {
    fn to_bytes(&self) -> Vec<u8> {
        format!("/p2p/collection/{}", self.0).into_bytes()
    }

    fn column(&self) -> Column {
        Column::Network
    }
}

/// `/replicator/id/<id>`
#[derive(Debug, Clone)]
pub struct ReplicatorKey(pub String);

impl Key for ReplicatorKey {
    fn to_bytes(&self) -> Vec<u8> {
        format!("/replicator/id/{}", self.0).into_bytes()
    }

    fn column(&self) -> Column {
        Column::Network
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_id() -> DocId {
        use defra_primitives::cid::{Cid, CODEC_DAG_CBOR};
        DocId::new_v0(&Cid::of(CODEC_DAG_CBOR, b"payload"))
    }

    #[test]
    fn data_store_key_matches_layout() {
        let key = DataStoreKey {
            col_id: 3,
            instance: Instance::Value,
            doc_id: doc_id(),
            field_id: "name".into(),
        };
        let bytes = key.to_bytes();
        let s = String::from_utf8(bytes).unwrap();
        assert_eq!(s, format!("/3/v/{}/name", doc_id()));
    }

    #[test]
    fn prefix_end_scopes_a_single_collection() {
        let key = DataStoreKey {
            col_id: 3,
            instance: Instance::Value,
            doc_id: doc_id(),
            field_id: "name".into(),
        };
        let end = key.prefix_end();
        assert!(end > key.to_bytes());
    }

    #[test]
    fn index_entry_key_omits_doc_id_for_non_unique_when_none() {
        let key = IndexEntryKey {
            col_id: 1,
            index_id: 2,
            encoded_fields: vec![b"A".to_vec()],
            doc_id: None,
        };
        assert_eq!(key.to_bytes(), b"/1/2/A".to_vec());
    }

    #[test]
    fn index_entry_key_includes_doc_id_when_present() {
        let key = IndexEntryKey {
            col_id: 1,
            index_id: 2,
            encoded_fields: vec![b"A".to_vec()],
            doc_id: Some(doc_id()),
        };
        assert!(key.to_bytes().ends_with(doc_id().to_string().as_bytes()));
    }
}
