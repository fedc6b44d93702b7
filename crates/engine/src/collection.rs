//! The Collection client surface (spec §4.6 "Secondary Indexes", §6
//! `Collection` operations): wraps `crate::document`'s pure CRDT/DAG
//! mechanics with the index maintenance those operations don't know
//! about, and exposes the cancellable `GetAllDocIDs` sequence (Design
//! Note §9 "Scheduling model").

use std::collections::BTreeMap;

use defra_migration::LensRegistry;
use defra_primitives::{CoreError, CoreResult, DocId, Value};
use defra_schema::{index, CollectionDescriptor, IndexDescriptor, SchemaVersion};
use defra_store::db::{prefix_end, Column, Database};
use defra_store::keyspace::{Key, PrimaryKey};
use defra_store::txn::Txn;
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::document::{self, Document};

const NULL: Value = Value::Null;

fn io_err(err: eyre::Report) -> CoreError {
    CoreError::Io(err.to_string())
}

/// Picks out one value per indexed field, defaulting to `Value::Null` for
/// a field the document doesn't currently carry a value for.
fn tuple_values<'a>(desc: &IndexDescriptor, fields: &'a BTreeMap<String, Value>) -> Vec<&'a Value> {
    desc.fields.iter().map(|f| fields.get(&f.field_name).unwrap_or(&NULL)).collect()
}

/// Reads the current raw value of every field named in `field_names`,
/// independent of schema version or lens migration — exactly what index
/// maintenance needs, and nothing `document::get`'s full read would add.
fn raw_fields<D: Database>(
    txn: &Txn<'_, D>,
    collection: &CollectionDescriptor,
    doc_id: DocId,
    field_names: impl Iterator<Item = String>,
) -> CoreResult<BTreeMap<String, Value>> {
    let mut out = BTreeMap::new();
    for name in field_names {
        if let Some(value) = document::read_value(txn, collection.id, doc_id, &name)? {
            out.insert(name, value);
        }
    }
    Ok(out)
}

fn indexed_field_names(indexes: &[IndexDescriptor]) -> impl Iterator<Item = String> {
    let mut names: Vec<String> = indexes.iter().flat_map(|d| d.fields.iter().map(|f| f.field_name.clone())).collect();
    names.sort();
    names.dedup();
    names.into_iter()
}

fn insert_index_entries<D: Database>(
    txn: &Txn<'_, D>,
    collection: &CollectionDescriptor,
    indexes: &[IndexDescriptor],
    doc_id: DocId,
    fields: &BTreeMap<String, Value>,
) -> CoreResult<()> {
    for desc in indexes {
        let values = tuple_values(desc, fields);
        let encoded = index::encode_tuple(desc, &values)?;
        index::insert_entry(txn, collection.id, desc, encoded, doc_id)?;
    }
    Ok(())
}

fn delete_index_entries<D: Database>(
    txn: &Txn<'_, D>,
    collection: &CollectionDescriptor,
    indexes: &[IndexDescriptor],
    doc_id: DocId,
    fields: &BTreeMap<String, Value>,
) -> CoreResult<()> {
    for desc in indexes {
        let values = tuple_values(desc, fields);
        let encoded = index::encode_tuple(desc, &values)?;
        index::delete_entry(txn, collection.id, desc, encoded, doc_id)?;
    }
    Ok(())
}

/// `Create` (spec §4.4 `CreateDoc` plus §4.6 index population): creates
/// the document, then inserts one entry per registered index.
pub fn create<D: Database>(
    txn: &Txn<'_, D>,
    collection: &CollectionDescriptor,
    schema: &SchemaVersion,
    payload: BTreeMap<String, Value>,
) -> CoreResult<DocId> {
    let indexes = defra_schema::list_indexes(txn, &collection.name)?;
    let doc_id = document::create_doc(txn, collection, schema, payload.clone())?;
    insert_index_entries(txn, collection, &indexes, doc_id, &payload)?;
    Ok(doc_id)
}

/// `Update` (spec §4.4 `UpdateDoc` plus §4.6 index maintenance): the old
/// tuple for every registered index is removed and the new one inserted,
/// even for indexes whose fields the patch didn't touch — the values are
/// identical in that case so the entry round-trips as a no-op.
pub fn update<D: Database>(
    txn: &Txn<'_, D>,
    collection: &CollectionDescriptor,
    schema: &SchemaVersion,
    doc_id: DocId,
    patch: BTreeMap<String, Value>,
) -> CoreResult<()> {
    let indexes = defra_schema::list_indexes(txn, &collection.name)?;
    let before = raw_fields(txn, collection, doc_id, indexed_field_names(&indexes))?;
    delete_index_entries(txn, collection, &indexes, doc_id, &before)?;

    document::update_doc(txn, collection, schema, doc_id, patch)?;

    let after = raw_fields(txn, collection, doc_id, indexed_field_names(&indexes))?;
    insert_index_entries(txn, collection, &indexes, doc_id, &after)?;
    Ok(())
}

/// `Delete` (spec §4.4 `DeleteDoc` plus §4.6 index maintenance).
pub fn delete<D: Database>(
    txn: &Txn<'_, D>,
    collection: &CollectionDescriptor,
    schema: &SchemaVersion,
    doc_id: DocId,
) -> CoreResult<()> {
    let indexes = defra_schema::list_indexes(txn, &collection.name)?;
    let before = raw_fields(txn, collection, doc_id, indexed_field_names(&indexes))?;
    delete_index_entries(txn, collection, &indexes, doc_id, &before)?;
    document::delete_doc(txn, collection, schema, doc_id)
}

/// Outcome of a bulk operation over an explicit key list (spec §6
/// `UpdateWith{Key|Keys}`/`DeleteWith{Key|Keys}`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResult {
    pub count: usize,
    pub doc_ids: Vec<DocId>,
}

/// `UpdateWithKeys` (spec §6): applies the same patch to every listed
/// document, stopping at the first failure — a patch that's invalid for
/// one document is invalid for all of them, since they share a schema.
/// `UpdateWithFilter` is not implemented here: selecting documents by a
/// predicate needs the query planner, which spec §1 places out of scope.
pub fn update_with_keys<D: Database>(
    txn: &Txn<'_, D>,
    collection: &CollectionDescriptor,
    schema: &SchemaVersion,
    doc_ids: &[DocId],
    patch: BTreeMap<String, Value>,
) -> CoreResult<BulkResult> {
    let mut updated = Vec::with_capacity(doc_ids.len());
    for &doc_id in doc_ids {
        update(txn, collection, schema, doc_id, patch.clone())?;
        updated.push(doc_id);
    }
    Ok(BulkResult { count: updated.len(), doc_ids: updated })
}

/// `DeleteWithKeys` (spec §6); see `update_with_keys` on why
/// `DeleteWithFilter` is out of scope.
pub fn delete_with_keys<D: Database>(
    txn: &Txn<'_, D>,
    collection: &CollectionDescriptor,
    schema: &SchemaVersion,
    doc_ids: &[DocId],
) -> CoreResult<BulkResult> {
    let mut deleted = Vec::with_capacity(doc_ids.len());
    for &doc_id in doc_ids {
        delete(txn, collection, schema, doc_id)?;
        deleted.push(doc_id);
    }
    Ok(BulkResult { count: deleted.len(), doc_ids: deleted })
}

/// `Get` delegates straight to `document::get` — no index involvement.
pub fn get<D: Database>(
    txn: &Txn<'_, D>,
    collection: &CollectionDescriptor,
    active_schema: &SchemaVersion,
    lenses: &LensRegistry,
    doc_id: DocId,
    show_deleted: bool,
) -> CoreResult<Document> {
    document::get(txn, collection, active_schema, lenses, doc_id, show_deleted)
}

/// `GetAllDocIDs` (spec §6, §5 "Scheduling model": iteration is
/// cooperative and cancellable; §5 "Cancellation & timeouts": "a
/// cancelled context... propagates a cancelled error"). `Txn::scan`
/// collects eagerly rather than yielding a true lazy sequence — see
/// `DESIGN.md` — but every row boundary still checks `cancel`, so a
/// mid-scan cancellation still returns `CoreError::Cancelled` rather
/// than a silently truncated result. A document carrying the composite
/// register's deleted marker is excluded, so this only ever lists the
/// live set (spec §3 "removes from live index scans").
pub fn get_all_doc_ids<D: Database>(
    txn: &Txn<'_, D>,
    collection: &CollectionDescriptor,
    cancel: &CancellationToken,
) -> CoreResult<Vec<DocId>> {
    let prefix = format!("/{}/pk/", collection.id).into_bytes();
    let end = prefix_end(&prefix);
    let rows = txn.scan(Column::Documents, &prefix, Some(&end)).map_err(io_err)?;

    let mut ids = Vec::with_capacity(rows.len());
    for (key, _) in rows {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let key_str = String::from_utf8(key).map_err(|_| CoreError::integrity("primary key is not utf-8"))?;
        let doc_id_str = key_str
            .rsplit('/')
            .next()
            .ok_or_else(|| CoreError::integrity("malformed primary key"))?;
        let doc_id: DocId = doc_id_str.parse().map_err(|e| CoreError::integrity(format!("malformed doc id: {e}")))?;
        if document::is_doc_deleted(txn, collection.id, doc_id)? {
            continue;
        }
        ids.push(doc_id);
    }
    Ok(ids)
}

/// `CreateIndex` (spec §4.6 "Creation scans the collection, emits one
/// entry per document"): registers the descriptor, then backfills it
/// against every document already in the collection.
pub fn create_index<D: Database>(
    txn: &Txn<'_, D>,
    collection: &CollectionDescriptor,
    name: &str,
    fields: Vec<defra_schema::IndexedField>,
    unique: bool,
) -> CoreResult<IndexDescriptor> {
    let desc = defra_schema::create_index(txn, &collection.name, name, fields, unique)?;

    let cancel = CancellationToken::new();
    for doc_id in get_all_doc_ids(txn, collection, &cancel)? {
        let names = desc.fields.iter().map(|f| f.field_name.clone());
        let values = raw_fields(txn, collection, doc_id, names)?;
        insert_index_entries(txn, collection, std::slice::from_ref(&desc), doc_id, &values)?;
    }

    debug!(collection = %collection.name, index = name, "backfilled new index");
    Ok(desc)
}

/// `DropIndex` (spec §4.6 "Drop removes the descriptor and every entry").
pub fn drop_index<D: Database>(txn: &Txn<'_, D>, collection: &CollectionDescriptor, name: &str) -> CoreResult<()> {
    let desc = defra_schema::get_index(txn, &collection.name, name)?;
    index::drop_all_entries(txn, collection.id, desc.id)?;
    defra_schema::drop_index(txn, &collection.name, name)
}

/// `GetIndexes` (spec §6).
pub fn list_indexes<D: Database>(txn: &Txn<'_, D>, collection: &CollectionDescriptor) -> CoreResult<Vec<IndexDescriptor>> {
    defra_schema::list_indexes(txn, &collection.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use defra_schema::{add_schema, CrdtKind, FieldDescriptor, FieldKind, IndexedField};
    use defra_store::memory::InMemoryDb;
    use defra_store::txn::Store;

    fn user_fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::new("Name", FieldKind::String, CrdtKind::LwwRegister),
            FieldDescriptor::new("Age", FieldKind::Int, CrdtKind::LwwRegister),
        ]
    }

    fn payload(name: &str, age: i64) -> BTreeMap<String, Value> {
        let mut map = BTreeMap::new();
        map.insert("Name".to_string(), Value::String(name.into()));
        map.insert("Age".to_string(), Value::Int(age));
        map
    }

    #[test]
    fn create_populates_a_preexisting_index() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        let collection = add_schema(&txn, "User", user_fields()).unwrap();
        let schema = defra_schema::get_schema_version(&txn, &collection.active_schema_version_id).unwrap();
        create_index(&txn, &collection, "byName", vec![IndexedField::new("Name", false)], true).unwrap();

        create(&txn, &collection, &schema, payload("Alice", 30)).unwrap();

        let desc = defra_schema::get_index(&txn, "User", "byName").unwrap();
        let value = Value::String("Alice".into());
        let encoded = index::encode_tuple(&desc, &[&value]).unwrap();
        assert!(index::insert_entry(&txn, collection.id, &desc, encoded, DocId::new_v0(&defra_primitives::Cid::of(
            defra_primitives::cid::CODEC_DAG_CBOR,
            b"unrelated",
        )))
        .is_err());
    }

    #[test]
    fn create_index_backfills_existing_documents() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        let collection = add_schema(&txn, "User", user_fields()).unwrap();
        let schema = defra_schema::get_schema_version(&txn, &collection.active_schema_version_id).unwrap();

        create(&txn, &collection, &schema, payload("Alice", 30)).unwrap();
        create_index(&txn, &collection, "byName", vec![IndexedField::new("Name", false)], true).unwrap();

        let desc = defra_schema::get_index(&txn, "User", "byName").unwrap();
        let value = Value::String("Alice".into());
        let encoded = index::encode_tuple(&desc, &[&value]).unwrap();
        let result = index::insert_entry(
            &txn,
            collection.id,
            &desc,
            encoded,
            DocId::new_v0(&defra_primitives::Cid::of(defra_primitives::cid::CODEC_DAG_CBOR, b"another")),
        );
        assert!(matches!(result, Err(CoreError::Conflict(_))));
    }

    #[test]
    fn update_moves_the_index_entry_to_the_new_value() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        let collection = add_schema(&txn, "User", user_fields()).unwrap();
        let schema = defra_schema::get_schema_version(&txn, &collection.active_schema_version_id).unwrap();
        create_index(&txn, &collection, "byName", vec![IndexedField::new("Name", false)], true).unwrap();

        let doc_id = create(&txn, &collection, &schema, payload("Alice", 30)).unwrap();
        let mut patch = BTreeMap::new();
        patch.insert("Name".to_string(), Value::String("Bob".into()));
        update(&txn, &collection, &schema, doc_id, patch).unwrap();

        let desc = defra_schema::get_index(&txn, "User", "byName").unwrap();
        let old_value = Value::String("Alice".into());
        let encoded_old = index::encode_tuple(&desc, &[&old_value]).unwrap();
        // The old tuple is free again since the document moved away from it.
        index::insert_entry(
            &txn,
            collection.id,
            &desc,
            encoded_old,
            DocId::new_v0(&defra_primitives::Cid::of(defra_primitives::cid::CODEC_DAG_CBOR, b"someone-else")),
        )
        .unwrap();
    }

    #[test]
    fn delete_frees_the_index_entry() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        let collection = add_schema(&txn, "User", user_fields()).unwrap();
        let schema = defra_schema::get_schema_version(&txn, &collection.active_schema_version_id).unwrap();
        create_index(&txn, &collection, "byName", vec![IndexedField::new("Name", false)], true).unwrap();

        let doc_id = create(&txn, &collection, &schema, payload("Alice", 30)).unwrap();
        delete(&txn, &collection, &schema, doc_id).unwrap();

        let desc = defra_schema::get_index(&txn, "User", "byName").unwrap();
        let value = Value::String("Alice".into());
        let encoded = index::encode_tuple(&desc, &[&value]).unwrap();
        index::insert_entry(
            &txn,
            collection.id,
            &desc,
            encoded,
            DocId::new_v0(&defra_primitives::Cid::of(defra_primitives::cid::CODEC_DAG_CBOR, b"someone-else")),
        )
        .unwrap();
    }

    #[test]
    fn get_all_doc_ids_lists_every_document_in_the_collection() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        let collection = add_schema(&txn, "User", user_fields()).unwrap();
        let schema = defra_schema::get_schema_version(&txn, &collection.active_schema_version_id).unwrap();

        let a = create(&txn, &collection, &schema, payload("Alice", 30)).unwrap();
        let b = create(&txn, &collection, &schema, payload("Bob", 40)).unwrap();

        let cancel = CancellationToken::new();
        let mut ids = get_all_doc_ids(&txn, &collection, &cancel).unwrap();
        ids.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn cancelling_returns_a_cancelled_error() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        let collection = add_schema(&txn, "User", user_fields()).unwrap();
        let schema = defra_schema::get_schema_version(&txn, &collection.active_schema_version_id).unwrap();
        create(&txn, &collection, &schema, payload("Alice", 30)).unwrap();
        create(&txn, &collection, &schema, payload("Bob", 40)).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = get_all_doc_ids(&txn, &collection, &cancel);
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }

    #[test]
    fn drop_index_clears_the_descriptor_and_entries() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        let collection = add_schema(&txn, "User", user_fields()).unwrap();
        let schema = defra_schema::get_schema_version(&txn, &collection.active_schema_version_id).unwrap();
        create_index(&txn, &collection, "byName", vec![IndexedField::new("Name", false)], true).unwrap();
        create(&txn, &collection, &schema, payload("Alice", 30)).unwrap();

        drop_index(&txn, &collection, "byName").unwrap();
        assert!(defra_schema::get_index(&txn, "User", "byName").is_err());
        assert!(list_indexes(&txn, &collection).unwrap().is_empty());
    }

    #[test]
    fn update_with_keys_patches_every_listed_document() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        let collection = add_schema(&txn, "User", user_fields()).unwrap();
        let schema = defra_schema::get_schema_version(&txn, &collection.active_schema_version_id).unwrap();

        let a = create(&txn, &collection, &schema, payload("Alice", 30)).unwrap();
        let b = create(&txn, &collection, &schema, payload("Bob", 40)).unwrap();

        let mut patch = BTreeMap::new();
        patch.insert("Age".to_string(), Value::Int(99));
        let result = update_with_keys(&txn, &collection, &schema, &[a, b], patch).unwrap();

        assert_eq!(result.count, 2);
        assert_eq!(result.doc_ids, vec![a, b]);
        let lenses = LensRegistry::new();
        let doc_a = get(&txn, &collection, &schema, &lenses, a, false).unwrap();
        let doc_b = get(&txn, &collection, &schema, &lenses, b, false).unwrap();
        assert_eq!(doc_a.fields.get("Age"), Some(&Value::Int(99)));
        assert_eq!(doc_b.fields.get("Age"), Some(&Value::Int(99)));
    }

    #[test]
    fn update_with_keys_stops_at_the_first_failure() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        let collection = add_schema(&txn, "User", user_fields()).unwrap();
        let schema = defra_schema::get_schema_version(&txn, &collection.active_schema_version_id).unwrap();
        let a = create(&txn, &collection, &schema, payload("Alice", 30)).unwrap();

        let missing = DocId::new_v0(&defra_primitives::Cid::of(defra_primitives::cid::CODEC_DAG_CBOR, b"missing"));
        let mut patch = BTreeMap::new();
        patch.insert("Age".to_string(), Value::Int(99));
        let result = update_with_keys(&txn, &collection, &schema, &[a, missing], patch);
        assert!(result.is_err());

        let lenses = LensRegistry::new();
        let doc_a = get(&txn, &collection, &schema, &lenses, a, false).unwrap();
        assert_eq!(doc_a.fields.get("Age"), Some(&Value::Int(99)));
    }

    #[test]
    fn delete_with_keys_removes_every_listed_document() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        let collection = add_schema(&txn, "User", user_fields()).unwrap();
        let schema = defra_schema::get_schema_version(&txn, &collection.active_schema_version_id).unwrap();

        let a = create(&txn, &collection, &schema, payload("Alice", 30)).unwrap();
        let b = create(&txn, &collection, &schema, payload("Bob", 40)).unwrap();

        let result = delete_with_keys(&txn, &collection, &schema, &[a, b]).unwrap();
        assert_eq!(result.count, 2);

        let cancel = CancellationToken::new();
        assert!(get_all_doc_ids(&txn, &collection, &cancel).unwrap().is_empty());
    }
}
