//! Collection and schema-version persistence (spec §4.5). Reads and
//! writes run inside the caller's transaction so DDL participates in the
//! same snapshot-isolated commit as everything else (spec §5).

use defra_primitives::cid::{Cid, CODEC_RAW};
use defra_primitives::{CoreError, CoreResult};
use defra_store::db::prefix_end;
use defra_store::keyspace::{
    CollectionNameKey, CollectionSchemaKey, IndexDescriptorKey, Key, SchemaHistoryKey,
    SchemaVersionKey,
};
use defra_store::{db::Column, db::Database, txn::Txn};
use tracing::debug;

use crate::types::{
    CollectionDescriptor, CollectionSource, FieldDescriptor, IndexDescriptor, PatchOp, SchemaVersion,
};

fn io_err(err: eyre::Report) -> CoreError {
    CoreError::Io(err.to_string())
}

fn encode<T: serde::Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| CoreError::integrity(format!("encode failure: {e}")))?;
    Ok(buf)
}

fn decode<T: for<'de> serde::Deserialize<'de>>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::integrity(format!("decode failure: {e}")))
}

fn schema_version_id(fields: &[FieldDescriptor], schema_root: &str, collection_name: &str) -> String {
    let draft = SchemaVersion {
        id: String::new(),
        schema_root: schema_root.to_owned(),
        collection_name: collection_name.to_owned(),
        fields: fields.to_vec(),
    };
    Cid::of(CODEC_RAW, &draft.canonical_field_bytes()).to_string_with_codec(CODEC_RAW)
}

/// Registers a brand-new collection with its first schema version, the
/// active one. Returns the collection descriptor.
pub fn add_schema<D: Database>(
    txn: &Txn<'_, D>,
    collection_name: &str,
    fields: Vec<FieldDescriptor>,
) -> CoreResult<CollectionDescriptor> {
    let name_key = CollectionNameKey(collection_name.to_owned());
    if txn.has(Column::Collections, &name_key.to_bytes()).map_err(io_err)? {
        return Err(CoreError::conflict(format!(
            "collection already exists: {collection_name}"
        )));
    }

    let col_id = defra_store::sequence::next_value(txn, "collection").map_err(io_err)? as u32;

    // A version is its own schema root until a patch is applied against it.
    let version_id = schema_version_id(&fields, "", collection_name);
    let version = SchemaVersion {
        id: version_id.clone(),
        schema_root: version_id.clone(),
        collection_name: collection_name.to_owned(),
        fields,
    };

    let descriptor = CollectionDescriptor {
        id: col_id,
        name: collection_name.to_owned(),
        schema_root: version_id.clone(),
        active_schema_version_id: version_id.clone(),
        sources: Vec::new(),
        is_materialized: false,
    };

    txn.put(Column::Collections, &name_key.to_bytes(), &encode(&descriptor)?)
        .map_err(io_err)?;
    txn.put(
        Column::Collections,
        &CollectionSchemaKey(version_id.clone()).to_bytes(),
        version_id.as_bytes(),
    )
    .map_err(io_err)?;
    txn.put(
        Column::Collections,
        &SchemaVersionKey(version_id.clone()).to_bytes(),
        &encode(&version)?,
    )
    .map_err(io_err)?;

    debug!(collection = collection_name, version = %version_id, "registered new collection");
    Ok(descriptor)
}

/// `AddView` (spec §4.5, §6): registers a view collection whose
/// `Sources[0]` is a `QuerySource` carrying the base GraphQL query
/// verbatim. Resolving that query into documents is the query planner's
/// job (out of scope here, spec §1); this only persists the descriptor
/// so a planner layered on top can recognize and serve it.
pub fn add_view<D: Database>(
    txn: &Txn<'_, D>,
    collection_name: &str,
    fields: Vec<FieldDescriptor>,
    query: String,
    is_materialized: bool,
) -> CoreResult<CollectionDescriptor> {
    let mut descriptor = add_schema(txn, collection_name, fields)?;
    descriptor.sources = vec![CollectionSource::Query { query }];
    descriptor.is_materialized = is_materialized;

    let name_key = CollectionNameKey(collection_name.to_owned());
    txn.put(Column::Collections, &name_key.to_bytes(), &encode(&descriptor)?)
        .map_err(io_err)?;

    debug!(collection = collection_name, "registered view collection");
    Ok(descriptor)
}

pub fn get_collection<D: Database>(txn: &Txn<'_, D>, collection_name: &str) -> CoreResult<CollectionDescriptor> {
    let bytes = txn
        .get(Column::Collections, &CollectionNameKey(collection_name.to_owned()).to_bytes())
        .map_err(io_err)?
        .ok_or_else(|| CoreError::not_found(format!("collection not found: {collection_name}")))?;
    decode(&bytes)
}

pub fn get_schema_version<D: Database>(txn: &Txn<'_, D>, schema_version_id: &str) -> CoreResult<SchemaVersion> {
    let bytes = txn
        .get(Column::Collections, &SchemaVersionKey(schema_version_id.to_owned()).to_bytes())
        .map_err(io_err)?
        .ok_or_else(|| CoreError::not_found(format!("schema version not found: {schema_version_id}")))?;
    decode(&bytes)
}

/// Applies `ops` to the field list of `source_schema_version_id`,
/// registers the result as a new version linked into the same lineage via
/// a `SchemaHistoryKey`, and optionally makes it the collection's active
/// version (spec §4.5).
pub fn patch_schema<D: Database>(
    txn: &Txn<'_, D>,
    source_schema_version_id: &str,
    ops: &[PatchOp],
    set_as_active: bool,
) -> CoreResult<SchemaVersion> {
    let source = get_schema_version(txn, source_schema_version_id)?;
    let mut fields = source.fields.clone();

    for op in ops {
        match op {
            PatchOp::AddField(field) => {
                if fields.iter().any(|f| f.name == field.name) {
                    return Err(CoreError::validation(format!("field already exists: {}", field.name)));
                }
                fields.push(field.clone());
            }
            PatchOp::RemoveField(name) => {
                let before = fields.len();
                fields.retain(|f| &f.name != name);
                if fields.len() == before {
                    return Err(CoreError::validation(format!("unknown field: {name}")));
                }
            }
            PatchOp::RenameField { from, to } => {
                let field = fields
                    .iter_mut()
                    .find(|f| &f.name == from)
                    .ok_or_else(|| CoreError::validation(format!("unknown field: {from}")))?;
                field.name = to.clone();
            }
        }
    }

    let new_id = schema_version_id(&fields, &source.schema_root, &source.collection_name);
    if new_id == source.id {
        return Err(CoreError::validation("patch produced no change to the schema"));
    }

    let new_version = SchemaVersion {
        id: new_id.clone(),
        schema_root: source.schema_root.clone(),
        collection_name: source.collection_name.clone(),
        fields,
    };

    txn.put(
        Column::Collections,
        &SchemaVersionKey(new_id.clone()).to_bytes(),
        &encode(&new_version)?,
    )
    .map_err(io_err)?;
    txn.put(
        Column::Collections,
        &SchemaHistoryKey {
            schema_root: source.schema_root.clone(),
            prev_schema_version_id: source.id.clone(),
        }
        .to_bytes(),
        new_id.as_bytes(),
    )
    .map_err(io_err)?;

    if set_as_active {
        set_active_schema_version(txn, &source.collection_name, &new_id)?;
    }

    Ok(new_version)
}

/// Looks up the schema version that directly follows `schema_version_id`
/// in its lineage, if a patch has been applied since (used by the lens
/// migration chain, spec §4.7).
pub fn next_schema_version<D: Database>(
    txn: &Txn<'_, D>,
    schema_root: &str,
    schema_version_id: &str,
) -> CoreResult<Option<String>> {
    let key = SchemaHistoryKey {
        schema_root: schema_root.to_owned(),
        prev_schema_version_id: schema_version_id.to_owned(),
    };
    let bytes = txn.get(Column::Collections, &key.to_bytes()).map_err(io_err)?;
    Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
}

pub fn set_active_schema_version<D: Database>(
    txn: &Txn<'_, D>,
    collection_name: &str,
    schema_version_id: &str,
) -> CoreResult<()> {
    let mut descriptor = get_collection(txn, collection_name)?;
    let version = get_schema_version(txn, schema_version_id)?;
    if version.schema_root != descriptor.schema_root {
        return Err(CoreError::validation(
            "schema version does not belong to this collection's lineage",
        ));
    }
    descriptor.active_schema_version_id = schema_version_id.to_owned();

    txn.put(
        Column::Collections,
        &CollectionNameKey(collection_name.to_owned()).to_bytes(),
        &encode(&descriptor)?,
    )
    .map_err(io_err)?;
    txn.put(
        Column::Collections,
        &CollectionSchemaKey(descriptor.schema_root.clone()).to_bytes(),
        schema_version_id.as_bytes(),
    )
    .map_err(io_err)?;
    Ok(())
}

/// Registers a new index descriptor under the collection's name (spec §4.6
/// "Creation scans the collection, emits one entry per document"; the
/// per-document scan itself is the engine layer's job since it owns
/// document iteration — this only persists the descriptor and allocates
/// its id).
pub fn create_index<D: Database>(
    txn: &Txn<'_, D>,
    collection_name: &str,
    name: &str,
    fields: Vec<crate::types::IndexedField>,
    unique: bool,
) -> CoreResult<IndexDescriptor> {
    let key = IndexDescriptorKey { col_name: collection_name.to_owned(), index_name: name.to_owned() };
    if txn.has(Column::Collections, &key.to_bytes()).map_err(io_err)? {
        return Err(CoreError::conflict(format!(
            "index already exists: {collection_name}.{name}"
        )));
    }

    let id = defra_store::sequence::next_value(txn, "index").map_err(io_err)? as u32;
    let descriptor = IndexDescriptor { id, name: name.to_owned(), fields, unique };
    txn.put(Column::Collections, &key.to_bytes(), &encode(&descriptor)?)
        .map_err(io_err)?;
    debug!(collection = collection_name, index = name, "registered new index");
    Ok(descriptor)
}

pub fn get_index<D: Database>(
    txn: &Txn<'_, D>,
    collection_name: &str,
    index_name: &str,
) -> CoreResult<IndexDescriptor> {
    let key = IndexDescriptorKey { col_name: collection_name.to_owned(), index_name: index_name.to_owned() };
    let bytes = txn
        .get(Column::Collections, &key.to_bytes())
        .map_err(io_err)?
        .ok_or_else(|| CoreError::not_found(format!("index not found: {collection_name}.{index_name}")))?;
    decode(&bytes)
}

/// Every index registered for `collection_name` (spec §6 `GetIndexes`).
pub fn list_indexes<D: Database>(txn: &Txn<'_, D>, collection_name: &str) -> CoreResult<Vec<IndexDescriptor>> {
    let prefix = format!("/collection/index/{collection_name}/").into_bytes();
    let end = prefix_end(&prefix);
    let rows = txn.scan(Column::Collections, &prefix, Some(&end)).map_err(io_err)?;
    rows.into_iter().map(|(_, value)| decode(&value)).collect()
}

/// Removes the descriptor (spec §4.6 "Drop removes the descriptor"); the
/// caller is responsible for range-deleting the index's entries first via
/// `defra_schema::index::drop_all_entries`, since that needs the collection
/// id this crate's registry does not track on its own.
pub fn drop_index<D: Database>(txn: &Txn<'_, D>, collection_name: &str, index_name: &str) -> CoreResult<()> {
    let key = IndexDescriptorKey { col_name: collection_name.to_owned(), index_name: index_name.to_owned() };
    txn.delete(Column::Collections, &key.to_bytes()).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CrdtKind, FieldKind, IndexedField};
    use defra_store::memory::InMemoryDb;
    use defra_store::txn::Store;

    fn user_fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::new("Name", FieldKind::String, CrdtKind::LwwRegister),
            FieldDescriptor::new("Age", FieldKind::Int, CrdtKind::LwwRegister),
        ]
    }

    #[test]
    fn add_schema_registers_a_collection_and_its_first_version() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        let descriptor = add_schema(&txn, "User", user_fields()).unwrap();
        assert_eq!(descriptor.name, "User");
        assert_eq!(descriptor.active_schema_version_id, descriptor.schema_root);

        let version = get_schema_version(&txn, &descriptor.active_schema_version_id).unwrap();
        assert_eq!(version.fields.len(), 2);
    }

    #[test]
    fn adding_the_same_collection_twice_conflicts() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        add_schema(&txn, "User", user_fields()).unwrap();
        let result = add_schema(&txn, "User", user_fields());
        assert!(matches!(result, Err(CoreError::Conflict(_))));
    }

    #[test]
    fn patch_schema_adds_a_field_and_can_activate_it() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        let descriptor = add_schema(&txn, "User", user_fields()).unwrap();

        let patched = patch_schema(
            &txn,
            &descriptor.active_schema_version_id,
            &[PatchOp::AddField(FieldDescriptor::new(
                "Email",
                FieldKind::String,
                CrdtKind::LwwRegister,
            ))],
            true,
        )
        .unwrap();

        assert_eq!(patched.fields.len(), 3);
        assert_eq!(patched.schema_root, descriptor.schema_root);

        let descriptor_after = get_collection(&txn, "User").unwrap();
        assert_eq!(descriptor_after.active_schema_version_id, patched.id);

        let next = next_schema_version(&txn, &descriptor.schema_root, &descriptor.active_schema_version_id)
            .unwrap();
        assert_eq!(next, Some(patched.id));
    }

    #[test]
    fn patching_an_unknown_field_fails() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        let descriptor = add_schema(&txn, "User", user_fields()).unwrap();
        let result = patch_schema(
            &txn,
            &descriptor.active_schema_version_id,
            &[PatchOp::RemoveField("Bogus".into())],
            false,
        );
        assert!(result.is_err());
    }

    #[test]
    fn create_index_registers_and_lists_it() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        add_schema(&txn, "User", user_fields()).unwrap();

        let desc = create_index(&txn, "User", "byName", vec![IndexedField::new("Name", false)], true).unwrap();
        assert_eq!(desc.name, "byName");

        let fetched = get_index(&txn, "User", "byName").unwrap();
        assert_eq!(fetched, desc);

        let all = list_indexes(&txn, "User").unwrap();
        assert_eq!(all, vec![desc]);
    }

    #[test]
    fn duplicate_index_name_conflicts() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        add_schema(&txn, "User", user_fields()).unwrap();
        create_index(&txn, "User", "byName", vec![IndexedField::new("Name", false)], true).unwrap();
        let result = create_index(&txn, "User", "byName", vec![IndexedField::new("Name", false)], true);
        assert!(matches!(result, Err(CoreError::Conflict(_))));
    }

    #[test]
    fn drop_index_removes_the_descriptor() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        add_schema(&txn, "User", user_fields()).unwrap();
        create_index(&txn, "User", "byName", vec![IndexedField::new("Name", false)], true).unwrap();
        drop_index(&txn, "User", "byName").unwrap();
        assert!(get_index(&txn, "User", "byName").is_err());
    }

    #[test]
    fn add_view_records_its_query_source_and_materialized_flag() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        let descriptor =
            add_view(&txn, "ActiveUsers", user_fields(), "query { User(filter: {active: true}) }".into(), true)
                .unwrap();

        assert!(descriptor.is_view());
        assert!(descriptor.is_materialized);
        assert_eq!(descriptor.sources.len(), 1);

        let fetched = get_collection(&txn, "ActiveUsers").unwrap();
        assert_eq!(fetched, descriptor);
    }

    #[test]
    fn a_plain_collection_is_not_a_view() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        let descriptor = add_schema(&txn, "User", user_fields()).unwrap();
        assert!(!descriptor.is_view());
        assert!(descriptor.sources.is_empty());
    }
}
