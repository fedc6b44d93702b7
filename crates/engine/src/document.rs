//! The document engine's core operations (spec §4.4): `CreateDoc`,
//! `UpdateDoc`, `DeleteDoc`, `Get` and `ApplyRemoteBlock`. Index
//! maintenance is deliberately not done here — it needs the collection's
//! registered `IndexDescriptor`s, which live one layer up in
//! `crate::collection`, the same separation spec draws between §4.4
//! (Document Engine) and §4.6 (Secondary Indexes).

use std::collections::BTreeMap;

use defra_crdt::{CompositeDelta, DocStatus, LwwDelta, LwwState, SubDelta, COMPOSITE_FIELD_ID};
use defra_dag::Link;
use defra_migration::LensRegistry;
use defra_primitives::cid::{Cid, CODEC_RAW};
use defra_primitives::{CoreError, CoreResult, DocId, Value};
use defra_schema::{CollectionDescriptor, SchemaVersion};
use defra_store::db::{Column, Database};
use defra_store::keyspace::{DataStoreKey, Instance, Key, PrimaryKey};
use defra_store::txn::Txn;
use tracing::debug;

use crate::dag_txn;

fn io_err(err: eyre::Report) -> CoreError {
    CoreError::Io(err.to_string())
}

/// A document as read back from the store: its current schema version
/// (after migrating forward to the collection's active version, if
/// needed) and its live field values (spec §3 "Document").
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub doc_id: DocId,
    pub schema_version_id: String,
    pub fields: BTreeMap<String, Value>,
    pub deleted: bool,
}

fn value_key(col_id: u32, doc_id: DocId, field_id: &str) -> DataStoreKey {
    DataStoreKey { col_id, instance: Instance::Value, doc_id, field_id: field_id.to_owned() }
}

fn priority_key(col_id: u32, doc_id: DocId, field_id: &str) -> DataStoreKey {
    DataStoreKey { col_id, instance: Instance::Priority, doc_id, field_id: field_id.to_owned() }
}

fn deleted_key(col_id: u32, doc_id: DocId, field_id: &str) -> DataStoreKey {
    DataStoreKey { col_id, instance: Instance::Deleted, doc_id, field_id: field_id.to_owned() }
}

/// The `/v/…` payload is `(value, winning_cid)` rather than a bare value:
/// `ApplyRemoteBlock` needs the previous winner's CID to tie-break a
/// same-priority delta (spec §4.3's "lower CID wins") without re-decoding
/// the block store on every merge.
fn write_value<D: Database>(
    txn: &Txn<'_, D>,
    col_id: u32,
    doc_id: DocId,
    field_id: &str,
    value: &Value,
    winning_cid: Cid,
) -> CoreResult<()> {
    let mut buf = Vec::new();
    ciborium::into_writer(&(value, winning_cid), &mut buf)
        .map_err(|e| CoreError::integrity(format!("value encode failure: {e}")))?;
    txn.put(Column::Documents, &value_key(col_id, doc_id, field_id).to_bytes(), &buf)
        .map_err(io_err)
}

pub(crate) fn read_value<D: Database>(txn: &Txn<'_, D>, col_id: u32, doc_id: DocId, field_id: &str) -> CoreResult<Option<Value>> {
    Ok(read_value_and_cid(txn, col_id, doc_id, field_id)?.map(|(value, _)| value))
}

fn read_value_and_cid<D: Database>(
    txn: &Txn<'_, D>,
    col_id: u32,
    doc_id: DocId,
    field_id: &str,
) -> CoreResult<Option<(Value, Cid)>> {
    let bytes = txn.get(Column::Documents, &value_key(col_id, doc_id, field_id).to_bytes()).map_err(io_err)?;
    bytes
        .map(|b| {
            ciborium::from_reader(b.as_slice())
                .map_err(|e| CoreError::integrity(format!("value decode failure: {e}")))
        })
        .transpose()
}

fn write_priority<D: Database>(txn: &Txn<'_, D>, col_id: u32, doc_id: DocId, field_id: &str, priority: u64) -> CoreResult<()> {
    txn.put(Column::Documents, &priority_key(col_id, doc_id, field_id).to_bytes(), &priority.to_be_bytes())
        .map_err(io_err)
}

fn read_priority<D: Database>(txn: &Txn<'_, D>, col_id: u32, doc_id: DocId, field_id: &str) -> CoreResult<u64> {
    let bytes = txn.get(Column::Documents, &priority_key(col_id, doc_id, field_id).to_bytes()).map_err(io_err)?;
    Ok(bytes.map(|b| {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&b);
        u64::from_be_bytes(arr)
    }).unwrap_or(0))
}

fn mark_deleted<D: Database>(txn: &Txn<'_, D>, col_id: u32, doc_id: DocId, field_id: &str) -> CoreResult<()> {
    txn.put(Column::Documents, &deleted_key(col_id, doc_id, field_id).to_bytes(), &[])
        .map_err(io_err)
}

fn is_deleted<D: Database>(txn: &Txn<'_, D>, col_id: u32, doc_id: DocId, field_id: &str) -> CoreResult<bool> {
    txn.has(Column::Documents, &deleted_key(col_id, doc_id, field_id).to_bytes()).map_err(io_err)
}

/// Whether `doc_id` carries the composite register's deleted marker.
/// `crate::collection::get_all_doc_ids` and `create_index`'s backfill both
/// need this to keep a deleted document out of live index scans (spec §3,
/// §4.4) without duplicating the composite-field-id convention here.
pub(crate) fn is_doc_deleted<D: Database>(txn: &Txn<'_, D>, col_id: u32, doc_id: DocId) -> CoreResult<bool> {
    is_deleted(txn, col_id, doc_id, COMPOSITE_FIELD_ID)
}

/// Canonical CBOR bytes of `payload`'s fields, walked in the schema's
/// declared order (spec §4.4 `CreateDoc` step 2, spec §8 "DocID purity").
/// Exposed beyond this module because `defra-backup` needs to predict a
/// document's post-reimport id ahead of actually creating it (spec §4.8).
pub fn canonical_content_bytes(schema: &SchemaVersion, payload: &BTreeMap<String, Value>) -> CoreResult<Vec<u8>> {
    let ordered: Vec<(&str, &Value)> = schema
        .fields
        .iter()
        .filter_map(|f| payload.get(&f.name).map(|v| (f.name.as_str(), v)))
        .collect();
    let mut buf = Vec::new();
    ciborium::into_writer(&ordered, &mut buf)
        .map_err(|e| CoreError::integrity(format!("content encode failure: {e}")))?;
    Ok(buf)
}

/// `CreateDoc` (spec §4.4): type-checks the payload, derives the document's
/// id from its initial content, and commits one LWW delta per field plus a
/// linking composite delta.
pub fn create_doc<D: Database>(
    txn: &Txn<'_, D>,
    collection: &CollectionDescriptor,
    schema: &SchemaVersion,
    payload: BTreeMap<String, Value>,
) -> CoreResult<DocId> {
    schema.type_check(&payload)?;

    let content = canonical_content_bytes(schema, &payload)?;
    let content_cid = Cid::of(CODEC_RAW, &content);
    let doc_id = DocId::new_v0(&content_cid);

    let pk = PrimaryKey { col_id: collection.id, doc_id };
    if txn.has(Column::Documents, &pk.to_bytes()).map_err(io_err)? {
        return Err(CoreError::conflict(format!("document already exists: {doc_id}")));
    }

    let mut sub_deltas = Vec::with_capacity(payload.len());
    for field in &schema.fields {
        let Some(value) = payload.get(&field.name) else { continue };
        let priority = 1u64;
        let delta = LwwDelta::new(schema.id.clone(), field.name.clone(), value.clone(), priority);
        let encoded = delta.encode();
        let cid = dag_txn::commit_local(txn, doc_id, &field.name, &schema.id, encoded.clone(), vec![])?;

        write_value(txn, collection.id, doc_id, &field.name, value, cid)?;
        write_priority(txn, collection.id, doc_id, &field.name, priority)?;
        sub_deltas.push(SubDelta::new(field.name.clone(), encoded, priority));
    }

    let composite = CompositeDelta::new(DocStatus::Active, sub_deltas);
    dag_txn::commit_local(txn, doc_id, COMPOSITE_FIELD_ID, &schema.id, composite.encode(), vec![])?;
    write_priority(txn, collection.id, doc_id, COMPOSITE_FIELD_ID, 1)?;

    txn.put(Column::Documents, &pk.to_bytes(), schema.id.as_bytes()).map_err(io_err)?;
    debug!(%doc_id, collection = %collection.name, "created document");
    Ok(doc_id)
}

/// `UpdateDoc` (spec §4.4): commits a new LWW delta only for the fields
/// present in `patch`, each linking the field's previous heads, plus one
/// composite delta linking the previous composite heads.
pub fn update_doc<D: Database>(
    txn: &Txn<'_, D>,
    collection: &CollectionDescriptor,
    schema: &SchemaVersion,
    doc_id: DocId,
    patch: BTreeMap<String, Value>,
) -> CoreResult<()> {
    schema.type_check(&patch)?;

    let pk = PrimaryKey { col_id: collection.id, doc_id };
    if !txn.has(Column::Documents, &pk.to_bytes()).map_err(io_err)? {
        return Err(CoreError::not_found(format!("document not found: {doc_id}")));
    }

    let mut sub_deltas = Vec::with_capacity(patch.len());
    for (name, value) in &patch {
        let field = schema
            .field(name)
            .ok_or_else(|| CoreError::validation(format!("unknown field: {name}")))?;

        let prior_heads = dag_txn::heads_of(txn, doc_id, &field.name)?;
        let prior_priority = read_priority(txn, collection.id, doc_id, &field.name)?;
        let priority = prior_priority + 1;

        let delta = LwwDelta::new(schema.id.clone(), field.name.clone(), value.clone(), priority);
        let encoded = delta.encode();
        let links: Vec<Link> = prior_heads.into_iter().map(|cid| Link::new(field.name.clone(), cid)).collect();
        let cid = dag_txn::commit_local(txn, doc_id, &field.name, &schema.id, encoded.clone(), links)?;

        write_value(txn, collection.id, doc_id, &field.name, value, cid)?;
        write_priority(txn, collection.id, doc_id, &field.name, priority)?;
        sub_deltas.push(SubDelta::new(field.name.clone(), encoded, priority));
    }

    let composite_heads = dag_txn::heads_of(txn, doc_id, COMPOSITE_FIELD_ID)?;
    let composite_priority = read_priority(txn, collection.id, doc_id, COMPOSITE_FIELD_ID)? + 1;
    let composite = CompositeDelta::new(DocStatus::Active, sub_deltas);
    let composite_links: Vec<Link> =
        composite_heads.into_iter().map(|cid| Link::new(COMPOSITE_FIELD_ID, cid)).collect();
    dag_txn::commit_local(txn, doc_id, COMPOSITE_FIELD_ID, &schema.id, composite.encode(), composite_links)?;
    write_priority(txn, collection.id, doc_id, COMPOSITE_FIELD_ID, composite_priority)?;

    txn.put(Column::Documents, &pk.to_bytes(), schema.id.as_bytes()).map_err(io_err)?;
    debug!(%doc_id, collection = %collection.name, fields = patch.len(), "updated document");
    Ok(())
}

/// `DeleteDoc` (spec §4.4): writes deleted markers for every field and the
/// composite, and commits a composite delta with `status = Deleted`. The
/// DAG history and the primary key entry are preserved; the composite
/// register's deleted marker alone is what makes the document invisible to
/// `Get(showDeleted = false)` and to `GetAllDocIDs` (via
/// `is_doc_deleted`), matching spec §3's requirement that deletion removes
/// a document from live index scans without discarding its history.
pub fn delete_doc<D: Database>(
    txn: &Txn<'_, D>,
    collection: &CollectionDescriptor,
    schema: &SchemaVersion,
    doc_id: DocId,
) -> CoreResult<()> {
    let pk = PrimaryKey { col_id: collection.id, doc_id };
    if !txn.has(Column::Documents, &pk.to_bytes()).map_err(io_err)? {
        return Err(CoreError::not_found(format!("document not found: {doc_id}")));
    }

    for field in &schema.fields {
        mark_deleted(txn, collection.id, doc_id, &field.name)?;
    }
    mark_deleted(txn, collection.id, doc_id, COMPOSITE_FIELD_ID)?;

    let composite_heads = dag_txn::heads_of(txn, doc_id, COMPOSITE_FIELD_ID)?;
    let composite_priority = read_priority(txn, collection.id, doc_id, COMPOSITE_FIELD_ID)? + 1;
    let composite = CompositeDelta::new(DocStatus::Deleted, vec![]);
    let composite_links: Vec<Link> =
        composite_heads.into_iter().map(|cid| Link::new(COMPOSITE_FIELD_ID, cid)).collect();
    dag_txn::commit_local(txn, doc_id, COMPOSITE_FIELD_ID, &schema.id, composite.encode(), composite_links)?;
    write_priority(txn, collection.id, doc_id, COMPOSITE_FIELD_ID, composite_priority)?;

    debug!(%doc_id, collection = %collection.name, "deleted document");
    Ok(())
}

/// `Get` (spec §4.4): reads the primary marker and every field of the
/// *active* schema version, migrating the document forward with
/// `LensRegistry` if it was last written under an older version.
pub fn get<D: Database>(
    txn: &Txn<'_, D>,
    collection: &CollectionDescriptor,
    active_schema: &SchemaVersion,
    lenses: &LensRegistry,
    doc_id: DocId,
    show_deleted: bool,
) -> CoreResult<Document> {
    let pk = PrimaryKey { col_id: collection.id, doc_id };
    let persisted_schema_version_id = txn
        .get(Column::Documents, &pk.to_bytes())
        .map_err(io_err)?
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .ok_or_else(|| CoreError::not_found(format!("document not found: {doc_id}")))?;

    let deleted = is_deleted(txn, collection.id, doc_id, COMPOSITE_FIELD_ID)?;
    if deleted && !show_deleted {
        return Err(CoreError::not_found(format!("document not found: {doc_id}")));
    }

    let persisted_schema = if persisted_schema_version_id == active_schema.id {
        active_schema.clone()
    } else {
        defra_schema::get_schema_version(txn, &persisted_schema_version_id)?
    };

    let mut fields = BTreeMap::new();
    for field in &persisted_schema.fields {
        if is_deleted(txn, collection.id, doc_id, &field.name)? && !show_deleted {
            continue;
        }
        if let Some(value) = read_value(txn, collection.id, doc_id, &field.name)? {
            fields.insert(field.name.clone(), value);
        }
    }

    if persisted_schema_version_id != active_schema.id {
        lenses.migrate_up(
            txn,
            &active_schema.schema_root,
            &persisted_schema_version_id,
            &active_schema.id,
            &mut fields,
        )?;
    }

    Ok(Document { doc_id, schema_version_id: active_schema.id.clone(), fields, deleted })
}

/// `ApplyRemoteBlock` (spec §4.4 bullet 5): merges an incoming field or
/// composite delta using the register algebra incrementally, matching the
/// spec's allowance that "the state can be updated incrementally given the
/// register algebra" rather than replaying full history on every block. The
/// document id is not carried on the block itself (spec §3: a block is
/// scoped by the `(docID, fieldID)` pair it is delivered under) — the p2p
/// transport supplies it out of band, so callers pass it in explicitly.
pub fn apply_remote_block<D: Database>(
    txn: &Txn<'_, D>,
    collection: &CollectionDescriptor,
    doc_id: DocId,
    field_id: &str,
    block: defra_dag::Block,
) -> CoreResult<()> {
    let outcome = dag_txn::apply_remote_block(txn, doc_id, field_id, block.clone())?;
    let cid = match outcome {
        dag_txn::RemoteApplyOutcome::AlreadyKnown => return Ok(()),
        dag_txn::RemoteApplyOutcome::Pending => {
            return Err(CoreError::integrity("block has missing parents and cannot be applied yet"))
        }
        dag_txn::RemoteApplyOutcome::Applied(cid) => cid,
    };

    if field_id == COMPOSITE_FIELD_ID {
        let composite = CompositeDelta::decode(&block.delta)
            .map_err(|e| CoreError::integrity(format!("composite delta decode failure: {e}")))?;

        for sub in &composite.sub_deltas {
            merge_field(txn, collection, doc_id, &sub.field_id, &sub.payload, cid)?;
        }
        if composite.is_deleted() {
            mark_deleted(txn, collection.id, doc_id, COMPOSITE_FIELD_ID)?;
        }
    } else {
        merge_field(txn, collection, doc_id, field_id, &block.delta, cid)?;
    }

    debug!(%doc_id, field = field_id, %cid, "applied remote block");
    Ok(())
}

fn merge_field<D: Database>(
    txn: &Txn<'_, D>,
    collection: &CollectionDescriptor,
    doc_id: DocId,
    field_id: &str,
    payload: &[u8],
    cid: Cid,
) -> CoreResult<()> {
    let delta =
        LwwDelta::decode(payload).map_err(|e| CoreError::integrity(format!("lww delta decode failure: {e}")))?;
    let current_priority = read_priority(txn, collection.id, doc_id, field_id)?;
    let current = read_value_and_cid(txn, collection.id, doc_id, field_id)?
        .map(|(value, winning_cid)| LwwState::new(value, current_priority, winning_cid));

    let merged = defra_crdt::lww::merge(current.as_ref(), delta, cid);
    write_value(txn, collection.id, doc_id, field_id, &merged.value, merged.cid)?;
    write_priority(txn, collection.id, doc_id, field_id, merged.priority)
}
