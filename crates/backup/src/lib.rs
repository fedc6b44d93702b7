//! Backup and restore (spec §4.8, §6 "Backup file format"). Grounded on
//! `db/backup.go`'s `basicExport`/`basicImport`: a single JSON object
//! keyed by collection name, each value an array of documents carrying
//! both `_docID` (the id at export time) and `_docIDNew` (the id the
//! document will have once re-created from its content on import).
//!
//! `db/backup.go` resolves a `FOREIGN_OBJECT` field's *target* collection
//! by name (`field.Schema`) and therefore rewrites references across any
//! pair of exported collections. This crate's `FieldDescriptor` carries no
//! target-collection metadata — spec §4.8 itself only ever talks about
//! *self*-referencing foreign keys — so rewriting here is scoped to
//! references that stay within the same collection being exported
//! (documented as a deliberate narrowing in `DESIGN.md`).

use std::collections::{BTreeMap, HashMap};
use std::io::Write;

use defra_engine::cancel::CancellationToken;
use defra_engine::canonical_content_bytes;
use defra_engine::collection as doc_ops;
use defra_migration::LensRegistry;
use defra_primitives::cid::{Cid, CODEC_RAW};
use defra_primitives::{CoreError, CoreResult, DocId, Value};
use defra_schema::{CollectionDescriptor, FieldKind, SchemaVersion};
use defra_store::db::Database;
use defra_store::txn::Txn;
use tracing::debug;

const DOC_ID_FIELD: &str = "_docID";
const NEW_DOC_ID_FIELD: &str = "_docIDNew";

fn write_token<W: Write>(out: &mut W, compact: &str, pretty_str: &str, pretty: bool) -> CoreResult<()> {
    out.write_all(if pretty { pretty_str } else { compact }.as_bytes())?;
    Ok(())
}

fn foreign_object_fields(schema: &SchemaVersion) -> impl Iterator<Item = &str> {
    schema.fields.iter().filter(|f| f.kind == FieldKind::ForeignObject).map(|f| f.name.as_str())
}

/// Predicts the DocID a document would get if re-created from `fields`,
/// treating `drop_field` (if given) as absent — the same trick
/// `CreateDoc` doesn't need but backup does, since the real id can only
/// be known once every forward reference is resolved (spec §4.8).
fn predict_doc_id(schema: &SchemaVersion, fields: &BTreeMap<String, Value>, drop_field: Option<&str>) -> CoreResult<DocId> {
    let mut reduced = fields.clone();
    if let Some(name) = drop_field {
        reduced.remove(name);
    }
    let content = canonical_content_bytes(schema, &reduced)?;
    Ok(DocId::new_v0(&Cid::of(CODEC_RAW, &content)))
}

/// Streams one collection's documents as the JSON array body (without the
/// surrounding `"name": [ ... ]`) directly to `out`, one document at a
/// time, so a large collection never needs its full export buffered in
/// memory.
fn export_collection<D: Database, W: Write>(
    txn: &Txn<'_, D>,
    collection: &CollectionDescriptor,
    schema: &SchemaVersion,
    lenses: &LensRegistry,
    pretty: bool,
    key_change_cache: &mut HashMap<String, String>,
    out: &mut W,
) -> CoreResult<()> {
    let cancel = CancellationToken::new();
    let doc_ids = defra_engine::get_all_doc_ids(txn, collection, &cancel)?;

    let mut written = 0usize;
    for doc_id in doc_ids {
        let doc = match defra_engine::get(txn, collection, schema, lenses, doc_id, false) {
            Ok(doc) => doc,
            // A document deleted between the `GetAllDocIDs` scan and this
            // read is no longer live; skip it rather than aborting the
            // whole collection's export over one stale id.
            Err(CoreError::NotFound(_)) => continue,
            Err(e) => return Err(e),
        };

        if written > 0 {
            write_token(out, ",", ",\n", pretty)?;
        }
        written += 1;

        let mut fields = doc.fields;
        let old_id_str = doc_id.to_string();

        let mut self_ref_field = None;
        for field_name in foreign_object_fields(schema) {
            let Some(Value::String(ref_id_str)) = fields.get(field_name).cloned() else { continue };

            if ref_id_str == old_id_str {
                self_ref_field = Some(field_name.to_owned());
                continue;
            }

            if let Some(new_id) = key_change_cache.get(&ref_id_str) {
                fields.insert(field_name.to_owned(), Value::String(new_id.clone()));
                continue;
            }

            // Not yet visited by this loop (the referenced document sorts
            // after this one) — predict its id on the spot and cache it,
            // mirroring `db/backup.go`'s on-demand foreign lookup.
            if let Ok(ref_doc_id) = ref_id_str.parse::<DocId>() {
                if let Ok(ref_doc) = defra_engine::get(txn, collection, schema, lenses, ref_doc_id, false) {
                    let ref_self_ref = foreign_object_fields(schema)
                        .find(|f| matches!(ref_doc.fields.get(*f), Some(Value::String(v)) if v == &ref_id_str))
                        .map(str::to_owned);
                    let predicted = predict_doc_id(schema, &ref_doc.fields, ref_self_ref.as_deref())?;
                    fields.insert(field_name.to_owned(), Value::String(predicted.to_string()));
                    if predicted != ref_doc_id {
                        key_change_cache.insert(ref_id_str, predicted.to_string());
                    }
                }
            }
        }

        let new_doc_id = predict_doc_id(schema, &fields, self_ref_field.as_deref())?;
        if let Some(field_name) = &self_ref_field {
            fields.insert(field_name.clone(), Value::String(new_doc_id.to_string()));
        }
        if new_doc_id != doc_id {
            key_change_cache.insert(old_id_str.clone(), new_doc_id.to_string());
        }

        fields.insert(DOC_ID_FIELD.to_owned(), Value::String(old_id_str));
        fields.insert(NEW_DOC_ID_FIELD.to_owned(), Value::String(new_doc_id.to_string()));

        let json = Value::Object(fields).to_json();
        let bytes = if pretty {
            out.write_all(b"    ")?;
            serde_json::to_vec_pretty(&json)
        } else {
            serde_json::to_vec(&json)
        }
        .map_err(|e| CoreError::integrity(format!("backup document encode failure: {e}")))?;
        out.write_all(&bytes)?;
    }
    Ok(())
}

/// `Export` (spec §4.8): one JSON object keyed by collection name.
pub fn export_stream<D: Database, W: Write>(
    txn: &Txn<'_, D>,
    collections: &[(CollectionDescriptor, SchemaVersion)],
    lenses: &LensRegistry,
    pretty: bool,
    out: &mut W,
) -> CoreResult<()> {
    let mut key_change_cache = HashMap::new();
    write_token(out, "{", "{\n", pretty)?;

    for (i, (collection, schema)) in collections.iter().enumerate() {
        if i > 0 {
            write_token(out, ",", ",\n", pretty)?;
        }
        write_token(
            out,
            &format!("\"{}\":[", collection.name),
            &format!("  \"{}\": [\n", collection.name),
            pretty,
        )?;
        export_collection(txn, collection, schema, lenses, pretty, &mut key_change_cache, out)?;
        write_token(out, "]", "\n  ]", pretty)?;
        debug!(collection = %collection.name, "exported collection");
    }

    write_token(out, "}", "\n}", pretty)
}

/// `Import` (spec §4.8): parses the whole backup object, re-creates every
/// document and patches in deferred self-references with a second write.
/// `resolve` looks up a collection and its active schema version by name
/// — the caller already owns that registry lookup (`defra_schema`), so
/// this crate doesn't need its own handle to it.
pub fn import_stream<D: Database, R: std::io::Read>(
    txn: &Txn<'_, D>,
    resolve: impl Fn(&str) -> CoreResult<(CollectionDescriptor, SchemaVersion)>,
    reader: R,
) -> CoreResult<()> {
    let root: BTreeMap<String, Vec<serde_json::Value>> = serde_json::from_reader(reader)
        .map_err(|e| CoreError::integrity(format!("backup decode failure: {e}")))?;

    for (collection_name, docs) in root {
        let (collection, schema) = resolve(&collection_name)?;

        for doc_json in docs {
            let mut fields = match Value::from_json(&doc_json)? {
                Value::Object(map) => map,
                _ => return Err(CoreError::integrity("backup document is not a JSON object")),
            };

            let new_doc_id = fields.remove(NEW_DOC_ID_FIELD);
            fields.remove(DOC_ID_FIELD);

            let mut deferred = Vec::new();
            for field_name in foreign_object_fields(&schema) {
                if let (Some(value), Some(expected)) = (fields.get(field_name), &new_doc_id) {
                    if value == expected {
                        deferred.push((field_name.to_owned(), value.clone()));
                    }
                }
            }
            for (name, _) in &deferred {
                fields.remove(name);
            }

            let doc_id = doc_ops::create(txn, &collection, &schema, fields)?;
            for (name, value) in deferred {
                let mut patch = BTreeMap::new();
                patch.insert(name, value);
                doc_ops::update(txn, &collection, &schema, doc_id, patch)?;
            }
        }

        debug!(collection = %collection_name, "imported collection");
    }
    Ok(())
}
