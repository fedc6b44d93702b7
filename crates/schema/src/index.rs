//! Secondary index key construction and maintenance (spec §4.6). Layered
//! directly on `defra_crdt::encoding`'s order-preserving field encoding
//! and `defra_store`'s keyspace, independent of the document engine above
//! it.

use defra_crdt::encoding::encode_field_value;
use defra_primitives::{CoreError, CoreResult, DocId, Value};
use defra_store::db::{prefix_end, Column, Database};
use defra_store::keyspace::{IndexEntryKey, Key};
use defra_store::txn::Txn;

use crate::types::IndexDescriptor;

fn io_err(err: eyre::Report) -> CoreError {
    CoreError::Io(err.to_string())
}

/// Encodes one field tuple in the order and direction the index declares
/// (spec §4.6: "Composite indexes order by the declared field sequence;
/// descending fields invert only that field's bytes").
pub fn encode_tuple(desc: &IndexDescriptor, values: &[&Value]) -> CoreResult<Vec<Vec<u8>>> {
    if values.len() != desc.fields.len() {
        return Err(CoreError::validation("index tuple arity mismatch"));
    }
    desc.fields
        .iter()
        .zip(values)
        .map(|(field, value)| {
            encode_field_value(value, field.descending)
                .map_err(|e| CoreError::validation(format!("field {}: {e}", field.field_name)))
        })
        .collect()
}

fn entry_key(col_id: u32, desc: &IndexDescriptor, encoded: Vec<Vec<u8>>, doc_id: DocId) -> IndexEntryKey {
    IndexEntryKey {
        col_id,
        index_id: desc.id,
        encoded_fields: encoded,
        // Unique indexes need no doc id suffix: the tuple alone is the
        // key, and its presence is the uniqueness check. Non-unique
        // indexes suffix the doc id so multiple documents can share a
        // tuple.
        doc_id: if desc.unique { None } else { Some(doc_id) },
    }
}

/// Inserts one index entry for `doc_id`. For a unique index, fails with
/// `Conflict` if the tuple is already present (spec §4.6, §8 scenario 3).
pub fn insert_entry<D: Database>(
    txn: &Txn<'_, D>,
    col_id: u32,
    desc: &IndexDescriptor,
    encoded: Vec<Vec<u8>>,
    doc_id: DocId,
) -> CoreResult<()> {
    let key = entry_key(col_id, desc, encoded, doc_id);
    let bytes = key.to_bytes();

    if desc.unique && txn.has(Column::Indexes, &bytes).map_err(io_err)? {
        return Err(CoreError::conflict(format!(
            "unique index violation on {}",
            desc.name
        )));
    }

    let value = if desc.unique { doc_id.to_string().into_bytes() } else { Vec::new() };
    txn.put(Column::Indexes, &bytes, &value).map_err(io_err)
}

pub fn delete_entry<D: Database>(
    txn: &Txn<'_, D>,
    col_id: u32,
    desc: &IndexDescriptor,
    encoded: Vec<Vec<u8>>,
    doc_id: DocId,
) -> CoreResult<()> {
    let key = entry_key(col_id, desc, encoded, doc_id);
    txn.delete(Column::Indexes, &key.to_bytes()).map_err(io_err)
}

/// Removes every entry under `/<col_id>/<index_id>/` (spec §4.6 "Drop").
pub fn drop_all_entries<D: Database>(txn: &Txn<'_, D>, col_id: u32, index_id: u32) -> CoreResult<()> {
    let prefix = format!("/{col_id}/{index_id}/").into_bytes();
    let end = prefix_end(&prefix);
    let rows = txn.scan(Column::Indexes, &prefix, Some(&end)).map_err(io_err)?;
    for (key, _) in rows {
        txn.delete(Column::Indexes, &key).map_err(io_err)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IndexedField;
    use defra_primitives::cid::{Cid, CODEC_DAG_CBOR};
    use defra_store::memory::InMemoryDb;
    use defra_store::txn::Store;

    fn doc(tag: &[u8]) -> DocId {
        DocId::new_v0(&Cid::of(CODEC_DAG_CBOR, tag))
    }

    fn unique_name_index() -> IndexDescriptor {
        IndexDescriptor {
            id: 1,
            name: "byName".into(),
            fields: vec![IndexedField::new("name", false)],
            unique: true,
        }
    }

    #[test]
    fn unique_index_rejects_duplicate_tuple() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        let desc = unique_name_index();

        let a = Value::String("A".into());
        let b = Value::String("B".into());
        let encoded_a = encode_tuple(&desc, &[&a]).unwrap();
        insert_entry(&txn, 1, &desc, encoded_a, doc(b"a")).unwrap();

        let encoded_b1 = encode_tuple(&desc, &[&b]).unwrap();
        insert_entry(&txn, 1, &desc, encoded_b1, doc(b"b")).unwrap();

        // A second document with the same value as the first insert's
        // "B" now conflicts.
        let encoded_b2 = encode_tuple(&desc, &[&b]).unwrap();
        let result = insert_entry(&txn, 1, &desc, encoded_b2, doc(b"c"));
        assert!(matches!(result, Err(CoreError::Conflict(_))));
    }

    #[test]
    fn delete_then_reinsert_is_allowed() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        let desc = unique_name_index();
        let value = Value::String("A".into());

        let encoded = encode_tuple(&desc, &[&value]).unwrap();
        insert_entry(&txn, 1, &desc, encoded.clone(), doc(b"a")).unwrap();
        delete_entry(&txn, 1, &desc, encoded.clone(), doc(b"a")).unwrap();
        insert_entry(&txn, 1, &desc, encoded, doc(b"b")).unwrap();
    }

    #[test]
    fn drop_all_entries_clears_the_index() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        let desc = unique_name_index();

        for (tag, name) in [(b"a".as_slice(), "A"), (b"b".as_slice(), "B")] {
            let value = Value::String(name.into());
            let encoded = encode_tuple(&desc, &[&value]).unwrap();
            insert_entry(&txn, 1, &desc, encoded, doc(tag)).unwrap();
        }

        drop_all_entries(&txn, 1, desc.id).unwrap();
        let rows = txn.scan(Column::Indexes, b"/1/1/", None).unwrap();
        assert!(rows.is_empty());
    }
}
