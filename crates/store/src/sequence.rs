//! `/seq/<name>` global sequences (Design Note §9): a small counter
//! service per sequence name, read-modify-write inside the caller's
//! enclosing transaction so the increment participates in the same
//! snapshot-isolated commit.

use eyre::Result;

use crate::db::Column;
use crate::keyspace::{Key, SeqKey};
use crate::txn::Txn;

/// Returns the next value of the named sequence, starting at 1, and
/// persists the increment in `txn`'s write-set.
pub fn next_value<D>(txn: &Txn<'_, D>, name: &str) -> Result<u64>
where
    D: crate::db::Database,
{
    let key = SeqKey(name.to_owned());
    let bytes = key.to_bytes();
    let current = txn
        .get(Column::Sequences, &bytes)?
        .map(|v| {
            let mut arr = [0u8; 8];
            arr.copy_from_slice(&v);
            u64::from_be_bytes(arr)
        })
        .unwrap_or(0);
    let next = current + 1;
    txn.put(Column::Sequences, &bytes, &next.to_be_bytes())?;
    Ok(next)
}
