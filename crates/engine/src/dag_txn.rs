//! Per-`(DocID, FieldID)` head tracking, persisted in the caller's
//! transaction (spec §3 "Head", §4.4 `ApplyRemoteBlock`'s state machine).
//!
//! `defra_dag::heads::DagStore` implements the same algorithm in memory for
//! `defra-dag`'s own tests and for a standalone p2p block-exchange buffer;
//! this module re-derives it against `Column::Blocks`/`Column::Heads` so
//! that block application participates in the enclosing document
//! transaction's snapshot isolation and commit/discard semantics (spec §5).
//! The head-update rule is the same one `DagStore::apply_ready` uses:
//! every parent linked by the new block is dropped from the head set and
//! the new block's CID is inserted, which collapses a merge commit's
//! parents into one tip and leaves a fork's heads untouched otherwise.

use defra_dag::{Block, Link};
use defra_primitives::{Cid, CoreError, CoreResult, DocId};
use defra_store::db::{prefix_end, Column, Database};
use defra_store::keyspace::{HeadKey, HeadPrefix, Key};
use defra_store::txn::Txn;

fn io_err(err: eyre::Report) -> CoreError {
    CoreError::Io(err.to_string())
}

fn block_key(cid: &Cid) -> Vec<u8> {
    cid.to_string().into_bytes()
}

pub fn has_block<D: Database>(txn: &Txn<'_, D>, cid: &Cid) -> CoreResult<bool> {
    txn.has(Column::Blocks, &block_key(cid)).map_err(io_err)
}

pub fn get_block<D: Database>(txn: &Txn<'_, D>, cid: &Cid) -> CoreResult<Option<Block>> {
    let bytes = txn.get(Column::Blocks, &block_key(cid)).map_err(io_err)?;
    bytes
        .map(|b| {
            ciborium::from_reader(b.as_slice())
                .map_err(|e| CoreError::integrity(format!("block decode failure: {e}")))
        })
        .transpose()
}

fn put_block<D: Database>(txn: &Txn<'_, D>, block: &Block) -> CoreResult<Cid> {
    let cid = block.cid();
    let mut buf = Vec::new();
    ciborium::into_writer(block, &mut buf)
        .map_err(|e| CoreError::integrity(format!("block encode failure: {e}")))?;
    txn.put(Column::Blocks, &block_key(&cid), &buf).map_err(io_err)?;
    Ok(cid)
}

/// The current head set for `(doc_id, field_id)`, decoded back from the
/// `/<docID>/<fieldID>/<cid>` key tail via `Cid::FromStr`.
pub fn heads_of<D: Database>(txn: &Txn<'_, D>, doc_id: DocId, field_id: &str) -> CoreResult<Vec<Cid>> {
    let prefix = HeadPrefix { doc_id, field_id: field_id.to_owned() }.to_bytes();
    let end = prefix_end(&prefix);
    let rows = txn.scan(Column::Heads, &prefix, Some(&end)).map_err(io_err)?;
    rows.into_iter()
        .map(|(key, _)| {
            let key_str =
                String::from_utf8(key).map_err(|_| CoreError::integrity("head key is not utf-8"))?;
            let cid_str = key_str
                .rsplit('/')
                .next()
                .ok_or_else(|| CoreError::integrity("malformed head key"))?;
            cid_str
                .parse::<Cid>()
                .map_err(|e| CoreError::integrity(format!("malformed head cid: {e}")))
        })
        .collect()
}

fn block_height<D: Database>(txn: &Txn<'_, D>, cid: &Cid) -> CoreResult<u64> {
    get_block(txn, cid)?
        .map(|b| b.height)
        .ok_or_else(|| CoreError::integrity(format!("head references unknown block {cid}")))
}

fn update_heads<D: Database>(
    txn: &Txn<'_, D>,
    doc_id: DocId,
    field_id: &str,
    parents: &[Link],
    new_cid: Cid,
    new_height: u64,
) -> CoreResult<()> {
    for link in parents {
        let key = HeadKey { doc_id, field_id: field_id.to_owned(), cid: link.cid.to_string() };
        txn.delete(Column::Heads, &key.to_bytes()).map_err(io_err)?;
    }
    let key = HeadKey { doc_id, field_id: field_id.to_owned(), cid: new_cid.to_string() };
    txn.put(Column::Heads, &key.to_bytes(), &new_height.to_be_bytes())
        .map_err(io_err)
}

/// Commits a block produced locally: `links` must already be known blocks
/// (true by construction — they are always either empty, for a document's
/// first commit, or this field's own current heads). Returns the new
/// block's CID, which also becomes the field's sole head if it subsumes
/// every prior head.
pub fn commit_local<D: Database>(
    txn: &Txn<'_, D>,
    doc_id: DocId,
    field_id: &str,
    schema_version_id: &str,
    payload: Vec<u8>,
    links: Vec<Link>,
) -> CoreResult<Cid> {
    let mut heights = Vec::with_capacity(links.len());
    for link in &links {
        heights.push(block_height(txn, &link.cid)?);
    }
    let block = Block::new(schema_version_id, field_id, payload, links.clone(), &heights);
    let cid = put_block(txn, &block)?;
    update_heads(txn, doc_id, field_id, &links, cid, block.height)?;
    Ok(cid)
}

/// Outcome of applying a remotely-delivered block (spec §4.4
/// `ApplyRemoteBlock`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApplyOutcome {
    /// Persisted and the head set for this field was updated.
    Applied(Cid),
    /// Not all parent links are known locally yet. The caller (the p2p
    /// layer) is responsible for re-delivering once the missing parents
    /// arrive; this layer does not buffer across transactions.
    Pending,
    /// This exact CID was already applied (spec §7: "never returns a
    /// user-facing error for already-known blocks").
    AlreadyKnown,
}

/// Applies a block delivered from a remote peer. Idempotent and safe under
/// any delivery order of the blocks that are actually ready (spec §8
/// "Idempotence").
pub fn apply_remote_block<D: Database>(
    txn: &Txn<'_, D>,
    doc_id: DocId,
    field_id: &str,
    block: Block,
) -> CoreResult<RemoteApplyOutcome> {
    let cid = block.cid();
    if has_block(txn, &cid)? {
        return Ok(RemoteApplyOutcome::AlreadyKnown);
    }

    for link in &block.links {
        if !has_block(txn, &link.cid)? {
            return Ok(RemoteApplyOutcome::Pending);
        }
    }

    put_block(txn, &block)?;
    update_heads(txn, doc_id, field_id, &block.links, cid, block.height)?;
    Ok(RemoteApplyOutcome::Applied(cid))
}
