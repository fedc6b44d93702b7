//! Per-`(DocID, FieldID)` head tracking and remote-block application
//! (spec §3 "Head", §4.4 `ApplyRemoteBlock`, state machine in §4.4).
//!
//! Adapted from `calimero-dag::DagStore` (global single-root DAG with a
//! pending/missing-parents buffer) generalized to: (a) many independent
//! DAGs, one per `(DocID, FieldID)`, and (b) a head *set* rather than a
//! single head, since concurrent writers can fork a field's history.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use defra_primitives::{Cid, DocId};
use tracing::{debug, trace};

use crate::block::{Block, Link};
use crate::store::BlockStore;

pub type FieldKey = (DocId, String);

/// Outcome of `DagStore::apply_block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Stored immediately; this field's head set was updated.
    Applied,
    /// Parents not all known locally yet; buffered until they arrive.
    Pending,
    /// This exact CID was already applied (idempotent re-delivery).
    AlreadyKnown,
}

struct PendingBlock {
    doc_id: DocId,
    field_id: String,
    block: Block,
    received_at: Instant,
}

#[derive(Debug, Default, Clone)]
pub struct PendingStats {
    pub count: usize,
    pub oldest_age_secs: u64,
}

/// Combines a content-addressed `BlockStore` with the head-tracking state
/// machine from spec §4.4.
pub struct DagStore<B> {
    blocks: B,
    heads: HashMap<FieldKey, HashSet<Cid>>,
    pending: HashMap<Cid, PendingBlock>,
}

impl<B: BlockStore> DagStore<B> {
    #[must_use]
    pub fn new(blocks: B) -> Self {
        Self {
            blocks,
            heads: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    #[must_use]
    pub fn block_store(&self) -> &B {
        &self.blocks
    }

    #[must_use]
    pub fn heads_of(&self, doc_id: &DocId, field_id: &str) -> Vec<Cid> {
        self.heads
            .get(&(*doc_id, field_id.to_owned()))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Applies a block under `(doc_id, field_id)`. Idempotent: applying an
    /// already-known CID is a no-op returning `AlreadyKnown` (never an
    /// error — spec §7: "Remote block application never returns a
    /// user-facing error for already-known blocks").
    pub fn apply_block(&mut self, doc_id: DocId, field_id: String, block: Block) -> ApplyOutcome {
        let cid = block.cid();
        if self.blocks.has(&cid) {
            trace!(%cid, "block already known, skipping");
            return ApplyOutcome::AlreadyKnown;
        }

        let missing: Vec<Link> = block
            .links
            .iter()
            .filter(|link| !self.blocks.has(&link.cid))
            .cloned()
            .collect();

        if missing.is_empty() {
            self.apply_ready(doc_id, field_id, block, cid);
            self.drain_pending();
            ApplyOutcome::Applied
        } else {
            debug!(%cid, missing = missing.len(), "block pending missing parents");
            self.pending.insert(
                cid,
                PendingBlock {
                    doc_id,
                    field_id,
                    block,
                    received_at: Instant::now(),
                },
            );
            ApplyOutcome::Pending
        }
    }

    fn apply_ready(&mut self, doc_id: DocId, field_id: String, block: Block, cid: Cid) {
        let key = (doc_id, field_id);
        let parents: HashSet<Cid> = block.links.iter().map(|l| l.cid).collect();
        let heads = self.heads.entry(key).or_default();

        // Every referenced parent stops being a head; the new block takes
        // its place. When the parent set covers every existing head, this
        // collapses them to the single new tip (spec §3: "a commit whose
        // parents cover all existing heads collapses them to the new
        // single tip"). When it only covers some, the heads it doesn't
        // reference are left alone and the new block joins them as a
        // sibling fork.
        for parent in &parents {
            heads.remove(parent);
        }
        heads.insert(cid);

        self.blocks.put(block);
    }

    fn drain_pending(&mut self) {
        loop {
            let ready: Vec<Cid> = self
                .pending
                .iter()
                .filter(|(_, p)| p.block.links.iter().all(|l| self.blocks.has(&l.cid)))
                .map(|(cid, _)| *cid)
                .collect();

            if ready.is_empty() {
                break;
            }

            for cid in ready {
                if let Some(pending) = self.pending.remove(&cid) {
                    self.apply_ready(pending.doc_id, pending.field_id, pending.block, cid);
                }
            }
        }
    }

    /// CIDs referenced by pending blocks that we have not yet seen at all.
    #[must_use]
    pub fn missing_parents(&self) -> Vec<Cid> {
        let mut missing = HashSet::new();
        for pending in self.pending.values() {
            for link in &pending.block.links {
                if !self.blocks.has(&link.cid) {
                    missing.insert(link.cid);
                }
            }
        }
        missing.into_iter().collect()
    }

    /// Evicts pending blocks older than `max_age` (spec §7 `Integrity`:
    /// "missing parent block with no hope of arrival after timeout").
    pub fn evict_stale(&mut self, max_age: Duration) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, pending| pending.received_at.elapsed() <= max_age);
        before - self.pending.len()
    }

    #[must_use]
    pub fn pending_stats(&self) -> PendingStats {
        let oldest = self
            .pending
            .values()
            .map(|p| p.received_at.elapsed())
            .max()
            .unwrap_or(Duration::ZERO);
        PendingStats {
            count: self.pending.len(),
            oldest_age_secs: oldest.as_secs(),
        }
    }

    /// Walks back from `from` to `ancestor` (exclusive), for sync /
    /// `get_deltas_since`-style replication requests.
    #[must_use]
    pub fn blocks_since(&self, from: &[Cid], ancestor: Option<&Cid>) -> Vec<Block> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<Cid> = from.iter().copied().collect();

        while let Some(cid) = queue.pop_front() {
            if !visited.insert(cid) {
                continue;
            }
            if Some(&cid) == ancestor {
                continue;
            }
            if let Some(block) = self.blocks.get(&cid) {
                for link in &block.links {
                    queue.push_back(link.cid);
                }
                result.push(block);
            }
        }
        result
    }
}
