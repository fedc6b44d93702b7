//! Content-addressed block storage. The production backend persists
//! blocks under `Column::Blocks` in `defra-store`; the in-memory
//! implementation here is used for unit tests in this crate and is a
//! faithful drop-in of the real semantics (idempotent `put`).

use std::collections::HashMap;
use std::sync::RwLock;

use defra_primitives::Cid;

use crate::block::Block;

pub trait BlockStore {
    /// Stores `block`, returning its CID. Storing an already-known CID is
    /// a no-op (spec §4.4: "Idempotent: inserting an existing CID is a
    /// no-op").
    fn put(&self, block: Block) -> Cid;

    fn get(&self, cid: &Cid) -> Option<Block>;

    fn has(&self, cid: &Cid) -> bool;
}

#[derive(Debug, Default)]
pub struct InMemoryBlockStore {
    blocks: RwLock<HashMap<Cid, Block>>,
}

impl InMemoryBlockStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockStore for InMemoryBlockStore {
    fn put(&self, block: Block) -> Cid {
        let cid = block.cid();
        self.blocks.write().unwrap().entry(cid).or_insert(block);
        cid
    }

    fn get(&self, cid: &Cid) -> Option<Block> {
        self.blocks.read().unwrap().get(cid).cloned()
    }

    fn has(&self, cid: &Cid) -> bool {
        self.blocks.read().unwrap().contains_key(cid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;

    #[test]
    fn put_is_idempotent_for_identical_content() {
        let store = InMemoryBlockStore::new();
        let block = Block::new("sv1", "name", vec![1], vec![], &[]);
        let cid1 = store.put(block.clone());
        let cid2 = store.put(block);
        assert_eq!(cid1, cid2);
        assert!(store.has(&cid1));
    }
}
