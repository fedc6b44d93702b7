//! Snapshot-isolated, optimistically-committed transactions (spec §5).
//!
//! Every externally visible document-engine operation runs inside one of
//! these. Reads see a consistent snapshot taken at transaction start;
//! writes are buffered locally and only become visible on a successful
//! `commit`, which fails with a conflict if anything the transaction read
//! or wrote was modified by a transaction that committed in the meantime.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use eyre::{eyre, Result};
use strum::IntoEnumIterator;
use tracing::{debug, instrument};

use crate::db::{Column, Database};
use crate::slice::Slice;

type CommitHook = Box<dyn FnOnce() + Send>;
type ErrorHook = Box<dyn FnOnce(&eyre::Report) + Send>;

/// Shared store state: the backend plus the bookkeeping needed for
/// optimistic concurrency control across all of its transactions.
pub struct Store<D> {
    db: D,
    /// Last commit version that touched each key.
    versions: Mutex<HashMap<(Column, Vec<u8>), u64>>,
    commit_counter: AtomicU64,
}

impl<D: Database> Store<D> {
    pub fn new(db: D) -> Self {
        Self {
            db,
            versions: Mutex::new(HashMap::new()),
            commit_counter: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn database(&self) -> &D {
        &self.db
    }

    /// Snapshots every column up front, at the exact `start_version` this
    /// transaction is pinned to. Populating a column's snapshot lazily on
    /// first touch (as `ensure_snapshot` used to) would let a column
    /// scanned late in a long transaction pick up writes committed by
    /// other transactions strictly after `start_version`, silently
    /// breaking snapshot isolation for that column.
    #[must_use]
    pub fn new_txn(&self, read_only: bool) -> Txn<'_, D> {
        let mut snapshot = HashMap::new();
        for column in Column::iter() {
            let rows = self.db.scan(column, Slice::from(&[][..]), None).unwrap_or_default();
            let map: BTreeMap<Vec<u8>, Vec<u8>> =
                rows.into_iter().map(|(k, v)| (k.into_vec(), v.into_vec())).collect();
            snapshot.insert(column, map);
        }

        Txn {
            store: self,
            read_only,
            start_version: self.commit_counter.load(Ordering::SeqCst),
            snapshot: RefCell::new(snapshot),
            writes: RefCell::new(BTreeMap::new()),
            reads: RefCell::new(HashSet::new()),
            scanned_ranges: RefCell::new(Vec::new()),
            on_success: RefCell::new(Vec::new()),
            on_error: RefCell::new(Vec::new()),
            on_discard: RefCell::new(Vec::new()),
            done: RefCell::new(false),
        }
    }
}

/// Opens a `Store` over a fresh or existing backend instance.
pub trait Backend: Database + Sized {
    fn open(config: &crate::config::StoreConfig) -> Result<Self>;
}

impl<D: Backend> Store<D> {
    pub fn open(config: &crate::config::StoreConfig) -> Result<Self> {
        Ok(Self::new(D::open(config)?))
    }
}

pub struct Txn<'s, D> {
    store: &'s Store<D>,
    read_only: bool,
    start_version: u64,
    snapshot: RefCell<HashMap<Column, BTreeMap<Vec<u8>, Vec<u8>>>>,
    writes: RefCell<BTreeMap<(Column, Vec<u8>), Option<Vec<u8>>>>,
    reads: RefCell<HashSet<(Column, Vec<u8>)>>,
    /// `(column, start, end)` bounds of every `scan` this transaction has
    /// run, so `commit` can detect a phantom insert — a key that didn't
    /// exist (and so isn't in `reads`) when the range was scanned, but
    /// that a concurrent transaction committed into that same range
    /// before this one commits.
    scanned_ranges: RefCell<Vec<(Column, Vec<u8>, Option<Vec<u8>>)>>,
    on_success: RefCell<Vec<CommitHook>>,
    on_error: RefCell<Vec<ErrorHook>>,
    on_discard: RefCell<Vec<CommitHook>>,
    done: RefCell<bool>,
}

impl<'s, D: Database> Txn<'s, D> {
    pub fn has(&self, column: Column, key: &[u8]) -> Result<bool> {
        Ok(self.get(column, key)?.is_some())
    }

    pub fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.reads.borrow_mut().insert((column, key.to_vec()));
        if let Some(write) = self.writes.borrow().get(&(column, key.to_vec())) {
            return Ok(write.clone());
        }
        Ok(self
            .snapshot
            .borrow()
            .get(&column)
            .and_then(|m| m.get(key))
            .cloned())
    }

    pub fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(eyre!("cannot write in a read-only transaction"));
        }
        self.writes
            .borrow_mut()
            .insert((column, key.to_vec()), Some(value.to_vec()));
        Ok(())
    }

    pub fn delete(&self, column: Column, key: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(eyre!("cannot write in a read-only transaction"));
        }
        self.writes.borrow_mut().insert((column, key.to_vec()), None);
        Ok(())
    }

    /// Lexicographic scan over `[start, end)`, combining the transaction's
    /// buffered writes over the snapshot taken at transaction start.
    ///
    /// Every key returned is recorded into `reads` (matching `get`'s own
    /// read-tracking) and the `[start, end)` bound itself is recorded into
    /// `scanned_ranges`, so `commit` can catch both a returned row being
    /// modified and a new row being inserted into the scanned range by a
    /// transaction that commits concurrently.
    pub fn scan(
        &self,
        column: Column,
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .snapshot
            .borrow()
            .get(&column)
            .cloned()
            .unwrap_or_default();

        for ((col, key), value) in self.writes.borrow().iter() {
            if *col != column {
                continue;
            }
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        let in_range = |k: &[u8]| k >= start && end.map_or(true, |e| k < e);
        let rows: Vec<(Vec<u8>, Vec<u8>)> = merged.into_iter().filter(|(k, _)| in_range(k)).collect();

        let mut reads = self.reads.borrow_mut();
        for (key, _) in &rows {
            reads.insert((column, key.clone()));
        }
        drop(reads);
        self.scanned_ranges.borrow_mut().push((column, start.to_vec(), end.map(<[u8]>::to_vec)));

        Ok(rows)
    }

    pub fn on_success(&self, hook: impl FnOnce() + Send + 'static) {
        self.on_success.borrow_mut().push(Box::new(hook));
    }

    pub fn on_error(&self, hook: impl FnOnce(&eyre::Report) + Send + 'static) {
        self.on_error.borrow_mut().push(Box::new(hook));
    }

    pub fn on_discard(&self, hook: impl FnOnce() + Send + 'static) {
        self.on_discard.borrow_mut().push(Box::new(hook));
    }

    /// Validates the read/write set against concurrent commits, then
    /// atomically applies the buffered writes. Returns a conflict error
    /// (spec §7 `Conflict`, `ConflictWithConcurrentTxn`) without mutating
    /// anything if validation fails.
    #[instrument(level = "debug", skip(self))]
    pub fn commit(self) -> Result<()> {
        let mut versions = self.store.versions.lock().unwrap();

        let touched: HashSet<(Column, Vec<u8>)> = self
            .reads
            .borrow()
            .iter()
            .cloned()
            .chain(self.writes.borrow().keys().cloned())
            .collect();

        for key in &touched {
            if let Some(&version) = versions.get(key) {
                if version > self.start_version {
                    drop(versions);
                    let err = eyre!("ConflictWithConcurrentTxn: key modified since snapshot");
                    for hook in self.on_error.borrow_mut().drain(..) {
                        hook(&err);
                    }
                    *self.done.borrow_mut() = true;
                    return Err(err);
                }
            }
        }

        // Phantom-read check: a key neither read nor written by this
        // transaction, but that falls inside a range it scanned, and that
        // a concurrent transaction committed after our snapshot.
        for (scanned_column, start, end) in self.scanned_ranges.borrow().iter() {
            let in_range = |k: &[u8]| k >= start.as_slice() && end.as_deref().map_or(true, |e| k < e);
            for ((column, key), &version) in versions.iter() {
                if column == scanned_column && version > self.start_version && in_range(key) {
                    drop(versions);
                    let err = eyre!("ConflictWithConcurrentTxn: new row in scanned range since snapshot");
                    for hook in self.on_error.borrow_mut().drain(..) {
                        hook(&err);
                    }
                    *self.done.borrow_mut() = true;
                    return Err(err);
                }
            }
        }

        let new_version = self.store.commit_counter.fetch_add(1, Ordering::SeqCst) + 1;
        for ((column, key), value) in self.writes.borrow().iter() {
            match value {
                Some(v) => self.store.db.put(*column, Slice::from(key.as_slice()), Slice::from(v.as_slice()))?,
                None => self.store.db.delete(*column, Slice::from(key.as_slice()))?,
            }
            versions.insert((*column, key.clone()), new_version);
        }
        drop(versions);

        debug!(writes = self.writes.borrow().len(), "committed transaction");
        *self.done.borrow_mut() = true;
        for hook in self.on_success.borrow_mut().drain(..) {
            hook();
        }
        Ok(())
    }

    /// Drops every buffered write. No partial state is ever observable
    /// because writes are never applied until `commit` succeeds.
    pub fn discard(self) {
        *self.done.borrow_mut() = true;
        for hook in self.on_discard.borrow_mut().drain(..) {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDb;

    #[test]
    fn read_your_own_writes() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        txn.put(Column::Documents, b"k", b"v1").unwrap();
        assert_eq!(txn.get(Column::Documents, b"k").unwrap(), Some(b"v1".to_vec()));
        txn.commit().unwrap();

        let txn2 = store.new_txn(false);
        assert_eq!(txn2.get(Column::Documents, b"k").unwrap(), Some(b"v1".to_vec()));
    }

    #[test]
    fn concurrent_writers_conflict_on_commit() {
        let store = Store::new(InMemoryDb::new());

        let txn_a = store.new_txn(false);
        let txn_b = store.new_txn(false);

        txn_a.put(Column::Documents, b"k", b"a").unwrap();
        txn_a.commit().unwrap();

        // txn_b started before txn_a committed, reads the old snapshot,
        // and also writes the same key: it must lose at commit time.
        txn_b.get(Column::Documents, b"k").unwrap();
        txn_b.put(Column::Documents, b"k", b"b").unwrap();
        let result = txn_b.commit();
        assert!(result.is_err());
    }

    #[test]
    fn discard_never_applies_writes() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        txn.put(Column::Documents, b"k", b"v").unwrap();
        txn.discard();

        let check = store.new_txn(true);
        assert_eq!(check.get(Column::Documents, b"k").unwrap(), None);
    }

    #[test]
    fn scan_overlays_local_writes_on_snapshot() {
        let store = Store::new(InMemoryDb::new());
        let setup = store.new_txn(false);
        setup.put(Column::Documents, b"/a/1", b"x").unwrap();
        setup.commit().unwrap();

        let txn = store.new_txn(false);
        txn.put(Column::Documents, b"/a/2", b"y").unwrap();
        txn.delete(Column::Documents, b"/a/1").unwrap();

        let rows = txn.scan(Column::Documents, b"/a/", Some(&crate::db::prefix_end(b"/a/"))).unwrap();
        assert_eq!(rows, vec![(b"/a/2".to_vec(), b"y".to_vec())]);
    }

    #[test]
    fn a_scan_detects_a_phantom_insert_at_commit() {
        let store = Store::new(InMemoryDb::new());
        let txn_a = store.new_txn(false);
        let txn_b = store.new_txn(false);

        // txn_b scans the range before txn_a inserts a new row into it.
        let end = crate::db::prefix_end(b"/a/");
        assert!(txn_b.scan(Column::Documents, b"/a/", Some(&end)).unwrap().is_empty());

        txn_a.put(Column::Documents, b"/a/1", b"new").unwrap();
        txn_a.commit().unwrap();

        txn_b.put(Column::Documents, b"/other", b"x").unwrap();
        assert!(txn_b.commit().is_err());
    }

    #[test]
    fn a_scan_that_sees_no_later_writes_commits_cleanly() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);

        let end = crate::db::prefix_end(b"/a/");
        assert!(txn.scan(Column::Documents, b"/a/", Some(&end)).unwrap().is_empty());
        txn.put(Column::Documents, b"/other", b"x").unwrap();
        assert!(txn.commit().is_ok());
    }

    #[test]
    fn on_success_hook_runs_after_commit() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran2 = ran.clone();
        txn.on_success(move || ran2.store(true, Ordering::SeqCst));
        txn.commit().unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }
}
