//! Persistent `Database` backend over `rocksdb`, one column family per
//! `defra_store::Column`. The in-memory backend in `defra-store` is the
//! default for tests; this crate is what a deployed node opens against a
//! data directory.

use std::path::Path;

use eyre::{eyre, Result};
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, DB};
use strum::IntoEnumIterator as _;

use defra_store::{Backend, Column, Database, Slice, StoreConfig};

fn cf_name(column: Column) -> &'static str {
    match column {
        Column::Documents => "documents",
        Column::Heads => "heads",
        Column::Collections => "collections",
        Column::Indexes => "indexes",
        Column::Sequences => "sequences",
        Column::Network => "network",
        Column::Blocks => "blocks",
        Column::Migrations => "migrations",
    }
}

pub struct RocksDb {
    db: DB,
}

impl RocksDb {
    pub fn open_path(path: &Path) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs: Vec<ColumnFamilyDescriptor> = Column::iter()
            .map(|c| ColumnFamilyDescriptor::new(cf_name(c), Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, path, cfs)
            .map_err(|e| eyre!("failed to open rocksdb at {}: {e}", path.display()))?;

        Ok(Self { db })
    }

    fn cf(&self, column: Column) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(cf_name(column))
            .ok_or_else(|| eyre!("missing column family: {}", cf_name(column)))
    }
}

impl Backend for RocksDb {
    fn open(config: &StoreConfig) -> Result<Self> {
        Self::open_path(config.path.as_std_path())
    }
}

impl Database for RocksDb {
    fn has(&self, column: Column, key: Slice<'_>) -> Result<bool> {
        Ok(self.db.get_cf(self.cf(column)?, key.as_ref())?.is_some())
    }

    fn get(&self, column: Column, key: Slice<'_>) -> Result<Option<Slice<'static>>> {
        Ok(self
            .db
            .get_cf(self.cf(column)?, key.as_ref())?
            .map(|v| Slice::from(v.into_boxed_slice())))
    }

    fn put(&self, column: Column, key: Slice<'_>, value: Slice<'_>) -> Result<()> {
        self.db.put_cf(self.cf(column)?, key.as_ref(), value.as_ref())?;
        Ok(())
    }

    fn delete(&self, column: Column, key: Slice<'_>) -> Result<()> {
        self.db.delete_cf(self.cf(column)?, key.as_ref())?;
        Ok(())
    }

    fn scan(
        &self,
        column: Column,
        start: Slice<'_>,
        end: Option<Slice<'_>>,
    ) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.cf(column)?;
        let mode = IteratorMode::From(start.as_ref(), rocksdb::Direction::Forward);
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, mode) {
            let (k, v) = item?;
            if let Some(end) = &end {
                if k.as_ref() >= end.as_ref() {
                    break;
                }
            }
            out.push((k, v));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let db = RocksDb::open_path(dir.path()).unwrap();

        db.put(Column::Documents, Slice::from(&b"k"[..]), Slice::from(&b"v"[..]))
            .unwrap();
        assert!(db.has(Column::Documents, Slice::from(&b"k"[..])).unwrap());
        assert_eq!(
            db.get(Column::Documents, Slice::from(&b"k"[..])).unwrap().unwrap().as_ref(),
            b"v"
        );

        db.delete(Column::Documents, Slice::from(&b"k"[..])).unwrap();
        assert!(!db.has(Column::Documents, Slice::from(&b"k"[..])).unwrap());
    }

    #[test]
    fn reopening_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = RocksDb::open_path(dir.path()).unwrap();
            db.put(Column::Collections, Slice::from(&b"k"[..]), Slice::from(&b"v"[..]))
                .unwrap();
        }
        let db = RocksDb::open_path(dir.path()).unwrap();
        assert_eq!(
            db.get(Column::Collections, Slice::from(&b"k"[..])).unwrap().unwrap().as_ref(),
            b"v"
        );
    }
}
