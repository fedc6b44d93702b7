//! In-memory `Database` backend, used by default and by the test suite.
//! The rocksdb-backed implementation lives in the sibling
//! `defra-store-rocksdb` crate and implements the same trait.

use std::collections::BTreeMap;
use std::sync::RwLock;

use eyre::Result;
use strum::EnumCount as _;

use crate::config::StoreConfig;
use crate::db::{Column, Database};
use crate::slice::Slice;
use crate::txn::Backend;

#[derive(Debug, Default)]
pub struct InMemoryDb {
    columns: Vec<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl InMemoryDb {
    #[must_use]
    pub fn new() -> Self {
        let mut columns = Vec::with_capacity(Column::COUNT);
        for _ in 0..Column::COUNT {
            columns.push(RwLock::new(BTreeMap::new()));
        }
        Self { columns }
    }

    fn map(&self, column: Column) -> &RwLock<BTreeMap<Vec<u8>, Vec<u8>>> {
        &self.columns[column as usize]
    }
}

impl Database for InMemoryDb {
    fn has(&self, column: Column, key: Slice<'_>) -> Result<bool> {
        Ok(self.map(column).read().unwrap().contains_key(key.as_ref()))
    }

    fn get(&self, column: Column, key: Slice<'_>) -> Result<Option<Slice<'static>>> {
        Ok(self
            .map(column)
            .read()
            .unwrap()
            .get(key.as_ref())
            .map(|v| Slice::from(v.clone())))
    }

    fn put(&self, column: Column, key: Slice<'_>, value: Slice<'_>) -> Result<()> {
        self.map(column)
            .write()
            .unwrap()
            .insert(key.as_ref().to_vec(), value.as_ref().to_vec());
        Ok(())
    }

    fn delete(&self, column: Column, key: Slice<'_>) -> Result<()> {
        self.map(column).write().unwrap().remove(key.as_ref());
        Ok(())
    }

    fn scan(
        &self,
        column: Column,
        start: Slice<'_>,
        end: Option<Slice<'_>>,
    ) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let map = self.map(column).read().unwrap();
        let range = match &end {
            Some(end) => map.range(start.as_ref().to_vec()..end.as_ref().to_vec()),
            None => map.range(start.as_ref().to_vec()..),
        };
        Ok(range
            .map(|(k, v)| (k.clone().into_boxed_slice(), v.clone().into_boxed_slice()))
            .collect())
    }
}

impl Backend for InMemoryDb {
    fn open(_config: &StoreConfig) -> Result<Self> {
        Ok(Self::new())
    }
}
