//! Persists lens configuration and composes the per-schema-version-pair
//! pipeline lazily, caching the composed result (Design Note §9 "Lens
//! pipeline composition"). The store holds the durable per-source-version
//! config; this registry is the in-memory cache layered on top, the way a
//! production deployment would avoid recomposing a pipeline on every read.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use defra_primitives::{CoreError, CoreResult, Value};
use defra_schema::next_schema_version;
use defra_store::db::{Column, Database};
use defra_store::keyspace::{Key, MigrationKey};
use defra_store::txn::Txn;

use crate::lens::LensConfig;

fn io_err(err: eyre::Report) -> CoreError {
    CoreError::Io(err.to_string())
}

fn encode(config: &LensConfig) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(config, &mut buf)
        .map_err(|e| CoreError::integrity(format!("encode failure: {e}")))?;
    Ok(buf)
}

fn decode(bytes: &[u8]) -> CoreResult<LensConfig> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::integrity(format!("decode failure: {e}")))
}

/// Registers (or replaces) the lens config keyed on its *source* schema
/// version (spec §4.7: "Each `SchemaVersionMigrationKey` stores a lens
/// pipeline keyed on the source version").
pub fn set_migration<D: Database>(
    txn: &Txn<'_, D>,
    source_schema_version_id: &str,
    config: &LensConfig,
) -> CoreResult<()> {
    txn.put(
        Column::Migrations,
        &MigrationKey(source_schema_version_id.to_owned()).to_bytes(),
        &encode(config)?,
    )
    .map_err(io_err)
}

pub fn get_migration<D: Database>(
    txn: &Txn<'_, D>,
    source_schema_version_id: &str,
) -> CoreResult<Option<LensConfig>> {
    let bytes = txn
        .get(Column::Migrations, &MigrationKey(source_schema_version_id.to_owned()).to_bytes())
        .map_err(io_err)?;
    bytes.map(|b| decode(&b)).transpose()
}

/// Walks `schema_root`'s version history from `from_version_id` forward
/// to `to_version_id`, collecting one `LensConfig` per step. Fails with
/// `NotFound` if the versions aren't linked (not in the same lineage, or
/// `to` doesn't come after `from`).
fn collect_chain<D: Database>(
    txn: &Txn<'_, D>,
    schema_root: &str,
    from_version_id: &str,
    to_version_id: &str,
) -> CoreResult<Vec<LensConfig>> {
    if from_version_id == to_version_id {
        return Ok(Vec::new());
    }

    let mut chain = Vec::new();
    let mut current = from_version_id.to_owned();
    loop {
        let lens = get_migration(txn, &current)?;
        let next = next_schema_version(txn, schema_root, &current)?;
        let Some(next) = next else {
            return Err(CoreError::not_found(format!(
                "no migration path from {from_version_id} to {to_version_id}"
            )));
        };
        chain.push(lens.unwrap_or_default());
        if next == to_version_id {
            return Ok(chain);
        }
        current = next;
    }
}

/// Caches composed pipelines per `(schema_root, from, to)` pair (Design
/// Note §9). `invalidate` is called whenever migration config changes so
/// a stale composed pipeline is never reused.
#[derive(Debug, Default)]
pub struct LensRegistry {
    cache: RwLock<HashMap<(String, String, String), Vec<LensConfig>>>,
}

impl LensRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every cached pipeline (spec §6 `LensRegistry().Reload`).
    pub fn reload(&self) {
        self.cache.write().unwrap().clear();
    }

    fn composed<D: Database>(
        &self,
        txn: &Txn<'_, D>,
        schema_root: &str,
        from_version_id: &str,
        to_version_id: &str,
    ) -> CoreResult<Vec<LensConfig>> {
        let key = (schema_root.to_owned(), from_version_id.to_owned(), to_version_id.to_owned());
        if let Some(chain) = self.cache.read().unwrap().get(&key) {
            return Ok(chain.clone());
        }
        let chain = collect_chain(txn, schema_root, from_version_id, to_version_id)?;
        self.cache.write().unwrap().insert(key, chain.clone());
        Ok(chain)
    }

    /// Migrates a document forward from `from_version_id` to
    /// `to_version_id` (spec §6 `LensRegistry().MigrateUp`).
    pub fn migrate_up<D: Database>(
        &self,
        txn: &Txn<'_, D>,
        schema_root: &str,
        from_version_id: &str,
        to_version_id: &str,
        doc: &mut BTreeMap<String, Value>,
    ) -> CoreResult<()> {
        for lens in self.composed(txn, schema_root, from_version_id, to_version_id)? {
            lens.migrate_up(doc)?;
        }
        Ok(())
    }

    /// Migrates a document backward from `to_version_id` to
    /// `from_version_id` (spec §6 `LensRegistry().MigrateDown`).
    pub fn migrate_down<D: Database>(
        &self,
        txn: &Txn<'_, D>,
        schema_root: &str,
        from_version_id: &str,
        to_version_id: &str,
        doc: &mut BTreeMap<String, Value>,
    ) -> CoreResult<()> {
        for lens in self
            .composed(txn, schema_root, from_version_id, to_version_id)?
            .into_iter()
            .rev()
        {
            lens.migrate_down(doc)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lens::LensOp;
    use defra_schema::{add_schema, patch_schema, CrdtKind, FieldDescriptor, FieldKind, PatchOp};
    use defra_store::memory::InMemoryDb;
    use defra_store::txn::Store;

    #[test]
    fn migrates_up_through_a_single_renamed_field() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);

        let descriptor = add_schema(
            &txn,
            "User",
            vec![FieldDescriptor::new("Name", FieldKind::String, CrdtKind::LwwRegister)],
        )
        .unwrap();
        let v1 = descriptor.active_schema_version_id.clone();

        let v2 = patch_schema(
            &txn,
            &v1,
            &[PatchOp::RenameField { from: "Name".into(), to: "FullName".into() }],
            false,
        )
        .unwrap();

        set_migration(
            &txn,
            &v1,
            &LensConfig::new(vec![LensOp::RenameField { from: "Name".into(), to: "FullName".into() }]),
        )
        .unwrap();

        let registry = LensRegistry::new();
        let mut doc = BTreeMap::new();
        doc.insert("Name".to_string(), Value::String("John".into()));

        registry
            .migrate_up(&txn, &descriptor.schema_root, &v1, &v2.id, &mut doc)
            .unwrap();
        assert_eq!(doc.get("FullName"), Some(&Value::String("John".into())));

        registry
            .migrate_down(&txn, &descriptor.schema_root, &v1, &v2.id, &mut doc)
            .unwrap();
        assert_eq!(doc.get("Name"), Some(&Value::String("John".into())));
    }

    #[test]
    fn reload_drops_the_cache_without_affecting_correctness() {
        let store = Store::new(InMemoryDb::new());
        let txn = store.new_txn(false);
        let descriptor = add_schema(
            &txn,
            "User",
            vec![FieldDescriptor::new("Name", FieldKind::String, CrdtKind::LwwRegister)],
        )
        .unwrap();
        let v1 = descriptor.active_schema_version_id.clone();
        let v2 = patch_schema(&txn, &v1, &[], false);
        // An empty patch is rejected (no change), so there is no v2 here;
        // exercise reload against the same version instead.
        assert!(v2.is_err());

        let registry = LensRegistry::new();
        let mut doc = BTreeMap::new();
        registry.migrate_up(&txn, &descriptor.schema_root, &v1, &v1, &mut doc).unwrap();
        registry.reload();
        registry.migrate_up(&txn, &descriptor.schema_root, &v1, &v1, &mut doc).unwrap();
    }
}
