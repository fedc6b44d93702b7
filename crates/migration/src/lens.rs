//! A lens: a composable, pure, invertible transform between two adjacent
//! schema versions (spec §4.7, GLOSSARY "Lens"). Lens configuration is
//! stored as data (a small op list) rather than arbitrary code so it can
//! be persisted in the key/value store and replayed for schema versions
//! that have not arrived locally yet (spec §4.7: "Migrations must be
//! registrable for versions that do not yet exist locally").

use std::collections::BTreeMap;

use defra_primitives::{CoreError, CoreResult, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LensOp {
    RenameField { from: String, to: String },
    SetDefault { field: String, value: Value },
    DropField(String),
}

impl LensOp {
    fn apply_up(&self, doc: &mut BTreeMap<String, Value>) -> CoreResult<()> {
        match self {
            Self::RenameField { from, to } => {
                if let Some(value) = doc.remove(from) {
                    doc.insert(to.clone(), value);
                }
            }
            Self::SetDefault { field, value } => {
                doc.entry(field.clone()).or_insert_with(|| value.clone());
            }
            Self::DropField(field) => {
                doc.remove(field);
            }
        }
        Ok(())
    }

    fn apply_down(&self, doc: &mut BTreeMap<String, Value>) -> CoreResult<()> {
        match self {
            Self::RenameField { from, to } => {
                if let Some(value) = doc.remove(to) {
                    doc.insert(from.clone(), value);
                }
            }
            Self::SetDefault { .. } => {
                // Introducing a default has no well-defined inverse: the
                // field may have been written to since. Leave it as-is.
            }
            Self::DropField(field) => {
                return Err(CoreError::integrity(format!(
                    "cannot migrate down through a dropped field without a recorded prior value: {field}"
                )));
            }
        }
        Ok(())
    }
}

/// A configured lens: the ops applied when reading a document forward
/// from its source schema version (spec §4.7's per-source-version lens
/// pipeline entry).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LensConfig {
    pub ops: Vec<LensOp>,
}

impl LensConfig {
    #[must_use]
    pub fn new(ops: Vec<LensOp>) -> Self {
        Self { ops }
    }

    pub fn migrate_up(&self, doc: &mut BTreeMap<String, Value>) -> CoreResult<()> {
        for op in &self.ops {
            op.apply_up(doc)?;
        }
        Ok(())
    }

    pub fn migrate_down(&self, doc: &mut BTreeMap<String, Value>) -> CoreResult<()> {
        for op in self.ops.iter().rev() {
            op.apply_down(doc)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_field_round_trips() {
        let lens = LensConfig::new(vec![LensOp::RenameField {
            from: "Name".into(),
            to: "FullName".into(),
        }]);
        let mut doc = BTreeMap::new();
        doc.insert("Name".to_string(), Value::String("John".into()));

        lens.migrate_up(&mut doc).unwrap();
        assert!(!doc.contains_key("Name"));
        assert_eq!(doc.get("FullName"), Some(&Value::String("John".into())));

        lens.migrate_down(&mut doc).unwrap();
        assert!(!doc.contains_key("FullName"));
        assert_eq!(doc.get("Name"), Some(&Value::String("John".into())));
    }

    #[test]
    fn set_default_only_fills_missing_fields() {
        let lens = LensConfig::new(vec![LensOp::SetDefault {
            field: "Active".into(),
            value: Value::Bool(true),
        }]);
        let mut doc = BTreeMap::new();
        lens.migrate_up(&mut doc).unwrap();
        assert_eq!(doc.get("Active"), Some(&Value::Bool(true)));

        let mut doc2 = BTreeMap::new();
        doc2.insert("Active".to_string(), Value::Bool(false));
        lens.migrate_up(&mut doc2).unwrap();
        assert_eq!(doc2.get("Active"), Some(&Value::Bool(false)));
    }

    #[test]
    fn migrating_down_through_a_drop_fails() {
        let lens = LensConfig::new(vec![LensOp::DropField("Legacy".into())]);
        let mut doc = BTreeMap::new();
        assert!(lens.migrate_down(&mut doc).is_err());
    }
}
