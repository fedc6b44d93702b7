//! Lens pipelines: composable transforms between adjacent schema versions
//! (spec §4.7, GLOSSARY "Lens"). Depends on `defra-schema` for lineage
//! traversal and `defra-store` for persisting migration configuration.

pub mod lens;
pub mod registry;

pub use lens::{LensConfig, LensOp};
pub use registry::{get_migration, set_migration, LensRegistry};
