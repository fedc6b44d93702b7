//! Shared primitives: content identifiers, document identifiers, the
//! closed document `Value` type, and the core error taxonomy (spec §3, §6,
//! §7). Every other crate in the workspace depends on this one and nothing
//! else upstream of it.

pub mod cid;
pub mod docid;
pub mod error;
pub mod value;
pub mod varint;

pub use cid::Cid;
pub use docid::DocId;
pub use error::{CoreError, CoreResult};
pub use value::Value;
