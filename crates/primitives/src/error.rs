use thiserror::Error;

/// Core error taxonomy shared by every layer of the document engine.
///
/// Variants are grouped by *kind*, not by call site, so that every crate in
/// the workspace reports errors the caller can dispatch on uniformly (see
/// spec §7). Transport layers (HTTP, CLI) map these kinds to their own
/// status codes; this crate never encodes that mapping.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("integrity: {0}")]
    Integrity(String),

    #[error("io: {0}")]
    Io(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    /// True for kinds a caller may usefully retry (txn conflicts, unique
    /// index violations). Validation/NotFound/Integrity are not retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
