use camino::Utf8PathBuf;

/// Store configuration. `path` is ignored by the in-memory backend and
/// names the rocksdb directory for `defra-store-rocksdb`.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: Utf8PathBuf,
}

impl StoreConfig {
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }
}
