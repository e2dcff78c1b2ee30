use persist_types::Address;

/// Errors from content store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested address is not stored.
    #[error("address not found: {0}")]
    NotFound(Address),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A directory walk failed during enumeration.
    #[error("enumeration failed: {0}")]
    Walk(#[from] walkdir::Error),

    /// The configured cache directory exists but is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(std::path::PathBuf),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
