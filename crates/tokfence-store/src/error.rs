//! Store errors.

use thiserror::Error;

/// Errors from the embedded store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored value failed to parse back.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Connection lock was poisoned.
    #[error("store lock poisoned")]
    Poisoned,
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
