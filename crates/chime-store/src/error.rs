//! Store error type.

use chime_core::StorageError;

/// Errors raised by the `SQLite` repositories.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `SQLite` rejected a statement.
    #[error("database error: {0}")]
    Database(String),

    /// A row was expected but missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored value could not be interpreted.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Filesystem failure while opening the database.
    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<StoreError> for StorageError {
    fn from(e: StoreError) -> Self {
        StorageError::Backend(e.to_string())
    }
}
