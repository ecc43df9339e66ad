// crates/flowcore-store-sqlite/src/error.rs
// ============================================================================
// Module: SQLite Store Errors
// Description: Backend-local error enum and its mapping to `StoreError`.
// Purpose: Keep `rusqlite`/`serde_json` failure detail out of the port trait.
// Dependencies: flowcore-model, thiserror
// ============================================================================

use flowcore_model::interfaces::StoreError;
use thiserror::Error;

/// `SQLite` backend errors.
///
/// # Invariants
/// - Error messages avoid embedding raw run/event payloads.
#[derive(Debug, Error, Clone)]
pub enum SqliteStoreError {
    /// Store I/O error (disk, connection).
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Stored data failed to deserialize.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid configuration or request.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// The requested record does not exist.
    #[error("sqlite store not found: {0}")]
    NotFound(String),
    /// The write would violate a uniqueness or ordering invariant.
    #[error("sqlite store conflict: {0}")]
    Conflict(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Io(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Conflict(message),
            SqliteStoreError::NotFound(message) => Self::NotFound(message),
            SqliteStoreError::Conflict(message) => Self::Conflict(message),
        }
    }
}

impl From<rusqlite::Error> for SqliteStoreError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Db(error.to_string())
    }
}

impl From<serde_json::Error> for SqliteStoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::Corrupt(error.to_string())
    }
}
