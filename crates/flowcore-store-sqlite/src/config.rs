// crates/flowcore-store-sqlite/src/config.rs
// ============================================================================
// Module: SQLite Store Configuration
// Description: Connection, pragma, and writer-batching configuration.
// Purpose: Give the engine durability knobs without hardcoding them.
// Dependencies: serde
// ============================================================================

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::SqliteStoreError;

// ============================================================================
// SECTION: Pragma modes
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

// ============================================================================
// SECTION: Store Config
// ============================================================================

/// Configuration for the `SQLite`-backed engine.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `writer_queue_capacity`, `batch_max_ops`, `batch_max_bytes`,
///   `batch_max_wait_ms`, and `read_pool_size` must all be greater than zero.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Writer queue capacity (bounded channel depth).
    #[serde(default = "default_writer_queue_capacity")]
    pub writer_queue_capacity: usize,
    /// Maximum number of operations in a single writer batch.
    #[serde(default = "default_batch_max_ops")]
    pub batch_max_ops: usize,
    /// Maximum aggregate command bytes in a single writer batch.
    #[serde(default = "default_batch_max_bytes")]
    pub batch_max_bytes: usize,
    /// Maximum wait window for writer batching (milliseconds).
    #[serde(default = "default_batch_max_wait_ms")]
    pub batch_max_wait_ms: u64,
    /// Number of read-only connections used for read path isolation.
    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: usize,
}

impl SqliteStoreConfig {
    /// Creates a config pointing at `path` with every other knob defaulted.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            busy_timeout_ms: default_busy_timeout_ms(),
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            writer_queue_capacity: default_writer_queue_capacity(),
            batch_max_ops: default_batch_max_ops(),
            batch_max_bytes: default_batch_max_bytes(),
            batch_max_wait_ms: default_batch_max_wait_ms(),
            read_pool_size: default_read_pool_size(),
        }
    }

    /// Validates runtime limits, rejecting zero-valued knobs.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::Invalid`] when a knob is zero.
    pub fn validate(&self) -> Result<(), SqliteStoreError> {
        if self.writer_queue_capacity == 0 {
            return Err(SqliteStoreError::Invalid(
                "writer_queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.batch_max_ops == 0 {
            return Err(SqliteStoreError::Invalid(
                "batch_max_ops must be greater than zero".to_string(),
            ));
        }
        if self.batch_max_bytes == 0 {
            return Err(SqliteStoreError::Invalid(
                "batch_max_bytes must be greater than zero".to_string(),
            ));
        }
        if self.batch_max_wait_ms == 0 {
            return Err(SqliteStoreError::Invalid(
                "batch_max_wait_ms must be greater than zero".to_string(),
            ));
        }
        if self.read_pool_size == 0 {
            return Err(SqliteStoreError::Invalid(
                "read_pool_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

const fn default_writer_queue_capacity() -> usize {
    1_024
}

const fn default_batch_max_ops() -> usize {
    64
}

const fn default_batch_max_bytes() -> usize {
    512 * 1024
}

const fn default_batch_max_wait_ms() -> u64 {
    2
}

const fn default_read_pool_size() -> usize {
    4
}
