// crates/flowcore-store-sqlite/src/schema.rs
// ============================================================================
// Module: SQLite Schema
// Description: Path safety checks, pragma application, and table creation.
// Purpose: Stand up a fresh database or validate an existing one's version.
// Dependencies: rusqlite
// ============================================================================

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::config::SqliteStoreConfig;
use crate::error::SqliteStoreError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the engine.
const SCHEMA_VERSION: i64 = 1;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4_096;

// ============================================================================
// SECTION: Path safety
// ============================================================================

/// Validates store paths for safety limits.
///
/// # Errors
///
/// Returns [`SqliteStoreError::Invalid`] when the path is empty, too long,
/// has an overlong component, or points at an existing directory.
pub fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Creates the store path's parent directory if missing.
pub fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

// ============================================================================
// SECTION: Connection setup
// ============================================================================

/// Opens an `SQLite` connection with the configured pragmas applied.
///
/// # Errors
///
/// Returns [`SqliteStoreError`] when the connection cannot be opened.
pub fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(connection: &Connection, config: &SqliteStoreConfig) -> Result<(), SqliteStoreError> {
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))?;
    connection.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;
    Ok(())
}

// ============================================================================
// SECTION: Schema initialization
// ============================================================================

/// Creates tables on first open, or validates the stored schema version.
///
/// # Errors
///
/// Returns [`SqliteStoreError::VersionMismatch`] when an existing database
/// carries an unsupported schema version.
pub fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction()?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM schema_version LIMIT 1", params![], |row| row.get(0))
        .optional()?;
    match version {
        None => {
            tx.execute("INSERT INTO schema_version (version) VALUES (?1)", params![SCHEMA_VERSION])?;
            create_tables(&tx)?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value} (expected {SCHEMA_VERSION})"
            )));
        }
    }
    tx.commit()?;
    Ok(())
}

fn create_tables(tx: &rusqlite::Transaction<'_>) -> Result<(), SqliteStoreError> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS flows (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            data BLOB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_flows_name ON flows (name);
        CREATE INDEX IF NOT EXISTS idx_flows_updated_at ON flows (updated_at);

        CREATE TABLE IF NOT EXISTS runs (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            flow_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            next_seq INTEGER NOT NULL,
            data BLOB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_runs_status ON runs (status);
        CREATE INDEX IF NOT EXISTS idx_runs_flow_id ON runs (flow_id);
        CREATE INDEX IF NOT EXISTS idx_runs_created_at ON runs (created_at);
        CREATE INDEX IF NOT EXISTS idx_runs_updated_at ON runs (updated_at);
        CREATE INDEX IF NOT EXISTS idx_runs_flow_status ON runs (flow_id, status);

        CREATE TABLE IF NOT EXISTS events (
            run_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            recorded_at INTEGER NOT NULL,
            kind TEXT NOT NULL,
            data BLOB NOT NULL,
            PRIMARY KEY (run_id, seq)
        );
        CREATE INDEX IF NOT EXISTS idx_events_run_id ON events (run_id);
        CREATE INDEX IF NOT EXISTS idx_events_kind ON events (kind);
        CREATE INDEX IF NOT EXISTS idx_events_run_kind ON events (run_id, kind);

        CREATE TABLE IF NOT EXISTS queue_items (
            run_id TEXT PRIMARY KEY,
            flow_id TEXT NOT NULL,
            status TEXT NOT NULL,
            priority INTEGER NOT NULL,
            enqueued_at INTEGER NOT NULL,
            lease_owner TEXT,
            lease_acquired_at INTEGER,
            lease_expires_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_queue_status ON queue_items (status);
        CREATE INDEX IF NOT EXISTS idx_queue_priority ON queue_items (status, priority, enqueued_at);
        CREATE INDEX IF NOT EXISTS idx_queue_flow_id ON queue_items (flow_id);
        CREATE INDEX IF NOT EXISTS idx_queue_lease_expires ON queue_items (lease_expires_at);

        CREATE TABLE IF NOT EXISTS persistent_vars (
            key TEXT PRIMARY KEY,
            value BLOB NOT NULL,
            version INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            written_by_run TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_vars_updated_at ON persistent_vars (updated_at);

        CREATE TABLE IF NOT EXISTS triggers (
            id TEXT PRIMARY KEY,
            flow_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            enabled INTEGER NOT NULL,
            data BLOB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_triggers_kind ON triggers (kind);
        CREATE INDEX IF NOT EXISTS idx_triggers_flow_id ON triggers (flow_id);
        CREATE INDEX IF NOT EXISTS idx_triggers_enabled ON triggers (enabled);
        CREATE INDEX IF NOT EXISTS idx_triggers_kind_enabled ON triggers (kind, enabled);",
    )?;
    Ok(())
}
