// crates/flowcore-store-sqlite/src/lib.rs
// ============================================================================
// Module: Flowcore SQLite Store
// Description: SQLite-backed implementation of every Flowcore storage port.
// Purpose: Give the host binary one durable backend file for flows, runs,
//          events, the run queue, persistent variables, and triggers.
// Dependencies: flowcore-model, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`SqliteEngine`] is the sole concrete storage backend shipped with
//! Flowcore. It owns one `SQLite` file in WAL mode: a dedicated writer
//! thread serializes every mutating call into micro-batched transactions
//! (`crate::writer`), while a small pool of read-only connections serves
//! queries without contending with writes. Event sequence numbers and
//! persistent-variable versions are allocated atomically inside the same
//! transaction as the write that needs them — never by a separate
//! read-then-write round trip.

mod codec;
mod config;
mod engine;
mod error;
mod schema;
mod writer;

pub use config::SqliteStoreConfig;
pub use config::SqliteStoreMode;
pub use config::SqliteSyncMode;
pub use engine::SqliteEngine;
pub use error::SqliteStoreError;
