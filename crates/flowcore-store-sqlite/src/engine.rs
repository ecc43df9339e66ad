// crates/flowcore-store-sqlite/src/engine.rs
// ============================================================================
// Module: SQLite Engine
// Description: Implements every Flowcore storage port over one SQLite file.
// Purpose: Give the host binary a single durable backend for flows, runs,
//          events, the run queue, persistent variables, and triggers.
// Dependencies: flowcore-model, rusqlite
// ============================================================================

//! ## Overview
//! [`SqliteEngine`] owns a pool of read-only connections for queries and
//! hands every mutating call to the single writer thread behind
//! [`crate::writer::WriteGateway`]. It implements all six storage ports
//! (`FlowStore`, `RunStore`, `EventStore`, `QueueStore`, `VarStore`,
//! `TriggerStore`) so the host can construct one engine and pass `&engine`
//! wherever a port trait object is expected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use flowcore_model::core::event::Event;
use flowcore_model::core::event::EventKind;
use flowcore_model::core::flow::Flow;
use flowcore_model::core::identifiers::FlowId;
use flowcore_model::core::identifiers::OwnerId;
use flowcore_model::core::identifiers::PersistentVarKey;
use flowcore_model::core::identifiers::RunId;
use flowcore_model::core::identifiers::TriggerId;
use flowcore_model::core::queue::Lease;
use flowcore_model::core::queue::QueueItem;
use flowcore_model::core::run::RunRecord;
use flowcore_model::core::run::RunStatus;
use flowcore_model::core::time::Timestamp;
use flowcore_model::core::trigger::TriggerSpec;
use flowcore_model::core::vars::PersistentVarRecord;
use flowcore_model::interfaces::EventStore;
use flowcore_model::interfaces::FlowStore;
use flowcore_model::interfaces::QueueStore;
use flowcore_model::interfaces::RunStore;
use flowcore_model::interfaces::StoreError;
use flowcore_model::interfaces::TriggerStore;
use flowcore_model::interfaces::VarStore;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::codec::queue_status_from_str;
use crate::codec::run_status_to_str;
use crate::config::SqliteStoreConfig;
use crate::error::SqliteStoreError;
use crate::schema;
use crate::writer::WriteGateway;
use crate::writer::WriteOutcome;
use crate::writer::WriteRequest;
use crate::writer::spawn_writer_thread;

// ============================================================================
// SECTION: Engine
// ============================================================================

/// `SQLite`-backed implementation of every Flowcore storage port.
///
/// # Invariants
/// - All mutating operations are serialized through one writer thread.
/// - Read methods use a round-robin pool of read connections and never
///   block on the writer thread.
pub struct SqliteEngine {
    write_gateway: WriteGateway,
    read_pool: Vec<Mutex<Connection>>,
    read_cursor: AtomicUsize,
}

impl SqliteEngine {
    /// Opens (creating if absent) the database at `config.path` and spawns
    /// the writer thread.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the path is unsafe, the connection
    /// cannot be opened, or the stored schema version is unsupported.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        config.validate()?;
        schema::validate_store_path(&config.path)?;
        schema::ensure_parent_dir(&config.path)?;

        let mut write_connection = schema::open_connection(config)?;
        schema::initialize_schema(&mut write_connection)?;

        let write_gateway = spawn_writer_thread(
            write_connection,
            config.writer_queue_capacity,
            config.batch_max_ops,
            config.batch_max_bytes,
            config.batch_max_wait_ms,
        )?;

        let mut read_pool = Vec::with_capacity(config.read_pool_size);
        for _ in 0..config.read_pool_size {
            read_pool.push(Mutex::new(schema::open_connection(config)?));
        }

        Ok(Self { write_gateway, read_pool, read_cursor: AtomicUsize::new(0) })
    }

    fn with_read_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, SqliteStoreError>,
    ) -> Result<T, SqliteStoreError> {
        let index = self.read_cursor.fetch_add(1, Ordering::Relaxed) % self.read_pool.len();
        let guard = self.read_pool[index]
            .lock()
            .map_err(|_| SqliteStoreError::Db("sqlite read mutex poisoned".to_string()))?;
        f(&guard)
    }
}

// ============================================================================
// SECTION: FlowStore
// ============================================================================

impl FlowStore for SqliteEngine {
    fn put(&self, flow: &Flow) -> Result<(), StoreError> {
        match self.write_gateway.submit(WriteRequest::FlowPut(flow.clone()))? {
            WriteOutcome::Unit => Ok(()),
            _ => unreachable!("FlowPut always returns Unit"),
        }
    }

    fn get(&self, id: &FlowId) -> Result<Option<Flow>, StoreError> {
        self.with_read_connection(|conn| {
            let data: Option<Vec<u8>> = conn
                .query_row("SELECT data FROM flows WHERE id = ?1", params![id.as_str()], |row| row.get(0))
                .optional()?;
            data.map(|bytes| serde_json::from_slice(&bytes).map_err(SqliteStoreError::from))
                .transpose()
        })
        .map_err(StoreError::from)
    }

    fn delete(&self, id: &FlowId) -> Result<(), StoreError> {
        match self.write_gateway.submit(WriteRequest::FlowDelete(id.clone()))? {
            WriteOutcome::Unit => Ok(()),
            _ => unreachable!("FlowDelete always returns Unit"),
        }
    }

    fn list_ids(&self) -> Result<Vec<FlowId>, StoreError> {
        self.with_read_connection(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM flows ORDER BY name ASC")?;
            let ids = stmt
                .query_map(params![], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .map(FlowId::new)
                .collect();
            Ok(ids)
        })
        .map_err(StoreError::from)
    }
}

// ============================================================================
// SECTION: RunStore
// ============================================================================

impl RunStore for SqliteEngine {
    fn insert(&self, run: &RunRecord) -> Result<(), StoreError> {
        match self.write_gateway.submit(WriteRequest::RunInsert(run.clone()))? {
            WriteOutcome::Unit => Ok(()),
            _ => unreachable!("RunInsert always returns Unit"),
        }
    }

    fn get(&self, id: &RunId) -> Result<Option<RunRecord>, StoreError> {
        self.with_read_connection(|conn| {
            let data: Option<Vec<u8>> = conn
                .query_row("SELECT data FROM runs WHERE id = ?1", params![id.as_str()], |row| row.get(0))
                .optional()?;
            data.map(|bytes| serde_json::from_slice(&bytes).map_err(SqliteStoreError::from))
                .transpose()
        })
        .map_err(StoreError::from)
    }

    fn update(&self, run: &RunRecord) -> Result<(), StoreError> {
        match self.write_gateway.submit(WriteRequest::RunUpdate(run.clone()))? {
            WriteOutcome::Unit => Ok(()),
            _ => unreachable!("RunUpdate always returns Unit"),
        }
    }

    fn list_by_status(&self, status: RunStatus) -> Result<Vec<RunRecord>, StoreError> {
        self.with_read_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT data FROM runs WHERE status = ?1 ORDER BY created_at DESC",
            )?;
            let runs = stmt
                .query_map(params![run_status_to_str(status)], |row| row.get::<_, Vec<u8>>(0))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .map(|bytes| serde_json::from_slice(&bytes).map_err(SqliteStoreError::from))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(runs)
        })
        .map_err(StoreError::from)
    }
}

// ============================================================================
// SECTION: EventStore
// ============================================================================

impl EventStore for SqliteEngine {
    fn append(&self, run_id: &RunId, recorded_at: Timestamp, kind: EventKind) -> Result<Event, StoreError> {
        match self.write_gateway.submit(WriteRequest::EventAppend {
            run_id: run_id.clone(),
            recorded_at,
            kind,
        })? {
            WriteOutcome::Event(event) => Ok(event),
            _ => unreachable!("EventAppend always returns Event"),
        }
    }

    fn list(&self, run_id: &RunId, after_seq: Option<u64>) -> Result<Vec<Event>, StoreError> {
        self.with_read_connection(|conn| {
            let after = after_seq.map_or(-1, |seq| i64::try_from(seq).unwrap_or(i64::MAX));
            let mut stmt = conn.prepare(
                "SELECT data FROM events WHERE run_id = ?1 AND seq > ?2 ORDER BY seq ASC",
            )?;
            let events = stmt
                .query_map(params![run_id.as_str(), after], |row| row.get::<_, Vec<u8>>(0))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .map(|bytes| serde_json::from_slice(&bytes).map_err(SqliteStoreError::from))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(events)
        })
        .map_err(StoreError::from)
    }
}

// ============================================================================
// SECTION: QueueStore
// ============================================================================

impl QueueStore for SqliteEngine {
    fn enqueue(&self, item: &QueueItem) -> Result<(), StoreError> {
        match self.write_gateway.submit(WriteRequest::QueueEnqueue(item.clone()))? {
            WriteOutcome::Unit => Ok(()),
            _ => unreachable!("QueueEnqueue always returns Unit"),
        }
    }

    fn claim_batch(
        &self,
        owner: &OwnerId,
        now: Timestamp,
        lease_duration_ms: i64,
        max_items: usize,
    ) -> Result<Vec<QueueItem>, StoreError> {
        match self.write_gateway.submit(WriteRequest::QueueClaimBatch {
            owner: owner.clone(),
            now,
            lease_duration_ms,
            max_items,
        })? {
            WriteOutcome::QueueItems(items) => Ok(items),
            _ => unreachable!("QueueClaimBatch always returns QueueItems"),
        }
    }

    fn heartbeat(
        &self,
        run_id: &RunId,
        owner: &OwnerId,
        now: Timestamp,
        lease_duration_ms: i64,
    ) -> Result<(), StoreError> {
        match self.write_gateway.submit(WriteRequest::QueueHeartbeat {
            run_id: run_id.clone(),
            owner: owner.clone(),
            now,
            lease_duration_ms,
        })? {
            WriteOutcome::Unit => Ok(()),
            _ => unreachable!("QueueHeartbeat always returns Unit"),
        }
    }

    fn complete(&self, run_id: &RunId) -> Result<(), StoreError> {
        match self.write_gateway.submit(WriteRequest::QueueComplete(run_id.clone()))? {
            WriteOutcome::Unit => Ok(()),
            _ => unreachable!("QueueComplete always returns Unit"),
        }
    }

    fn list_expired(&self, now: Timestamp) -> Result<Vec<QueueItem>, StoreError> {
        self.with_read_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT run_id, flow_id, status, priority, enqueued_at, lease_owner, \
                 lease_acquired_at, lease_expires_at
                 FROM queue_items
                 WHERE status = 'claimed' AND lease_expires_at <= ?1",
            )?;
            let items = stmt
                .query_map(params![now.as_millis()], row_to_queue_item)?
                .collect::<Result<Vec<_>, _>>()?;
            items.into_iter().collect::<Result<Vec<_>, _>>()
        })
        .map_err(StoreError::from)
    }

    fn list_all(&self) -> Result<Vec<QueueItem>, StoreError> {
        self.with_read_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT run_id, flow_id, status, priority, enqueued_at, lease_owner, \
                 lease_acquired_at, lease_expires_at
                 FROM queue_items
                 WHERE status != 'done'
                 ORDER BY priority ASC, enqueued_at ASC",
            )?;
            let items = stmt
                .query_map(params![], row_to_queue_item)?
                .collect::<Result<Vec<_>, _>>()?;
            items.into_iter().collect::<Result<Vec<_>, _>>()
        })
        .map_err(StoreError::from)
    }

    fn recover_orphans(
        &self,
        new_owner: &OwnerId,
        now: Timestamp,
        lease_duration_ms: i64,
    ) -> Result<Vec<(QueueItem, Option<OwnerId>)>, StoreError> {
        match self.write_gateway.submit(WriteRequest::QueueRecoverOrphans {
            new_owner: new_owner.clone(),
            now,
            lease_duration_ms,
        })? {
            WriteOutcome::RecoveredOrphans(items) => Ok(items),
            _ => unreachable!("QueueRecoverOrphans always returns RecoveredOrphans"),
        }
    }
}

fn row_to_queue_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<QueueItem, SqliteStoreError>> {
    let run_id: String = row.get(0)?;
    let flow_id: String = row.get(1)?;
    let status_str: String = row.get(2)?;
    let priority: i32 = row.get(3)?;
    let enqueued_at: i64 = row.get(4)?;
    let lease_owner: Option<String> = row.get(5)?;
    let lease_acquired_at: Option<i64> = row.get(6)?;
    let lease_expires_at: Option<i64> = row.get(7)?;

    Ok((|| {
        let status = queue_status_from_str(&status_str)?;
        let lease = match (lease_owner, lease_acquired_at, lease_expires_at) {
            (Some(owner), Some(acquired_at), Some(expires_at)) => Some(Lease {
                owner: OwnerId::new(owner),
                acquired_at: Timestamp::from_millis(acquired_at),
                expires_at: Timestamp::from_millis(expires_at),
            }),
            _ => None,
        };
        Ok(QueueItem {
            run_id: RunId::new(run_id),
            flow_id: FlowId::new(flow_id),
            status,
            priority,
            enqueued_at: Timestamp::from_millis(enqueued_at),
            lease,
        })
    })())
}

// ============================================================================
// SECTION: VarStore
// ============================================================================

impl VarStore for SqliteEngine {
    fn get(&self, key: &PersistentVarKey) -> Result<Option<PersistentVarRecord>, StoreError> {
        self.with_read_connection(|conn| {
            let row: Option<(Vec<u8>, i64, i64, Option<String>)> = conn
                .query_row(
                    "SELECT value, version, updated_at, written_by_run FROM persistent_vars \
                     WHERE key = ?1",
                    params![key.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;
            row.map(|(value, version, updated_at, written_by_run)| {
                Ok(PersistentVarRecord {
                    key: key.clone(),
                    value: serde_json::from_slice(&value)?,
                    #[allow(clippy::cast_sign_loss, reason = "version is always non-negative")]
                    version: version as u64,
                    updated_at: Timestamp::from_millis(updated_at),
                    written_by_run: written_by_run.map(RunId::new),
                })
            })
            .transpose()
        })
        .map_err(StoreError::from)
    }

    fn write(
        &self,
        key: &PersistentVarKey,
        value: serde_json::Value,
        now: Timestamp,
        written_by_run: Option<RunId>,
    ) -> Result<PersistentVarRecord, StoreError> {
        match self.write_gateway.submit(WriteRequest::VarWrite {
            key: key.clone(),
            value,
            now,
            written_by_run,
        })? {
            WriteOutcome::Var(record) => Ok(record),
            _ => unreachable!("VarWrite always returns Var"),
        }
    }

    fn list(&self) -> Result<Vec<PersistentVarRecord>, StoreError> {
        self.with_read_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value, version, updated_at, written_by_run FROM persistent_vars \
                 ORDER BY updated_at ASC",
            )?;
            let rows = stmt
                .query_map(params![], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(key, value, version, updated_at, written_by_run)| {
                    Ok(PersistentVarRecord {
                        key: PersistentVarKey::new(key)
                            .map_err(|err| SqliteStoreError::Corrupt(err.to_string()))?,
                        value: serde_json::from_slice(&value)?,
                        #[allow(clippy::cast_sign_loss, reason = "version is always non-negative")]
                        version: version as u64,
                        updated_at: Timestamp::from_millis(updated_at),
                        written_by_run: written_by_run.map(RunId::new),
                    })
                })
                .collect::<Result<Vec<_>, SqliteStoreError>>()
        })
        .map_err(StoreError::from)
    }
}

// ============================================================================
// SECTION: TriggerStore
// ============================================================================

impl TriggerStore for SqliteEngine {
    fn put(&self, trigger: &TriggerSpec) -> Result<(), StoreError> {
        match self.write_gateway.submit(WriteRequest::TriggerPut(trigger.clone()))? {
            WriteOutcome::Unit => Ok(()),
            _ => unreachable!("TriggerPut always returns Unit"),
        }
    }

    fn get(&self, id: &TriggerId) -> Result<Option<TriggerSpec>, StoreError> {
        self.with_read_connection(|conn| {
            let data: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT data FROM triggers WHERE id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            data.map(|bytes| serde_json::from_slice(&bytes).map_err(SqliteStoreError::from))
                .transpose()
        })
        .map_err(StoreError::from)
    }

    fn delete(&self, id: &TriggerId) -> Result<(), StoreError> {
        match self.write_gateway.submit(WriteRequest::TriggerDelete(id.clone()))? {
            WriteOutcome::Unit => Ok(()),
            _ => unreachable!("TriggerDelete always returns Unit"),
        }
    }

    fn list(&self) -> Result<Vec<TriggerSpec>, StoreError> {
        self.with_read_connection(|conn| {
            let mut stmt = conn.prepare("SELECT data FROM triggers ORDER BY id ASC")?;
            let triggers = stmt
                .query_map(params![], |row| row.get::<_, Vec<u8>>(0))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .map(|bytes| serde_json::from_slice(&bytes).map_err(SqliteStoreError::from))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(triggers)
        })
        .map_err(StoreError::from)
    }
}
