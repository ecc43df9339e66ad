// crates/flowcore-store-sqlite/src/writer.rs
// ============================================================================
// Module: SQLite Writer Thread
// Description: Single-writer-thread command queue with micro-batched commits.
// Purpose: Serialize all mutating SQL through one connection while letting
//          callers submit concurrently, and allocate Event/PersistentVar
//          sequence numbers atomically inside each command's own commit.
// Dependencies: flowcore-model, rusqlite
// ============================================================================

//! ## Overview
//! Every mutating operation is sent as a [`WriteRequest`] over an `mpsc`
//! channel to a dedicated OS thread that owns the sole read-write `SQLite`
//! connection. The thread drains the channel into a deterministic
//! micro-batch (bounded by operation count, byte estimate, and wait time),
//! applies every command inside one [`rusqlite::Transaction`], and replies to
//! each caller once the batch commits. This is the same shape the pooled
//! read connections sit alongside: reads never block on the writer thread,
//! and the writer thread never blocks on readers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::mpsc;
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::Instant;

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
use flowcore_model::core::queue::QueueStatus;
use flowcore_model::core::run::RunRecord;
use flowcore_model::core::time::Timestamp;
use flowcore_model::core::trigger::TriggerSpec;
use flowcore_model::core::vars::PersistentVarRecord;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;

use crate::codec::queue_status_to_str;
use crate::codec::run_status_to_str;
use crate::codec::trigger_kind_to_str;
use crate::error::SqliteStoreError;

// ============================================================================
// SECTION: Requests and outcomes
// ============================================================================

/// One mutating operation destined for the writer thread.
pub enum WriteRequest {
    /// Insert or replace a flow.
    FlowPut(Flow),
    /// Delete a flow by id.
    FlowDelete(FlowId),
    /// Insert a freshly created run.
    RunInsert(RunRecord),
    /// Replace a run record wholesale.
    RunUpdate(RunRecord),
    /// Append an event, atomically allocating its sequence number.
    EventAppend {
        /// Run the event belongs to.
        run_id: RunId,
        /// Time the event was recorded.
        recorded_at: Timestamp,
        /// Event payload.
        kind: EventKind,
    },
    /// Enqueue a new queue item.
    QueueEnqueue(QueueItem),
    /// Atomically claim up to `max_items` claimable items.
    QueueClaimBatch {
        /// Claiming owner.
        owner: OwnerId,
        /// Current time.
        now: Timestamp,
        /// Lease duration in milliseconds.
        lease_duration_ms: i64,
        /// Maximum items to claim.
        max_items: usize,
    },
    /// Renew a lease.
    QueueHeartbeat {
        /// Run whose lease is renewed.
        run_id: RunId,
        /// Owner renewing the lease.
        owner: OwnerId,
        /// Current time.
        now: Timestamp,
        /// New lease duration in milliseconds.
        lease_duration_ms: i64,
    },
    /// Mark a queue item done.
    QueueComplete(RunId),
    /// Reassign every claimed item's lease to `new_owner`, for startup recovery.
    QueueRecoverOrphans {
        /// Owner every claimed lease is reassigned to.
        new_owner: OwnerId,
        /// Current time.
        now: Timestamp,
        /// New lease duration in milliseconds.
        lease_duration_ms: i64,
    },
    /// Apply a persistent variable write.
    VarWrite {
        /// Variable key.
        key: PersistentVarKey,
        /// New value.
        value: serde_json::Value,
        /// Current time.
        now: Timestamp,
        /// Writing run, if any.
        written_by_run: Option<RunId>,
    },
    /// Insert or replace a trigger.
    TriggerPut(TriggerSpec),
    /// Delete a trigger by id.
    TriggerDelete(TriggerId),
}

/// Result of a successfully committed [`WriteRequest`].
pub enum WriteOutcome {
    /// No value beyond success.
    Unit,
    /// An appended event, with its allocated sequence number.
    Event(Event),
    /// Items claimed by [`WriteRequest::QueueClaimBatch`].
    QueueItems(Vec<QueueItem>),
    /// Items reassigned by [`WriteRequest::QueueRecoverOrphans`], paired
    /// with each item's previous owner.
    RecoveredOrphans(Vec<(QueueItem, Option<OwnerId>)>),
    /// The resulting persistent variable record.
    Var(PersistentVarRecord),
}

struct WriterCommand {
    request: WriteRequest,
    response: mpsc::Sender<Result<WriteOutcome, SqliteStoreError>>,
    enqueued_at: Instant,
    estimated_bytes: usize,
}

// ============================================================================
// SECTION: Gateway
// ============================================================================

/// Handle used by the engine to submit writes to the writer thread.
#[derive(Clone)]
pub struct WriteGateway {
    sender: mpsc::SyncSender<WriterCommand>,
}

impl WriteGateway {
    /// Submits a request and blocks until its batch commits.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the request fails or the writer
    /// thread has shut down.
    pub fn submit(&self, request: WriteRequest) -> Result<WriteOutcome, SqliteStoreError> {
        let estimated_bytes = estimate_bytes(&request);
        let (response, receiver) = mpsc::channel();
        let command = WriterCommand { request, response, enqueued_at: Instant::now(), estimated_bytes };
        self.sender
            .send(command)
            .map_err(|_| SqliteStoreError::Io("sqlite writer thread is not running".to_string()))?;
        receiver
            .recv()
            .map_err(|_| SqliteStoreError::Io("sqlite writer thread dropped the response".to_string()))?
    }
}

const fn estimate_bytes(request: &WriteRequest) -> usize {
    match request {
        WriteRequest::FlowPut(_)
        | WriteRequest::RunInsert(_)
        | WriteRequest::RunUpdate(_)
        | WriteRequest::TriggerPut(_) => 512,
        _ => 128,
    }
}

/// Spawns the writer thread and returns a [`WriteGateway`] to submit to it.
///
/// # Errors
///
/// Returns [`SqliteStoreError::Io`] when the OS thread cannot be spawned.
pub fn spawn_writer_thread(
    connection: Connection,
    writer_queue_capacity: usize,
    batch_max_ops: usize,
    batch_max_bytes: usize,
    batch_max_wait_ms: u64,
) -> Result<WriteGateway, SqliteStoreError> {
    let (sender, receiver) = mpsc::sync_channel(writer_queue_capacity);
    let connection = Arc::new(Mutex::new(connection));
    thread::Builder::new()
        .name("flowcore-sqlite-writer".to_string())
        .spawn(move || {
            writer_loop(&connection, &receiver, batch_max_ops, batch_max_bytes, batch_max_wait_ms);
        })
        .map_err(|err| SqliteStoreError::Io(format!("failed to spawn sqlite writer thread: {err}")))?;
    Ok(WriteGateway { sender })
}

// ============================================================================
// SECTION: Writer loop
// ============================================================================

fn writer_loop(
    connection: &Arc<Mutex<Connection>>,
    receiver: &mpsc::Receiver<WriterCommand>,
    batch_max_ops: usize,
    batch_max_bytes: usize,
    batch_max_wait_ms: u64,
) {
    while let Ok(first) = receiver.recv() {
        let mut queued = vec![first];
        let mut queued_bytes = queued[0].estimated_bytes;
        let deadline = queued[0].enqueued_at + std::time::Duration::from_millis(batch_max_wait_ms);

        while queued.len() < batch_max_ops && queued_bytes < batch_max_bytes {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match receiver.recv_timeout(deadline - now) {
                Ok(command) => {
                    queued_bytes = queued_bytes.saturating_add(command.estimated_bytes);
                    queued.push(command);
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
            }
        }

        execute_batch(connection, queued);
    }
}

fn execute_batch(connection: &Arc<Mutex<Connection>>, commands: Vec<WriterCommand>) {
    let Ok(mut guard) = connection.lock() else {
        let error = SqliteStoreError::Db("sqlite write mutex poisoned".to_string());
        for command in commands {
            let _ = command.response.send(Err(error.clone()));
        }
        return;
    };

    let tx = match guard.transaction() {
        Ok(tx) => tx,
        Err(err) => {
            let error = SqliteStoreError::from(err);
            for command in commands {
                let _ = command.response.send(Err(error.clone()));
            }
            return;
        }
    };

    let mut results = Vec::with_capacity(commands.len());
    let mut fatal: Option<SqliteStoreError> = None;
    for command in commands {
        let WriterCommand { request, response, .. } = command;
        let outcome = apply_request(&tx, request);
        if fatal.is_none()
            && let Err(err) = &outcome
            && matches!(err, SqliteStoreError::Db(_) | SqliteStoreError::Io(_))
        {
            fatal = Some(err.clone());
        }
        results.push((response, outcome));
    }

    if let Some(error) = fatal {
        let _ = tx.rollback();
        for (response, _) in results {
            let _ = response.send(Err(error.clone()));
        }
        return;
    }

    if let Err(err) = tx.commit() {
        let error = SqliteStoreError::from(err);
        for (response, _) in results {
            let _ = response.send(Err(error.clone()));
        }
        return;
    }

    for (response, outcome) in results {
        let _ = response.send(outcome);
    }
}

// ============================================================================
// SECTION: Per-request application
// ============================================================================

fn apply_request(
    tx: &Transaction<'_>,
    request: WriteRequest,
) -> Result<WriteOutcome, SqliteStoreError> {
    match request {
        WriteRequest::FlowPut(flow) => apply_flow_put(tx, &flow),
        WriteRequest::FlowDelete(id) => apply_flow_delete(tx, &id),
        WriteRequest::RunInsert(run) => apply_run_insert(tx, &run),
        WriteRequest::RunUpdate(run) => apply_run_update(tx, &run),
        WriteRequest::EventAppend { run_id, recorded_at, kind } => {
            apply_event_append(tx, &run_id, recorded_at, kind)
        }
        WriteRequest::QueueEnqueue(item) => apply_queue_enqueue(tx, &item),
        WriteRequest::QueueClaimBatch { owner, now, lease_duration_ms, max_items } => {
            apply_queue_claim_batch(tx, &owner, now, lease_duration_ms, max_items)
        }
        WriteRequest::QueueHeartbeat { run_id, owner, now, lease_duration_ms } => {
            apply_queue_heartbeat(tx, &run_id, &owner, now, lease_duration_ms)
        }
        WriteRequest::QueueComplete(run_id) => apply_queue_complete(tx, &run_id),
        WriteRequest::QueueRecoverOrphans { new_owner, now, lease_duration_ms } => {
            apply_queue_recover_orphans(tx, &new_owner, now, lease_duration_ms)
        }
        WriteRequest::VarWrite { key, value, now, written_by_run } => {
            apply_var_write(tx, &key, value, now, written_by_run)
        }
        WriteRequest::TriggerPut(trigger) => apply_trigger_put(tx, &trigger),
        WriteRequest::TriggerDelete(id) => apply_trigger_delete(tx, &id),
    }
}

fn apply_flow_put(tx: &Transaction<'_>, flow: &Flow) -> Result<WriteOutcome, SqliteStoreError> {
    let data = serde_json::to_vec(flow)?;
    tx.execute(
        "INSERT INTO flows (id, name, updated_at, data) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, updated_at = excluded.updated_at, \
         data = excluded.data",
        params![flow.id.as_str(), flow.name, flow.updated_at.as_millis(), data],
    )?;
    Ok(WriteOutcome::Unit)
}

fn apply_flow_delete(tx: &Transaction<'_>, id: &FlowId) -> Result<WriteOutcome, SqliteStoreError> {
    tx.execute("DELETE FROM flows WHERE id = ?1", params![id.as_str()])?;
    Ok(WriteOutcome::Unit)
}

fn apply_run_insert(tx: &Transaction<'_>, run: &RunRecord) -> Result<WriteOutcome, SqliteStoreError> {
    let existing: Option<i64> =
        tx.query_row("SELECT 1 FROM runs WHERE id = ?1", params![run.id.as_str()], |row| row.get(0))
            .optional()?;
    if existing.is_some() {
        return Err(SqliteStoreError::Conflict(format!("run already exists: {}", run.id)));
    }
    let data = serde_json::to_vec(run)?;
    tx.execute(
        "INSERT INTO runs (id, status, flow_id, created_at, updated_at, next_seq, data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            run.id.as_str(),
            run_status_to_str(run.status),
            run.flow_id.as_str(),
            run.created_at.as_millis(),
            run.updated_at.as_millis(),
            i64::try_from(run.next_seq).unwrap_or(i64::MAX),
            data,
        ],
    )?;
    Ok(WriteOutcome::Unit)
}

fn apply_run_update(tx: &Transaction<'_>, run: &RunRecord) -> Result<WriteOutcome, SqliteStoreError> {
    let data = serde_json::to_vec(run)?;
    let rows = tx.execute(
        "UPDATE runs SET status = ?2, flow_id = ?3, updated_at = ?4, next_seq = ?5, data = ?6
         WHERE id = ?1",
        params![
            run.id.as_str(),
            run_status_to_str(run.status),
            run.flow_id.as_str(),
            run.updated_at.as_millis(),
            i64::try_from(run.next_seq).unwrap_or(i64::MAX),
            data,
        ],
    )?;
    if rows == 0 {
        return Err(SqliteStoreError::NotFound(format!("run not found: {}", run.id)));
    }
    Ok(WriteOutcome::Unit)
}

fn apply_event_append(
    tx: &Transaction<'_>,
    run_id: &RunId,
    recorded_at: Timestamp,
    kind: EventKind,
) -> Result<WriteOutcome, SqliteStoreError> {
    let next_seq: Option<i64> = tx
        .query_row("SELECT next_seq FROM runs WHERE id = ?1", params![run_id.as_str()], |row| row.get(0))
        .optional()?;
    let Some(seq) = next_seq else {
        return Err(SqliteStoreError::NotFound(format!("run not found: {run_id}")));
    };
    #[allow(clippy::cast_sign_loss, reason = "next_seq is always non-negative")]
    let seq = seq as u64;

    tx.execute(
        "UPDATE runs SET next_seq = next_seq + 1, updated_at = ?2 WHERE id = ?1",
        params![run_id.as_str(), recorded_at.as_millis()],
    )?;

    let event = Event::new(run_id.clone(), seq, recorded_at, kind);
    let data = serde_json::to_vec(&event)?;
    tx.execute(
        "INSERT INTO events (run_id, seq, recorded_at, kind, data) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            run_id.as_str(),
            i64::try_from(seq).unwrap_or(i64::MAX),
            recorded_at.as_millis(),
            event.kind.label(),
            data,
        ],
    )?;
    Ok(WriteOutcome::Event(event))
}

fn apply_queue_enqueue(tx: &Transaction<'_>, item: &QueueItem) -> Result<WriteOutcome, SqliteStoreError> {
    let existing: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM queue_items WHERE run_id = ?1 AND status != 'done'",
            params![item.run_id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Err(SqliteStoreError::Conflict(format!("run already queued: {}", item.run_id)));
    }
    tx.execute(
        "INSERT INTO queue_items
            (run_id, flow_id, status, priority, enqueued_at, lease_owner, lease_acquired_at, \
             lease_expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL, NULL)
         ON CONFLICT(run_id) DO UPDATE SET
            flow_id = excluded.flow_id, status = excluded.status, priority = excluded.priority,
            enqueued_at = excluded.enqueued_at, lease_owner = NULL, lease_acquired_at = NULL,
            lease_expires_at = NULL",
        params![
            item.run_id.as_str(),
            item.flow_id.as_str(),
            queue_status_to_str(item.status),
            item.priority,
            item.enqueued_at.as_millis(),
        ],
    )?;
    Ok(WriteOutcome::Unit)
}

fn apply_queue_claim_batch(
    tx: &Transaction<'_>,
    owner: &OwnerId,
    now: Timestamp,
    lease_duration_ms: i64,
    max_items: usize,
) -> Result<WriteOutcome, SqliteStoreError> {
    let limit = i64::try_from(max_items).unwrap_or(i64::MAX);
    let mut stmt = tx.prepare(
        "SELECT run_id, flow_id, priority, enqueued_at
         FROM queue_items
         WHERE status = 'pending' OR (status = 'claimed' AND lease_expires_at <= ?1)
         ORDER BY priority ASC, enqueued_at ASC
         LIMIT ?2",
    )?;
    let candidates = stmt
        .query_map(params![now.as_millis(), limit], |row| {
            let run_id: String = row.get(0)?;
            let flow_id: String = row.get(1)?;
            let priority: i32 = row.get(2)?;
            let enqueued_at: i64 = row.get(3)?;
            Ok((run_id, flow_id, priority, enqueued_at))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    drop(stmt);

    let expires_at = now.add_millis(lease_duration_ms);
    let mut claimed = Vec::with_capacity(candidates.len());
    for (run_id, flow_id, priority, enqueued_at) in candidates {
        tx.execute(
            "UPDATE queue_items
             SET status = 'claimed', lease_owner = ?2, lease_acquired_at = ?3, lease_expires_at = ?4
             WHERE run_id = ?1",
            params![run_id, owner.as_str(), now.as_millis(), expires_at.as_millis()],
        )?;
        claimed.push(QueueItem {
            run_id: RunId::new(run_id),
            flow_id: FlowId::new(flow_id),
            status: QueueStatus::Claimed,
            priority,
            enqueued_at: Timestamp::from_millis(enqueued_at),
            lease: Some(Lease { owner: owner.clone(), acquired_at: now, expires_at }),
        });
    }
    Ok(WriteOutcome::QueueItems(claimed))
}

fn apply_queue_heartbeat(
    tx: &Transaction<'_>,
    run_id: &RunId,
    owner: &OwnerId,
    now: Timestamp,
    lease_duration_ms: i64,
) -> Result<WriteOutcome, SqliteStoreError> {
    let expires_at = now.add_millis(lease_duration_ms);
    let rows = tx.execute(
        "UPDATE queue_items SET lease_expires_at = ?3
         WHERE run_id = ?1 AND status = 'claimed' AND lease_owner = ?2",
        params![run_id.as_str(), owner.as_str(), expires_at.as_millis()],
    )?;
    if rows == 0 {
        return Err(SqliteStoreError::NotFound(format!(
            "queue item not claimed by {owner}: {run_id}"
        )));
    }
    Ok(WriteOutcome::Unit)
}

fn apply_queue_complete(tx: &Transaction<'_>, run_id: &RunId) -> Result<WriteOutcome, SqliteStoreError> {
    tx.execute(
        "UPDATE queue_items
         SET status = 'done', lease_owner = NULL, lease_acquired_at = NULL, lease_expires_at = NULL
         WHERE run_id = ?1",
        params![run_id.as_str()],
    )?;
    Ok(WriteOutcome::Unit)
}

fn apply_queue_recover_orphans(
    tx: &Transaction<'_>,
    new_owner: &OwnerId,
    now: Timestamp,
    lease_duration_ms: i64,
) -> Result<WriteOutcome, SqliteStoreError> {
    let mut stmt = tx.prepare(
        "SELECT run_id, flow_id, priority, enqueued_at, lease_owner
         FROM queue_items
         WHERE status = 'claimed'",
    )?;
    let candidates = stmt
        .query_map(params![], |row| {
            let run_id: String = row.get(0)?;
            let flow_id: String = row.get(1)?;
            let priority: i32 = row.get(2)?;
            let enqueued_at: i64 = row.get(3)?;
            let previous_owner: Option<String> = row.get(4)?;
            Ok((run_id, flow_id, priority, enqueued_at, previous_owner))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    drop(stmt);

    let expires_at = now.add_millis(lease_duration_ms);
    let mut reassigned = Vec::with_capacity(candidates.len());
    for (run_id, flow_id, priority, enqueued_at, previous_owner) in candidates {
        tx.execute(
            "UPDATE queue_items
             SET lease_owner = ?2, lease_acquired_at = ?3, lease_expires_at = ?4
             WHERE run_id = ?1",
            params![run_id, new_owner.as_str(), now.as_millis(), expires_at.as_millis()],
        )?;
        let item = QueueItem {
            run_id: RunId::new(run_id),
            flow_id: FlowId::new(flow_id),
            status: QueueStatus::Claimed,
            priority,
            enqueued_at: Timestamp::from_millis(enqueued_at),
            lease: Some(Lease { owner: new_owner.clone(), acquired_at: now, expires_at }),
        };
        reassigned.push((item, previous_owner.map(OwnerId::new)));
    }
    Ok(WriteOutcome::RecoveredOrphans(reassigned))
}

fn apply_var_write(
    tx: &Transaction<'_>,
    key: &PersistentVarKey,
    value: serde_json::Value,
    now: Timestamp,
    written_by_run: Option<RunId>,
) -> Result<WriteOutcome, SqliteStoreError> {
    let existing_version: Option<i64> = tx
        .query_row(
            "SELECT version FROM persistent_vars WHERE key = ?1",
            params![key.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    let value_bytes = serde_json::to_vec(&value)?;
    let written_by_run_str = written_by_run.as_ref().map(RunId::as_str);

    let record = match existing_version {
        Some(version) => {
            #[allow(clippy::cast_sign_loss, reason = "version is always non-negative")]
            let next_version = (version as u64) + 1;
            tx.execute(
                "UPDATE persistent_vars SET value = ?2, version = ?3, updated_at = ?4, \
                 written_by_run = ?5 WHERE key = ?1",
                params![
                    key.as_str(),
                    value_bytes,
                    i64::try_from(next_version).unwrap_or(i64::MAX),
                    now.as_millis(),
                    written_by_run_str,
                ],
            )?;
            PersistentVarRecord { key: key.clone(), value, version: next_version, updated_at: now, written_by_run }
        }
        None => {
            tx.execute(
                "INSERT INTO persistent_vars (key, value, version, updated_at, written_by_run)
                 VALUES (?1, ?2, 1, ?3, ?4)",
                params![key.as_str(), value_bytes, now.as_millis(), written_by_run_str],
            )?;
            PersistentVarRecord::new(key.clone(), value, now, written_by_run)
        }
    };
    Ok(WriteOutcome::Var(record))
}

fn apply_trigger_put(tx: &Transaction<'_>, trigger: &TriggerSpec) -> Result<WriteOutcome, SqliteStoreError> {
    let data = serde_json::to_vec(trigger)?;
    tx.execute(
        "INSERT INTO triggers (id, flow_id, kind, enabled, data) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
            flow_id = excluded.flow_id, kind = excluded.kind, enabled = excluded.enabled,
            data = excluded.data",
        params![
            trigger.id.as_str(),
            trigger.flow_id.as_str(),
            trigger_kind_to_str(trigger.config.kind()),
            i64::from(trigger.enabled),
            data,
        ],
    )?;
    Ok(WriteOutcome::Unit)
}

fn apply_trigger_delete(tx: &Transaction<'_>, id: &TriggerId) -> Result<WriteOutcome, SqliteStoreError> {
    tx.execute("DELETE FROM triggers WHERE id = ?1", params![id.as_str()])?;
    Ok(WriteOutcome::Unit)
}
