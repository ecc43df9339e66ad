// crates/flowcore-model/src/interfaces/mod.rs
// ============================================================================
// Module: Flowcore Storage Ports
// Description: Backend-agnostic interfaces for flows, runs, events, the
//              queue, persistent variables, and triggers.
// Purpose: Define the sole synchronization boundary between the engine and
//          whatever database backs it.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Every mutating operation that touches more than one record must be
//! atomic: claiming a queue item and creating its lease, appending an event
//! and bumping `next_seq`, all happen inside one storage-port call so the
//! backend can wrap them in a single transaction. No caller outside a
//! storage port implementation may assume anything about the backend's
//! concurrency model.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::event::Event;
use crate::core::event::EventKind;
use crate::core::flow::Flow;
use crate::core::identifiers::FlowId;
use crate::core::identifiers::OwnerId;
use crate::core::identifiers::PersistentVarKey;
use crate::core::identifiers::RunId;
use crate::core::identifiers::TriggerId;
use crate::core::queue::QueueItem;
use crate::core::run::RunRecord;
use crate::core::run::RunStatus;
use crate::core::time::Timestamp;
use crate::core::trigger::TriggerSpec;
use crate::core::vars::PersistentVarRecord;

// ============================================================================
// SECTION: Store Error
// ============================================================================

/// Errors common to every storage port.
///
/// # Invariants
/// - Variants are stable for programmatic handling by callers that decide
///   whether a failure is retryable.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend I/O error (disk, connection, etc).
    #[error("store io error: {0}")]
    Io(String),
    /// Stored data failed an integrity check on read.
    #[error("store corruption: {0}")]
    Corrupt(String),
    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The write would violate a uniqueness or ordering invariant.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Persisted schema version is newer or older than this binary supports.
    #[error("schema version mismatch: {0}")]
    VersionMismatch(String),
}

// ============================================================================
// SECTION: Flow Store
// ============================================================================

/// Storage port for Flow definitions.
pub trait FlowStore: Send + Sync {
    /// Inserts or replaces a flow.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn put(&self, flow: &Flow) -> Result<(), StoreError>;

    /// Loads a flow by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn get(&self, id: &FlowId) -> Result<Option<Flow>, StoreError>;

    /// Deletes a flow by id. A no-op if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the delete fails.
    fn delete(&self, id: &FlowId) -> Result<(), StoreError>;

    /// Lists all stored flow ids.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn list_ids(&self) -> Result<Vec<FlowId>, StoreError>;

    /// Reports store readiness for liveness probes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend is unreachable.
    fn readiness(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Run Store
// ============================================================================

/// Storage port for Run records.
pub trait RunStore: Send + Sync {
    /// Inserts a freshly created run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails or `run.id` already exists.
    fn insert(&self, run: &RunRecord) -> Result<(), StoreError>;

    /// Loads a run by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn get(&self, id: &RunId) -> Result<Option<RunRecord>, StoreError>;

    /// Replaces the stored run record wholesale.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails or `run.id` does not exist.
    fn update(&self, run: &RunRecord) -> Result<(), StoreError>;

    /// Lists runs with the given status, most recently created first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn list_by_status(&self, status: RunStatus) -> Result<Vec<RunRecord>, StoreError>;

    /// Reports store readiness for liveness probes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend is unreachable.
    fn readiness(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Event Store
// ============================================================================

/// Storage port for the per-run append-only event log.
pub trait EventStore: Send + Sync {
    /// Appends an event, atomically allocating its sequence number as
    /// `run.next_seq` and persisting the bump alongside the event in the
    /// same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the run does not exist or the write fails.
    fn append(&self, run_id: &RunId, recorded_at: Timestamp, kind: EventKind) -> Result<Event, StoreError>;

    /// Lists events for a run in ascending sequence order, optionally
    /// starting after `after_seq`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn list(&self, run_id: &RunId, after_seq: Option<u64>) -> Result<Vec<Event>, StoreError>;

    /// Reports store readiness for liveness probes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend is unreachable.
    fn readiness(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Queue Store
// ============================================================================

/// Storage port for the lease-based Run Queue.
pub trait QueueStore: Send + Sync {
    /// Enqueues a new item.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails or `run_id` is already queued.
    fn enqueue(&self, item: &QueueItem) -> Result<(), StoreError>;

    /// Atomically claims up to `max_items` claimable items (pending, or
    /// claimed with an expired lease) and assigns `owner` a fresh lease of
    /// `lease_duration_ms` on each.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the claim transaction fails.
    fn claim_batch(
        &self,
        owner: &OwnerId,
        now: Timestamp,
        lease_duration_ms: i64,
        max_items: usize,
    ) -> Result<Vec<QueueItem>, StoreError>;

    /// Renews `owner`'s lease on `run_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the item is not claimed by `owner`.
    fn heartbeat(
        &self,
        run_id: &RunId,
        owner: &OwnerId,
        now: Timestamp,
        lease_duration_ms: i64,
    ) -> Result<(), StoreError>;

    /// Marks the item done, removing it from future claim batches.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn complete(&self, run_id: &RunId) -> Result<(), StoreError>;

    /// Lists items whose lease has expired as of `now`, for recovery.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn list_expired(&self, now: Timestamp) -> Result<Vec<QueueItem>, StoreError>;

    /// Lists every queue item not yet marked done, regardless of pending or
    /// claimed status, for the Recovery Coordinator's startup pre-clean pass.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn list_all(&self) -> Result<Vec<QueueItem>, StoreError>;

    /// Reassigns every `claimed` item's lease to `new_owner` unconditionally,
    /// regardless of the current owner, with `expires_at = now +
    /// lease_duration_ms`. Called once at startup, before any claim happens,
    /// to adopt leases a previous process instance of this host left behind
    /// (spec.md §4.5 step 2, `recoverOrphanLeases`). Returns each reassigned
    /// item paired with its previous owner (`None` if it had none), for the
    /// Recovery Coordinator's audit trail.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn recover_orphans(
        &self,
        new_owner: &OwnerId,
        now: Timestamp,
        lease_duration_ms: i64,
    ) -> Result<Vec<(QueueItem, Option<OwnerId>)>, StoreError>;

    /// Reports store readiness for liveness probes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend is unreachable.
    fn readiness(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Var Store
// ============================================================================

/// Storage port for persistent (`$`-prefixed) variables.
pub trait VarStore: Send + Sync {
    /// Loads a persistent variable record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn get(&self, key: &PersistentVarKey) -> Result<Option<PersistentVarRecord>, StoreError>;

    /// Atomically applies a write, bumping the version if the record
    /// already exists, or creating it at version 1 otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn write(
        &self,
        key: &PersistentVarKey,
        value: serde_json::Value,
        now: Timestamp,
        written_by_run: Option<RunId>,
    ) -> Result<PersistentVarRecord, StoreError>;

    /// Lists all persistent variable records.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn list(&self) -> Result<Vec<PersistentVarRecord>, StoreError>;

    /// Reports store readiness for liveness probes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend is unreachable.
    fn readiness(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Trigger Store
// ============================================================================

/// Storage port for persisted Trigger specifications.
pub trait TriggerStore: Send + Sync {
    /// Inserts or replaces a trigger.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn put(&self, trigger: &TriggerSpec) -> Result<(), StoreError>;

    /// Loads a trigger by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn get(&self, id: &TriggerId) -> Result<Option<TriggerSpec>, StoreError>;

    /// Deletes a trigger by id. A no-op if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the delete fails.
    fn delete(&self, id: &TriggerId) -> Result<(), StoreError>;

    /// Lists all stored triggers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn list(&self) -> Result<Vec<TriggerSpec>, StoreError>;

    /// Reports store readiness for liveness probes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend is unreachable.
    fn readiness(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
