// crates/flowcore-scheduler/src/lease.rs
// ============================================================================
// Module: Flowcore Lease Manager
// Description: Heartbeat renewal and expiry inspection for this host's
//              claimed queue items.
// Purpose: Keep a held lease alive while its run is in flight, and surface
//          expired leases so the Scheduler can reason about capacity.
// Dependencies: flowcore-model
// ============================================================================

//! ## Overview
//! Lease creation and expiry checks are pure functions already carried by
//! [`flowcore_model::core::queue::Lease`] (`new`/`is_expired`/`renew`); this
//! module is the thin per-owner coordinator spec.md §4.4 describes: it knows
//! which run ids this host currently holds and renews all of them on each
//! heartbeat tick. A run whose heartbeat fails with `NotFound` has already
//! been reclaimed by another owner (or completed) and is dropped from the
//! tracked set rather than treated as a hard error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;

use flowcore_model::core::identifiers::OwnerId;
use flowcore_model::core::identifiers::RunId;
use flowcore_model::core::queue::QueueItem;
use flowcore_model::core::time::Timestamp;
use flowcore_model::interfaces::QueueStore;
use flowcore_model::interfaces::StoreError;

use crate::error::SchedulerError;

// ============================================================================
// SECTION: Lease Manager
// ============================================================================

/// Tracks and renews the leases this host's [`OwnerId`] currently holds.
///
/// # Invariants
/// - `tracked` only ever contains run ids this host believes it holds an
///   unexpired lease on; a failed heartbeat removes the entry.
pub struct LeaseManager {
    queue: Arc<dyn QueueStore>,
    owner: OwnerId,
    lease_duration_ms: i64,
    tracked: Mutex<Vec<RunId>>,
}

impl LeaseManager {
    /// Creates a lease manager for `owner`, renewing leases for
    /// `lease_duration_ms` on each heartbeat.
    #[must_use]
    pub fn new(queue: Arc<dyn QueueStore>, owner: OwnerId, lease_duration_ms: i64) -> Self {
        Self { queue, owner, lease_duration_ms, tracked: Mutex::new(Vec::new()) }
    }

    /// Starts tracking `run_id` for future heartbeats, called right after a
    /// successful claim.
    pub fn track(&self, run_id: RunId) {
        let mut tracked = self.tracked.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if !tracked.contains(&run_id) {
            tracked.push(run_id);
        }
    }

    /// Stops tracking `run_id`, called once its run reaches a terminal state.
    pub fn untrack(&self, run_id: &RunId) {
        let mut tracked = self.tracked.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        tracked.retain(|id| id != run_id);
    }

    /// Renews every tracked lease at `now`. Items no longer claimed by this
    /// owner (reclaimed elsewhere, or already completed) are silently
    /// dropped from the tracked set rather than surfaced as errors.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] only when a heartbeat call fails for a
    /// reason other than the item no longer belonging to this owner.
    pub fn heartbeat_all(&self, now: Timestamp) -> Result<(), SchedulerError> {
        let run_ids = self.tracked.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
        let mut still_held = Vec::with_capacity(run_ids.len());
        for run_id in run_ids {
            match self.queue.heartbeat(&run_id, &self.owner, now, self.lease_duration_ms) {
                Ok(()) => still_held.push(run_id),
                Err(StoreError::NotFound(_)) => {}
                Err(other) => return Err(other.into()),
            }
        }
        *self.tracked.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = still_held;
        Ok(())
    }

    /// Lists items anywhere in the store whose lease has expired as of
    /// `now`, for the reclamation tick's audit trail.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] when the read fails.
    pub fn list_expired(&self, now: Timestamp) -> Result<Vec<QueueItem>, SchedulerError> {
        Ok(self.queue.list_expired(now)?)
    }
}
