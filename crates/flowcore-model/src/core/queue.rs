// crates/flowcore-model/src/core/queue.rs
// ============================================================================
// Module: Flowcore Run Queue
// Description: Lease-based queue item and claim bookkeeping for runs.
// Purpose: Let a single scheduler instance claim runs with crash recovery.
// Dependencies: crate::core::{identifiers, time}, serde
// ============================================================================

//! ## Overview
//! The Run Queue hands each [`RunId`] to exactly one scheduler owner at a
//! time via a [`Lease`]. A lease has a fixed duration and must be renewed by
//! heartbeat; if it expires the Recovery Coordinator reclaims the item.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::FlowId;
use crate::core::identifiers::OwnerId;
use crate::core::identifiers::RunId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Status
// ============================================================================

/// Lifecycle status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting for a scheduler to claim it.
    Pending,
    /// Claimed and leased to an owner.
    Claimed,
    /// Removed from the queue (run reached a terminal status).
    Done,
}

// ============================================================================
// SECTION: Lease
// ============================================================================

/// A time-bounded claim on a queue item.
///
/// # Invariants
/// - `expires_at > acquired_at`.
/// - A lease is valid only while `now < expires_at`; expiry is checked by
///   the caller using an injected [`crate::core::time::Clock`], never by
///   reading wall-clock time directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Owning scheduler instance.
    pub owner: OwnerId,
    /// Time the lease was acquired or last renewed.
    pub acquired_at: Timestamp,
    /// Time after which the lease is reclaimable.
    pub expires_at: Timestamp,
}

impl Lease {
    /// Creates a lease starting at `now` with the given duration.
    #[must_use]
    pub fn new(owner: OwnerId, now: Timestamp, duration_ms: i64) -> Self {
        Self { owner, acquired_at: now, expires_at: now.add_millis(duration_ms) }
    }

    /// Returns true if `now` is at or past expiry.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Renews the lease from `now` for `duration_ms`, keeping the same owner.
    #[must_use]
    pub fn renew(self, now: Timestamp, duration_ms: i64) -> Self {
        Self { owner: self.owner, acquired_at: now, expires_at: now.add_millis(duration_ms) }
    }
}

// ============================================================================
// SECTION: Queue Item
// ============================================================================

/// One entry in the Run Queue.
///
/// # Invariants
/// - `run_id` is unique among non-`Done` queue items.
/// - `lease` is `Some` only while `status == Claimed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Run this item tracks.
    pub run_id: RunId,
    /// Flow the run executes; denormalized onto the queue row so the
    /// scheduler can filter/report by flow without joining the Runs store.
    pub flow_id: FlowId,
    /// Current status.
    pub status: QueueStatus,
    /// Priority; lower numeric value is drained first. Ties broken by
    /// `enqueued_at` (FIFO).
    pub priority: i32,
    /// Time the item was enqueued.
    pub enqueued_at: Timestamp,
    /// Current lease, if claimed.
    pub lease: Option<Lease>,
}

impl QueueItem {
    /// Creates a freshly enqueued, unclaimed item.
    #[must_use]
    pub fn new_pending(run_id: RunId, flow_id: FlowId, now: Timestamp, priority: i32) -> Self {
        Self { run_id, flow_id, status: QueueStatus::Pending, priority, enqueued_at: now, lease: None }
    }

    /// Returns true if the item is eligible to be claimed at `now`: either
    /// pending, or claimed with an expired lease.
    #[must_use]
    pub fn is_claimable(&self, now: Timestamp) -> bool {
        match self.status {
            QueueStatus::Pending => true,
            QueueStatus::Claimed => self.lease.is_some_and(|l| l.is_expired(now)),
            QueueStatus::Done => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_item_is_claimable() {
        let item = QueueItem::new_pending(RunId::new("r1"), FlowId::new("f1"), Timestamp::from_millis(0), 0);
        assert!(item.is_claimable(Timestamp::from_millis(0)));
    }

    #[test]
    fn claimed_item_not_claimable_before_expiry() {
        let mut item = QueueItem::new_pending(RunId::new("r1"), FlowId::new("f1"), Timestamp::from_millis(0), 0);
        item.status = QueueStatus::Claimed;
        item.lease = Some(Lease::new(OwnerId::new("owner-a"), Timestamp::from_millis(0), 30_000));
        assert!(!item.is_claimable(Timestamp::from_millis(10_000)));
    }

    #[test]
    fn claimed_item_claimable_after_expiry() {
        let mut item = QueueItem::new_pending(RunId::new("r1"), FlowId::new("f1"), Timestamp::from_millis(0), 0);
        item.status = QueueStatus::Claimed;
        item.lease = Some(Lease::new(OwnerId::new("owner-a"), Timestamp::from_millis(0), 30_000));
        assert!(item.is_claimable(Timestamp::from_millis(30_000)));
    }

    #[test]
    fn lease_renew_preserves_owner() {
        let lease = Lease::new(OwnerId::new("owner-a"), Timestamp::from_millis(0), 30_000);
        let renewed = lease.renew(Timestamp::from_millis(20_000), 30_000);
        assert_eq!(renewed.owner, OwnerId::new("owner-a"));
        assert_eq!(renewed.expires_at, Timestamp::from_millis(50_000));
    }
}
