// crates/flowcore-scheduler/src/recovery.rs
// ============================================================================
// Module: Flowcore Recovery Coordinator
// Description: Startup reconciliation between the Run Queue and Run records,
//              run once before the Scheduler begins claiming work.
// Purpose: Restore the invariant that every queue item references an
//          existing non-terminal run and every lease belongs to the current
//          process, after an unclean restart.
// Dependencies: flowcore-model
// ============================================================================

//! ## Overview
//! spec.md §4.5 runs this in four best-effort, logged steps:
//! 1. **Pre-clean** — [`QueueStore::list_all`] and `markDone` any item whose
//!    run record is missing or already terminal.
//! 2. **Orphan leases** — [`QueueStore::recover_orphans`] adopts every
//!    remaining claimed item's lease under this process's [`OwnerId`],
//!    expiring it immediately so the next claim batch picks it back up
//!    (the "requeued" path); a paused run's lease is then refreshed to a
//!    full duration instead, so it stays adopted rather than re-claimed.
//! 3. **Reconcile requeued-running** — patch the run back to `Queued` and
//!    append a [`EventKind::RunRecovered`] event.
//! 4. **Reconcile adopted-paused** — the run stays `Paused`; no status patch
//!    needed, but the recovery is still recorded with the same event.
//!
//! After these steps, every queue item references an existing non-terminal
//! run, every claimed lease belongs to this process's owner, and no runner
//! is left dangling.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use flowcore_model::core::identifiers::OwnerId;
use flowcore_model::core::identifiers::RunId;
use flowcore_model::core::run::RunStatus;
use flowcore_model::core::time::Timestamp;
use flowcore_model::interfaces::EventStore;
use flowcore_model::interfaces::QueueStore;
use flowcore_model::interfaces::RunStore;

use crate::error::SchedulerError;

// ============================================================================
// SECTION: Report
// ============================================================================

/// Summary of what one [`RecoveryCoordinator::run`] pass did, for the host
/// binary to log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Queue items marked done because their run was missing or terminal.
    pub cleaned: Vec<RunId>,
    /// Runs reconciled back to `Queued` after an orphaned running lease.
    pub requeued: Vec<RunId>,
    /// Runs whose paused lease was adopted by this process.
    pub adopted: Vec<RunId>,
}

impl RecoveryReport {
    /// Total number of queue items this pass touched.
    #[must_use]
    pub fn total(&self) -> usize {
        self.cleaned.len() + self.requeued.len() + self.adopted.len()
    }
}

// ============================================================================
// SECTION: Recovery Coordinator
// ============================================================================

/// Runs the startup reconciliation pass described in spec.md §4.5.
pub struct RecoveryCoordinator {
    queue: Arc<dyn QueueStore>,
    runs: Arc<dyn RunStore>,
    events: Arc<dyn EventStore>,
}

impl RecoveryCoordinator {
    /// Creates a coordinator over the given storage ports.
    #[must_use]
    pub fn new(queue: Arc<dyn QueueStore>, runs: Arc<dyn RunStore>, events: Arc<dyn EventStore>) -> Self {
        Self { queue, runs, events }
    }

    /// Runs the full four-step reconciliation pass for `new_owner`, the
    /// [`OwnerId`] this process claims work under.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] when a storage port call fails. Individual
    /// per-item classification never fails the whole pass; only a hard
    /// storage error does.
    pub fn run(
        &self,
        new_owner: &OwnerId,
        now: Timestamp,
        lease_duration_ms: i64,
    ) -> Result<RecoveryReport, SchedulerError> {
        let mut report = RecoveryReport::default();

        self.pre_clean(&mut report)?;

        let reassigned = self.queue.recover_orphans(new_owner, now, 0)?;
        for (item, previous_owner) in reassigned {
            let Some(run) = self.runs.get(&item.run_id)? else {
                self.queue.complete(&item.run_id)?;
                report.cleaned.push(item.run_id);
                continue;
            };
            if run.status.is_terminal() {
                self.queue.complete(&item.run_id)?;
                report.cleaned.push(item.run_id);
                continue;
            }

            match run.status {
                RunStatus::Paused => {
                    self.queue.heartbeat(&item.run_id, new_owner, now, lease_duration_ms)?;
                    self.events.append(
                        &item.run_id,
                        now,
                        flowcore_model::core::event::EventKind::RunRecovered {
                            previous_owner: previous_owner.map(|owner| owner.to_string()),
                        },
                    )?;
                    report.adopted.push(item.run_id);
                }
                RunStatus::Queued | RunStatus::Running => {
                    let mut patched = run;
                    patched.status = RunStatus::Queued;
                    patched.updated_at = now;
                    self.runs.update(&patched)?;
                    self.events.append(
                        &item.run_id,
                        now,
                        flowcore_model::core::event::EventKind::RunRecovered {
                            previous_owner: previous_owner.map(|owner| owner.to_string()),
                        },
                    )?;
                    report.requeued.push(item.run_id);
                }
                RunStatus::Succeeded | RunStatus::Failed | RunStatus::Canceled => unreachable!(
                    "terminal statuses are handled by the is_terminal() branch above"
                ),
            }
        }

        Ok(report)
    }

    /// Step 1: marks done every queue item whose run is missing or terminal.
    fn pre_clean(&self, report: &mut RecoveryReport) -> Result<(), SchedulerError> {
        for item in self.queue.list_all()? {
            let run = self.runs.get(&item.run_id)?;
            let should_clean = match &run {
                None => true,
                Some(run) => run.status.is_terminal(),
            };
            if should_clean {
                self.queue.complete(&item.run_id)?;
                report.cleaned.push(item.run_id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use flowcore_model::core::event::Event;
    use flowcore_model::core::event::EventKind;
    use flowcore_model::core::identifiers::FlowId;
    use flowcore_model::core::queue::Lease;
    use flowcore_model::core::queue::QueueItem;
    use flowcore_model::core::queue::QueueStatus;
    use flowcore_model::core::run::RunRecord;
    use flowcore_model::interfaces::StoreError;

    use super::*;

    /// In-memory [`QueueStore`] fake backing the recovery tests.
    #[derive(Default)]
    struct FakeQueue {
        /// Items keyed by run id.
        items: Mutex<HashMap<RunId, QueueItem>>,
    }

    impl QueueStore for FakeQueue {
        fn enqueue(&self, item: &QueueItem) -> Result<(), StoreError> {
            self.items.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(item.run_id.clone(), item.clone());
            Ok(())
        }

        fn claim_batch(
            &self,
            _owner: &OwnerId,
            _now: Timestamp,
            _lease_duration_ms: i64,
            _max_items: usize,
        ) -> Result<Vec<QueueItem>, StoreError> {
            Ok(Vec::new())
        }

        fn heartbeat(
            &self,
            run_id: &RunId,
            owner: &OwnerId,
            now: Timestamp,
            lease_duration_ms: i64,
        ) -> Result<(), StoreError> {
            let mut items = self.items.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let Some(item) = items.get_mut(run_id) else {
                return Err(StoreError::NotFound(run_id.to_string()));
            };
            item.lease = Some(Lease { owner: owner.clone(), acquired_at: now, expires_at: now.add_millis(lease_duration_ms) });
            Ok(())
        }

        fn complete(&self, run_id: &RunId) -> Result<(), StoreError> {
            let mut items = self.items.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(item) = items.get_mut(run_id) {
                item.status = QueueStatus::Done;
                item.lease = None;
            }
            Ok(())
        }

        fn list_expired(&self, _now: Timestamp) -> Result<Vec<QueueItem>, StoreError> {
            Ok(Vec::new())
        }

        fn list_all(&self) -> Result<Vec<QueueItem>, StoreError> {
            Ok(self
                .items
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .values()
                .filter(|item| item.status != QueueStatus::Done)
                .cloned()
                .collect())
        }

        fn recover_orphans(
            &self,
            new_owner: &OwnerId,
            now: Timestamp,
            lease_duration_ms: i64,
        ) -> Result<Vec<(QueueItem, Option<OwnerId>)>, StoreError> {
            let mut items = self.items.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let mut reassigned = Vec::new();
            for item in items.values_mut() {
                if item.status != QueueStatus::Claimed {
                    continue;
                }
                let previous_owner = item.lease.as_ref().map(|lease| lease.owner.clone());
                item.lease = Some(Lease {
                    owner: new_owner.clone(),
                    acquired_at: now,
                    expires_at: now.add_millis(lease_duration_ms),
                });
                reassigned.push((item.clone(), previous_owner));
            }
            Ok(reassigned)
        }
    }

    /// In-memory [`RunStore`] fake backing the recovery tests.
    #[derive(Default)]
    struct FakeRuns {
        /// Runs keyed by id.
        runs: Mutex<HashMap<RunId, RunRecord>>,
    }

    impl RunStore for FakeRuns {
        fn insert(&self, run: &RunRecord) -> Result<(), StoreError> {
            self.runs.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(run.id.clone(), run.clone());
            Ok(())
        }

        fn get(&self, id: &RunId) -> Result<Option<RunRecord>, StoreError> {
            Ok(self.runs.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(id).cloned())
        }

        fn update(&self, run: &RunRecord) -> Result<(), StoreError> {
            self.runs.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(run.id.clone(), run.clone());
            Ok(())
        }

        fn list_by_status(&self, status: RunStatus) -> Result<Vec<RunRecord>, StoreError> {
            Ok(self
                .runs
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .values()
                .filter(|run| run.status == status)
                .cloned()
                .collect())
        }
    }

    /// In-memory [`EventStore`] fake backing the recovery tests.
    #[derive(Default)]
    struct FakeEvents {
        /// Appended events keyed by run id.
        events: Mutex<HashMap<RunId, Vec<EventKind>>>,
    }

    impl EventStore for FakeEvents {
        fn append(&self, run_id: &RunId, recorded_at: Timestamp, kind: EventKind) -> Result<Event, StoreError> {
            let mut events = self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let log = events.entry(run_id.clone()).or_default();
            let seq = u64::try_from(log.len()).unwrap_or(u64::MAX);
            log.push(kind.clone());
            Ok(Event::new(run_id.clone(), seq, recorded_at, kind))
        }

        fn list(&self, _run_id: &RunId, _after_seq: Option<u64>) -> Result<Vec<Event>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn flow_id() -> FlowId {
        FlowId::new("f1")
    }

    fn seed_run(runs: &FakeRuns, run_id: &RunId, status: RunStatus) {
        let mut run = RunRecord::new_queued(run_id.clone(), flow_id(), Timestamp::from_millis(0), Default::default(), None, None, 1);
        run.status = status;
        runs.insert(&run).expect("seed run");
    }

    fn seed_queue_item(queue: &FakeQueue, run_id: &RunId, status: QueueStatus, owner: Option<&str>) {
        let mut item = QueueItem::new_pending(run_id.clone(), flow_id(), Timestamp::from_millis(0), 0);
        item.status = status;
        if let Some(owner) = owner {
            item.lease = Some(Lease::new(OwnerId::new(owner), Timestamp::from_millis(0), 30_000));
        }
        queue.items.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(run_id.clone(), item);
    }

    #[test]
    fn pre_clean_marks_done_items_with_no_run_record() {
        let queue = Arc::new(FakeQueue::default());
        let runs = Arc::new(FakeRuns::default());
        let events = Arc::new(FakeEvents::default());
        seed_queue_item(&queue, &RunId::new("orphan"), QueueStatus::Pending, None);

        let coordinator = RecoveryCoordinator::new(queue.clone(), runs, events);
        let report = coordinator.run(&OwnerId::new("owner-new"), Timestamp::from_millis(1_000), 30_000).expect("run");

        assert_eq!(report.cleaned, vec![RunId::new("orphan")]);
        assert_eq!(report.total(), 1);
    }

    #[test]
    fn pre_clean_marks_done_items_whose_run_is_terminal() {
        let queue = Arc::new(FakeQueue::default());
        let runs = Arc::new(FakeRuns::default());
        let events = Arc::new(FakeEvents::default());
        seed_run(&runs, &RunId::new("r1"), RunStatus::Succeeded);
        seed_queue_item(&queue, &RunId::new("r1"), QueueStatus::Claimed, Some("owner-old"));

        let coordinator = RecoveryCoordinator::new(queue, runs, events);
        let report = coordinator.run(&OwnerId::new("owner-new"), Timestamp::from_millis(1_000), 30_000).expect("run");

        assert_eq!(report.cleaned, vec![RunId::new("r1")]);
    }

    #[test]
    fn running_orphan_is_requeued_and_recovery_event_recorded() {
        let queue = Arc::new(FakeQueue::default());
        let runs = Arc::new(FakeRuns::default());
        let events = Arc::new(FakeEvents::default());
        seed_run(&runs, &RunId::new("r1"), RunStatus::Running);
        seed_queue_item(&queue, &RunId::new("r1"), QueueStatus::Claimed, Some("owner-old"));

        let coordinator = RecoveryCoordinator::new(queue.clone(), runs.clone(), events.clone());
        let report = coordinator.run(&OwnerId::new("owner-new"), Timestamp::from_millis(1_000), 30_000).expect("run");

        assert_eq!(report.requeued, vec![RunId::new("r1")]);
        assert_eq!(runs.get(&RunId::new("r1")).expect("get").expect("run").status, RunStatus::Queued);
        let logged = events.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        assert!(matches!(logged.get(&RunId::new("r1")).expect("log")[0], EventKind::RunRecovered { .. }));
    }

    #[test]
    fn paused_orphan_is_adopted_with_refreshed_lease_and_stays_paused() {
        let queue = Arc::new(FakeQueue::default());
        let runs = Arc::new(FakeRuns::default());
        let events = Arc::new(FakeEvents::default());
        seed_run(&runs, &RunId::new("r1"), RunStatus::Paused);
        seed_queue_item(&queue, &RunId::new("r1"), QueueStatus::Claimed, Some("owner-old"));

        let coordinator = RecoveryCoordinator::new(queue.clone(), runs.clone(), events);
        let report =
            coordinator.run(&OwnerId::new("owner-new"), Timestamp::from_millis(1_000), 30_000).expect("run");

        assert_eq!(report.adopted, vec![RunId::new("r1")]);
        assert_eq!(runs.get(&RunId::new("r1")).expect("get").expect("run").status, RunStatus::Paused);
        let item = queue.items.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(&RunId::new("r1")).cloned().expect("item");
        assert_eq!(item.lease.expect("lease").owner, OwnerId::new("owner-new"));
    }

    #[test]
    fn item_with_no_claimed_lease_is_left_untouched() {
        let queue = Arc::new(FakeQueue::default());
        let runs = Arc::new(FakeRuns::default());
        let events = Arc::new(FakeEvents::default());
        seed_run(&runs, &RunId::new("r1"), RunStatus::Queued);
        seed_queue_item(&queue, &RunId::new("r1"), QueueStatus::Pending, None);

        let coordinator = RecoveryCoordinator::new(queue, runs, events);
        let report = coordinator.run(&OwnerId::new("owner-new"), Timestamp::from_millis(1_000), 30_000).expect("run");

        assert_eq!(report.total(), 0);
    }
}
