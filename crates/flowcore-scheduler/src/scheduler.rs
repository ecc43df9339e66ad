// crates/flowcore-scheduler/src/scheduler.rs
// ============================================================================
// Module: Flowcore Scheduler
// Description: Parallelism-capped loop that claims Run Queue items and hands
//              them to a Run Runner.
// Purpose: Turn claimed queue items into in-flight executions while keeping
//          leases alive and reacting to external kicks.
// Dependencies: flowcore-model, tokio
// ============================================================================

//! ## Overview
//! [`Scheduler::spawn`] starts the single-threaded cooperative loop spec.md
//! §4.6 describes: while in-flight work is below `max_parallel_runs` and the
//! queue has claimable work, claim one item and spawn its executor; when
//! nothing is claimable, wait on whichever comes first — an external
//! [`SchedulerHandle::kick`], a heartbeat tick (renews every held lease via
//! [`LeaseManager`]), a reclamation tick (lists expired leases for the audit
//! log), or an executor completing. A completed executor always calls
//! [`QueueStore::complete`] regardless of the run's actual outcome — spec.md
//! §4.6: "When an executor completes (success, failure, cancel) the
//! Scheduler calls `markDone(runId)`".

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use flowcore_model::core::identifiers::OwnerId;
use flowcore_model::core::time::Clock;
use flowcore_model::interfaces::QueueStore;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::Notify;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::task::JoinSet;

use crate::error::SchedulerError;
use crate::executor::RunExecutor;
use crate::lease::LeaseManager;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Tunables for one [`Scheduler`] instance.
///
/// # Invariants
/// - `max_parallel_runs >= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum number of runs executing concurrently on this host.
    pub max_parallel_runs: usize,
    /// Lease duration assigned on claim and renewed on heartbeat.
    pub lease_ttl_ms: i64,
    /// Interval between heartbeat ticks.
    pub heartbeat_interval_ms: u64,
    /// Interval between reclamation ticks.
    pub reclaim_interval_ms: u64,
}

// ============================================================================
// SECTION: Scheduler
// ============================================================================

/// The steady-state claim/spawn/heartbeat loop for one host.
pub struct Scheduler {
    queue: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    owner: OwnerId,
    executor: Arc<dyn RunExecutor>,
    lease_manager: Arc<LeaseManager>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Creates a scheduler over the given storage port, clock, and executor.
    #[must_use]
    pub fn new(
        queue: Arc<dyn QueueStore>,
        clock: Arc<dyn Clock>,
        owner: OwnerId,
        executor: Arc<dyn RunExecutor>,
        config: SchedulerConfig,
    ) -> Self {
        let lease_manager = Arc::new(LeaseManager::new(queue.clone(), owner.clone(), config.lease_ttl_ms));
        Self { queue, clock, owner, executor, lease_manager, config }
    }

    /// Starts the loop on the current Tokio runtime and returns a handle to
    /// kick or stop it.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let kick = Arc::new(Notify::new());
        let stop = Arc::new(Notify::new());
        let stopped = Arc::new(AtomicBool::new(false));
        let join = {
            let kick = kick.clone();
            let stop = stop.clone();
            let stopped = stopped.clone();
            tokio::spawn(async move { self.main_loop(&kick, &stop, &stopped).await })
        };
        SchedulerHandle { kick, stop, stopped, join: AsyncMutex::new(Some(join)) }
    }

    async fn main_loop(&self, kick: &Notify, stop: &Notify, stopped: &AtomicBool) {
        let permits = Arc::new(Semaphore::new(self.config.max_parallel_runs));
        let mut heartbeat_tick = tokio::time::interval(Duration::from_millis(self.config.heartbeat_interval_ms));
        let mut reclaim_tick = tokio::time::interval(Duration::from_millis(self.config.reclaim_interval_ms));
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            if stopped.load(Ordering::Acquire) {
                if in_flight.is_empty() {
                    break;
                }
            } else {
                self.drain_claimable(&permits, &mut in_flight);
            }

            tokio::select! {
                () = kick.notified() => {}
                _ = heartbeat_tick.tick() => {
                    let _ = self.lease_manager.heartbeat_all(self.clock.now());
                }
                _ = reclaim_tick.tick() => {
                    let _ = self.lease_manager.list_expired(self.clock.now());
                }
                () = stop.notified() => {
                    stopped.store(true, Ordering::Release);
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }
    }

    /// Claims and spawns executors while permits and claimable work remain.
    fn drain_claimable(&self, permits: &Arc<Semaphore>, in_flight: &mut JoinSet<()>) {
        loop {
            let Ok(permit) = Arc::clone(permits).try_acquire_owned() else { break };
            let now = self.clock.now();
            let claimed = self.queue.claim_batch(&self.owner, now, self.config.lease_ttl_ms, 1);
            let Ok(mut items) = claimed else { break };
            let Some(item) = items.pop() else { break };

            self.lease_manager.track(item.run_id.clone());
            let executor = self.executor.clone();
            let queue = self.queue.clone();
            let lease_manager = self.lease_manager.clone();
            let run_id = item.run_id.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                let _ = executor.execute(item).await;
                lease_manager.untrack(&run_id);
                let _ = queue.complete(&run_id);
            });
        }
    }
}

// ============================================================================
// SECTION: Handle
// ============================================================================

/// External control surface for a spawned [`Scheduler`] loop.
pub struct SchedulerHandle {
    kick: Arc<Notify>,
    stop: Arc<Notify>,
    stopped: Arc<AtomicBool>,
    join: AsyncMutex<Option<JoinHandle<()>>>,
}

impl SchedulerHandle {
    /// Idempotently nudges the loop to re-check the queue.
    pub fn kick(&self) {
        self.kick.notify_one();
    }

    /// Drains in-flight executors and stops the loop. Idempotent; a second
    /// call after the loop has already stopped returns immediately.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Stopped`] if the loop task panicked.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        self.stopped.store(true, Ordering::Release);
        self.stop.notify_one();
        let mut join = self.join.lock().await;
        if let Some(handle) = join.take() {
            handle.await.map_err(|_| SchedulerError::Stopped)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use flowcore_model::core::identifiers::FlowId;
    use flowcore_model::core::identifiers::RunId;
    use flowcore_model::core::queue::QueueItem;
    use flowcore_model::core::time::Timestamp;
    use flowcore_model::core::time::test_support::FakeClock;
    use flowcore_model::interfaces::StoreError;

    use super::*;
    use crate::executor::ExecutorError;

    /// In-memory [`QueueStore`] fake seeded with a fixed set of pending items.
    #[derive(Default)]
    struct FakeQueue {
        /// Items still awaiting claim.
        pending: StdMutex<Vec<QueueItem>>,
        /// Run ids that have been completed.
        completed: StdMutex<Vec<RunId>>,
    }

    impl QueueStore for FakeQueue {
        fn enqueue(&self, item: &QueueItem) -> Result<(), StoreError> {
            self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(item.clone());
            Ok(())
        }

        fn claim_batch(
            &self,
            _owner: &OwnerId,
            _now: Timestamp,
            _lease_duration_ms: i64,
            max_items: usize,
        ) -> Result<Vec<QueueItem>, StoreError> {
            let mut pending = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let take = max_items.min(pending.len());
            Ok(pending.drain(..take).collect())
        }

        fn heartbeat(
            &self,
            _run_id: &RunId,
            _owner: &OwnerId,
            _now: Timestamp,
            _lease_duration_ms: i64,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        fn complete(&self, run_id: &RunId) -> Result<(), StoreError> {
            self.completed.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(run_id.clone());
            Ok(())
        }

        fn list_expired(&self, _now: Timestamp) -> Result<Vec<QueueItem>, StoreError> {
            Ok(Vec::new())
        }

        fn list_all(&self) -> Result<Vec<QueueItem>, StoreError> {
            Ok(self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone())
        }

        fn recover_orphans(
            &self,
            _new_owner: &OwnerId,
            _now: Timestamp,
            _lease_duration_ms: i64,
        ) -> Result<Vec<(QueueItem, Option<OwnerId>)>, StoreError> {
            Ok(Vec::new())
        }
    }

    /// [`RunExecutor`] fake that always succeeds immediately.
    struct NoopExecutor;

    #[async_trait::async_trait]
    impl RunExecutor for NoopExecutor {
        async fn execute(&self, _item: QueueItem) -> Result<(), ExecutorError> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn claimed_item_is_executed_and_marked_done() {
        let queue = Arc::new(FakeQueue::default());
        queue
            .enqueue(&QueueItem::new_pending(RunId::new("r1"), FlowId::new("f1"), Timestamp::from_millis(0), 0))
            .expect("enqueue");

        let scheduler = Arc::new(Scheduler::new(
            queue.clone(),
            Arc::new(FakeClock::new(0)),
            OwnerId::new("owner-a"),
            Arc::new(NoopExecutor),
            SchedulerConfig {
                max_parallel_runs: 2,
                lease_ttl_ms: 30_000,
                heartbeat_interval_ms: 50,
                reclaim_interval_ms: 50,
            },
        ));
        let handle = scheduler.spawn();

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.stop().await.expect("stop");

        assert_eq!(queue.completed.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone(), vec![
            RunId::new("r1")
        ]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn kick_is_idempotent_and_stop_drains_cleanly_with_no_work() {
        let queue = Arc::new(FakeQueue::default());
        let scheduler = Arc::new(Scheduler::new(
            queue,
            Arc::new(FakeClock::new(0)),
            OwnerId::new("owner-a"),
            Arc::new(NoopExecutor),
            SchedulerConfig {
                max_parallel_runs: 1,
                lease_ttl_ms: 30_000,
                heartbeat_interval_ms: 1_000,
                reclaim_interval_ms: 1_000,
            },
        ));
        let handle = scheduler.spawn();

        handle.kick();
        handle.kick();
        handle.stop().await.expect("stop");
        handle.stop().await.expect("second stop is a no-op");
    }
}
