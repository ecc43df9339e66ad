// crates/flowcore-runner/src/writer_lane.rs
// ============================================================================
// Module: Flowcore Per-Run Write Lane
// Description: Serializes a single run's event appends and run record
//              updates through one dedicated async task.
// Purpose: Guarantee events are appended in the order the interpreter
//          produced them, and that no two writers race on the same run
//          record, without holding a lock across await points.
// Dependencies: flowcore-model, tokio
// ============================================================================

//! ## Overview
//! This is the same single-lane-queue shape as
//! [`flowcore_store_sqlite`](../flowcore_store_sqlite/index.html)'s writer
//! thread (a bounded channel plus a dedicated task draining it), scaled down
//! to one run instead of one process: a [`WriteLane`] owns a bounded
//! `tokio::sync::mpsc` channel; [`WriteLane::spawn`] starts a task that pulls
//! jobs off it one at a time and applies them to the backing stores in
//! submission order, replying to each caller over a `oneshot` channel.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use flowcore_model::core::event::Event;
use flowcore_model::core::event::EventKind;
use flowcore_model::core::identifiers::RunId;
use flowcore_model::core::run::RunRecord;
use flowcore_model::core::time::Timestamp;
use flowcore_model::interfaces::EventStore;
use flowcore_model::interfaces::RunStore;
use flowcore_model::interfaces::StoreError;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

/// Bound on queued-but-unprocessed write jobs per run before a caller's
/// `append_event`/`update_run` call starts exerting backpressure.
const LANE_CAPACITY: usize = 64;

// ============================================================================
// SECTION: Write Job
// ============================================================================

/// One operation submitted to a run's write lane.
enum WriteJob {
    /// Append an event, replying with the stored envelope (including its
    /// allocated sequence number).
    AppendEvent {
        recorded_at: Timestamp,
        kind: EventKind,
        reply: oneshot::Sender<Result<Event, StoreError>>,
    },
    /// Replace the run record wholesale.
    UpdateRun {
        run: RunRecord,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
}

// ============================================================================
// SECTION: Write Lane
// ============================================================================

/// Handle to a run's dedicated, order-preserving write task.
///
/// # Invariants
/// - Cloning a [`WriteLane`] shares the same underlying task; all clones
///   submit to the same ordered queue.
#[derive(Clone)]
pub struct WriteLane {
    run_id: RunId,
    sender: mpsc::Sender<WriteJob>,
}

/// Error returned when a write lane's task has already exited, which only
/// happens after the run reaches a terminal state and its lane is dropped.
#[derive(Debug, thiserror::Error)]
#[error("write lane for run {0} is closed")]
pub struct LaneClosed(pub RunId);

impl WriteLane {
    /// Spawns the dedicated task for `run_id` and returns a handle to it.
    #[must_use]
    pub fn spawn(run_id: RunId, events: Arc<dyn EventStore>, runs: Arc<dyn RunStore>) -> Self {
        let (sender, receiver) = mpsc::channel(LANE_CAPACITY);
        let task_run_id = run_id.clone();
        tokio::spawn(run_lane(task_run_id, receiver, events, runs));
        Self { run_id, sender }
    }

    /// Appends an event through this run's lane, awaiting its commit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] propagated from the append, or reports the
    /// lane as closed if its task has already exited.
    pub async fn append_event(&self, recorded_at: Timestamp, kind: EventKind) -> Result<Event, StoreError> {
        let (reply, recv) = oneshot::channel();
        self.sender
            .send(WriteJob::AppendEvent { recorded_at, kind, reply })
            .await
            .map_err(|_| lane_closed(&self.run_id))?;
        recv.await.map_err(|_| lane_closed(&self.run_id))?
    }

    /// Replaces the run record through this run's lane, awaiting its commit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] propagated from the update, or reports the
    /// lane as closed if its task has already exited.
    pub async fn update_run(&self, run: RunRecord) -> Result<(), StoreError> {
        let (reply, recv) = oneshot::channel();
        self.sender.send(WriteJob::UpdateRun { run, reply }).await.map_err(|_| lane_closed(&self.run_id))?;
        recv.await.map_err(|_| lane_closed(&self.run_id))?
    }
}

/// Maps a closed channel/task into a [`StoreError`] the caller can propagate
/// alongside ordinary storage failures.
fn lane_closed(run_id: &RunId) -> StoreError {
    StoreError::Io(LaneClosed(run_id.clone()).to_string())
}

/// Body of the dedicated per-run write task: applies jobs strictly in
/// submission order until every sender handle is dropped.
async fn run_lane(
    run_id: RunId,
    mut receiver: mpsc::Receiver<WriteJob>,
    events: Arc<dyn EventStore>,
    runs: Arc<dyn RunStore>,
) {
    while let Some(job) = receiver.recv().await {
        match job {
            WriteJob::AppendEvent { recorded_at, kind, reply } => {
                let result = events.append(&run_id, recorded_at, kind);
                let _ignored = reply.send(result);
            }
            WriteJob::UpdateRun { run, reply } => {
                let result = runs.update(&run);
                let _ignored = reply.send(result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use flowcore_model::core::identifiers::FlowId;
    use flowcore_model::core::run::RunStatus;

    use super::*;

    #[derive(Default)]
    struct FakeEvents {
        appended: Mutex<Vec<Event>>,
    }

    impl EventStore for FakeEvents {
        fn append(&self, run_id: &RunId, recorded_at: Timestamp, kind: EventKind) -> Result<Event, StoreError> {
            let mut appended = self.appended.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let seq = appended.len() as u64;
            let event = Event::new(run_id.clone(), seq, recorded_at, kind);
            appended.push(event.clone());
            Ok(event)
        }

        fn list(&self, _run_id: &RunId, _after_seq: Option<u64>) -> Result<Vec<Event>, StoreError> {
            Ok(self.appended.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone())
        }

        fn readiness(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeRuns {
        stored: Mutex<HashMap<RunId, RunRecord>>,
    }

    impl RunStore for FakeRuns {
        fn insert(&self, run: &RunRecord) -> Result<(), StoreError> {
            self.stored.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(run.id.clone(), run.clone());
            Ok(())
        }

        fn get(&self, id: &RunId) -> Result<Option<RunRecord>, StoreError> {
            Ok(self.stored.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(id).cloned())
        }

        fn update(&self, run: &RunRecord) -> Result<(), StoreError> {
            self.stored.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(run.id.clone(), run.clone());
            Ok(())
        }

        fn list_by_status(&self, _status: RunStatus) -> Result<Vec<RunRecord>, StoreError> {
            Ok(Vec::new())
        }

        fn readiness(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn appended_events_receive_increasing_seq() {
        let run_id = RunId::new("r1");
        let events: Arc<dyn EventStore> = Arc::new(FakeEvents::default());
        let runs: Arc<dyn RunStore> = Arc::new(FakeRuns::default());
        let lane = WriteLane::spawn(run_id.clone(), events, runs);

        let first = lane.append_event(Timestamp::from_millis(0), EventKind::RunQueued).await.expect("append 1");
        let second = lane.append_event(Timestamp::from_millis(1), EventKind::RunStarted).await.expect("append 2");

        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_run_round_trips() {
        let run_id = RunId::new("r1");
        let events: Arc<dyn EventStore> = Arc::new(FakeEvents::default());
        let runs: Arc<dyn RunStore> = Arc::new(FakeRuns::default());
        let lane = WriteLane::spawn(run_id.clone(), events, Arc::clone(&runs));

        let record = RunRecord::new_queued(
            run_id.clone(),
            FlowId::new("f1"),
            Timestamp::from_millis(0),
            std::collections::BTreeMap::new(),
            None,
            None,
            3,
        );
        lane.update_run(record.clone()).await.expect("update run");

        let stored = runs.get(&run_id).expect("get").expect("present");
        assert_eq!(stored.id, record.id);
    }
}
