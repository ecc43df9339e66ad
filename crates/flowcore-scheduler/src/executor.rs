// crates/flowcore-scheduler/src/executor.rs
// ============================================================================
// Module: Flowcore Run Executor Boundary
// Description: The trait the Scheduler invokes per claimed queue item.
// Purpose: Decouple the scheduling loop from the DAG interpreter that walks
//          a single run (implemented by flowcore-runner).
// Dependencies: flowcore-model, async-trait
// ============================================================================

//! ## Overview
//! [`RunExecutor`] is the seam between this crate and `flowcore-runner`.
//! The Scheduler only needs to know that a claimed item runs to a terminal
//! Run status; it does not interpret the DAG itself. Whether the run
//! succeeds, fails, or is canceled, the Scheduler calls
//! [`flowcore_model::interfaces::QueueStore::complete`] once execution
//! returns (spec.md §4.6: "the Scheduler calls `markDone(runId)`").

use async_trait::async_trait;
use flowcore_model::core::queue::QueueItem;

/// Error produced by a [`RunExecutor`], opaque to the scheduler.
pub type ExecutorError = Box<dyn std::error::Error + Send + Sync>;

/// Executes exactly one claimed run to a terminal status.
///
/// # Invariants
/// - Implementations must not return until the run has reached a terminal
///   `RunStatus` (succeeded, failed, or canceled) or the host is shutting
///   down; the scheduler treats return as "done" unconditionally.
#[async_trait]
pub trait RunExecutor: Send + Sync {
    /// Runs the claimed item to completion.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError`] only for failures the scheduler itself
    /// should log; ordinary run failures are recorded on the Run record
    /// and event log by the executor and reported here as `Ok(())`.
    async fn execute(&self, item: QueueItem) -> Result<(), ExecutorError>;
}
