// crates/flowcore-scheduler/src/error.rs
// ============================================================================
// Module: Flowcore Scheduler Errors
// Description: Error taxonomy for lease management, recovery, and the
//              steady-state scheduling loop.
// Purpose: Give callers a single error type that composes storage failures
//          with scheduler-local ones.
// Dependencies: flowcore-model, thiserror
// ============================================================================

use flowcore_model::core::identifiers::RunId;
use flowcore_model::interfaces::StoreError;
use thiserror::Error;

/// Errors raised by the scheduler subsystem.
///
/// # Invariants
/// - Variants are stable for programmatic handling by the host binary.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A storage port call failed.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
    /// The executor for a claimed item returned an error.
    #[error("executor failed for run {run_id}: {source}")]
    Executor {
        /// Run whose executor failed.
        run_id: RunId,
        /// Underlying executor error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// The scheduler was asked to perform an operation after `stop()`.
    #[error("scheduler already stopped")]
    Stopped,
}
