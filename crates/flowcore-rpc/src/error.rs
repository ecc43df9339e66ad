// crates/flowcore-rpc/src/error.rs
// ============================================================================
// Module: Flowcore RPC Errors
// Description: Error taxonomy for dispatching one RPC request.
// Purpose: Collapse storage, scheduler, and trigger failures into a single
//          type the transports turn into an `RpcResponse::err` string.
// Dependencies: flowcore-model, flowcore-scheduler, flowcore-triggers,
//               thiserror
// ============================================================================

use flowcore_model::interfaces::StoreError;
use flowcore_scheduler::SchedulerError;
use flowcore_triggers::TriggerError;
use thiserror::Error;

/// Errors raised while dispatching one RPC request.
///
/// # Invariants
/// - Every variant's `Display` is the string sent back on the wire
///   (spec.md §6: "Errors are strings; detailed codes are carried in
///   events").
#[derive(Debug, Error)]
pub enum RpcServerError {
    /// A storage port call failed.
    #[error("{0}")]
    Store(#[from] StoreError),
    /// A scheduler call failed.
    #[error("{0}")]
    Scheduler(#[from] SchedulerError),
    /// A trigger manager call failed.
    #[error("{0}")]
    Trigger(#[from] TriggerError),
    /// The request named a flow, run, or trigger id that does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// The request failed an input-normalization or reference-integrity
    /// check (spec.md §4.10 "input normalization").
    #[error("{0}")]
    Invalid(String),
    /// A pause/resume/cancel request named a run not in a status that
    /// supports the requested operation.
    #[error("run is {status}, cannot {operation}")]
    InvalidRunState {
        /// The run's current status, rendered lowercase (e.g. `"queued"`).
        status: &'static str,
        /// The operation that was attempted, e.g. `"pause"`.
        operation: &'static str,
    },
}
