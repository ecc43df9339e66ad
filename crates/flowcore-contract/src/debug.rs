// crates/flowcore-contract/src/debug.rs
// ============================================================================
// Module: Flowcore Debug Commands
// Description: Commands routed to the per-run DebugController (spec.md
//              §4.7, §4.10: "debug command routed to the DebugController").
// Purpose: Give RPC clients a typed way to set breakpoints, step, resume,
//          or cancel a paused run.
// Dependencies: flowcore-model, serde
// ============================================================================

use flowcore_model::core::identifiers::NodeId;
use serde::Deserialize;
use serde::Serialize;

/// A command accepted by a run's DebugController.
///
/// # Invariants
/// - `SetBreakpoints` replaces the full breakpoint set; it is not additive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum DebugCommand {
    /// Replaces the run's breakpoint set.
    SetBreakpoints {
        /// Node ids to break on.
        node_ids: Vec<NodeId>,
    },
    /// Arms a single step-over past the next node.
    StepOver,
    /// Resumes a paused run.
    Resume,
    /// Cancels the run.
    Cancel {
        /// Optional human-readable reason.
        reason: Option<String>,
    },
}
