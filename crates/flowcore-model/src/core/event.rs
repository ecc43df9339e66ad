// crates/flowcore-model/src/core/event.rs
// ============================================================================
// Module: Flowcore Event Log
// Description: Append-only, per-run event envelope and event kinds.
// Purpose: Give every Run an ordered, replayable history of what happened.
// Dependencies: crate::core::{errors, identifiers, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! Every state change to a Run is recorded as an [`Event`] with a
//! `(run_id, seq)` key allocated atomically by the Event Store. The log is
//! append-only: nothing is ever mutated or deleted once written.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::errors::EngineError;
use crate::core::identifiers::EdgeId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::TriggerId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Event Kind
// ============================================================================

/// Discriminated event payloads appended to a run's log.
///
/// # Invariants
/// - Variants are additive; existing variant shapes are never changed once
///   shipped, since historical events must remain deserializable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// The run was enqueued.
    RunQueued,
    /// A scheduler claimed the run and began executing it.
    RunStarted,
    /// The run was cooperatively paused.
    RunPaused {
        /// Node the run paused at.
        node_id: NodeId,
    },
    /// A paused run resumed execution.
    RunResumed,
    /// The run reached a successful terminal state.
    RunSucceeded,
    /// The run reached a failed terminal state.
    RunFailed {
        /// Terminal error.
        error: EngineError,
    },
    /// The run was canceled.
    RunCanceled {
        /// Optional human-readable reason.
        reason: Option<String>,
    },
    /// A node was selected as the next step and is about to begin its
    /// first attempt.
    NodeQueued {
        /// Node queued.
        node_id: NodeId,
    },
    /// Execution entered a node.
    NodeStarted {
        /// Node entered.
        node_id: NodeId,
        /// Attempt number (1-based).
        attempt: u32,
    },
    /// A disabled node was skipped; the default successor was taken
    /// without invoking its executor.
    NodeSkipped {
        /// Node skipped.
        node_id: NodeId,
        /// Why the node was skipped.
        reason: String,
    },
    /// A node attempt completed successfully.
    NodeSucceeded {
        /// Node that completed.
        node_id: NodeId,
        /// Attempt number (1-based).
        attempt: u32,
        /// Output produced by the node, if any.
        output: Option<Value>,
        /// Wall-clock duration of the attempt in milliseconds.
        took_ms: u64,
    },
    /// A node attempt failed.
    NodeFailed {
        /// Node that failed.
        node_id: NodeId,
        /// Attempt number (1-based).
        attempt: u32,
        /// Failure detail.
        error: EngineError,
    },
    /// A node attempt is being retried per its retry policy.
    NodeRetryScheduled {
        /// Node being retried.
        node_id: NodeId,
        /// Attempt that will run next.
        next_attempt: u32,
        /// Computed backoff delay in milliseconds before the retry runs.
        delay_ms: u64,
    },
    /// An onError policy redirected execution via Continue/Goto.
    NodeErrorHandled {
        /// Node whose failure was handled.
        node_id: NodeId,
        /// Human-readable description of the decision taken.
        decision: String,
    },
    /// An edge was taken to determine the next node.
    EdgeTaken {
        /// Edge traversed.
        edge_id: EdgeId,
        /// Source node.
        from: NodeId,
        /// Target node.
        to: NodeId,
    },
    /// A breakpoint was hit and the run paused before executing the node.
    BreakpointHit {
        /// Node the breakpoint fired on.
        node_id: NodeId,
    },
    /// A persistent or run-scoped variable was written.
    VariableWritten {
        /// Variable name.
        name: String,
        /// New value.
        value: Value,
    },
    /// A node's `varsPatch` was applied to the run's variable map.
    VarsPatch {
        /// Node that produced the patch.
        node_id: NodeId,
        /// Operations applied, in order.
        ops: Vec<VarPatchEntry>,
    },
    /// A screenshot artifact was captured for a node attempt.
    ArtifactScreenshot {
        /// Node the artifact belongs to.
        node_id: NodeId,
        /// Opaque reference to the captured artifact (e.g. a storage key).
        artifact_ref: Value,
    },
    /// A trigger fired and produced (or attempted to produce) this run.
    TriggerFired {
        /// Trigger that fired.
        trigger_id: TriggerId,
    },
    /// The run's queue item lease was reclaimed after a crash and the run
    /// was restarted from its start node.
    RunRecovered {
        /// Previous owner whose lease expired.
        previous_owner: Option<String>,
    },
    /// A node executor emitted a structured log line through its context.
    NodeLog {
        /// Node that emitted the line.
        node_id: NodeId,
        /// Severity.
        level: LogLevel,
        /// Human-readable message.
        message: String,
        /// Optional structured payload.
        data: Option<Value>,
    },
}

// ============================================================================
// SECTION: Variable Patch Entry
// ============================================================================

/// One operation recorded in an [`EventKind::VarsPatch`] event, mirroring
/// `flowcore_runner::node::VarPatchOp` without introducing a dependency
/// from this crate onto the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum VarPatchEntry {
    /// The variable was set to `value`.
    Set {
        /// Variable name.
        name: String,
        /// New value.
        value: Value,
    },
    /// The variable was deleted.
    Delete {
        /// Variable name.
        name: String,
    },
}

// ============================================================================
// SECTION: Log Level
// ============================================================================

/// Severity of a [`EventKind::NodeLog`] line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Diagnostic detail, not normally surfaced.
    Debug,
    /// Routine informational line.
    Info,
    /// Recoverable anomaly.
    Warn,
    /// Error the node chose to report without failing the attempt.
    Error,
}

impl EventKind {
    /// Returns a short, stable discriminant name for logging/metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::RunQueued => "run_queued",
            Self::RunStarted => "run_started",
            Self::RunPaused { .. } => "run_paused",
            Self::RunResumed => "run_resumed",
            Self::RunSucceeded => "run_succeeded",
            Self::RunFailed { .. } => "run_failed",
            Self::RunCanceled { .. } => "run_canceled",
            Self::NodeQueued { .. } => "node_queued",
            Self::NodeStarted { .. } => "node_started",
            Self::NodeSkipped { .. } => "node_skipped",
            Self::NodeSucceeded { .. } => "node_succeeded",
            Self::NodeFailed { .. } => "node_failed",
            Self::NodeRetryScheduled { .. } => "node_retry_scheduled",
            Self::NodeErrorHandled { .. } => "node_error_handled",
            Self::EdgeTaken { .. } => "edge_taken",
            Self::BreakpointHit { .. } => "breakpoint_hit",
            Self::VariableWritten { .. } => "variable_written",
            Self::VarsPatch { .. } => "vars_patch",
            Self::ArtifactScreenshot { .. } => "artifact_screenshot",
            Self::TriggerFired { .. } => "trigger_fired",
            Self::RunRecovered { .. } => "run_recovered",
            Self::NodeLog { .. } => "node_log",
        }
    }
}

// ============================================================================
// SECTION: Event Envelope
// ============================================================================

/// One entry in a run's append-only event log.
///
/// # Invariants
/// - `(run_id, seq)` is unique and `seq` is strictly increasing per run,
///   allocated atomically by the Event Store within the transaction that
///   appends the event (spec.md §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Run this event belongs to.
    pub run_id: RunId,
    /// Sequence number within the run, starting at 0.
    pub seq: u64,
    /// Time the event was recorded.
    pub recorded_at: Timestamp,
    /// Event payload.
    pub kind: EventKind,
}

impl Event {
    /// Creates a new event with the given sequence number.
    #[must_use]
    pub const fn new(run_id: RunId, seq: u64, recorded_at: Timestamp, kind: EventKind) -> Self {
        Self { run_id, seq, recorded_at, kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_label_matches_variant() {
        let kind = EventKind::NodeStarted { node_id: NodeId::new("n1"), attempt: 1 };
        assert_eq!(kind.label(), "node_started");
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = Event::new(
            RunId::new("r1"),
            0,
            Timestamp::from_millis(1_000),
            EventKind::RunQueued,
        );
        let json = serde_json::to_string(&event).expect("serialize");
        let back: Event = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(event, back);
    }

    #[test]
    fn vars_patch_event_round_trips_through_json() {
        let kind = EventKind::VarsPatch {
            node_id: NodeId::new("n1"),
            ops: vec![
                VarPatchEntry::Set { name: "x".into(), value: Value::from(1) },
                VarPatchEntry::Delete { name: "y".into() },
            ],
        };
        assert_eq!(kind.label(), "vars_patch");
        let json = serde_json::to_string(&kind).expect("serialize");
        let back: EventKind = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(kind, back);
    }

    #[test]
    fn node_skipped_label() {
        let kind = EventKind::NodeSkipped { node_id: NodeId::new("n1"), reason: "disabled".into() };
        assert_eq!(kind.label(), "node_skipped");
    }

    #[test]
    fn node_log_event_round_trips_through_json() {
        let kind = EventKind::NodeLog {
            node_id: NodeId::new("n1"),
            level: LogLevel::Warn,
            message: "retrying".into(),
            data: None,
        };
        assert_eq!(kind.label(), "node_log");
        let json = serde_json::to_string(&kind).expect("serialize");
        let back: EventKind = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(kind, back);
    }

    #[test]
    fn node_failed_event_carries_engine_error() {
        let err = EngineError::new(crate::core::errors::ErrorCode::Timeout, "exceeded attempt timeout");
        let kind = EventKind::NodeFailed { node_id: NodeId::new("n1"), attempt: 2, error: err.clone() };
        match kind {
            EventKind::NodeFailed { error, .. } => assert_eq!(error, err),
            _ => panic!("expected NodeFailed"),
        }
    }
}
