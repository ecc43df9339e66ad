// crates/flowcore-model/src/core/run.rs
// ============================================================================
// Module: Flowcore Run Record
// Description: Persisted lifecycle record for a single Flow execution.
// Purpose: Track run status, sequencing, and debug configuration across restarts.
// Dependencies: crate::core::{errors, flow, identifiers, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! A [`RunRecord`] is the durable lifecycle record for one execution of a
//! Flow. It does not hold mid-run variable state — a crashed run is
//! requeued and restarted from its start node (spec.md §1 Non-goals) — only
//! the bookkeeping needed to resume scheduling and to allocate event
//! sequence numbers atomically (`next_seq`).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::errors::EngineError;
use crate::core::identifiers::FlowId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::TriggerId;
use crate::core::time::Timestamp;

/// Current schema version for persisted [`RunRecord`]s.
pub const RUN_SCHEMA_VERSION: u32 = 1;

// ============================================================================
// SECTION: Status
// ============================================================================

/// Run lifecycle status.
///
/// # Invariants
/// - Transitions are restricted to the state machine in spec.md §3:
///   `queued -> running -> {paused <-> running} -> {succeeded, failed, canceled}`,
///   plus `queued -> canceled` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Waiting to be claimed by the scheduler.
    Queued,
    /// Actively executing.
    Running,
    /// Cooperatively paused; resumable.
    Paused,
    /// Terminated successfully.
    Succeeded,
    /// Terminated with an error.
    Failed,
    /// Terminated by cancellation.
    Canceled,
}

impl RunStatus {
    /// Returns true for a terminal status (no further transitions allowed).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// Checks whether `from -> to` is a legal [`RunStatus`] transition.
#[must_use]
pub fn is_valid_transition(from: RunStatus, to: RunStatus) -> bool {
    use RunStatus::{Canceled, Failed, Paused, Queued, Running, Succeeded};
    matches!(
        (from, to),
        (Queued, Running)
            | (Queued, Canceled)
            | (Running, Paused)
            | (Paused, Running)
            | (Running, Succeeded)
            | (Running, Failed)
            | (Running, Canceled)
            | (Paused, Canceled)
    )
}

// ============================================================================
// SECTION: Trigger Context
// ============================================================================

/// Kind of trigger that produced a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// URL navigation match.
    UrlMatch,
    /// Cron schedule.
    Cron,
    /// Fixed interval.
    Interval,
    /// One-shot timestamp.
    OneShot,
    /// Keyboard hotkey.
    Hotkey,
    /// Browser context menu.
    ContextMenu,
    /// DOM-appearance observer.
    DomAppearance,
    /// Explicit manual start (RPC `startRun`).
    Manual,
}

/// Context captured at the moment a trigger fired, attached to the run it
/// produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerContext {
    /// Trigger that fired.
    pub trigger_id: TriggerId,
    /// Trigger kind.
    pub kind: TriggerKind,
    /// Time the trigger fired.
    pub fired_at: Timestamp,
    /// Optional source tab identifier.
    pub source_tab_id: Option<String>,
    /// Optional source page identifier.
    pub source_page_id: Option<String>,
}

// ============================================================================
// SECTION: Debug Configuration
// ============================================================================

/// Debug configuration attached to a run at enqueue time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugConfig {
    /// Node ids to break on.
    #[serde(default)]
    pub breakpoints: Vec<NodeId>,
    /// Whether to request a pause before the first node executes.
    #[serde(default)]
    pub pause_on_start: bool,
}

// ============================================================================
// SECTION: Run Record
// ============================================================================

/// Durable lifecycle record for one Flow execution.
///
/// # Invariants
/// - `next_seq >= 0` and strictly monotonic across appended events.
/// - `status` transitions only as allowed by [`is_valid_transition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Schema version of this record.
    #[serde(default = "run_schema_version_default")]
    pub schema_version: u32,
    /// Run identifier.
    pub id: RunId,
    /// Flow this run executes.
    pub flow_id: FlowId,
    /// Lifecycle status.
    pub status: RunStatus,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Last-update timestamp.
    pub updated_at: Timestamp,
    /// Time the run transitioned to running for the first time.
    pub started_at: Option<Timestamp>,
    /// Time the run reached a terminal status.
    pub finished_at: Option<Timestamp>,
    /// Wall-clock duration of the run in milliseconds.
    pub took_ms: Option<u64>,
    /// Optional bound tab/session identifier.
    pub bound_session_id: Option<String>,
    /// Optional explicit start node, used by recovery to resume from the
    /// original start rather than the flow's default entry node.
    pub start_node_id: Option<NodeId>,
    /// Node currently executing (or about to execute).
    pub current_node_id: Option<NodeId>,
    /// Current attempt count for the in-progress node.
    pub attempt: u32,
    /// Maximum attempts permitted for the in-progress node's retry policy.
    pub max_attempts: u32,
    /// Optional run arguments merged into the initial variable map.
    #[serde(default)]
    pub args: BTreeMap<String, Value>,
    /// Optional trigger context, when the run was trigger-produced.
    pub trigger: Option<TriggerContext>,
    /// Optional debug configuration.
    pub debug: Option<DebugConfig>,
    /// Terminal error, set only when `status == Failed`.
    pub error: Option<EngineError>,
    /// Accumulated node outputs (last-writer-wins per key).
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    /// Next event sequence number to allocate for this run.
    pub next_seq: u64,
}

const fn run_schema_version_default() -> u32 {
    RUN_SCHEMA_VERSION
}

impl RunRecord {
    /// Creates a freshly queued run record with `next_seq = 0`.
    #[must_use]
    pub fn new_queued(
        id: RunId,
        flow_id: FlowId,
        now: Timestamp,
        args: BTreeMap<String, Value>,
        trigger: Option<TriggerContext>,
        debug: Option<DebugConfig>,
        max_attempts: u32,
    ) -> Self {
        Self {
            schema_version: RUN_SCHEMA_VERSION,
            id,
            flow_id,
            status: RunStatus::Queued,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            took_ms: None,
            bound_session_id: None,
            start_node_id: None,
            current_node_id: None,
            attempt: 0,
            max_attempts,
            args,
            trigger,
            debug,
            error: None,
            outputs: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Merges `patch` into `self.outputs` with last-writer-wins semantics
    /// per key (spec.md §9 Open Questions).
    pub fn merge_outputs(&mut self, patch: BTreeMap<String, Value>) {
        for (key, value) in patch {
            self.outputs.insert(key, value);
        }
    }
}
