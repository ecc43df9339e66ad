// crates/flowcore-contract/src/methods.rs
// ============================================================================
// Module: Flowcore RPC Methods
// Description: The full method/params surface named by spec.md §4.10.
// Purpose: Give the RPC server a single typed dispatch target instead of
//          hand-parsing a `{method, params}` pair.
// Dependencies: flowcore-model, serde, serde_json
// ============================================================================

//! ## Overview
//! `RpcMethod` is internally tagged on the wire as `{"method": "...",
//! "params": {...}}`, flattened into the enclosing [`crate::envelope::RpcRequest`]
//! so a request serializes as `{requestId, method, params}` per spec.md
//! §4.10. Method names use `camelCase` to match the spec's own naming
//! (`startRun`, `pauseRun`, ...).

use std::collections::BTreeMap;

use flowcore_model::core::flow::Flow;
use flowcore_model::core::identifiers::FlowId;
use flowcore_model::core::identifiers::NodeId;
use flowcore_model::core::identifiers::RunId;
use flowcore_model::core::identifiers::TriggerId;
use flowcore_model::core::run::DebugConfig;
use flowcore_model::core::run::RunStatus;
use flowcore_model::core::trigger::TriggerSpec;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::debug::DebugCommand;

/// One RPC method and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum RpcMethod {
    /// Lists all stored flow ids.
    ListFlows,
    /// Loads a flow by id.
    GetFlow {
        /// Flow to load.
        flow_id: FlowId,
    },
    /// Inserts or replaces a flow. An absent `flow.id` is generated by the
    /// server per spec.md §4.10's input-normalization rule.
    SaveFlow {
        /// Flow to persist.
        flow: Flow,
    },
    /// Deletes a flow by id.
    DeleteFlow {
        /// Flow to delete.
        flow_id: FlowId,
    },
    /// Lists runs, optionally filtered by status.
    ListRuns {
        /// Restrict to this status, if given.
        status: Option<RunStatus>,
    },
    /// Loads a run by id.
    GetRun {
        /// Run to load.
        run_id: RunId,
    },
    /// Lists a run's events in ascending sequence order.
    ListEvents {
        /// Run whose events to list.
        run_id: RunId,
        /// Only return events with `seq > from_seq`.
        from_seq: Option<u64>,
        /// Maximum number of events to return.
        limit: Option<usize>,
    },
    /// Lists all non-terminal queue items.
    ListQueue,
    /// Removes a queued (not yet claimed) item from the queue.
    CancelQueueItem {
        /// Run whose queue item to cancel.
        run_id: RunId,
    },
    /// Creates and enqueues a new run. Equivalent to the shared
    /// `enqueueRun` service the Trigger Manager also calls (spec.md
    /// §4.10: "startRun (= enqueueRun)").
    StartRun {
        /// Flow to run.
        flow_id: FlowId,
        /// Optional explicit start node, overriding the flow's entry node.
        start_node_id: Option<NodeId>,
        /// Run arguments merged into the initial variable map.
        #[serde(default)]
        args: BTreeMap<String, Value>,
        /// Optional debug configuration (breakpoints, pause-on-start).
        debug: Option<DebugConfig>,
    },
    /// Pauses a running run at its next cooperative checkpoint.
    PauseRun {
        /// Run to pause.
        run_id: RunId,
    },
    /// Resumes a paused run.
    ResumeRun {
        /// Run to resume.
        run_id: RunId,
    },
    /// Cancels a queued, running, or paused run.
    CancelRun {
        /// Run to cancel.
        run_id: RunId,
        /// Optional human-readable reason, recorded on `run.canceled`.
        reason: Option<String>,
    },
    /// Routes a debug command (breakpoints, step, resume, cancel) to the
    /// run's DebugController.
    DebugCommand {
        /// Run the command targets.
        run_id: RunId,
        /// Command to apply.
        command: DebugCommand,
    },
    /// Lists all stored triggers.
    ListTriggers,
    /// Loads a trigger by id.
    GetTrigger {
        /// Trigger to load.
        trigger_id: TriggerId,
    },
    /// Inserts or replaces a trigger. An absent `trigger.id` is generated
    /// by the server.
    SaveTrigger {
        /// Trigger to persist.
        trigger: TriggerSpec,
    },
    /// Deletes a trigger by id.
    DeleteTrigger {
        /// Trigger to delete.
        trigger_id: TriggerId,
    },
    /// Enables a disabled trigger and installs its handler on the next
    /// Trigger Manager refresh.
    EnableTrigger {
        /// Trigger to enable.
        trigger_id: TriggerId,
    },
    /// Disables an enabled trigger and uninstalls its handler on the next
    /// Trigger Manager refresh.
    DisableTrigger {
        /// Trigger to disable.
        trigger_id: TriggerId,
    },
    /// Manually fires a trigger, bypassing its installed handler.
    FireTrigger {
        /// Trigger to fire.
        trigger_id: TriggerId,
    },
    /// Subscribes the channel to events for one run, or all runs if
    /// `run_id` is omitted.
    Subscribe {
        /// Run to filter by, or `None` for all runs.
        run_id: Option<RunId>,
    },
    /// Unsubscribes the channel from events for one run, or all runs if
    /// `run_id` is omitted.
    Unsubscribe {
        /// Run to stop filtering by, or `None` to clear the "all runs"
        /// subscription.
        run_id: Option<RunId>,
    },
}

impl RpcMethod {
    /// Returns the wire method name, e.g. `"startRun"`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ListFlows => "listFlows",
            Self::GetFlow { .. } => "getFlow",
            Self::SaveFlow { .. } => "saveFlow",
            Self::DeleteFlow { .. } => "deleteFlow",
            Self::ListRuns { .. } => "listRuns",
            Self::GetRun { .. } => "getRun",
            Self::ListEvents { .. } => "listEvents",
            Self::ListQueue => "listQueue",
            Self::CancelQueueItem { .. } => "cancelQueueItem",
            Self::StartRun { .. } => "startRun",
            Self::PauseRun { .. } => "pauseRun",
            Self::ResumeRun { .. } => "resumeRun",
            Self::CancelRun { .. } => "cancelRun",
            Self::DebugCommand { .. } => "debugCommand",
            Self::ListTriggers => "listTriggers",
            Self::GetTrigger { .. } => "getTrigger",
            Self::SaveTrigger { .. } => "saveTrigger",
            Self::DeleteTrigger { .. } => "deleteTrigger",
            Self::EnableTrigger { .. } => "enableTrigger",
            Self::DisableTrigger { .. } => "disableTrigger",
            Self::FireTrigger { .. } => "fireTrigger",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
        }
    }
}
