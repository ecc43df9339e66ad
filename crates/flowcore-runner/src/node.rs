// crates/flowcore-runner/src/node.rs
// ============================================================================
// Module: Flowcore Node Executor Boundary
// Description: The context handed to a Node executor and the trait it
//              implements.
// Purpose: Decouple the DAG interpreter from the node implementation
//          catalogue (out of scope per spec.md §1).
// Dependencies: flowcore-model, async-trait
// ============================================================================

//! ## Overview
//! A [`NodeExecutor`] is the seam between this crate and the node
//! implementation catalogue, which spec.md §1 places out of scope. The
//! runner builds one [`NodeContext`] per attempt and hands it to the
//! registered executor for the node's `kind`; the executor reports its
//! result by mutating the context (variable patch, outputs, successor
//! choice, artifact) and returning `Ok(())`, or by returning an
//! [`EngineError`] that the runner classifies against the node's onError
//! policy (spec.md §4.7 "Per-attempt execution" / "Result handling").

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use flowcore_model::core::errors::EngineError;
use flowcore_model::core::event::LogLevel;
use flowcore_model::core::flow::Flow;
use flowcore_model::core::identifiers::NodeId;
use flowcore_model::core::identifiers::PersistentVarKey;
use flowcore_model::core::identifiers::RunId;
use flowcore_model::core::vars::PersistentVarRecord;
use flowcore_model::interfaces::StoreError;
use flowcore_model::interfaces::VarStore;
use serde_json::Value;

// ============================================================================
// SECTION: Variable patch
// ============================================================================

/// One operation in a node's `varsPatch`, applied to the run-scoped variable
/// map after a successful attempt (spec.md §4.7 "Result handling").
#[derive(Debug, Clone, PartialEq)]
pub enum VarPatchOp {
    /// Sets `name` to `value`, inserting or overwriting it.
    Set {
        /// Variable name.
        name: String,
        /// New value.
        value: Value,
    },
    /// Removes `name` from the variable map, if present.
    Delete {
        /// Variable name.
        name: String,
    },
}

// ============================================================================
// SECTION: Successor choice
// ============================================================================

/// The node's choice of successor, set via [`NodeContext::choose_next`].
///
/// # Invariants
/// - `Unset` is treated by the runner the same as `Default` (spec.md §4.7:
///   "if no successor, terminate success" falls out of [`crate::runner`]'s
///   successor resolution regardless of which of these two is recorded).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NextDirective {
    /// No explicit choice was made; the runner resolves the default
    /// successor (or terminates if there is none).
    #[default]
    Unset,
    /// Terminate this run successfully after this node, regardless of any
    /// outgoing edges.
    End,
    /// Jump to the edge carrying this label.
    EdgeLabel(String),
}

// ============================================================================
// SECTION: Node Context
// ============================================================================

/// Per-attempt context handed to a [`NodeExecutor`].
///
/// # Invariants
/// - `variables` reflects the run's variable map as of the start of this
///   attempt; mutations are staged in `vars_patch` rather than applied
///   in place, so a failed attempt leaves the map untouched.
pub struct NodeContext<'a> {
    /// Run this node is executing within.
    pub run_id: RunId,
    /// Flow snapshot this run is executing.
    pub flow: Arc<Flow>,
    /// Node currently executing.
    pub node_id: NodeId,
    /// Optional bound tab/session identifier.
    pub tab_id: Option<String>,
    variables: &'a BTreeMap<String, Value>,
    var_store: Arc<dyn VarStore>,
    canceled: Arc<AtomicBool>,
    vars_patch: Vec<VarPatchOp>,
    outputs: BTreeMap<String, Value>,
    next: NextDirective,
    artifact: Option<Value>,
    logs: Vec<(LogLevel, String, Option<Value>)>,
}

impl<'a> NodeContext<'a> {
    /// Creates a fresh context for one attempt.
    #[must_use]
    pub fn new(
        run_id: RunId,
        flow: Arc<Flow>,
        node_id: NodeId,
        tab_id: Option<String>,
        variables: &'a BTreeMap<String, Value>,
        var_store: Arc<dyn VarStore>,
        canceled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            run_id,
            flow,
            node_id,
            tab_id,
            variables,
            var_store,
            canceled,
            vars_patch: Vec::new(),
            outputs: BTreeMap::new(),
            next: NextDirective::Unset,
            artifact: None,
            logs: Vec::new(),
        }
    }

    /// Reads a run-scoped variable as it stood at the start of this attempt.
    /// Does not reflect this attempt's own pending `set`/`delete` calls.
    #[must_use]
    pub fn get_var(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Stages a `set` operation on the run-scoped variable map.
    pub fn set_var(&mut self, name: impl Into<String>, value: Value) {
        self.vars_patch.push(VarPatchOp::Set { name: name.into(), value });
    }

    /// Stages a `delete` operation on the run-scoped variable map.
    pub fn delete_var(&mut self, name: impl Into<String>) {
        self.vars_patch.push(VarPatchOp::Delete { name: name.into() });
    }

    /// Sets a key in this node's output map, merged into the run's
    /// accumulated outputs on success (spec.md §4.7 "merge outputs").
    pub fn set_output(&mut self, key: impl Into<String>, value: Value) {
        self.outputs.insert(key.into(), value);
    }

    /// Records a structured log line, persisted as a `node.log` event.
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>, data: Option<Value>) {
        self.logs.push((level, message.into(), data));
    }

    /// Records the node's choice of successor.
    pub fn choose_next(&mut self, directive: NextDirective) {
        self.next = directive;
    }

    /// Records an artifact (e.g. a screenshot) produced by this attempt. The
    /// runner decides whether to keep it based on the node's effective
    /// [`flowcore_model::core::policy::ArtifactPolicy`].
    pub fn record_artifact(&mut self, value: Value) {
        self.artifact = Some(value);
    }

    /// Returns true once the run has been canceled; long-running executors
    /// should poll this and return early.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Reads a persistent (`$`-prefixed) variable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    pub fn persistent_get(&self, key: &PersistentVarKey) -> Result<Option<PersistentVarRecord>, StoreError> {
        self.var_store.get(key)
    }

    /// Writes a persistent (`$`-prefixed) variable, bumping its version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    pub fn persistent_set(
        &self,
        key: &PersistentVarKey,
        value: Value,
        now: flowcore_model::core::time::Timestamp,
    ) -> Result<PersistentVarRecord, StoreError> {
        self.var_store.write(key, value, now, Some(self.run_id.clone()))
    }

    /// Deletes a persistent variable by writing `null` over it, since the
    /// underlying store is append-only-by-version and has no physical
    /// delete (Open Question decision, see `DESIGN.md`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    pub fn persistent_delete(
        &self,
        key: &PersistentVarKey,
        now: flowcore_model::core::time::Timestamp,
    ) -> Result<PersistentVarRecord, StoreError> {
        self.var_store.write(key, Value::Null, now, Some(self.run_id.clone()))
    }

    /// Consumes the context, returning everything the runner needs to apply
    /// a successful attempt's results.
    #[must_use]
    pub fn into_outcome(self) -> NodeOutcome {
        NodeOutcome {
            vars_patch: self.vars_patch,
            outputs: self.outputs,
            next: self.next,
            artifact: self.artifact,
            logs: self.logs,
        }
    }
}

// ============================================================================
// SECTION: Node Outcome
// ============================================================================

/// Everything staged on a [`NodeContext`] during one attempt, extracted once
/// the executor returns (success or failure — logs and artifacts are kept
/// either way, but `vars_patch`/`outputs`/`next` are only applied by the
/// runner on success).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeOutcome {
    /// Staged variable operations.
    pub vars_patch: Vec<VarPatchOp>,
    /// Staged output key/value pairs.
    pub outputs: BTreeMap<String, Value>,
    /// Staged successor choice.
    pub next: NextDirective,
    /// Staged artifact, if the executor recorded one.
    pub artifact: Option<Value>,
    /// Staged log lines.
    pub logs: Vec<(LogLevel, String, Option<Value>)>,
}

// ============================================================================
// SECTION: Node Executor
// ============================================================================

/// Executes one attempt of a single node.
///
/// # Invariants
/// - Implementations must not retain `ctx` past the call; the runner reuses
///   its backing variable snapshot across attempts.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Runs one attempt of this node.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] describing the failure; the runner classifies
    /// it against the node's effective onError policy.
    async fn execute(&self, ctx: &mut NodeContext<'_>) -> Result<(), EngineError>;
}
