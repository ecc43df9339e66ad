// crates/flowcore-runner/src/runner.rs
// ============================================================================
// Module: Flowcore Run Runner
// Description: Per-run DAG interpreter: drives one claimed queue item from
//              its current node through to a terminal Run status.
// Purpose: Implement spec.md §4.7 end to end on top of the storage ports,
//          the node plugin registry, and the pause/cancel primitives.
// Dependencies: flowcore-model, flowcore-scheduler, tokio, rand
// ============================================================================

//! ## Overview
//! [`RunRunner`] implements [`flowcore_scheduler::RunExecutor`]. Given an
//! already-claimed [`QueueItem`], it loads (or creates) the Run record,
//! validates the Flow DAG, and walks nodes from `startNodeId` (or the
//! Flow's `entryNodeId`) until the run terminates — success, failure, or
//! cancellation — applying each node's effective policy along the way.
//! Ordinary run failures are recorded on the Run record and event log and
//! reported to the Scheduler as `Ok(())`, per the `RunExecutor` contract;
//! only unexpected storage failures propagate as `Err`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use flowcore_model::core::errors::EngineError;
use flowcore_model::core::errors::ErrorCode;
use flowcore_model::core::event::EventKind;
use flowcore_model::core::event::VarPatchEntry;
use flowcore_model::core::flow::Flow;
use flowcore_model::core::identifiers::NodeId;
use flowcore_model::core::identifiers::RunId;
use flowcore_model::core::policy::GotoTarget;
use flowcore_model::core::policy::NodePolicy;
use flowcore_model::core::policy::OnErrorPolicy;
use flowcore_model::core::queue::QueueItem;
use flowcore_model::core::run::RunRecord;
use flowcore_model::core::run::RunStatus;
use flowcore_model::core::run::is_valid_transition;
use flowcore_model::core::time::Clock;
use flowcore_model::core::time::Timestamp;
use flowcore_model::interfaces::EventStore;
use flowcore_model::interfaces::FlowStore;
use flowcore_model::interfaces::RunStore;
use flowcore_model::interfaces::StoreError;
use flowcore_model::interfaces::VarStore;
use flowcore_model::runtime::dag;
use flowcore_model::runtime::dag::DagValidationError;
use flowcore_model::runtime::retry;
use flowcore_scheduler::ExecutorError;
use flowcore_scheduler::RunExecutor;
use rand::RngCore;
use rand::rngs::OsRng;

use crate::node::NextDirective;
use crate::node::NodeContext;
use crate::node::NodeOutcome;
use crate::node::VarPatchOp;
use crate::pause::PauseState;
use crate::registry::NodePluginRegistry;
use crate::writer_lane::WriteLane;

// ============================================================================
// SECTION: Runner Error
// ============================================================================

/// Failure the Runner cannot recover from by recording it on the Run
/// itself; propagated to the Scheduler as [`ExecutorError`].
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A storage operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The queue item names a Flow that no longer exists.
    #[error("flow {0} not found")]
    FlowNotFound(flowcore_model::core::identifiers::FlowId),
}

// ============================================================================
// SECTION: Run Runner
// ============================================================================

/// Drives claimed runs to a terminal status, one at a time per call.
///
/// # Invariants
/// - Holds at most one [`PauseState`] per in-flight run; it is created on
///   first need and dropped once the run reaches a terminal status.
pub struct RunRunner {
    flows: Arc<dyn FlowStore>,
    runs: Arc<dyn RunStore>,
    events: Arc<dyn EventStore>,
    vars: Arc<dyn VarStore>,
    registry: Arc<NodePluginRegistry>,
    clock: Arc<dyn Clock>,
    pause_states: RwLock<HashMap<RunId, Arc<PauseState>>>,
}

impl RunRunner {
    /// Creates a runner wired to the given storage ports and node registry.
    #[must_use]
    pub fn new(
        flows: Arc<dyn FlowStore>,
        runs: Arc<dyn RunStore>,
        events: Arc<dyn EventStore>,
        vars: Arc<dyn VarStore>,
        registry: Arc<NodePluginRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { flows, runs, events, vars, registry, clock, pause_states: RwLock::new(HashMap::new()) }
    }

    /// Returns the shared pause/cancel state for `run_id`, creating it if
    /// this is the first time the run has been seen. Callers outside the
    /// execution loop (e.g. the RPC layer) use this to request a pause,
    /// resume, or cancellation on an in-flight run.
    #[must_use]
    pub fn pause_state(&self, run_id: &RunId) -> Arc<PauseState> {
        if let Some(existing) =
            self.pause_states.read().unwrap_or_else(std::sync::PoisonError::into_inner).get(run_id)
        {
            return Arc::clone(existing);
        }
        let mut states = self.pause_states.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(states.entry(run_id.clone()).or_insert_with(|| Arc::new(PauseState::new())))
    }

    fn forget_pause_state(&self, run_id: &RunId) {
        self.pause_states.write().unwrap_or_else(std::sync::PoisonError::into_inner).remove(run_id);
    }

    /// Runs `item` to a terminal Run status.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError`] only for failures outside the run's own
    /// control (missing flow, storage errors); ordinary node/run failures
    /// are recorded and reported as `Ok(())`.
    async fn run_to_terminal(&self, item: QueueItem) -> Result<(), RunnerError> {
        let flow =
            self.flows.get(&item.flow_id)?.ok_or_else(|| RunnerError::FlowNotFound(item.flow_id.clone()))?;
        let flow = Arc::new(flow);

        let now = self.clock.now();
        let mut run = match self.runs.get(&item.run_id)? {
            Some(existing) => existing,
            None => {
                let record = RunRecord::new_queued(
                    item.run_id.clone(),
                    item.flow_id.clone(),
                    now,
                    BTreeMap::new(),
                    None,
                    None,
                    1,
                );
                self.runs.insert(&record)?;
                record
            }
        };

        let pause_state = self.pause_state(&item.run_id);
        let lane = WriteLane::spawn(item.run_id.clone(), Arc::clone(&self.events), Arc::clone(&self.runs));

        if run.status == RunStatus::Queued {
            self.transition(&mut run, RunStatus::Running);
            run.started_at = Some(now);
            run.updated_at = now;
            lane.update_run(run.clone()).await?;
            lane.append_event(now, EventKind::RunStarted).await?;
        }

        if let Err(err) = flow.validate_local() {
            let engine_error = EngineError::new(ErrorCode::DagInvalid, err.to_string());
            self.forget_pause_state(&item.run_id);
            return self.fail_run(&lane, &mut run, engine_error).await;
        }
        if let Err(err) = dag::validate(&flow) {
            let code = match err {
                DagValidationError::DanglingEdge { .. } => ErrorCode::DagInvalid,
                DagValidationError::Cycle(_) => ErrorCode::DagCycle,
            };
            let engine_error = EngineError::new(code, err.to_string());
            self.forget_pause_state(&item.run_id);
            return self.fail_run(&lane, &mut run, engine_error).await;
        }

        if run.debug.as_ref().is_some_and(|d| d.pause_on_start) {
            pause_state.request_pause();
        }
        if let Some(debug) = &run.debug {
            pause_state.set_breakpoints(debug.breakpoints.iter().cloned());
        }

        let mut variables = build_initial_variables(&flow, &run);
        let mut current_node_id = run.start_node_id.clone().unwrap_or_else(|| flow.entry_node_id.clone());

        let outcome = loop {
            run.current_node_id = Some(current_node_id.clone());
            run.updated_at = self.clock.now();
            lane.update_run(run.clone()).await?;

            if pause_state.is_canceled() {
                break LoopOutcome::Canceled(None);
            }
            if pause_state.is_paused() {
                self.transition(&mut run, RunStatus::Paused);
                run.updated_at = self.clock.now();
                lane.update_run(run.clone()).await?;
                lane.append_event(self.clock.now(), EventKind::RunPaused { node_id: current_node_id.clone() })
                    .await?;
                pause_state.wait_for_resume_or_cancel().await;
                if pause_state.is_canceled() {
                    break LoopOutcome::Canceled(None);
                }
                self.transition(&mut run, RunStatus::Running);
                run.updated_at = self.clock.now();
                lane.update_run(run.clone()).await?;
                lane.append_event(self.clock.now(), EventKind::RunResumed).await?;
            }

            let Some(node) = flow.node(&current_node_id) else {
                break LoopOutcome::Failed(EngineError::new(
                    ErrorCode::DagInvalid,
                    format!("node {current_node_id} referenced but not present in flow"),
                ));
            };

            if node.disabled {
                lane.append_event(
                    self.clock.now(),
                    EventKind::NodeSkipped { node_id: current_node_id.clone(), reason: "disabled".into() },
                )
                .await?;
                match dag::choose_successor(&flow, &current_node_id, None) {
                    Some(edge) => {
                        lane.append_event(
                            self.clock.now(),
                            EventKind::EdgeTaken {
                                edge_id: edge.id.clone(),
                                from: edge.source.clone(),
                                to: edge.target.clone(),
                            },
                        )
                        .await?;
                        current_node_id = edge.target.clone();
                        continue;
                    }
                    None => break LoopOutcome::Succeeded,
                }
            }

            if pause_state.should_pause_at(&current_node_id) {
                pause_state.request_pause();
                self.transition(&mut run, RunStatus::Paused);
                run.updated_at = self.clock.now();
                lane.update_run(run.clone()).await?;
                lane.append_event(self.clock.now(), EventKind::BreakpointHit { node_id: current_node_id.clone() })
                    .await?;
                pause_state.wait_for_resume_or_cancel().await;
                if pause_state.is_canceled() {
                    break LoopOutcome::Canceled(None);
                }
                self.transition(&mut run, RunStatus::Running);
                run.updated_at = self.clock.now();
                lane.update_run(run.clone()).await?;
                lane.append_event(self.clock.now(), EventKind::RunResumed).await?;
            }

            lane.append_event(self.clock.now(), EventKind::NodeQueued { node_id: current_node_id.clone() }).await?;

            let definition = match self.registry.get_or_unsupported(&node.kind) {
                Ok(definition) => definition,
                Err(err) => {
                    let flow_policy = flow.policy.as_ref().and_then(|p| p.unsupported_node_policy.clone());
                    let unsupported_policy = flow_policy.map_or(NodePolicy::default(), |policy| NodePolicy {
                        on_error: Some(policy),
                        ..Default::default()
                    });
                    let fallback = err.clone();
                    match self.apply_on_error(&lane, &flow, &current_node_id, &unsupported_policy, err, 0).await? {
                        OnErrorOutcome::Stop(error) => break LoopOutcome::Failed(error),
                        OnErrorOutcome::Next(next_node_id) => {
                            current_node_id = next_node_id;
                            continue;
                        }
                        OnErrorOutcome::Terminal => break LoopOutcome::Succeeded,
                        // `unsupported_policy` never sets `retry`, so `apply_on_error`
                        // cannot actually return `Retry` here; fall back to stopping.
                        OnErrorOutcome::Retry => break LoopOutcome::Failed(fallback),
                    }
                }
            };

            let effective_policy = NodePolicy::effective(
                flow.policy.as_ref().and_then(|p| p.default_node_policy.as_ref()),
                definition.default_policy.as_ref(),
                node.policy.as_ref(),
            );

            if let Err(validation_error) = definition.validate_config(&node.config) {
                lane.append_event(
                    self.clock.now(),
                    EventKind::NodeFailed {
                        node_id: current_node_id.clone(),
                        attempt: 1,
                        error: validation_error.clone(),
                    },
                )
                .await?;
                let fallback = validation_error.clone();
                match self.apply_on_error(&lane, &flow, &current_node_id, &effective_policy, validation_error, 1).await? {
                    OnErrorOutcome::Stop(error) => break LoopOutcome::Failed(error),
                    OnErrorOutcome::Next(next_node_id) => {
                        current_node_id = next_node_id;
                        continue;
                    }
                    OnErrorOutcome::Terminal => break LoopOutcome::Succeeded,
                    // Config validation is deterministic: retrying the same config
                    // cannot succeed, so a `retry` decision stops instead.
                    OnErrorOutcome::Retry => break LoopOutcome::Failed(fallback),
                }
            }

            match self
                .run_node_with_retries(
                    &lane,
                    &item.run_id,
                    &flow,
                    &current_node_id,
                    &definition.executor,
                    &effective_policy,
                    &variables,
                    pause_state.as_ref(),
                )
                .await
            {
                Ok(NodeDecision::Advance(node_outcome)) => {
                    apply_var_patch(&mut variables, &node_outcome.vars_patch);
                    if !node_outcome.vars_patch.is_empty() {
                        lane.append_event(
                            self.clock.now(),
                            EventKind::VarsPatch {
                                node_id: current_node_id.clone(),
                                ops: node_outcome.vars_patch.iter().map(to_patch_entry).collect(),
                            },
                        )
                        .await?;
                    }
                    run.merge_outputs(node_outcome.outputs.clone());

                    let next = match node_outcome.next {
                        NextDirective::End => None,
                        NextDirective::EdgeLabel(label) => dag::choose_successor(&flow, &current_node_id, Some(&label)),
                        NextDirective::Unset => dag::choose_successor(&flow, &current_node_id, None),
                    };
                    match next {
                        Some(edge) => {
                            lane.append_event(
                                self.clock.now(),
                                EventKind::EdgeTaken {
                                    edge_id: edge.id.clone(),
                                    from: edge.source.clone(),
                                    to: edge.target.clone(),
                                },
                            )
                            .await?;
                            current_node_id = edge.target.clone();
                        }
                        None => break LoopOutcome::Succeeded,
                    }
                }
                Ok(NodeDecision::Terminal) => break LoopOutcome::Succeeded,
                Ok(NodeDecision::Goto(next_node_id)) => current_node_id = next_node_id,
                Err(error) => break LoopOutcome::Failed(error),
            }
        };

        self.forget_pause_state(&item.run_id);
        match outcome {
            LoopOutcome::Succeeded => self.succeed_run(&lane, &mut run).await,
            LoopOutcome::Failed(error) => self.fail_run(&lane, &mut run, error).await,
            LoopOutcome::Canceled(reason) => self.cancel_run(&lane, &mut run, reason).await,
        }
    }

    /// Runs the attempt/retry loop for one node, returning the decision the
    /// main loop should act on.
    #[allow(clippy::too_many_arguments, reason = "each argument is a distinct collaborator, not a bundleable group")]
    async fn run_node_with_retries(
        &self,
        lane: &WriteLane,
        run_id: &RunId,
        flow: &Arc<Flow>,
        node_id: &NodeId,
        executor: &Arc<dyn crate::node::NodeExecutor>,
        policy: &NodePolicy,
        variables: &BTreeMap<String, serde_json::Value>,
        pause_state: &PauseState,
    ) -> Result<NodeDecision, RunnerError> {
        let mut attempt: u32 = 0;
        let node_deadline = policy
            .timeout
            .filter(|t| matches!(t.scope, flowcore_model::core::policy::TimeoutScope::Node))
            .map(|t| Instant::now() + Duration::from_millis(t.ms));

        loop {
            attempt += 1;
            lane.append_event(self.clock.now(), EventKind::NodeStarted { node_id: node_id.clone(), attempt }).await?;

            let canceled_flag = Arc::new(AtomicBool::new(pause_state.is_canceled()));
            let mut ctx = NodeContext::new(
                run_id.clone(),
                Arc::clone(flow),
                node_id.clone(),
                None,
                variables,
                Arc::clone(&self.vars),
                canceled_flag,
            );

            let attempt_budget = match (
                policy.timeout.filter(|t| matches!(t.scope, flowcore_model::core::policy::TimeoutScope::Attempt)),
                node_deadline,
            ) {
                (Some(t), _) => Some(Duration::from_millis(t.ms)),
                (None, Some(deadline)) => Some(deadline.saturating_duration_since(Instant::now())),
                (None, None) => None,
            };

            let started = Instant::now();
            let exec_result = match attempt_budget {
                Some(budget) => match tokio::time::timeout(budget, executor.execute(&mut ctx)).await {
                    Ok(result) => result,
                    Err(_elapsed) => {
                        Err(EngineError::new(ErrorCode::Timeout, "node attempt exceeded its timeout").retryable(true))
                    }
                },
                None => executor.execute(&mut ctx).await,
            };
            let took_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match exec_result {
                Ok(()) => {
                    let node_outcome = ctx.into_outcome();
                    self.flush_logs(lane, node_id, &node_outcome).await?;
                    lane.append_event(
                        self.clock.now(),
                        EventKind::NodeSucceeded {
                            node_id: node_id.clone(),
                            attempt,
                            output: serde_json::to_value(&node_outcome.outputs).ok(),
                            took_ms,
                        },
                    )
                    .await?;
                    return Ok(NodeDecision::Advance(node_outcome));
                }
                Err(error) => {
                    let node_outcome = ctx.into_outcome();
                    self.flush_logs(lane, node_id, &node_outcome).await?;
                    lane.append_event(
                        self.clock.now(),
                        EventKind::NodeFailed { node_id: node_id.clone(), attempt, error: error.clone() },
                    )
                    .await?;

                    match self.apply_on_error(lane, flow, node_id, policy, error, attempt).await? {
                        OnErrorOutcome::Stop(fatal) => return Err(fatal),
                        OnErrorOutcome::Terminal => return Ok(NodeDecision::Terminal),
                        OnErrorOutcome::Next(next_node_id) => return Ok(NodeDecision::Goto(next_node_id)),
                        OnErrorOutcome::Retry => {}
                    }
                }
            }
        }
    }

    /// Applies the effective onError policy to a node failure. A `retry`
    /// decision that still has attempts remaining is resolved inline (sleep
    /// then report back to the caller to loop); any other decision is
    /// returned for the caller to act on once.
    async fn apply_on_error(
        &self,
        lane: &WriteLane,
        flow: &Flow,
        node_id: &NodeId,
        policy: &NodePolicy,
        error: EngineError,
        attempt: u32,
    ) -> Result<OnErrorOutcome, RunnerError> {
        let decision = policy.on_error.clone().unwrap_or_else(|| {
            let has_on_error_edge =
                flow.outgoing_edges(node_id).any(|e| e.label.as_deref() == Some(flowcore_model::core::flow::LABEL_ON_ERROR));
            if has_on_error_edge {
                OnErrorPolicy::Goto { target: GotoTarget::EdgeLabel(flowcore_model::core::flow::LABEL_ON_ERROR.into()) }
            } else {
                OnErrorPolicy::Stop
            }
        });

        lane.append_event(
            self.clock.now(),
            EventKind::NodeErrorHandled { node_id: node_id.clone(), decision: describe_decision(&decision) },
        )
        .await?;

        match decision {
            OnErrorPolicy::Stop => Ok(OnErrorOutcome::Stop(error)),
            OnErrorPolicy::Continue { .. } => match dag::choose_successor(flow, node_id, None) {
                Some(edge) => Ok(OnErrorOutcome::Next(edge.target.clone())),
                None => Ok(OnErrorOutcome::Terminal),
            },
            OnErrorPolicy::Goto { target } => match target {
                GotoTarget::Node(target_node) => Ok(OnErrorOutcome::Next(target_node)),
                GotoTarget::EdgeLabel(label) => match dag::choose_successor(flow, node_id, Some(&label)) {
                    Some(edge) => Ok(OnErrorOutcome::Next(edge.target.clone())),
                    None => Ok(OnErrorOutcome::Stop(error)),
                },
            },
            OnErrorPolicy::Retry { override_policy } => {
                let Some(base_retry) = &policy.retry else {
                    return Ok(OnErrorOutcome::Stop(error));
                };
                let effective_retry = base_retry.overlay(&override_policy);
                if !retry::should_retry(&effective_retry, attempt, error.code) {
                    return Ok(OnErrorOutcome::Stop(error));
                }
                let next_attempt = attempt + 1;
                let delay_ms = retry::compute_delay_ms(&effective_retry, next_attempt, sample_jitter_unit());
                lane.append_event(
                    self.clock.now(),
                    EventKind::NodeRetryScheduled { node_id: node_id.clone(), next_attempt, delay_ms },
                )
                .await?;
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(OnErrorOutcome::Retry)
            }
        }
    }

    async fn flush_logs(&self, lane: &WriteLane, node_id: &NodeId, outcome: &NodeOutcome) -> Result<(), RunnerError> {
        for (level, message, data) in &outcome.logs {
            lane.append_event(
                self.clock.now(),
                EventKind::NodeLog { node_id: node_id.clone(), level: *level, message: message.clone(), data: data.clone() },
            )
            .await?;
        }
        Ok(())
    }

    fn transition(&self, run: &mut RunRecord, to: RunStatus) {
        debug_assert!(is_valid_transition(run.status, to), "illegal run status transition");
        run.status = to;
    }

    async fn succeed_run(&self, lane: &WriteLane, run: &mut RunRecord) -> Result<(), RunnerError> {
        let now = self.clock.now();
        self.transition(run, RunStatus::Succeeded);
        run.finished_at = Some(now);
        run.took_ms = run.started_at.map(|started| duration_ms(started, now));
        run.updated_at = now;
        run.error = None;
        lane.update_run(run.clone()).await?;
        lane.append_event(now, EventKind::RunSucceeded).await?;
        Ok(())
    }

    async fn fail_run(&self, lane: &WriteLane, run: &mut RunRecord, error: EngineError) -> Result<(), RunnerError> {
        let now = self.clock.now();
        if is_valid_transition(run.status, RunStatus::Failed) {
            self.transition(run, RunStatus::Failed);
        } else {
            run.status = RunStatus::Failed;
        }
        run.finished_at = Some(now);
        run.took_ms = run.started_at.map(|started| duration_ms(started, now));
        run.updated_at = now;
        run.error = Some(error.clone());
        lane.update_run(run.clone()).await?;
        lane.append_event(now, EventKind::RunFailed { error }).await?;
        Ok(())
    }

    async fn cancel_run(&self, lane: &WriteLane, run: &mut RunRecord, reason: Option<String>) -> Result<(), RunnerError> {
        let now = self.clock.now();
        if is_valid_transition(run.status, RunStatus::Canceled) {
            self.transition(run, RunStatus::Canceled);
        } else {
            run.status = RunStatus::Canceled;
        }
        run.finished_at = Some(now);
        run.took_ms = run.started_at.map(|started| duration_ms(started, now));
        run.updated_at = now;
        lane.update_run(run.clone()).await?;
        lane.append_event(now, EventKind::RunCanceled { reason }).await?;
        Ok(())
    }
}

#[async_trait]
impl RunExecutor for RunRunner {
    async fn execute(&self, item: QueueItem) -> Result<(), ExecutorError> {
        self.run_to_terminal(item).await.map_err(|err| Box::new(err) as ExecutorError)
    }
}

// ============================================================================
// SECTION: Loop outcomes
// ============================================================================

/// Final disposition of the node-walking loop.
enum LoopOutcome {
    /// The run reached a terminal node with no successor, or the final
    /// node explicitly requested `end`.
    Succeeded,
    /// The run must terminate as failed with this error.
    Failed(EngineError),
    /// The run was canceled, optionally with a reason.
    Canceled(Option<String>),
}

/// What the main loop should do after one node finishes (successfully or
/// via an onError decision that keeps the run alive).
enum NodeDecision {
    /// Apply `NodeOutcome` and resolve the next node via its `next` field.
    Advance(NodeOutcome),
    /// Jump directly to this node (an onError `goto`/`continue` decision).
    Goto(NodeId),
    /// No successor; the run terminates successfully.
    Terminal,
}

/// What [`RunRunner::apply_on_error`] decided for one failure.
enum OnErrorOutcome {
    /// Retry was scheduled and slept; the caller should attempt again.
    Retry,
    /// Jump to this node next.
    Next(NodeId),
    /// No successor from a `continue`/`goto`; terminate successfully.
    Terminal,
    /// Terminate the run as failed with this error.
    Stop(EngineError),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds the initial run-scoped variable map: `flow.variables.default`
/// overlaid by `run.args` (args win on conflict).
fn build_initial_variables(flow: &Flow, run: &RunRecord) -> BTreeMap<String, serde_json::Value> {
    let mut variables = BTreeMap::new();
    for var in &flow.variables {
        if let Some(default) = &var.default {
            variables.insert(var.name.clone(), default.clone());
        }
    }
    for (key, value) in &run.args {
        variables.insert(key.clone(), value.clone());
    }
    variables
}

/// Applies a node's staged `varsPatch` to the run-scoped variable map.
fn apply_var_patch(variables: &mut BTreeMap<String, serde_json::Value>, ops: &[VarPatchOp]) {
    for op in ops {
        match op {
            VarPatchOp::Set { name, value } => {
                variables.insert(name.clone(), value.clone());
            }
            VarPatchOp::Delete { name } => {
                variables.remove(name);
            }
        }
    }
}

/// Converts a runner-local patch op into the event-log entry shape.
fn to_patch_entry(op: &VarPatchOp) -> VarPatchEntry {
    match op {
        VarPatchOp::Set { name, value } => VarPatchEntry::Set { name: name.clone(), value: value.clone() },
        VarPatchOp::Delete { name } => VarPatchEntry::Delete { name: name.clone() },
    }
}

/// Renders a short, human-readable description of an onError decision for
/// the `node.error_handled` event.
fn describe_decision(decision: &OnErrorPolicy) -> String {
    match decision {
        OnErrorPolicy::Stop => "stop".to_string(),
        OnErrorPolicy::Continue { .. } => "continue".to_string(),
        OnErrorPolicy::Goto { target: GotoTarget::EdgeLabel(label) } => format!("goto edge '{label}'"),
        OnErrorPolicy::Goto { target: GotoTarget::Node(node_id) } => format!("goto node '{node_id}'"),
        OnErrorPolicy::Retry { .. } => "retry".to_string(),
    }
}

/// Samples a uniform `[0.0, 1.0)` value for full-jitter backoff.
fn sample_jitter_unit() -> f64 {
    let mut rng = OsRng;
    #[allow(clippy::cast_precision_loss, reason = "53 significant bits fit exactly in an f64 mantissa")]
    let unit = (rng.next_u64() >> 11) as f64 / (1u64 << 53) as f64;
    unit
}

/// Computes the millisecond duration between two timestamps, clamped to 0.
fn duration_ms(from: Timestamp, to: Timestamp) -> u64 {
    u64::try_from(to.as_millis().saturating_sub(from.as_millis())).unwrap_or(0)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use flowcore_model::core::event::Event;
    use flowcore_model::core::flow::Edge;
    use flowcore_model::core::flow::FLOW_SCHEMA_VERSION;
    use flowcore_model::core::flow::FlowMetadata;
    use flowcore_model::core::flow::Node;
    use flowcore_model::core::identifiers::EdgeId;
    use flowcore_model::core::identifiers::FlowId;
    use flowcore_model::core::identifiers::PersistentVarKey;
    use flowcore_model::core::policy::Backoff;
    use flowcore_model::core::policy::Jitter;
    use flowcore_model::core::policy::RetryPolicy;
    use flowcore_model::core::policy::RetryPolicyOverride;
    use flowcore_model::core::run::DebugConfig;
    use flowcore_model::core::time::test_support::FakeClock;
    use flowcore_model::core::vars::PersistentVarRecord;
    use serde_json::Value;
    use serde_json::json;

    use super::*;

    // ---- fixtures -----------------------------------------------------

    fn node(id: &str, kind: &str) -> Node {
        Node { id: NodeId::new(id), kind: kind.into(), name: None, disabled: false, policy: None, config: json!({}) }
    }

    fn edge(id: &str, source: &str, target: &str, label: Option<&str>) -> Edge {
        Edge { id: EdgeId::new(id), source: NodeId::new(source), target: NodeId::new(target), label: label.map(str::to_string) }
    }

    fn make_flow(nodes: Vec<Node>, edges: Vec<Edge>, entry: &str) -> Flow {
        Flow {
            schema_version: FLOW_SCHEMA_VERSION,
            id: FlowId::new("f1"),
            name: "test".into(),
            description: None,
            created_at: Timestamp::from_millis(0),
            updated_at: Timestamp::from_millis(0),
            entry_node_id: NodeId::new(entry),
            nodes,
            edges,
            variables: vec![],
            policy: None,
            metadata: FlowMetadata::default(),
        }
    }

    fn linear_flow() -> Flow {
        make_flow(vec![node("a", "noop"), node("b", "noop")], vec![edge("e1", "a", "b", None)], "a")
    }

    fn cyclic_flow() -> Flow {
        make_flow(
            vec![node("a", "noop"), node("b", "noop")],
            vec![edge("e1", "a", "b", None), edge("e2", "b", "a", None)],
            "a",
        )
    }

    fn unsupported_flow() -> Flow {
        make_flow(vec![node("a", "missing")], vec![], "a")
    }

    fn disabled_then_noop_flow() -> Flow {
        let mut disabled = node("a", "whatever");
        disabled.disabled = true;
        make_flow(vec![disabled, node("b", "noop")], vec![edge("e1", "a", "b", None)], "a")
    }

    fn retry_then_succeed_flow() -> Flow {
        let mut flaky = node("a", "flaky");
        flaky.policy = Some(NodePolicy {
            retry: Some(RetryPolicy {
                retries: 3,
                interval_ms: 0,
                backoff: Backoff::None,
                max_interval_ms: None,
                jitter: Jitter::None,
                retry_on: None,
            }),
            on_error: Some(OnErrorPolicy::Retry { override_policy: RetryPolicyOverride::default() }),
            ..Default::default()
        });
        make_flow(vec![flaky], vec![], "a")
    }

    // ---- fake executors -------------------------------------------------

    struct NoopExecutor;

    #[async_trait]
    impl crate::node::NodeExecutor for NoopExecutor {
        async fn execute(&self, _ctx: &mut NodeContext<'_>) -> Result<(), EngineError> {
            Ok(())
        }
    }

    struct FlakyExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl crate::node::NodeExecutor for FlakyExecutor {
        async fn execute(&self, ctx: &mut NodeContext<'_>) -> Result<(), EngineError> {
            let attempt_number = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt_number < 3 {
                Err(EngineError::new(ErrorCode::ToolError, "transient failure").retryable(true))
            } else {
                ctx.set_output("ok", Value::from(true));
                Ok(())
            }
        }
    }

    // ---- fake stores -----------------------------------------------------

    #[derive(Default)]
    struct InMemoryFlows {
        stored: Mutex<HashMap<FlowId, Flow>>,
    }

    impl FlowStore for InMemoryFlows {
        fn put(&self, flow: &Flow) -> Result<(), StoreError> {
            self.stored.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(flow.id.clone(), flow.clone());
            Ok(())
        }

        fn get(&self, id: &FlowId) -> Result<Option<Flow>, StoreError> {
            Ok(self.stored.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(id).cloned())
        }

        fn delete(&self, id: &FlowId) -> Result<(), StoreError> {
            self.stored.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(id);
            Ok(())
        }

        fn list_ids(&self) -> Result<Vec<FlowId>, StoreError> {
            Ok(self.stored.lock().unwrap_or_else(std::sync::PoisonError::into_inner).keys().cloned().collect())
        }
    }

    #[derive(Default)]
    struct InMemoryRuns {
        stored: Mutex<HashMap<RunId, RunRecord>>,
    }

    impl RunStore for InMemoryRuns {
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
    }

    #[derive(Default)]
    struct InMemoryEvents {
        by_run: Mutex<HashMap<RunId, Vec<Event>>>,
    }

    impl EventStore for InMemoryEvents {
        fn append(&self, run_id: &RunId, recorded_at: Timestamp, kind: EventKind) -> Result<Event, StoreError> {
            let mut by_run = self.by_run.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let list = by_run.entry(run_id.clone()).or_default();
            let seq = u64::try_from(list.len()).unwrap_or(u64::MAX);
            let event = Event::new(run_id.clone(), seq, recorded_at, kind);
            list.push(event.clone());
            Ok(event)
        }

        fn list(&self, run_id: &RunId, after_seq: Option<u64>) -> Result<Vec<Event>, StoreError> {
            let by_run = self.by_run.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let list = by_run.get(run_id).cloned().unwrap_or_default();
            Ok(match after_seq {
                Some(seq) => list.into_iter().filter(|e| e.seq > seq).collect(),
                None => list,
            })
        }
    }

    #[derive(Default)]
    struct InMemoryVars {
        stored: Mutex<HashMap<PersistentVarKey, PersistentVarRecord>>,
    }

    impl VarStore for InMemoryVars {
        fn get(&self, key: &PersistentVarKey) -> Result<Option<PersistentVarRecord>, StoreError> {
            Ok(self.stored.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(key).cloned())
        }

        fn write(
            &self,
            key: &PersistentVarKey,
            value: Value,
            now: Timestamp,
            written_by_run: Option<RunId>,
        ) -> Result<PersistentVarRecord, StoreError> {
            let mut stored = self.stored.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let record = match stored.get_mut(key) {
                Some(existing) => {
                    existing.apply_write(value, now, written_by_run);
                    existing.clone()
                }
                None => {
                    let record = PersistentVarRecord::new(key.clone(), value, now, written_by_run);
                    stored.insert(key.clone(), record.clone());
                    record
                }
            };
            Ok(record)
        }

        fn list(&self) -> Result<Vec<PersistentVarRecord>, StoreError> {
            Ok(self.stored.lock().unwrap_or_else(std::sync::PoisonError::into_inner).values().cloned().collect())
        }
    }

    // ---- harness -----------------------------------------------------

    fn build_runner(
        flow: Flow,
        registry: NodePluginRegistry,
    ) -> (RunRunner, Arc<InMemoryRuns>, Arc<InMemoryEvents>) {
        let flows = Arc::new(InMemoryFlows::default());
        flows.put(&flow).expect("seed flow");
        let runs = Arc::new(InMemoryRuns::default());
        let events = Arc::new(InMemoryEvents::default());
        let vars = Arc::new(InMemoryVars::default());
        let clock = Arc::new(FakeClock::new(0));
        let runner = RunRunner::new(
            flows as Arc<dyn FlowStore>,
            Arc::clone(&runs) as Arc<dyn RunStore>,
            Arc::clone(&events) as Arc<dyn EventStore>,
            vars as Arc<dyn VarStore>,
            Arc::new(registry),
            clock as Arc<dyn Clock>,
        );
        (runner, runs, events)
    }

    fn event_labels(events: &InMemoryEvents, run_id: &RunId) -> Vec<&'static str> {
        events.list(run_id, None).expect("list events").into_iter().map(|e| e.kind.label()).collect()
    }

    // ---- tests ---------------------------------------------------------

    #[tokio::test(flavor = "multi_thread")]
    async fn linear_flow_runs_to_success() {
        let registry = NodePluginRegistry::new();
        registry.register("noop", json!({"type": "object"}), None, Arc::new(NoopExecutor)).expect("register");
        let (runner, runs, events) = build_runner(linear_flow(), registry);

        let run_id = RunId::new("r1");
        let item = QueueItem::new_pending(run_id.clone(), FlowId::new("f1"), Timestamp::from_millis(0), 0);
        runner.execute(item).await.expect("execute succeeds");

        let stored = runs.get(&run_id).expect("get").expect("present");
        assert_eq!(stored.status, RunStatus::Succeeded);

        let labels = event_labels(&events, &run_id);
        assert!(labels.contains(&"run_started"));
        assert!(labels.contains(&"edge_taken"));
        assert!(labels.contains(&"run_succeeded"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn disabled_node_is_skipped_via_default_successor() {
        let registry = NodePluginRegistry::new();
        registry.register("noop", json!({"type": "object"}), None, Arc::new(NoopExecutor)).expect("register");
        let (runner, runs, events) = build_runner(disabled_then_noop_flow(), registry);

        let run_id = RunId::new("r1");
        let item = QueueItem::new_pending(run_id.clone(), FlowId::new("f1"), Timestamp::from_millis(0), 0);
        runner.execute(item).await.expect("execute succeeds");

        let stored = runs.get(&run_id).expect("get").expect("present");
        assert_eq!(stored.status, RunStatus::Succeeded);
        assert!(event_labels(&events, &run_id).contains(&"node_skipped"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dag_cycle_fails_run_with_dag_cycle_code() {
        let registry = NodePluginRegistry::new();
        let (runner, runs, _events) = build_runner(cyclic_flow(), registry);

        let run_id = RunId::new("r1");
        let item = QueueItem::new_pending(run_id.clone(), FlowId::new("f1"), Timestamp::from_millis(0), 0);
        runner.execute(item).await.expect("execute reports ok on ordinary failure");

        let stored = runs.get(&run_id).expect("get").expect("present");
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.error.as_ref().map(|e| e.code), Some(ErrorCode::DagCycle));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unsupported_node_kind_fails_run_when_no_on_error_edge() {
        let registry = NodePluginRegistry::new();
        let (runner, runs, _events) = build_runner(unsupported_flow(), registry);

        let run_id = RunId::new("r1");
        let item = QueueItem::new_pending(run_id.clone(), FlowId::new("f1"), Timestamp::from_millis(0), 0);
        runner.execute(item).await.expect("execute reports ok on ordinary failure");

        let stored = runs.get(&run_id).expect("get").expect("present");
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.error.as_ref().map(|e| e.code), Some(ErrorCode::UnsupportedNode));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn node_retries_until_it_succeeds() {
        let registry = NodePluginRegistry::new();
        registry
            .register("flaky", json!({"type": "object"}), None, Arc::new(FlakyExecutor { calls: AtomicUsize::new(0) }))
            .expect("register");
        let (runner, runs, events) = build_runner(retry_then_succeed_flow(), registry);

        let run_id = RunId::new("r1");
        let item = QueueItem::new_pending(run_id.clone(), FlowId::new("f1"), Timestamp::from_millis(0), 0);
        runner.execute(item).await.expect("execute succeeds");

        let stored = runs.get(&run_id).expect("get").expect("present");
        assert_eq!(stored.status, RunStatus::Succeeded);
        assert_eq!(stored.outputs.get("ok"), Some(&Value::from(true)));

        let labels = event_labels(&events, &run_id);
        assert_eq!(labels.iter().filter(|l| **l == "node_retry_scheduled").count(), 2);
        assert_eq!(labels.iter().filter(|l| **l == "node_failed").count(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_requested_before_start_yields_canceled_run() {
        let registry = NodePluginRegistry::new();
        registry.register("noop", json!({"type": "object"}), None, Arc::new(NoopExecutor)).expect("register");
        let (runner, runs, _events) = build_runner(linear_flow(), registry);

        let run_id = RunId::new("r1");
        runner.pause_state(&run_id).cancel();

        let item = QueueItem::new_pending(run_id.clone(), FlowId::new("f1"), Timestamp::from_millis(0), 0);
        runner.execute(item).await.expect("execute reports ok on cancellation");

        let stored = runs.get(&run_id).expect("get").expect("present");
        assert_eq!(stored.status, RunStatus::Canceled);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn breakpoint_pauses_then_resumes_to_success() {
        let registry = NodePluginRegistry::new();
        registry.register("noop", json!({"type": "object"}), None, Arc::new(NoopExecutor)).expect("register");
        let (runner, runs, events) = build_runner(linear_flow(), registry);
        let runner = Arc::new(runner);

        let run_id = RunId::new("r1");
        let flow_id = FlowId::new("f1");
        let record = RunRecord {
            debug: Some(DebugConfig { breakpoints: vec![NodeId::new("b")], pause_on_start: false }),
            ..RunRecord::new_queued(run_id.clone(), flow_id.clone(), Timestamp::from_millis(0), BTreeMap::new(), None, None, 1)
        };
        runs.insert(&record).expect("seed run");

        let item = QueueItem::new_pending(run_id.clone(), flow_id, Timestamp::from_millis(0), 0);
        let runner_for_task = Arc::clone(&runner);
        let handle = tokio::spawn(async move { runner_for_task.execute(item).await });

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        let pause_state = runner.pause_state(&run_id);
        assert!(pause_state.is_paused());
        pause_state.resume();

        tokio::time::timeout(StdDuration::from_secs(1), handle)
            .await
            .expect("task finished")
            .expect("no panic")
            .expect("execute succeeds");

        let stored = runs.get(&run_id).expect("get").expect("present");
        assert_eq!(stored.status, RunStatus::Succeeded);
        assert!(event_labels(&events, &run_id).contains(&"breakpoint_hit"));
    }
}
