// crates/flowcore-rpc/src/dispatch.rs
// ============================================================================
// Module: Flowcore RPC Dispatcher
// Description: Implements every `flowcore_contract::RpcMethod` against the
//              Storage Ports, Scheduler, Runner, and Trigger Manager
//              (spec.md §4.10).
// Purpose: Give both transports (stdio, HTTP) one transport-agnostic
//          request handler.
// Dependencies: flowcore-model, flowcore-contract, flowcore-runner,
//               flowcore-scheduler, flowcore-triggers, serde_json
// ============================================================================

//! ## Overview
//! [`RpcDispatcher::dispatch`] is a thin router, grounded on the teacher's
//! tool router: match the method, decode nothing (params already arrive
//! typed via [`flowcore_contract::RpcMethod`]), call the matching private
//! handler, serialize its result to a [`serde_json::Value`]. Input
//! normalization (trim, mint missing ids, reject dangling references) lives
//! in each handler, next to the write it guards.

use std::sync::Arc;

use flowcore_contract::DebugCommand;
use flowcore_contract::RpcMethod;
use flowcore_model::core::event::EventKind;
use flowcore_model::core::flow::Flow;
use flowcore_model::core::identifiers::FlowId;
use flowcore_model::core::identifiers::RunId;
use flowcore_model::core::identifiers::TriggerId;
use flowcore_model::core::queue::QueueItem;
use flowcore_model::core::run::RunRecord;
use flowcore_model::core::run::RunStatus;
use flowcore_model::core::time::Clock;
use flowcore_model::core::trigger::TriggerFireContext;
use flowcore_model::core::trigger::TriggerSpec;
use flowcore_model::interfaces::EventStore;
use flowcore_model::interfaces::FlowStore;
use flowcore_model::interfaces::QueueStore;
use flowcore_model::interfaces::RunStore;
use flowcore_model::interfaces::TriggerStore;
use flowcore_runner::RunRunner;
use flowcore_scheduler::SchedulerHandle;
use flowcore_triggers::TriggerManager;
use serde_json::Value;

use crate::error::RpcServerError;
use crate::event_bus::EventBus;
use crate::event_bus::SubscriptionId;
use crate::ids::new_id;

/// Wires every port the RPC surface dispatches against.
pub struct RpcDispatcher {
    flows: Arc<dyn FlowStore>,
    runs: Arc<dyn RunStore>,
    events: Arc<dyn EventStore>,
    queue: Arc<dyn QueueStore>,
    triggers: Arc<dyn TriggerStore>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<SchedulerHandle>,
    runner: Arc<RunRunner>,
    trigger_manager: Arc<TriggerManager>,
    bus: Arc<EventBus>,
}

impl RpcDispatcher {
    /// Builds a dispatcher over the given ports and subsystems.
    #[must_use]
    #[expect(clippy::too_many_arguments, reason = "wires every port and subsystem the RPC surface fronts")]
    pub fn new(
        flows: Arc<dyn FlowStore>,
        runs: Arc<dyn RunStore>,
        events: Arc<dyn EventStore>,
        queue: Arc<dyn QueueStore>,
        triggers: Arc<dyn TriggerStore>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<SchedulerHandle>,
        runner: Arc<RunRunner>,
        trigger_manager: Arc<TriggerManager>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self { flows, runs, events, queue, triggers, clock, scheduler, runner, trigger_manager, bus }
    }

    /// Returns the shared event bus, for transports to register connections
    /// against.
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Dispatches one decoded method, optionally on behalf of a
    /// subscription-bearing connection (`None` for transports, like plain
    /// HTTP POST, that never subscribe).
    ///
    /// Trigger writes (`saveTrigger`, `deleteTrigger`, `enableTrigger`,
    /// `disableTrigger`) synchronously refresh the Trigger Manager's
    /// installed set before returning, so a `fireTrigger` immediately
    /// after a `saveTrigger` sees the trigger installed.
    ///
    /// # Errors
    ///
    /// Returns [`RpcServerError`] when the underlying storage, scheduler,
    /// or trigger call fails, or the request fails input validation.
    pub async fn dispatch(&self, subscriber: Option<SubscriptionId>, method: RpcMethod) -> Result<Value, RpcServerError> {
        match method {
            RpcMethod::ListFlows => to_value(self.flows.list_ids()?),
            RpcMethod::GetFlow { flow_id } => {
                to_value(self.flows.get(&flow_id)?.ok_or_else(|| not_found("flow", flow_id.as_str()))?)
            }
            RpcMethod::SaveFlow { flow } => self.save_flow(flow),
            RpcMethod::DeleteFlow { flow_id } => to_value(self.flows.delete(&flow_id)?),
            RpcMethod::ListRuns { status } => to_value(self.list_runs(status)?),
            RpcMethod::GetRun { run_id } => {
                to_value(self.runs.get(&run_id)?.ok_or_else(|| not_found("run", run_id.as_str()))?)
            }
            RpcMethod::ListEvents { run_id, from_seq, limit } => to_value(self.list_events(&run_id, from_seq, limit)?),
            RpcMethod::ListQueue => to_value(self.queue.list_all()?),
            RpcMethod::CancelQueueItem { run_id } => to_value(self.queue.complete(&run_id)?),
            RpcMethod::StartRun { flow_id, start_node_id, args, debug } => {
                to_value(self.start_run(flow_id, start_node_id, args, debug)?)
            }
            RpcMethod::PauseRun { run_id } => self.pause_run(&run_id),
            RpcMethod::ResumeRun { run_id } => self.resume_run(&run_id),
            RpcMethod::CancelRun { run_id, reason } => self.cancel_run(&run_id, reason),
            RpcMethod::DebugCommand { run_id, command } => self.debug_command(&run_id, command),
            RpcMethod::ListTriggers => to_value(self.triggers.list()?),
            RpcMethod::GetTrigger { trigger_id } => {
                to_value(self.triggers.get(&trigger_id)?.ok_or_else(|| not_found("trigger", trigger_id.as_str()))?)
            }
            RpcMethod::SaveTrigger { trigger } => self.save_trigger(trigger).await,
            RpcMethod::DeleteTrigger { trigger_id } => self.delete_trigger(&trigger_id).await,
            RpcMethod::EnableTrigger { trigger_id } => self.set_trigger_enabled(&trigger_id, true).await,
            RpcMethod::DisableTrigger { trigger_id } => self.set_trigger_enabled(&trigger_id, false).await,
            RpcMethod::FireTrigger { trigger_id } => self.fire_trigger(&trigger_id),
            RpcMethod::Subscribe { run_id } => self.set_subscription(subscriber, run_id.as_ref(), true),
            RpcMethod::Unsubscribe { run_id } => self.set_subscription(subscriber, run_id.as_ref(), false),
        }
    }

    // ------------------------------------------------------------------
    // Flows
    // ------------------------------------------------------------------

    fn save_flow(&self, mut flow: Flow) -> Result<Value, RpcServerError> {
        if flow.id.as_str().trim().is_empty() {
            flow.id = FlowId::new(new_id("flow"));
        }
        flow.validate_local().map_err(|err| RpcServerError::Invalid(err.to_string()))?;
        self.flows.put(&flow)?;
        to_value(flow.id)
    }

    // ------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------

    fn list_runs(&self, status: Option<RunStatus>) -> Result<Vec<RunRecord>, RpcServerError> {
        let statuses = status.map_or_else(
            || {
                vec![
                    RunStatus::Queued,
                    RunStatus::Running,
                    RunStatus::Paused,
                    RunStatus::Succeeded,
                    RunStatus::Failed,
                    RunStatus::Canceled,
                ]
            },
            |status| vec![status],
        );
        let mut runs = Vec::new();
        for status in statuses {
            runs.extend(self.runs.list_by_status(status)?);
        }
        Ok(runs)
    }

    fn list_events(
        &self,
        run_id: &RunId,
        from_seq: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<flowcore_model::core::event::Event>, RpcServerError> {
        let mut events = self.events.list(run_id, from_seq)?;
        if let Some(limit) = limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    fn start_run(
        &self,
        flow_id: FlowId,
        start_node_id: Option<flowcore_model::core::identifiers::NodeId>,
        args: std::collections::BTreeMap<String, Value>,
        debug: Option<flowcore_model::core::run::DebugConfig>,
    ) -> Result<RunId, RpcServerError> {
        let flow = self.flows.get(&flow_id)?.ok_or_else(|| not_found("flow", flow_id.as_str()))?;
        if let Some(node_id) = &start_node_id {
            if flow.node(node_id).is_none() {
                return Err(RpcServerError::Invalid(format!("node {node_id} not present in flow {flow_id}")));
            }
        }

        let run_id = RunId::new(new_id("run"));
        let now = self.clock.now();
        let mut run = RunRecord::new_queued(run_id.clone(), flow_id.clone(), now, args, None, debug, 1);
        run.start_node_id = start_node_id;
        self.runs.insert(&run)?;
        self.queue.enqueue(&QueueItem::new_pending(run_id.clone(), flow_id, now, 0))?;
        self.events.append(&run_id, now, EventKind::RunQueued)?;
        self.scheduler.kick();
        Ok(run_id)
    }

    fn pause_run(&self, run_id: &RunId) -> Result<Value, RpcServerError> {
        let run = self.runs.get(run_id)?.ok_or_else(|| not_found("run", run_id.as_str()))?;
        if run.status != RunStatus::Running {
            return Err(invalid_run_state(run.status, "pause"));
        }
        self.runner.pause_state(run_id).request_pause();
        to_value(())
    }

    fn resume_run(&self, run_id: &RunId) -> Result<Value, RpcServerError> {
        let run = self.runs.get(run_id)?.ok_or_else(|| not_found("run", run_id.as_str()))?;
        if run.status != RunStatus::Paused {
            return Err(invalid_run_state(run.status, "resume"));
        }
        self.runner.pause_state(run_id).resume();
        to_value(())
    }

    fn cancel_run(&self, run_id: &RunId, reason: Option<String>) -> Result<Value, RpcServerError> {
        let mut run = self.runs.get(run_id)?.ok_or_else(|| not_found("run", run_id.as_str()))?;
        match run.status {
            RunStatus::Running | RunStatus::Paused => {
                self.runner.pause_state(run_id).cancel();
            }
            RunStatus::Queued => {
                self.queue.complete(run_id)?;
                let now = self.clock.now();
                run.status = RunStatus::Canceled;
                run.updated_at = now;
                run.finished_at = Some(now);
                self.runs.update(&run)?;
                self.events.append(run_id, now, EventKind::RunCanceled { reason })?;
            }
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Canceled => {
                return Err(invalid_run_state(run.status, "cancel"));
            }
        }
        to_value(())
    }

    fn debug_command(&self, run_id: &RunId, command: DebugCommand) -> Result<Value, RpcServerError> {
        let run = self.runs.get(run_id)?.ok_or_else(|| not_found("run", run_id.as_str()))?;
        if run.status != RunStatus::Running && run.status != RunStatus::Paused {
            return Err(invalid_run_state(run.status, "debug"));
        }
        let pause_state = self.runner.pause_state(run_id);
        match command {
            DebugCommand::SetBreakpoints { node_ids } => pause_state.set_breakpoints(node_ids),
            DebugCommand::StepOver => pause_state.request_step_over(),
            DebugCommand::Resume => pause_state.resume(),
            DebugCommand::Cancel { .. } => pause_state.cancel(),
        }
        to_value(())
    }

    // ------------------------------------------------------------------
    // Triggers
    // ------------------------------------------------------------------

    async fn save_trigger(&self, mut trigger: TriggerSpec) -> Result<Value, RpcServerError> {
        if trigger.id.as_str().trim().is_empty() {
            trigger.id = TriggerId::new(new_id("trigger"));
        }
        let flow = self
            .flows
            .get(&trigger.flow_id)?
            .ok_or_else(|| RpcServerError::Invalid(format!("trigger references unknown flow {}", trigger.flow_id)))?;
        if let Some(node_id) = &trigger.start_node_id {
            if flow.node(node_id).is_none() {
                return Err(RpcServerError::Invalid(format!(
                    "trigger references unknown node {node_id} in flow {}",
                    trigger.flow_id
                )));
            }
        }
        self.triggers.put(&trigger)?;
        self.trigger_manager.refresh().await?;
        to_value(trigger.id)
    }

    async fn delete_trigger(&self, trigger_id: &TriggerId) -> Result<Value, RpcServerError> {
        self.triggers.delete(trigger_id)?;
        self.trigger_manager.refresh().await?;
        to_value(())
    }

    async fn set_trigger_enabled(&self, trigger_id: &TriggerId, enabled: bool) -> Result<Value, RpcServerError> {
        let mut trigger =
            self.triggers.get(trigger_id)?.ok_or_else(|| not_found("trigger", trigger_id.as_str()))?;
        trigger.enabled = enabled;
        self.triggers.put(&trigger)?;
        self.trigger_manager.refresh().await?;
        to_value(())
    }

    fn fire_trigger(&self, trigger_id: &TriggerId) -> Result<Value, RpcServerError> {
        let now = self.clock.now();
        let ctx = TriggerFireContext { trigger_id: trigger_id.clone(), fired_at: now, source_tab_id: None, source_page_id: None };
        let run_id = self.trigger_manager.fire(trigger_id, ctx, true)?;
        to_value(run_id)
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    fn set_subscription(
        &self,
        subscriber: Option<SubscriptionId>,
        run_id: Option<&RunId>,
        subscribed: bool,
    ) -> Result<Value, RpcServerError> {
        let Some(subscriber) = subscriber else {
            return Err(RpcServerError::Invalid("this transport does not support subscriptions".to_string()));
        };
        self.bus.set_filter(subscriber, run_id, subscribed);
        to_value(())
    }
}

fn to_value(value: impl serde::Serialize) -> Result<Value, RpcServerError> {
    serde_json::to_value(value).map_err(|err| RpcServerError::Invalid(err.to_string()))
}

fn not_found(kind: &str, id: &str) -> RpcServerError {
    RpcServerError::NotFound(format!("{kind} {id}"))
}

fn invalid_run_state(status: RunStatus, operation: &'static str) -> RpcServerError {
    let status = match status {
        RunStatus::Queued => "queued",
        RunStatus::Running => "running",
        RunStatus::Paused => "paused",
        RunStatus::Succeeded => "succeeded",
        RunStatus::Failed => "failed",
        RunStatus::Canceled => "canceled",
    };
    RpcServerError::InvalidRunState { status, operation }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex as StdMutex;

    use flowcore_model::core::flow::Node;
    use flowcore_model::core::identifiers::NodeId;
    use flowcore_model::core::identifiers::OwnerId;
    use flowcore_model::core::queue::QueueStatus;
    use flowcore_model::core::run::TriggerKind;
    use flowcore_model::core::time::test_support::FakeClock;
    use flowcore_model::core::time::Timestamp;
    use flowcore_model::core::trigger::StormControl;
    use flowcore_model::core::trigger::TriggerConfig;
    use flowcore_model::interfaces::StoreError;
    use flowcore_runner::NodePluginRegistry;
    use flowcore_scheduler::RunExecutor;
    use flowcore_scheduler::Scheduler;
    use flowcore_scheduler::SchedulerConfig;
    use flowcore_triggers::TriggerManager;

    use super::*;

    #[derive(Default)]
    struct InMemoryFlows {
        stored: StdMutex<StdHashMap<FlowId, Flow>>,
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
        stored: StdMutex<StdHashMap<RunId, RunRecord>>,
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
        fn list_by_status(&self, status: RunStatus) -> Result<Vec<RunRecord>, StoreError> {
            Ok(self
                .stored
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .values()
                .filter(|r| r.status == status)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct InMemoryEvents {
        by_run: StdMutex<StdHashMap<RunId, Vec<flowcore_model::core::event::Event>>>,
    }
    impl EventStore for InMemoryEvents {
        fn append(
            &self,
            run_id: &RunId,
            recorded_at: Timestamp,
            kind: EventKind,
        ) -> Result<flowcore_model::core::event::Event, StoreError> {
            let mut by_run = self.by_run.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let events = by_run.entry(run_id.clone()).or_default();
            let seq = u64::try_from(events.len()).unwrap_or(u64::MAX);
            let event = flowcore_model::core::event::Event::new(run_id.clone(), seq, recorded_at, kind);
            events.push(event.clone());
            Ok(event)
        }
        fn list(&self, run_id: &RunId, _after_seq: Option<u64>) -> Result<Vec<flowcore_model::core::event::Event>, StoreError> {
            Ok(self.by_run.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(run_id).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct InMemoryQueue {
        items: StdMutex<Vec<QueueItem>>,
    }
    impl QueueStore for InMemoryQueue {
        fn enqueue(&self, item: &QueueItem) -> Result<(), StoreError> {
            self.items.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(item.clone());
            Ok(())
        }
        fn claim_batch(&self, _owner: &OwnerId, _now: Timestamp, _lease_duration_ms: i64, _max_items: usize) -> Result<Vec<QueueItem>, StoreError> {
            Ok(Vec::new())
        }
        fn heartbeat(&self, _run_id: &RunId, _owner: &OwnerId, _now: Timestamp, _lease_duration_ms: i64) -> Result<(), StoreError> {
            Ok(())
        }
        fn complete(&self, run_id: &RunId) -> Result<(), StoreError> {
            self.items.lock().unwrap_or_else(std::sync::PoisonError::into_inner).retain(|item| &item.run_id != run_id);
            Ok(())
        }
        fn list_expired(&self, _now: Timestamp) -> Result<Vec<QueueItem>, StoreError> {
            Ok(Vec::new())
        }
        fn list_all(&self) -> Result<Vec<QueueItem>, StoreError> {
            Ok(self.items.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone())
        }
        fn recover_orphans(&self, _new_owner: &OwnerId, _now: Timestamp, _lease_duration_ms: i64) -> Result<Vec<(QueueItem, Option<OwnerId>)>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct InMemoryTriggers {
        stored: StdMutex<StdHashMap<TriggerId, TriggerSpec>>,
    }
    impl TriggerStore for InMemoryTriggers {
        fn put(&self, trigger: &TriggerSpec) -> Result<(), StoreError> {
            self.stored.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(trigger.id.clone(), trigger.clone());
            Ok(())
        }
        fn get(&self, id: &TriggerId) -> Result<Option<TriggerSpec>, StoreError> {
            Ok(self.stored.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(id).cloned())
        }
        fn delete(&self, id: &TriggerId) -> Result<(), StoreError> {
            self.stored.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(id);
            Ok(())
        }
        fn list(&self) -> Result<Vec<TriggerSpec>, StoreError> {
            Ok(self.stored.lock().unwrap_or_else(std::sync::PoisonError::into_inner).values().cloned().collect())
        }
    }

    struct NoopExecutor;
    #[async_trait::async_trait]
    impl RunExecutor for NoopExecutor {
        async fn execute(&self, _item: QueueItem) -> Result<(), flowcore_scheduler::executor::ExecutorError> {
            Ok(())
        }
    }

    fn sample_flow() -> Flow {
        Flow {
            schema_version: 1,
            id: FlowId::new(""),
            name: "demo".to_string(),
            description: None,
            created_at: Timestamp::from_millis(0),
            updated_at: Timestamp::from_millis(0),
            entry_node_id: NodeId::new("n1"),
            nodes: vec![Node {
                id: NodeId::new("n1"),
                kind: "noop".to_string(),
                name: None,
                disabled: false,
                policy: None,
                config: serde_json::json!({}),
            }],
            edges: vec![],
            variables: vec![],
            policy: None,
            metadata: Default::default(),
        }
    }

    fn build_dispatcher() -> (Arc<RpcDispatcher>, Arc<InMemoryRuns>) {
        let flows: Arc<InMemoryFlows> = Arc::default();
        let runs: Arc<InMemoryRuns> = Arc::default();
        let raw_events: Arc<InMemoryEvents> = Arc::default();
        let queue: Arc<InMemoryQueue> = Arc::default();
        let triggers: Arc<InMemoryTriggers> = Arc::default();
        let clock: Arc<dyn flowcore_model::core::time::Clock> = Arc::new(FakeClock::new(0));
        let bus = Arc::new(EventBus::new());
        let events: Arc<dyn EventStore> =
            Arc::new(crate::event_bus::PublishingEventStore::new(raw_events as Arc<dyn EventStore>, bus.clone()));

        let scheduler = Scheduler::new(
            queue.clone() as Arc<dyn QueueStore>,
            clock.clone(),
            OwnerId::new("host-1"),
            Arc::new(NoopExecutor),
            SchedulerConfig { max_parallel_runs: 1, lease_ttl_ms: 10_000, heartbeat_interval_ms: 1_000, reclaim_interval_ms: 1_000 },
        );
        let scheduler_handle = Arc::new(Arc::new(scheduler).spawn());

        let runner = Arc::new(RunRunner::new(
            flows.clone() as Arc<dyn FlowStore>,
            runs.clone() as Arc<dyn RunStore>,
            events.clone(),
            Arc::new(InMemoryVars::default()) as Arc<dyn flowcore_model::interfaces::VarStore>,
            Arc::new(NodePluginRegistry::new()),
            clock.clone(),
        ));

        let handler = Arc::new(flowcore_triggers::handlers::HostEventHandler::new(TriggerKind::Hotkey));
        let trigger_manager = TriggerManager::builder().handler(handler).build(
            triggers.clone() as Arc<dyn TriggerStore>,
            runs.clone() as Arc<dyn RunStore>,
            queue.clone() as Arc<dyn QueueStore>,
            events.clone(),
            clock.clone(),
            Some(scheduler_handle.clone()),
        );
        trigger_manager.start().expect("start triggers");

        let dispatcher = Arc::new(RpcDispatcher::new(
            flows as Arc<dyn FlowStore>,
            runs.clone() as Arc<dyn RunStore>,
            events,
            queue as Arc<dyn QueueStore>,
            triggers as Arc<dyn TriggerStore>,
            clock,
            scheduler_handle,
            runner,
            trigger_manager,
            bus,
        ));
        (dispatcher, runs)
    }

    #[derive(Default)]
    struct InMemoryVars;
    impl flowcore_model::interfaces::VarStore for InMemoryVars {
        fn get(
            &self,
            _key: &flowcore_model::core::identifiers::PersistentVarKey,
        ) -> Result<Option<flowcore_model::core::vars::PersistentVarRecord>, StoreError> {
            Ok(None)
        }
        fn write(
            &self,
            _key: &flowcore_model::core::identifiers::PersistentVarKey,
            _value: Value,
            _now: Timestamp,
            _written_by_run: Option<RunId>,
        ) -> Result<flowcore_model::core::vars::PersistentVarRecord, StoreError> {
            Err(StoreError::Io("not supported in test".to_string()))
        }
        fn list(&self) -> Result<Vec<flowcore_model::core::vars::PersistentVarRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn save_flow_mints_id_when_blank_and_rejects_dangling_entry() {
        let (dispatcher, _runs) = build_dispatcher();
        let flow = sample_flow();
        let result = dispatcher.dispatch(None, RpcMethod::SaveFlow { flow }).await.expect("save flow");
        assert!(result.as_str().is_some_and(|id| id.starts_with("flow-")));

        let mut bad_flow = sample_flow();
        bad_flow.id = FlowId::new("bad");
        bad_flow.entry_node_id = NodeId::new("missing");
        let err = dispatcher.dispatch(None, RpcMethod::SaveFlow { flow: bad_flow }).await.unwrap_err();
        assert!(matches!(err, RpcServerError::Invalid(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_run_rejects_unknown_start_node() {
        let (dispatcher, _runs) = build_dispatcher();
        let mut flow = sample_flow();
        flow.id = FlowId::new("f1");
        dispatcher.dispatch(None, RpcMethod::SaveFlow { flow }).await.expect("save flow");

        let err = dispatcher
            .dispatch(
                None,
                RpcMethod::StartRun {
                    flow_id: FlowId::new("f1"),
                    start_node_id: Some(NodeId::new("ghost")),
                    args: std::collections::BTreeMap::new(),
                    debug: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RpcServerError::Invalid(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_run_enqueues_and_queued_run_can_be_canceled() {
        let (dispatcher, runs) = build_dispatcher();
        let mut flow = sample_flow();
        flow.id = FlowId::new("f1");
        dispatcher.dispatch(None, RpcMethod::SaveFlow { flow }).await.expect("save flow");

        let result = dispatcher
            .dispatch(
                None,
                RpcMethod::StartRun {
                    flow_id: FlowId::new("f1"),
                    start_node_id: None,
                    args: std::collections::BTreeMap::new(),
                    debug: None,
                },
            )
            .await
            .expect("start run");
        let run_id = RunId::new(result.as_str().expect("run id string").to_string());
        assert_eq!(runs.get(&run_id).unwrap().unwrap().status, RunStatus::Queued);

        dispatcher
            .dispatch(None, RpcMethod::CancelRun { run_id: run_id.clone(), reason: Some("test".into()) })
            .await
            .expect("cancel");
        let stored = runs.get(&run_id).unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Canceled);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pause_run_rejects_a_queued_run() {
        let (dispatcher, runs) = build_dispatcher();
        let run = RunRecord::new_queued(RunId::new("r1"), FlowId::new("f1"), Timestamp::from_millis(0), Default::default(), None, None, 1);
        runs.insert(&run).expect("insert");

        let err = dispatcher.dispatch(None, RpcMethod::PauseRun { run_id: RunId::new("r1") }).await.unwrap_err();
        assert!(matches!(err, RpcServerError::InvalidRunState { operation: "pause", .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pause_then_resume_a_running_run() {
        let (dispatcher, runs) = build_dispatcher();
        let mut run = RunRecord::new_queued(RunId::new("r1"), FlowId::new("f1"), Timestamp::from_millis(0), Default::default(), None, None, 1);
        run.status = RunStatus::Running;
        runs.insert(&run).expect("insert");

        dispatcher.dispatch(None, RpcMethod::PauseRun { run_id: RunId::new("r1") }).await.expect("pause");
        dispatcher.dispatch(None, RpcMethod::ResumeRun { run_id: RunId::new("r1") }).await.expect("resume");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn save_trigger_rejects_unknown_flow() {
        let (dispatcher, _runs) = build_dispatcher();
        let trigger = TriggerSpec {
            id: TriggerId::new(""),
            flow_id: FlowId::new("nope"),
            start_node_id: None,
            config: TriggerConfig::Hotkey { combo: "Ctrl+K".into() },
            enabled: true,
            storm_control: StormControl { cooldown_ms: 0, max_queued: 1 },
            created_at: Timestamp::from_millis(0),
        };
        let err = dispatcher.dispatch(None, RpcMethod::SaveTrigger { trigger }).await.unwrap_err();
        assert!(matches!(err, RpcServerError::Invalid(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fire_trigger_enqueues_a_run_for_an_installed_trigger() {
        let (dispatcher, _runs) = build_dispatcher();
        let mut flow = sample_flow();
        flow.id = FlowId::new("f1");
        dispatcher.dispatch(None, RpcMethod::SaveFlow { flow }).await.expect("save flow");

        let trigger = TriggerSpec {
            id: TriggerId::new("t1"),
            flow_id: FlowId::new("f1"),
            start_node_id: None,
            config: TriggerConfig::Hotkey { combo: "Ctrl+K".into() },
            enabled: true,
            storm_control: StormControl { cooldown_ms: 0, max_queued: 5 },
            created_at: Timestamp::from_millis(0),
        };
        dispatcher.dispatch(None, RpcMethod::SaveTrigger { trigger }).await.expect("save trigger");
        dispatcher.dispatch(None, RpcMethod::EnableTrigger { trigger_id: TriggerId::new("t1") }).await.expect("enable");

        let result =
            dispatcher.dispatch(None, RpcMethod::FireTrigger { trigger_id: TriggerId::new("t1") }).await.expect("fire");
        assert!(!result.is_null());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscribe_requires_a_subscriber_handle() {
        let (dispatcher, _runs) = build_dispatcher();
        let err = dispatcher.dispatch(None, RpcMethod::Subscribe { run_id: None }).await.unwrap_err();
        assert!(matches!(err, RpcServerError::Invalid(_)));

        let (subscription, _rx) = dispatcher.bus().register();
        dispatcher.dispatch(Some(subscription), RpcMethod::Subscribe { run_id: None }).await.expect("subscribe");
    }
}
