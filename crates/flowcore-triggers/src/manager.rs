// crates/flowcore-triggers/src/manager.rs
// ============================================================================
// Module: Flowcore Trigger Manager
// Description: Orchestrates per-kind trigger handlers, storm control, and
//              the fire path that turns a trigger fire into a queued run.
// Purpose: Implement spec.md §4.9 end to end: start/stop/refresh the
//          installed set, and enqueue a run when a handler reports a fire.
// Dependencies: flowcore-model, flowcore-scheduler, rand, tokio
// ============================================================================

//! ## Overview
//! [`TriggerManager`] is grounded on the same composite-registry shape the
//! teacher's disclosure broker used for its sources: a `BTreeMap<TriggerKind,
//! Arc<dyn TriggerHandler>>` plays the role the broker gave `BTreeMap<String,
//! Arc<dyn Source>>` keyed by URI scheme. [`TriggerManager::refresh`]'s
//! coalesced-pass semantics use a generation counter sampled before acquiring
//! the refresh lock: if another pass completed while this caller waited, the
//! wait itself already satisfies the request and no redundant pass runs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use flowcore_model::core::identifiers::RunId;
use flowcore_model::core::identifiers::TriggerId;
use flowcore_model::core::queue::QueueItem;
use flowcore_model::core::queue::QueueStatus;
use flowcore_model::core::run::RunRecord;
use flowcore_model::core::run::TriggerContext;
use flowcore_model::core::time::Clock;
use flowcore_model::core::trigger::TriggerFireContext;
use flowcore_model::core::trigger::TriggerSpec;
use flowcore_model::interfaces::EventStore;
use flowcore_model::interfaces::QueueStore;
use flowcore_model::interfaces::RunStore;
use flowcore_model::interfaces::TriggerStore;
use flowcore_model::core::event::EventKind;
use flowcore_scheduler::SchedulerHandle;
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::TriggerError;
use crate::handler::TriggerHandler;

// ============================================================================
// SECTION: Builder
// ============================================================================

/// Builder for a [`TriggerManager`].
#[derive(Default)]
pub struct TriggerManagerBuilder {
    handlers: BTreeMap<flowcore_model::core::run::TriggerKind, Arc<dyn TriggerHandler>>,
}

impl TriggerManagerBuilder {
    /// Registers a handler, keyed by its own [`TriggerHandler::kind`]. A
    /// later registration for the same kind replaces the earlier one.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn TriggerHandler>) -> Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    /// Builds the manager over the given storage ports and clock.
    #[must_use]
    #[expect(clippy::too_many_arguments, reason = "wires every storage port the fire path touches")]
    pub fn build(
        self,
        triggers: Arc<dyn TriggerStore>,
        runs: Arc<dyn RunStore>,
        queue: Arc<dyn QueueStore>,
        events: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
        scheduler: Option<Arc<SchedulerHandle>>,
    ) -> Arc<TriggerManager> {
        Arc::new(TriggerManager {
            handlers: self.handlers,
            triggers,
            runs,
            queue,
            events,
            clock,
            scheduler,
            installed: Mutex::new(HashMap::new()),
            cooldowns: Mutex::new(HashMap::new()),
            in_flight_enqueues: AtomicI64::new(0),
            refresh_gen: AtomicU64::new(0),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }
}

// ============================================================================
// SECTION: Trigger Manager
// ============================================================================

/// Orchestrates installed trigger handlers and the fire-to-run path.
pub struct TriggerManager {
    handlers: BTreeMap<flowcore_model::core::run::TriggerKind, Arc<dyn TriggerHandler>>,
    triggers: Arc<dyn TriggerStore>,
    runs: Arc<dyn RunStore>,
    queue: Arc<dyn QueueStore>,
    events: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    scheduler: Option<Arc<SchedulerHandle>>,
    installed: Mutex<HashMap<TriggerId, flowcore_model::core::run::TriggerKind>>,
    cooldowns: Mutex<HashMap<TriggerId, i64>>,
    in_flight_enqueues: AtomicI64,
    refresh_gen: AtomicU64,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl TriggerManager {
    /// Returns a builder for a new manager.
    #[must_use]
    pub fn builder() -> TriggerManagerBuilder {
        TriggerManagerBuilder::default()
    }

    /// Lists all enabled triggers and installs each with its kind's
    /// handler. Called once at startup.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError`] when the trigger store read fails or a
    /// kind has no registered handler.
    pub fn start(self: &Arc<Self>) -> Result<(), TriggerError> {
        self.install_all()
    }

    /// Uninstalls every handler's full listener set. Called at shutdown.
    pub fn stop(&self) {
        for handler in self.handlers.values() {
            handler.uninstall_all();
        }
        self.installed.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clear();
    }

    /// Re-runs the install/uninstall reconciliation against the current
    /// trigger store contents. Concurrent calls collapse into one pass: a
    /// caller that starts waiting for the lock after another pass has
    /// already begun is satisfied by that pass's result.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError`] when the trigger store read fails.
    pub async fn refresh(self: &Arc<Self>) -> Result<(), TriggerError> {
        let observed_gen = self.refresh_gen.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;
        if self.refresh_gen.load(Ordering::Acquire) != observed_gen {
            return Ok(());
        }
        self.install_all()?;
        self.refresh_gen.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn install_all(self: &Arc<Self>) -> Result<(), TriggerError> {
        let specs = self.triggers.list()?;
        let mut installed = self.installed.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let enabled_ids: std::collections::HashSet<TriggerId> =
            specs.iter().filter(|t| t.enabled).map(|t| t.id.clone()).collect();

        let stale: Vec<TriggerId> = installed.keys().filter(|id| !enabled_ids.contains(*id)).cloned().collect();
        for id in stale {
            if let Some(kind) = installed.remove(&id)
                && let Some(handler) = self.handlers.get(&kind)
            {
                handler.uninstall(&id);
            }
        }

        for trigger in specs.iter().filter(|t| t.enabled) {
            let handler =
                self.handlers.get(&trigger.config.kind()).ok_or(TriggerError::UnknownHandler(trigger.config.kind()))?;
            let manager = Arc::clone(self);
            let on_fire: crate::handler::FireCallback = Arc::new(move |trigger_id, ctx| {
                let _ = manager.fire(&trigger_id, ctx, false);
            });
            handler.install(trigger, on_fire)?;
            installed.insert(trigger.id.clone(), trigger.config.kind());
        }
        Ok(())
    }

    /// Runs the fire path of spec.md §4.9 for a trigger reported by a
    /// handler (`manual = false`) or an explicit RPC fire (`manual =
    /// true`).
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError::NotInstalled`] for a manual fire of an
    /// unknown or disabled trigger; storage failures surface as
    /// [`TriggerError::Store`].
    pub fn fire(&self, trigger_id: &TriggerId, ctx: TriggerFireContext, manual: bool) -> Result<Option<RunId>, TriggerError> {
        let is_installed = self.installed.lock().unwrap_or_else(std::sync::PoisonError::into_inner).contains_key(trigger_id);
        if !is_installed {
            return if manual { Err(TriggerError::NotInstalled(trigger_id.clone())) } else { Ok(None) };
        }
        let Some(trigger) = self.triggers.get(trigger_id)? else {
            return if manual { Err(TriggerError::NotInstalled(trigger_id.clone())) } else { Ok(None) };
        };

        let now = self.clock.now_millis();
        {
            let cooldowns = self.cooldowns.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(last_fired) = cooldowns.get(trigger_id)
                && now.saturating_sub(*last_fired) < i64::try_from(trigger.storm_control.cooldown_ms).unwrap_or(i64::MAX)
            {
                return Ok(None);
            }
        }

        let queued = i64::try_from(
            self.queue.list_all()?.into_iter().filter(|item| item.status == QueueStatus::Pending).count(),
        )
        .unwrap_or(i64::MAX);
        let in_flight = self.in_flight_enqueues.load(Ordering::Acquire);
        if queued + in_flight >= i64::from(trigger.storm_control.max_queued) {
            return Ok(None);
        }

        self.cooldowns.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(trigger_id.clone(), now);
        self.in_flight_enqueues.fetch_add(1, Ordering::AcqRel);

        let result = self.enqueue_run(&trigger, &ctx);

        self.in_flight_enqueues.fetch_sub(1, Ordering::AcqRel);
        if result.is_err() {
            self.cooldowns.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(trigger_id);
        }
        result.map(Some)
    }

    fn enqueue_run(&self, trigger: &TriggerSpec, fire_ctx: &TriggerFireContext) -> Result<RunId, TriggerError> {
        let run_id = new_run_id();
        let now = self.clock.now();
        let trigger_context = TriggerContext {
            trigger_id: trigger.id.clone(),
            kind: trigger.config.kind(),
            fired_at: fire_ctx.fired_at,
            source_tab_id: fire_ctx.source_tab_id.clone(),
            source_page_id: fire_ctx.source_page_id.clone(),
        };
        let mut run = RunRecord::new_queued(
            run_id.clone(),
            trigger.flow_id.clone(),
            now,
            BTreeMap::new(),
            Some(trigger_context),
            None,
            1,
        );
        run.start_node_id = trigger.start_node_id.clone();

        self.runs.insert(&run)?;
        self.queue.enqueue(&QueueItem::new_pending(run_id.clone(), trigger.flow_id.clone(), now, 0))?;
        self.events.append(&run_id, now, EventKind::RunQueued)?;
        if let Some(scheduler) = &self.scheduler {
            scheduler.kick();
        }
        Ok(run_id)
    }
}

/// Generates a fresh opaque [`RunId`] for a trigger-produced run.
fn new_run_id() -> RunId {
    let mut bytes = [0_u8; 16];
    OsRng.fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    RunId::new(format!("run-{hex}"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex as StdMutex;

    use flowcore_model::core::event::Event;
    use flowcore_model::core::identifiers::FlowId;
    use flowcore_model::core::identifiers::OwnerId;
    use flowcore_model::core::run::RunStatus;
    use flowcore_model::core::time::Timestamp;
    use flowcore_model::core::time::test_support::FakeClock;
    use flowcore_model::core::trigger::StormControl;
    use flowcore_model::core::trigger::TriggerConfig;
    use flowcore_model::interfaces::StoreError;

    use super::*;
    use crate::handlers::HostEventHandler;

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
        fn complete(&self, _run_id: &RunId) -> Result<(), StoreError> {
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
    struct InMemoryEvents {
        by_run: StdMutex<StdHashMap<RunId, Vec<Event>>>,
    }
    impl EventStore for InMemoryEvents {
        fn append(&self, run_id: &RunId, recorded_at: Timestamp, kind: EventKind) -> Result<Event, StoreError> {
            let mut by_run = self.by_run.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let events = by_run.entry(run_id.clone()).or_default();
            let seq = u64::try_from(events.len()).unwrap_or(u64::MAX);
            let event = Event::new(run_id.clone(), seq, recorded_at, kind);
            events.push(event.clone());
            Ok(event)
        }
        fn list(&self, run_id: &RunId, _after_seq: Option<u64>) -> Result<Vec<Event>, StoreError> {
            Ok(self.by_run.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(run_id).cloned().unwrap_or_default())
        }
    }

    fn hotkey_trigger(id: &str, cooldown_ms: u64, max_queued: u32) -> TriggerSpec {
        TriggerSpec {
            id: TriggerId::new(id),
            flow_id: FlowId::new("f1"),
            start_node_id: None,
            config: TriggerConfig::Hotkey { combo: "Ctrl+Shift+K".into() },
            enabled: true,
            storm_control: StormControl { cooldown_ms, max_queued },
            created_at: Timestamp::from_millis(0),
        }
    }

    fn fire_ctx(id: &str) -> TriggerFireContext {
        TriggerFireContext { trigger_id: TriggerId::new(id), fired_at: Timestamp::from_millis(0), source_tab_id: None, source_page_id: None }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_installs_enabled_triggers_and_fire_enqueues_a_run() {
        let triggers = Arc::new(InMemoryTriggers::default());
        triggers.put(&hotkey_trigger("t1", 0, 10)).expect("put");
        let runs = Arc::new(InMemoryRuns::default());
        let queue = Arc::new(InMemoryQueue::default());
        let events = Arc::new(InMemoryEvents::default());
        let clock = Arc::new(FakeClock::new(0));

        let manager = TriggerManager::builder()
            .handler(Arc::new(HostEventHandler::new(flowcore_model::core::run::TriggerKind::Hotkey)))
            .build(triggers, runs.clone(), queue.clone(), events, clock, None);
        manager.start().expect("start");

        let run_id = manager.fire(&TriggerId::new("t1"), fire_ctx("t1"), false).expect("fire").expect("enqueued");
        let run = runs.get(&run_id).expect("get").expect("present");
        assert_eq!(run.status, RunStatus::Queued);
        assert_eq!(queue.items.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cooldown_suppresses_a_fire_within_the_window() {
        let triggers = Arc::new(InMemoryTriggers::default());
        triggers.put(&hotkey_trigger("t1", 1_000, 10)).expect("put");
        let runs = Arc::new(InMemoryRuns::default());
        let queue = Arc::new(InMemoryQueue::default());
        let events = Arc::new(InMemoryEvents::default());
        let clock = Arc::new(FakeClock::new(0));

        let manager = TriggerManager::builder()
            .handler(Arc::new(HostEventHandler::new(flowcore_model::core::run::TriggerKind::Hotkey)))
            .build(triggers, runs, queue, events, clock, None);
        manager.start().expect("start");

        let first = manager.fire(&TriggerId::new("t1"), fire_ctx("t1"), false).expect("fire");
        assert!(first.is_some());
        let second = manager.fire(&TriggerId::new("t1"), fire_ctx("t1"), false).expect("fire");
        assert!(second.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn max_queued_drops_fires_at_cap() {
        let triggers = Arc::new(InMemoryTriggers::default());
        triggers.put(&hotkey_trigger("t1", 0, 1)).expect("put");
        let runs = Arc::new(InMemoryRuns::default());
        let queue = Arc::new(InMemoryQueue::default());
        let events = Arc::new(InMemoryEvents::default());
        let clock = Arc::new(FakeClock::new(0));

        let manager = TriggerManager::builder()
            .handler(Arc::new(HostEventHandler::new(flowcore_model::core::run::TriggerKind::Hotkey)))
            .build(triggers, runs, queue, events, clock, None);
        manager.start().expect("start");

        let first = manager.fire(&TriggerId::new("t1"), fire_ctx("t1"), false).expect("fire");
        assert!(first.is_some());
        let second = manager.fire(&TriggerId::new("t1"), fire_ctx("t1"), false).expect("fire");
        assert!(second.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn manual_fire_of_unknown_trigger_errors() {
        let triggers = Arc::new(InMemoryTriggers::default());
        let runs = Arc::new(InMemoryRuns::default());
        let queue = Arc::new(InMemoryQueue::default());
        let events = Arc::new(InMemoryEvents::default());
        let clock = Arc::new(FakeClock::new(0));

        let manager = TriggerManager::builder().build(triggers, runs, queue, events, clock, None);
        let err = manager.fire(&TriggerId::new("missing"), fire_ctx("missing"), true).expect_err("should error");
        assert!(matches!(err, TriggerError::NotInstalled(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refresh_is_idempotent_with_no_spec_changes() {
        let triggers = Arc::new(InMemoryTriggers::default());
        triggers.put(&hotkey_trigger("t1", 0, 10)).expect("put");
        let runs = Arc::new(InMemoryRuns::default());
        let queue = Arc::new(InMemoryQueue::default());
        let events = Arc::new(InMemoryEvents::default());
        let clock = Arc::new(FakeClock::new(0));

        let manager = TriggerManager::builder()
            .handler(Arc::new(HostEventHandler::new(flowcore_model::core::run::TriggerKind::Hotkey)))
            .build(triggers, runs, queue, events, clock, None);
        manager.start().expect("start");
        manager.refresh().await.expect("refresh 1");
        manager.refresh().await.expect("refresh 2");

        assert_eq!(manager.installed.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len(), 1);
    }
}
