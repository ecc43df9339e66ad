// crates/flowcore-triggers/src/handlers/one_shot.rs
// ============================================================================
// Module: One-Shot Trigger Handler
// Description: Handler for triggers that fire exactly once at a fixed time.
// Purpose: Cover `TriggerKind::OneShot` (spec.md §4.9 alarm-backed timers).
// Dependencies: flowcore-model, tokio
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use flowcore_model::core::identifiers::TriggerId;
use flowcore_model::core::run::TriggerKind;
use flowcore_model::core::time::Clock;
use flowcore_model::core::time::SystemClock;
use flowcore_model::core::trigger::TriggerConfig;
use flowcore_model::core::trigger::TriggerFireContext;
use flowcore_model::core::trigger::TriggerSpec;
use tokio::task::JoinHandle;

use crate::error::TriggerError;
use crate::handler::FireCallback;
use crate::handler::TriggerHandler;

/// Handler for [`TriggerKind::OneShot`], firing once at `at` then retiring.
pub struct OneShotHandler {
    tasks: Mutex<HashMap<TriggerId, JoinHandle<()>>>,
}

impl Default for OneShotHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl OneShotHandler {
    /// Creates an empty one-shot handler.
    #[must_use]
    pub fn new() -> Self {
        Self { tasks: Mutex::new(HashMap::new()) }
    }
}

impl TriggerHandler for OneShotHandler {
    fn kind(&self) -> TriggerKind {
        TriggerKind::OneShot
    }

    fn install(&self, trigger: &TriggerSpec, on_fire: FireCallback) -> Result<(), TriggerError> {
        let TriggerConfig::OneShot { at } = trigger.config else {
            return Ok(());
        };
        let delay_ms = (at.as_millis() - SystemClock.now().as_millis()).max(0);
        let trigger_id = trigger.id.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(u64::try_from(delay_ms).unwrap_or(0))).await;
            on_fire(trigger_id.clone(), TriggerFireContext {
                trigger_id: trigger_id.clone(),
                fired_at: SystemClock.now(),
                source_tab_id: None,
                source_page_id: None,
            });
        });
        self.tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(trigger.id.clone(), task);
        Ok(())
    }

    fn uninstall(&self, trigger_id: &TriggerId) {
        if let Some(task) = self.tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(trigger_id) {
            task.abort();
        }
    }

    fn uninstall_all(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for (_, task) in tasks.drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use flowcore_model::core::identifiers::FlowId;
    use flowcore_model::core::time::Timestamp;
    use flowcore_model::core::trigger::StormControl;

    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn fires_once_near_the_target_time() {
        let handler = OneShotHandler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let at = SystemClock.now().add_millis(20);
        let trigger = TriggerSpec {
            id: TriggerId::new("t1"),
            flow_id: FlowId::new("f1"),
            start_node_id: None,
            config: TriggerConfig::OneShot { at },
            enabled: true,
            storm_control: StormControl::default(),
            created_at: Timestamp::from_millis(0),
        };
        handler
            .install(&trigger, Arc::new(move |_id, _ctx| { fired_clone.fetch_add(1, Ordering::SeqCst); }))
            .expect("install");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn uninstall_before_fire_suppresses_it() {
        let handler = OneShotHandler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let at = SystemClock.now().add_millis(50);
        let trigger = TriggerSpec {
            id: TriggerId::new("t1"),
            flow_id: FlowId::new("f1"),
            start_node_id: None,
            config: TriggerConfig::OneShot { at },
            enabled: true,
            storm_control: StormControl::default(),
            created_at: Timestamp::from_millis(0),
        };
        handler
            .install(&trigger, Arc::new(move |_id, _ctx| { fired_clone.fetch_add(1, Ordering::SeqCst); }))
            .expect("install");
        handler.uninstall(&TriggerId::new("t1"));

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
