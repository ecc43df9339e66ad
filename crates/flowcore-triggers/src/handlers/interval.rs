// crates/flowcore-triggers/src/handlers/interval.rs
// ============================================================================
// Module: Interval Trigger Handler
// Description: Handler for triggers that fire every fixed period.
// Purpose: Drive onFire from a tokio timer rather than a host-reported
//          event (spec.md §4.9: "Each timer points to an external,
//          host-provided alarm facility; one alarm per trigger").
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

/// Handler for [`TriggerKind::Interval`], firing every `interval_ms`.
pub struct IntervalHandler {
    tasks: Mutex<HashMap<TriggerId, JoinHandle<()>>>,
}

impl Default for IntervalHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl IntervalHandler {
    /// Creates an empty interval handler.
    #[must_use]
    pub fn new() -> Self {
        Self { tasks: Mutex::new(HashMap::new()) }
    }
}

impl TriggerHandler for IntervalHandler {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Interval
    }

    fn install(&self, trigger: &TriggerSpec, on_fire: FireCallback) -> Result<(), TriggerError> {
        let TriggerConfig::Interval { interval_ms } = trigger.config else {
            return Ok(());
        };
        let period = Duration::from_millis(interval_ms.max(1));
        let trigger_id = trigger.id.clone();
        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.tick().await;
            loop {
                tick.tick().await;
                on_fire(trigger_id.clone(), TriggerFireContext {
                    trigger_id: trigger_id.clone(),
                    fired_at: SystemClock.now(),
                    source_tab_id: None,
                    source_page_id: None,
                });
            }
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
