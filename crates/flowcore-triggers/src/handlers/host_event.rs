// crates/flowcore-triggers/src/handlers/host_event.rs
// ============================================================================
// Module: Host Event Trigger Handler
// Description: Handler for trigger kinds fired by a host-reported event
//              rather than an internally-scheduled timer.
// Purpose: Cover url_match, hotkey, context_menu, and dom_appearance, which
//          all share the same install/uninstall/notify shape (spec.md
//          §4.9: "Handlers translate host-specific events ... to onFire").
// Dependencies: flowcore-model
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;

use flowcore_model::core::identifiers::TriggerId;
use flowcore_model::core::run::TriggerKind;
use flowcore_model::core::trigger::TriggerFireContext;
use flowcore_model::core::trigger::TriggerSpec;

use crate::error::TriggerError;
use crate::handler::FireCallback;
use crate::handler::TriggerHandler;

/// Handler for a [`TriggerKind`] whose actual host listening (URL
/// navigation, hotkey registration, context menu entries, DOM observers)
/// is out of this crate's scope. The host process calls [`Self::notify`]
/// when it observes the underlying event; this handler only tracks which
/// trigger ids are currently installed and forwards the fire.
pub struct HostEventHandler {
    kind: TriggerKind,
    installed: Mutex<HashMap<TriggerId, FireCallback>>,
}

impl HostEventHandler {
    /// Creates a handler for `kind`.
    #[must_use]
    pub fn new(kind: TriggerKind) -> Self {
        Self { kind, installed: Mutex::new(HashMap::new()) }
    }

    /// Reports a host-observed event for `trigger_id`, invoking its fire
    /// callback if the trigger is currently installed. A no-op otherwise.
    pub fn notify(&self, trigger_id: &TriggerId, ctx: TriggerFireContext) {
        let callback = self
            .installed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(trigger_id)
            .cloned();
        if let Some(callback) = callback {
            callback(trigger_id.clone(), ctx);
        }
    }
}

impl TriggerHandler for HostEventHandler {
    fn kind(&self) -> TriggerKind {
        self.kind
    }

    fn install(&self, trigger: &TriggerSpec, on_fire: FireCallback) -> Result<(), TriggerError> {
        self.installed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(trigger.id.clone(), on_fire);
        Ok(())
    }

    fn uninstall(&self, trigger_id: &TriggerId) {
        self.installed.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(trigger_id);
    }

    fn uninstall_all(&self) {
        self.installed.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clear();
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
    use flowcore_model::core::trigger::TriggerConfig;

    use super::*;

    fn spec(id: &str) -> TriggerSpec {
        TriggerSpec {
            id: TriggerId::new(id),
            flow_id: FlowId::new("f1"),
            start_node_id: None,
            config: TriggerConfig::Hotkey { combo: "Ctrl+Shift+K".into() },
            enabled: true,
            storm_control: StormControl::default(),
            created_at: Timestamp::from_millis(0),
        }
    }

    #[test]
    fn notify_before_install_is_a_no_op() {
        let handler = HostEventHandler::new(TriggerKind::Hotkey);
        handler.notify(&TriggerId::new("t1"), TriggerFireContext {
            trigger_id: TriggerId::new("t1"),
            fired_at: Timestamp::from_millis(0),
            source_tab_id: None,
            source_page_id: None,
        });
    }

    #[test]
    fn notify_after_install_invokes_callback_exactly_once() {
        let handler = HostEventHandler::new(TriggerKind::Hotkey);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        handler
            .install(
                &spec("t1"),
                Arc::new(move |_id, _ctx| {
                    fired_clone.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .expect("install");

        handler.notify(&TriggerId::new("t1"), TriggerFireContext {
            trigger_id: TriggerId::new("t1"),
            fired_at: Timestamp::from_millis(0),
            source_tab_id: None,
            source_page_id: None,
        });

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn uninstall_stops_further_notifications() {
        let handler = HostEventHandler::new(TriggerKind::Hotkey);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        handler
            .install(&spec("t1"), Arc::new(move |_id, _ctx| { fired_clone.fetch_add(1, Ordering::SeqCst); }))
            .expect("install");
        handler.uninstall(&TriggerId::new("t1"));

        handler.notify(&TriggerId::new("t1"), TriggerFireContext {
            trigger_id: TriggerId::new("t1"),
            fired_at: Timestamp::from_millis(0),
            source_tab_id: None,
            source_page_id: None,
        });

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
