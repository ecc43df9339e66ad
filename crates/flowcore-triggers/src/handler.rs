// crates/flowcore-triggers/src/handler.rs
// ============================================================================
// Module: Flowcore Trigger Handler
// Description: The per-kind seam between the Trigger Manager and whatever
//              host facility reports the underlying event.
// Purpose: Let the Manager install/uninstall trigger listeners without
//          knowing anything about URLs, hotkeys, menus, or alarms.
// Dependencies: flowcore-model
// ============================================================================

//! ## Overview
//! A [`TriggerHandler`] translates host-specific events (URL navigation,
//! alarms, hotkeys, context menus, DOM observations — spec.md §4.9) into a
//! call to the `on_fire` callback it is handed at [`TriggerHandler::install`]
//! time. The host-specific listening itself (browser APIs, OS hotkey
//! registration) is out of this crate's scope; what lives here is the
//! per-kind bookkeeping of which triggers are currently installed.

use std::sync::Arc;

use flowcore_model::core::identifiers::TriggerId;
use flowcore_model::core::run::TriggerKind;
use flowcore_model::core::trigger::TriggerFireContext;
use flowcore_model::core::trigger::TriggerSpec;

use crate::error::TriggerError;

/// Callback a handler invokes when its trigger condition is observed.
pub type FireCallback = Arc<dyn Fn(TriggerId, TriggerFireContext) + Send + Sync>;

/// Installs and uninstalls listeners for one [`TriggerKind`].
///
/// # Invariants
/// - `install` is called at most once per trigger id without an
///   intervening `uninstall`; a second `install` for the same id replaces
///   the first.
/// - `uninstall`/`uninstall_all` are idempotent.
pub trait TriggerHandler: Send + Sync {
    /// The trigger kind this handler installs listeners for.
    fn kind(&self) -> TriggerKind;

    /// Registers a listener for `trigger`, to call `on_fire` when it fires.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError`] when `trigger.config` is malformed for this
    /// handler's kind (e.g. an unparseable cron expression).
    fn install(&self, trigger: &TriggerSpec, on_fire: FireCallback) -> Result<(), TriggerError>;

    /// Deregisters the listener for `trigger_id`. A no-op if not installed.
    fn uninstall(&self, trigger_id: &TriggerId);

    /// Deregisters every listener this handler currently holds.
    fn uninstall_all(&self);
}
