// crates/flowcore-triggers/src/error.rs
// ============================================================================
// Module: Flowcore Trigger Errors
// Description: Error taxonomy for installation, refresh, and fire-path
//              failures in the Trigger Manager.
// Purpose: Give callers (RPC surface, host CLI) typed failures instead of
//          opaque strings.
// Dependencies: flowcore-model, thiserror
// ============================================================================

use flowcore_model::core::identifiers::TriggerId;
use flowcore_model::core::run::TriggerKind;
use flowcore_model::interfaces::StoreError;
use thiserror::Error;

/// Errors produced by the Trigger Manager and its handlers.
///
/// # Invariants
/// - Variants are stable for programmatic handling by the RPC surface's
///   error-to-string mapping (spec.md §6: "Errors are strings; detailed
///   codes are carried in events").
#[derive(Debug, Error)]
pub enum TriggerError {
    /// A storage port call failed.
    #[error("trigger store error: {0}")]
    Store(#[from] StoreError),
    /// No handler is registered for this trigger kind.
    #[error("no handler registered for trigger kind {0:?}")]
    UnknownHandler(TriggerKind),
    /// A manually fired trigger id has no installed trigger.
    #[error("trigger {0} is not installed")]
    NotInstalled(TriggerId),
    /// A cron expression failed to parse.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),
    /// A timezone name is not a recognized IANA identifier.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}
