// crates/flowcore-store-sqlite/src/codec.rs
// ============================================================================
// Module: SQLite Column Codecs
// Description: Stable string encodings for enum columns used in `WHERE`/
//              `ORDER BY` clauses, kept separate from each type's own
//              serde wire form.
// Purpose: Let indexed columns stay human-legible without round-tripping
//          through quoted JSON scalars.
// Dependencies: flowcore-model
// ============================================================================

use flowcore_model::core::queue::QueueStatus;
use flowcore_model::core::run::RunStatus;
use flowcore_model::core::run::TriggerKind;

use crate::error::SqliteStoreError;

/// Encodes a [`RunStatus`] as its stable column string.
#[must_use]
pub const fn run_status_to_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Queued => "queued",
        RunStatus::Running => "running",
        RunStatus::Paused => "paused",
        RunStatus::Succeeded => "succeeded",
        RunStatus::Failed => "failed",
        RunStatus::Canceled => "canceled",
    }
}

/// Decodes a [`RunStatus`] column string.
///
/// # Errors
///
/// Returns [`SqliteStoreError::Corrupt`] for an unrecognized value.
pub fn run_status_from_str(value: &str) -> Result<RunStatus, SqliteStoreError> {
    match value {
        "queued" => Ok(RunStatus::Queued),
        "running" => Ok(RunStatus::Running),
        "paused" => Ok(RunStatus::Paused),
        "succeeded" => Ok(RunStatus::Succeeded),
        "failed" => Ok(RunStatus::Failed),
        "canceled" => Ok(RunStatus::Canceled),
        other => Err(SqliteStoreError::Corrupt(format!("unrecognized run status column: {other}"))),
    }
}

/// Encodes a [`QueueStatus`] as its stable column string.
#[must_use]
pub const fn queue_status_to_str(status: QueueStatus) -> &'static str {
    match status {
        QueueStatus::Pending => "pending",
        QueueStatus::Claimed => "claimed",
        QueueStatus::Done => "done",
    }
}

/// Decodes a [`QueueStatus`] column string.
///
/// # Errors
///
/// Returns [`SqliteStoreError::Corrupt`] for an unrecognized value.
pub fn queue_status_from_str(value: &str) -> Result<QueueStatus, SqliteStoreError> {
    match value {
        "pending" => Ok(QueueStatus::Pending),
        "claimed" => Ok(QueueStatus::Claimed),
        "done" => Ok(QueueStatus::Done),
        other => Err(SqliteStoreError::Corrupt(format!("unrecognized queue status column: {other}"))),
    }
}

/// Encodes a [`TriggerKind`] as its stable column string.
#[must_use]
pub const fn trigger_kind_to_str(kind: TriggerKind) -> &'static str {
    match kind {
        TriggerKind::UrlMatch => "url_match",
        TriggerKind::Cron => "cron",
        TriggerKind::Interval => "interval",
        TriggerKind::OneShot => "one_shot",
        TriggerKind::Hotkey => "hotkey",
        TriggerKind::ContextMenu => "context_menu",
        TriggerKind::DomAppearance => "dom_appearance",
        TriggerKind::Manual => "manual",
    }
}
