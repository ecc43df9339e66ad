// crates/flowcore-model/src/core/trigger.rs
// ============================================================================
// Module: Flowcore Trigger Specifications
// Description: Persisted trigger configuration and per-fire context.
// Purpose: Describe what should start a Flow and with what storm control.
// Dependencies: crate::core::{identifiers, run, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! A [`TriggerSpec`] is a persisted binding of "when" to "which flow". The
//! Trigger Manager owns the runtime side (registration, firing, storm
//! control); this module only defines the data shape.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::FlowId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::TriggerId;
use crate::core::run::TriggerKind;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Per-kind configuration
// ============================================================================

/// Configuration specific to a [`TriggerKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Fires when a navigated URL matches `pattern` (glob-style, per
    /// `crate::runtime` matching helpers).
    UrlMatch {
        /// URL match pattern.
        pattern: String,
    },
    /// Fires on a cron schedule, interpreted in `timezone`.
    Cron {
        /// Five or six field cron expression.
        expression: String,
        /// IANA timezone name.
        timezone: String,
    },
    /// Fires every `interval_ms` milliseconds.
    Interval {
        /// Period in milliseconds.
        interval_ms: u64,
    },
    /// Fires once at `at`.
    OneShot {
        /// Fire time.
        at: Timestamp,
    },
    /// Fires when `combo` is pressed.
    Hotkey {
        /// Platform-normalized key combo, e.g. `"Ctrl+Shift+K"`.
        combo: String,
    },
    /// Fires when the user selects a context menu entry.
    ContextMenu {
        /// Menu entry title shown to the user.
        title: String,
    },
    /// Fires when an element matching `selector` appears in the DOM.
    DomAppearance {
        /// CSS selector observed for appearance.
        selector: String,
        /// Optional URL match restricting which pages are observed.
        url_pattern: Option<String>,
    },
}

impl TriggerConfig {
    /// Returns the [`TriggerKind`] this configuration belongs to.
    #[must_use]
    pub const fn kind(&self) -> TriggerKind {
        match self {
            Self::UrlMatch { .. } => TriggerKind::UrlMatch,
            Self::Cron { .. } => TriggerKind::Cron,
            Self::Interval { .. } => TriggerKind::Interval,
            Self::OneShot { .. } => TriggerKind::OneShot,
            Self::Hotkey { .. } => TriggerKind::Hotkey,
            Self::ContextMenu { .. } => TriggerKind::ContextMenu,
            Self::DomAppearance { .. } => TriggerKind::DomAppearance,
        }
    }
}

// ============================================================================
// SECTION: Storm control
// ============================================================================

/// Per-trigger and global firing limits (spec.md §4.9).
///
/// # Invariants
/// - `cooldown_ms` suppresses re-fires of the *same* trigger within the
///   window; `max_queued` bounds runs awaiting scheduling across all
///   triggers combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StormControl {
    /// Minimum milliseconds between fires of this trigger.
    pub cooldown_ms: u64,
    /// Maximum runs this trigger may have queued at once before new fires
    /// are dropped.
    pub max_queued: u32,
}

impl Default for StormControl {
    fn default() -> Self {
        Self { cooldown_ms: 0, max_queued: 1 }
    }
}

// ============================================================================
// SECTION: Trigger Spec
// ============================================================================

/// A persisted trigger binding a firing condition to a flow.
///
/// # Invariants
/// - `id` is unique among stored triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    /// Trigger identifier.
    pub id: TriggerId,
    /// Flow to start when this trigger fires.
    pub flow_id: FlowId,
    /// Optional explicit start node, overriding the flow's entry node.
    pub start_node_id: Option<NodeId>,
    /// Per-kind configuration.
    pub config: TriggerConfig,
    /// Whether the trigger is currently active.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Storm control limits.
    #[serde(default)]
    pub storm_control: StormControl,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

const fn default_enabled() -> bool {
    true
}

/// Context captured at the moment a trigger fires, before a run is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerFireContext {
    /// Trigger that fired.
    pub trigger_id: TriggerId,
    /// Time of firing.
    pub fired_at: Timestamp,
    /// Optional source tab identifier.
    pub source_tab_id: Option<String>,
    /// Optional source page identifier.
    pub source_page_id: Option<String>,
}
