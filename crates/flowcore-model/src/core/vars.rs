// crates/flowcore-model/src/core/vars.rs
// ============================================================================
// Module: Flowcore Persistent Variables
// Description: Last-writer-wins persistent variable records.
// Purpose: Let flows share state across runs via `$`-prefixed variable names.
// Dependencies: crate::core::{identifiers, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! Persistent variables (names prefixed with `$`) outlive the run that
//! wrote them. Writes are last-writer-wins, ordered by a monotonic
//! `version` counter assigned by the Var Store at write time, not by
//! wall-clock time.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::PersistentVarKey;
use crate::core::identifiers::RunId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Persistent Variable Record
// ============================================================================

/// A persisted `$`-prefixed variable value.
///
/// # Invariants
/// - `version` increases strictly with every write to the same `key`.
/// - Concurrent writes are resolved last-writer-wins by `version`, not by
///   `updated_at` (clock skew must never reorder writes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentVarRecord {
    /// Variable key (always `$`-prefixed).
    pub key: PersistentVarKey,
    /// Current value.
    pub value: Value,
    /// Monotonic write version, starting at 1 for the first write.
    pub version: u64,
    /// Time of the most recent write.
    pub updated_at: Timestamp,
    /// Run that performed the most recent write, if any.
    pub written_by_run: Option<RunId>,
}

impl PersistentVarRecord {
    /// Creates the first version of a persistent variable record.
    #[must_use]
    pub fn new(
        key: PersistentVarKey,
        value: Value,
        now: Timestamp,
        written_by_run: Option<RunId>,
    ) -> Self {
        Self { key, value, version: 1, updated_at: now, written_by_run }
    }

    /// Applies a new write, bumping `version` and `updated_at`.
    pub fn apply_write(&mut self, value: Value, now: Timestamp, written_by_run: Option<RunId>) {
        self.value = value;
        self.version += 1;
        self.updated_at = now;
        self.written_by_run = written_by_run;
    }

    /// Returns true if `candidate_version` is newer than this record's,
    /// i.e. a write carrying it should be applied.
    #[must_use]
    pub const fn is_superseded_by(&self, candidate_version: u64) -> bool {
        candidate_version > self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PersistentVarKey {
        PersistentVarKey::new("$counter").expect("valid persistent key")
    }

    #[test]
    fn new_record_starts_at_version_one() {
        let record = PersistentVarRecord::new(key(), Value::from(0), Timestamp::from_millis(0), None);
        assert_eq!(record.version, 1);
    }

    #[test]
    fn apply_write_bumps_version() {
        let mut record = PersistentVarRecord::new(key(), Value::from(0), Timestamp::from_millis(0), None);
        record.apply_write(Value::from(1), Timestamp::from_millis(10), Some(RunId::new("r1")));
        assert_eq!(record.version, 2);
        assert_eq!(record.value, Value::from(1));
        assert_eq!(record.written_by_run, Some(RunId::new("r1")));
    }

    #[test]
    fn is_superseded_by_compares_versions() {
        let record = PersistentVarRecord::new(key(), Value::from(0), Timestamp::from_millis(0), None);
        assert!(record.is_superseded_by(2));
        assert!(!record.is_superseded_by(1));
    }
}
