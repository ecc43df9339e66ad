// crates/flowcore-model/src/core/identifiers.rs
// ============================================================================
// Module: Flowcore Identifiers
// Description: Canonical opaque identifiers for flows, runs, and triggers.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Identifiers are opaque UTF-8 strings that serialize transparently on the
//! wire. None of the types in this module normalize or validate their input;
//! callers at the RPC boundary are responsible for trimming and rejecting
//! empty values before an identifier is constructed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Macro
// ============================================================================

/// Declares an opaque string-backed identifier newtype.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

string_id!(
    /// Flow identifier.
    ///
    /// # Invariants
    /// - Opaque UTF-8 string; unique among all stored Flows.
    FlowId
);

string_id!(
    /// Node identifier, unique within a single Flow.
    NodeId
);

string_id!(
    /// Edge identifier, unique within a single Flow.
    EdgeId
);

string_id!(
    /// Run identifier. Also used as the Queue Item identifier for the same run.
    ///
    /// # Invariants
    /// - Opaque UTF-8 string; unique among all stored Runs.
    RunId
);

string_id!(
    /// Trigger specification identifier.
    TriggerId
);

string_id!(
    /// Scheduler owner identifier (one per Service-Worker-equivalent host process).
    OwnerId
);

/// Variable name, distinguishing transient (run/flow-scoped) names from
/// persistent (`$`-prefixed) names at the type level.
///
/// # Invariants
/// - `is_persistent()` is `true` exactly when the name starts with `$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VarName(String);

impl VarName {
    /// Creates a variable name from a raw string.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true when this name is reserved for a persistent variable.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.0.starts_with('$')
    }
}

impl fmt::Display for VarName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for VarName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for VarName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Persistent variable key. Always starts with `$`; constructing one from a
/// name missing the prefix fails rather than silently adding it.
///
/// # Invariants
/// - `as_str()` always starts with `$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersistentVarKey(String);

impl PersistentVarKey {
    /// Creates a persistent variable key.
    ///
    /// # Errors
    ///
    /// Returns `Err` when `key` does not start with `$`.
    pub fn new(key: impl Into<String>) -> Result<Self, PersistentKeyError> {
        let key = key.into();
        if key.starts_with('$') {
            Ok(Self(key))
        } else {
            Err(PersistentKeyError::MissingPrefix(key))
        }
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersistentVarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<VarName> for PersistentVarKey {
    type Error = PersistentKeyError;

    fn try_from(value: VarName) -> Result<Self, Self::Error> {
        Self::new(value.0)
    }
}

/// Error constructing a [`PersistentVarKey`].
#[derive(Debug, thiserror::Error)]
pub enum PersistentKeyError {
    /// The supplied name is missing the required `$` prefix.
    #[error("persistent variable key must start with '$': {0}")]
    MissingPrefix(String),
}
