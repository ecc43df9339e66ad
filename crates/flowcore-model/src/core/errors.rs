// crates/flowcore-model/src/core/errors.rs
// ============================================================================
// Module: Flowcore Error Taxonomy
// Description: Stable error codes and the engine-wide error envelope.
// Purpose: Give every subsystem a single, serializable error shape.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! [`EngineError`] is the error envelope carried by `node.failed`/`run.failed`
//! events and returned across RPC. Subsystem-local error enums (`StoreError`,
//! `QueueError`, `RunnerError`, ...) convert into it at their boundary rather
//! than leaking their own variants into the event log.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Error Codes
// ============================================================================

/// Stable error code carried by [`EngineError`].
///
/// # Invariants
/// - Variants are stable for serialization and client matching; never
///   renamed once shipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Node config failed schema validation.
    ValidationError,
    /// Node `kind` has no registered plugin.
    UnsupportedNode,
    /// Flow DAG references a missing node or edge endpoint.
    DagInvalid,
    /// Flow DAG contains a cycle reachable from the entry node.
    DagCycle,
    /// A node executor raised an unrecoverable error during DAG execution.
    DagExecutionFailed,
    /// A node attempt or node-scoped timeout elapsed.
    Timeout,
    /// Referenced a tab that does not exist.
    TabNotFound,
    /// Referenced a frame that does not exist.
    FrameNotFound,
    /// Referenced a target that does not exist.
    TargetNotFound,
    /// Referenced element is not visible.
    ElementNotVisible,
    /// Navigation failed.
    NavigationFailed,
    /// Network request failed.
    NetworkRequestFailed,
    /// Script execution failed.
    ScriptFailed,
    /// Operation was denied by policy or permissions.
    PermissionDenied,
    /// Generic tool-reported error.
    ToolError,
    /// Run was canceled.
    RunCanceled,
    /// Run is paused.
    RunPaused,
    /// Unclassified internal error.
    Internal,
    /// A durable invariant was violated (corrupt `nextSeq`, impossible state).
    InvariantViolation,
}

impl ErrorCode {
    /// Returns a stable lowercase label matching the spec's code strings.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::UnsupportedNode => "UNSUPPORTED_NODE",
            Self::DagInvalid => "DAG_INVALID",
            Self::DagCycle => "DAG_CYCLE",
            Self::DagExecutionFailed => "DAG_EXECUTION_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::TabNotFound => "TAB_NOT_FOUND",
            Self::FrameNotFound => "FRAME_NOT_FOUND",
            Self::TargetNotFound => "TARGET_NOT_FOUND",
            Self::ElementNotVisible => "ELEMENT_NOT_VISIBLE",
            Self::NavigationFailed => "NAVIGATION_FAILED",
            Self::NetworkRequestFailed => "NETWORK_REQUEST_FAILED",
            Self::ScriptFailed => "SCRIPT_FAILED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ToolError => "TOOL_ERROR",
            Self::RunCanceled => "RUN_CANCELED",
            Self::RunPaused => "RUN_PAUSED",
            Self::Internal => "INTERNAL",
            Self::InvariantViolation => "INVARIANT_VIOLATION",
        }
    }
}

// ============================================================================
// SECTION: Engine Error
// ============================================================================

/// Engine-wide error envelope.
///
/// # Invariants
/// - `code` is always present; `message` is a human-readable summary.
/// - `cause`, when present, is the error that directly produced this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineError {
    /// Stable error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Optional structured error data.
    pub data: Option<Value>,
    /// Whether a retry policy may reasonably retry this error.
    pub retryable: Option<bool>,
    /// Optional cause chain, boxed to keep [`EngineError`] sized.
    pub cause: Option<Box<EngineError>>,
}

impl EngineError {
    /// Creates an error with just a code and message.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
            retryable: None,
            cause: None,
        }
    }

    /// Sets the `retryable` flag.
    #[must_use]
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    /// Attaches structured data.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Attaches a cause.
    #[must_use]
    pub fn with_cause(mut self, cause: EngineError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}
