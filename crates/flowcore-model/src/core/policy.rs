// crates/flowcore-model/src/core/policy.rs
// ============================================================================
// Module: Flowcore Node & Flow Policy
// Description: Timeout, retry, onError, and artifact policy for node execution.
// Purpose: Let Flow/plugin/node-level policy overlay deterministically.
// Dependencies: crate::core::identifiers, serde
// ============================================================================

//! ## Overview
//! A node's effective policy is computed by merging, in order, the Flow's
//! default policy, the plugin's default policy, and the node's own policy.
//! Later sources win per field; `artifacts` merges shallowly (§4.7).

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::EdgeId;
use crate::core::identifiers::NodeId;

// ============================================================================
// SECTION: Timeout
// ============================================================================

/// Scope over which a timeout is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutScope {
    /// Timeout wraps a single attempt only.
    Attempt,
    /// Timeout wraps the node's total execution across all retries.
    Node,
}

/// Timeout policy for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    /// Timeout duration in milliseconds.
    pub ms: u64,
    /// Scope the timeout applies to.
    pub scope: TimeoutScope,
}

// ============================================================================
// SECTION: Retry / Backoff
// ============================================================================

/// Backoff shape applied between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// No backoff; `intervalMs` is used unchanged on every retry.
    None,
    /// Linear backoff: `interval_ms * attempt`.
    Linear,
    /// Exponential backoff: `interval_ms * 2^(attempt - 1)`.
    Exp,
}

/// Jitter applied after backoff is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Jitter {
    /// No jitter.
    None,
    /// Full jitter: multiply the computed delay by a uniform `[0, 1)` value.
    Full,
}

/// Retry policy for a node.
///
/// # Invariants
/// - `retries` bounds the number of additional attempts after the first;
///   total attempts never exceed `1 + retries`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts allowed after the first.
    pub retries: u32,
    /// Base retry interval in milliseconds.
    pub interval_ms: u64,
    /// Backoff shape.
    pub backoff: Backoff,
    /// Optional cap on the computed delay.
    pub max_interval_ms: Option<u64>,
    /// Jitter applied after backoff/clamp.
    pub jitter: Jitter,
    /// Restrict retry to these error codes only, when set.
    pub retry_on: Option<Vec<crate::core::errors::ErrorCode>>,
}

impl RetryPolicy {
    /// Overlays `override_policy` onto `self`, field by field. `self` acts
    /// as the base; fields present in the override replace the base's.
    #[must_use]
    pub fn overlay(&self, override_policy: &RetryPolicyOverride) -> Self {
        Self {
            retries: override_policy.retries.unwrap_or(self.retries),
            interval_ms: override_policy.interval_ms.unwrap_or(self.interval_ms),
            backoff: override_policy.backoff.unwrap_or(self.backoff),
            max_interval_ms: override_policy.max_interval_ms.or(self.max_interval_ms),
            jitter: override_policy.jitter.unwrap_or(self.jitter),
            retry_on: override_policy.retry_on.clone().or_else(|| self.retry_on.clone()),
        }
    }
}

/// Sparse overlay for [`RetryPolicy`], used by `OnErrorDecision::Retry.override`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicyOverride {
    /// Overrides [`RetryPolicy::retries`].
    pub retries: Option<u32>,
    /// Overrides [`RetryPolicy::interval_ms`].
    pub interval_ms: Option<u64>,
    /// Overrides [`RetryPolicy::backoff`].
    pub backoff: Option<Backoff>,
    /// Overrides [`RetryPolicy::max_interval_ms`].
    pub max_interval_ms: Option<u64>,
    /// Overrides [`RetryPolicy::jitter`].
    pub jitter: Option<Jitter>,
    /// Overrides [`RetryPolicy::retry_on`].
    pub retry_on: Option<Vec<crate::core::errors::ErrorCode>>,
}

// ============================================================================
// SECTION: OnError
// ============================================================================

/// Informational severity recorded for `onError: continue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinueAs {
    /// Treated as a warning; no special handling.
    Warning,
    /// Treated as an error; no special handling beyond continuing.
    Error,
}

/// Destination for a `goto` onError decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GotoTarget {
    /// Jump via an outgoing edge carrying this label.
    EdgeLabel(String),
    /// Jump directly to this node, bypassing edge resolution.
    Node(NodeId),
}

/// Policy describing what happens after a node attempt fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OnErrorPolicy {
    /// Terminate the run as failed on this node.
    Stop,
    /// Take the default successor; `as_` is informational only.
    Continue {
        /// Informational severity.
        #[serde(rename = "as")]
        as_: Option<ContinueAs>,
    },
    /// Jump to an edge label or node directly.
    Goto {
        /// Jump target.
        target: GotoTarget,
    },
    /// Retry per the effective retry policy, optionally overlaid.
    Retry {
        /// Sparse overlay applied on top of the node's base retry policy.
        #[serde(default)]
        override_policy: RetryPolicyOverride,
    },
}

// ============================================================================
// SECTION: Artifacts
// ============================================================================

/// When screenshot artifacts should be captured for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenshotMode {
    /// Never capture.
    Never,
    /// Capture only when the node fails.
    OnFailure,
    /// Always capture.
    Always,
}

/// Artifact capture policy for a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPolicy {
    /// Screenshot capture mode.
    pub screenshot: Option<ScreenshotMode>,
    /// Variable name to store the screenshot artifact reference under.
    pub save_screenshot_as: Option<String>,
    /// Whether to include console logs in captured artifacts.
    pub include_console: Option<bool>,
    /// Whether to include network logs in captured artifacts.
    pub include_network: Option<bool>,
}

impl ArtifactPolicy {
    /// Shallowly merges `override_policy` on top of `self`: each field is
    /// independently overridden when present on the override.
    #[must_use]
    pub fn merge(&self, override_policy: &Self) -> Self {
        Self {
            screenshot: override_policy.screenshot.or(self.screenshot),
            save_screenshot_as: override_policy
                .save_screenshot_as
                .clone()
                .or_else(|| self.save_screenshot_as.clone()),
            include_console: override_policy.include_console.or(self.include_console),
            include_network: override_policy.include_network.or(self.include_network),
        }
    }
}

// ============================================================================
// SECTION: Node Policy
// ============================================================================

/// Full policy applicable to a single node execution.
///
/// # Invariants
/// - Produced by [`NodePolicy::merge`]; later sources win per field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePolicy {
    /// Timeout policy.
    pub timeout: Option<TimeoutPolicy>,
    /// Retry policy.
    pub retry: Option<RetryPolicy>,
    /// OnError policy.
    pub on_error: Option<OnErrorPolicy>,
    /// Artifact capture policy.
    pub artifacts: Option<ArtifactPolicy>,
}

impl NodePolicy {
    /// Merges `self` as the base with `override_policy` on top: scalar
    /// fields are replaced wholesale when the override sets them;
    /// `artifacts` merges shallowly per [`ArtifactPolicy::merge`].
    #[must_use]
    pub fn merge(&self, override_policy: &Self) -> Self {
        Self {
            timeout: override_policy.timeout.or(self.timeout),
            retry: override_policy.retry.clone().or_else(|| self.retry.clone()),
            on_error: override_policy.on_error.clone().or_else(|| self.on_error.clone()),
            artifacts: match (&self.artifacts, &override_policy.artifacts) {
                (Some(base), Some(over)) => Some(base.merge(over)),
                (None, Some(over)) => Some(over.clone()),
                (base, None) => base.clone(),
            },
        }
    }

    /// Computes the effective policy for a node by merging, in order, the
    /// flow default, the plugin default, and the node-level policy.
    #[must_use]
    pub fn effective(
        flow_default: Option<&Self>,
        plugin_default: Option<&Self>,
        node_level: Option<&Self>,
    ) -> Self {
        let base = flow_default.cloned().unwrap_or_default();
        let base = plugin_default.map_or_else(|| base.clone(), |p| base.merge(p));
        node_level.map_or_else(|| base.clone(), |n| base.merge(n))
    }
}

/// Flow-level default policy plus unsupported-node handling and the
/// default run timeout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowPolicy {
    /// Default node policy applied to every node in the flow.
    pub default_node_policy: Option<NodePolicy>,
    /// Policy applied when a node references an unregistered plugin kind.
    pub unsupported_node_policy: Option<OnErrorPolicy>,
    /// Overall run timeout in milliseconds.
    pub run_timeout_ms: Option<u64>,
}

/// References an edge by its reserved label, used when resolving
/// [`GotoTarget::EdgeLabel`] against a node's outgoing edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeLabelRef<'a>(pub &'a str);

impl EdgeLabelRef<'_> {
    /// Returns the edge id among `candidates` whose label matches.
    #[must_use]
    pub fn resolve<'b>(&self, candidates: &'b [(EdgeId, Option<String>)]) -> Option<&'b EdgeId> {
        candidates
            .iter()
            .find(|(_, label)| label.as_deref() == Some(self.0))
            .map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retry(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            interval_ms: 100,
            backoff: Backoff::None,
            max_interval_ms: None,
            jitter: Jitter::None,
            retry_on: None,
        }
    }

    #[test]
    fn node_policy_merge_later_wins() {
        let flow_default = NodePolicy {
            timeout: Some(TimeoutPolicy {
                ms: 1_000,
                scope: TimeoutScope::Attempt,
            }),
            ..Default::default()
        };
        let node_level = NodePolicy {
            timeout: Some(TimeoutPolicy {
                ms: 5_000,
                scope: TimeoutScope::Node,
            }),
            ..Default::default()
        };
        let effective = NodePolicy::effective(Some(&flow_default), None, Some(&node_level));
        assert_eq!(effective.timeout.unwrap().ms, 5_000);
    }

    #[test]
    fn artifact_policy_merges_shallowly() {
        let base = ArtifactPolicy {
            screenshot: Some(ScreenshotMode::OnFailure),
            save_screenshot_as: Some("shot".into()),
            include_console: Some(true),
            include_network: None,
        };
        let over = ArtifactPolicy {
            screenshot: Some(ScreenshotMode::Always),
            save_screenshot_as: None,
            include_console: None,
            include_network: Some(true),
        };
        let merged = base.merge(&over);
        assert_eq!(merged.screenshot, Some(ScreenshotMode::Always));
        assert_eq!(merged.save_screenshot_as, Some("shot".into()));
        assert_eq!(merged.include_console, Some(true));
        assert_eq!(merged.include_network, Some(true));
    }

    #[test]
    fn retry_policy_overlay_applies_sparse_fields() {
        let base = retry(2);
        let overlay = RetryPolicyOverride {
            retries: Some(5),
            ..Default::default()
        };
        let effective = base.overlay(&overlay);
        assert_eq!(effective.retries, 5);
        assert_eq!(effective.interval_ms, base.interval_ms);
    }
}
