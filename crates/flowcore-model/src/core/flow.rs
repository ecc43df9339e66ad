// crates/flowcore-model/src/core/flow.rs
// ============================================================================
// Module: Flowcore Flow Definition
// Description: Schema-versioned DAG of Nodes connected by labeled Edges.
// Purpose: Define the persisted, user-authored automation graph.
// Dependencies: crate::core::{identifiers, policy, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! A [`Flow`] is the persisted, user-edited definition of an automation
//! graph. It is validated structurally (§ invariants below) before a Run
//! may start; cycle detection and edge-endpoint resolution live in
//! `crate::runtime::dag` since they require walking the whole graph rather
//! than a single record.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::EdgeId;
use crate::core::identifiers::FlowId;
use crate::core::identifiers::NodeId;
use crate::core::policy::FlowPolicy;
use crate::core::policy::NodePolicy;
use crate::core::time::Timestamp;

/// Current schema version for persisted [`Flow`] records.
pub const FLOW_SCHEMA_VERSION: u32 = 1;

// ============================================================================
// SECTION: Edge Labels
// ============================================================================

/// A reserved or user-defined edge label.
///
/// # Invariants
/// - Only `default`, `onError`, `true`, and `false` carry special semantics
///   in successor resolution (spec.md §3); any other string is treated as
///   an explicit label matched only by name.
pub const LABEL_DEFAULT: &str = "default";
/// Reserved label taken on unhandled node failure when no onError policy
/// directs otherwise.
pub const LABEL_ON_ERROR: &str = "onError";
/// Reserved label for the truthy branch of a conditional node.
pub const LABEL_TRUE: &str = "true";
/// Reserved label for the falsy branch of a conditional node.
pub const LABEL_FALSE: &str = "false";

// ============================================================================
// SECTION: Node
// ============================================================================

/// One operation in a Flow, interpreted by the Node Plugin Registry.
///
/// # Invariants
/// - `id` is unique within the owning [`Flow`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node identifier, unique within the flow.
    pub id: NodeId,
    /// Plugin kind resolved via the Node Plugin Registry.
    pub kind: String,
    /// Optional display name.
    pub name: Option<String>,
    /// When true, the runner skips execution and takes the default successor.
    #[serde(default)]
    pub disabled: bool,
    /// Optional node-level policy.
    pub policy: Option<NodePolicy>,
    /// Opaque configuration validated by the plugin's schema at execution time.
    #[serde(default)]
    pub config: Value,
}

// ============================================================================
// SECTION: Edge
// ============================================================================

/// A directed edge connecting two nodes, optionally carrying a label.
///
/// # Invariants
/// - `id` is unique within the owning [`Flow`].
/// - `source`/`target` must reference existing node ids (checked by
///   `crate::runtime::dag::validate`, not by this type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Edge identifier, unique within the flow.
    pub id: EdgeId,
    /// Source node id.
    pub source: NodeId,
    /// Target node id.
    pub target: NodeId,
    /// Optional symbolic label (see `LABEL_*` constants for reserved labels).
    pub label: Option<String>,
}

// ============================================================================
// SECTION: Variable
// ============================================================================

/// Scope a variable definition applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableScope {
    /// Scoped to a single run.
    Run,
    /// Scoped to the whole flow.
    Flow,
}

/// Declaration of a variable a Flow expects or provides a default for.
///
/// # Invariants
/// - `name` is unique among a Flow's variable definitions.
/// - Persistent variables (name starting with `$`) are distinguished by the
///   name's prefix, not by `scope`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDef {
    /// Variable name.
    pub name: String,
    /// Optional display label.
    pub label: Option<String>,
    /// Optional description.
    pub description: Option<String>,
    /// Optional default value.
    pub default: Option<Value>,
    /// Whether the variable must be supplied (directly or via default).
    #[serde(default)]
    pub required: bool,
    /// Whether the value should be redacted from logs/summaries.
    #[serde(default)]
    pub sensitive: bool,
    /// Declared scope.
    pub scope: VariableScope,
}

// ============================================================================
// SECTION: Flow
// ============================================================================

/// A schema-versioned DAG of Nodes connected by labeled Edges.
///
/// # Invariants
/// - `entry_node_id` exists in `nodes`.
/// - Every edge endpoint exists in `nodes`.
/// - Node ids are unique; edge ids are unique; variable names are unique.
/// - The graph is acyclic. Structural invariants are enforced by
///   `crate::runtime::dag::validate`, not by constructing this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    /// Schema version of this record.
    #[serde(default = "flow_schema_version_default")]
    pub schema_version: u32,
    /// Stable flow identifier.
    pub id: FlowId,
    /// Display name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Last-update timestamp.
    pub updated_at: Timestamp,
    /// Entry node id.
    pub entry_node_id: NodeId,
    /// Ordered list of nodes.
    pub nodes: Vec<Node>,
    /// List of edges.
    pub edges: Vec<Edge>,
    /// Variable definitions.
    #[serde(default)]
    pub variables: Vec<VariableDef>,
    /// Optional flow-level policy.
    pub policy: Option<FlowPolicy>,
    /// Optional metadata (tags, bindings).
    #[serde(default)]
    pub metadata: FlowMetadata,
}

const fn flow_schema_version_default() -> u32 {
    FLOW_SCHEMA_VERSION
}

/// Optional flow metadata: tags and trigger bindings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowMetadata {
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Arbitrary key/value bindings (e.g. UI layout hints).
    #[serde(default)]
    pub bindings: BTreeMap<String, Value>,
}

impl Flow {
    /// Returns the node with the given id, if present.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Returns outgoing edges from `node_id`, in declaration order.
    pub fn outgoing_edges(&self, node_id: &NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| &e.source == node_id)
    }

    /// Validates structural record-local invariants that do not require
    /// graph traversal: unique node ids, unique edge ids, unique variable
    /// names, and `entry_node_id` presence. Cross-node invariants (edge
    /// endpoints exist, the graph is acyclic) are checked by
    /// `crate::runtime::dag::validate`.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violation found.
    pub fn validate_local(&self) -> Result<(), FlowValidationError> {
        let mut node_ids = BTreeSet::new();
        for node in &self.nodes {
            if !node_ids.insert(node.id.clone()) {
                return Err(FlowValidationError::DuplicateNodeId(node.id.clone()));
            }
        }
        if !node_ids.contains(&self.entry_node_id) {
            return Err(FlowValidationError::MissingEntryNode(self.entry_node_id.clone()));
        }
        let mut edge_ids = BTreeSet::new();
        for edge in &self.edges {
            if !edge_ids.insert(edge.id.clone()) {
                return Err(FlowValidationError::DuplicateEdgeId(edge.id.clone()));
            }
        }
        let mut var_names = BTreeSet::new();
        for var in &self.variables {
            if !var_names.insert(var.name.clone()) {
                return Err(FlowValidationError::DuplicateVariableName(var.name.clone()));
            }
        }
        Ok(())
    }
}

/// Errors returned by [`Flow::validate_local`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowValidationError {
    /// Two nodes share the same id.
    #[error("duplicate node id: {0}")]
    DuplicateNodeId(NodeId),
    /// `entry_node_id` does not reference an existing node.
    #[error("entry node not found: {0}")]
    MissingEntryNode(NodeId),
    /// Two edges share the same id.
    #[error("duplicate edge id: {0}")]
    DuplicateEdgeId(EdgeId),
    /// Two variable definitions share the same name.
    #[error("duplicate variable name: {0}")]
    DuplicateVariableName(String),
}
