// crates/flowcore-model/src/runtime/dag.rs
// ============================================================================
// Module: Flowcore DAG Validation and Resolution
// Description: Cycle detection and successor-edge tie-break resolution.
// Purpose: Enforce graph-wide invariants that span more than one record.
// Dependencies: crate::core::flow, std::collections
// ============================================================================

//! ## Overview
//! [`Flow::validate_local`](crate::core::flow::Flow::validate_local) checks
//! invariants local to a single node or edge record. This module checks the
//! invariants that require walking the whole graph: every edge endpoint
//! must resolve to a real node, and the graph reachable from the entry node
//! must be acyclic. It also implements successor selection, used by the
//! runner to decide which edge to take after a node completes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::collections::HashSet;

use crate::core::flow::Edge;
use crate::core::flow::Flow;
use crate::core::flow::LABEL_DEFAULT;
use crate::core::identifiers::EdgeId;
use crate::core::identifiers::NodeId;

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Errors returned by [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DagValidationError {
    /// An edge references a node id that does not exist in the flow.
    #[error("edge {edge} references missing node {node}")]
    DanglingEdge {
        /// Offending edge.
        edge: EdgeId,
        /// Missing node id.
        node: NodeId,
    },
    /// A cycle was found reachable from the entry node.
    #[error("cycle detected through node {0}")]
    Cycle(NodeId),
}

/// Validates the graph-wide invariants of a [`Flow`]: every edge endpoint
/// resolves to an existing node, and the graph reachable from
/// `entry_node_id` is acyclic.
///
/// Callers should run [`Flow::validate_local`](crate::core::flow::Flow::validate_local)
/// first; this function assumes node and edge ids are already unique.
///
/// # Errors
///
/// Returns [`DagValidationError`] describing the first violation found.
pub fn validate(flow: &Flow) -> Result<(), DagValidationError> {
    let node_ids: BTreeSet<&NodeId> = flow.nodes.iter().map(|n| &n.id).collect();
    for edge in &flow.edges {
        if !node_ids.contains(&edge.source) {
            return Err(DagValidationError::DanglingEdge { edge: edge.id.clone(), node: edge.source.clone() });
        }
        if !node_ids.contains(&edge.target) {
            return Err(DagValidationError::DanglingEdge { edge: edge.id.clone(), node: edge.target.clone() });
        }
    }
    detect_cycle(flow)
}

/// Depth-first cycle detection using a recursion-stack set, starting from
/// the entry node and then from any node not yet visited (covers
/// unreachable components too, since an isolated cycle is still invalid).
fn detect_cycle(flow: &Flow) -> Result<(), DagValidationError> {
    let mut visited: HashSet<&NodeId> = HashSet::new();
    let mut on_stack: HashSet<&NodeId> = HashSet::new();

    for node in &flow.nodes {
        if !visited.contains(&node.id) {
            visit(flow, &node.id, &mut visited, &mut on_stack)?;
        }
    }
    Ok(())
}

fn visit<'a>(
    flow: &'a Flow,
    node_id: &'a NodeId,
    visited: &mut HashSet<&'a NodeId>,
    on_stack: &mut HashSet<&'a NodeId>,
) -> Result<(), DagValidationError> {
    visited.insert(node_id);
    on_stack.insert(node_id);

    for edge in flow.outgoing_edges(node_id) {
        if on_stack.contains(&edge.target) {
            return Err(DagValidationError::Cycle(edge.target.clone()));
        }
        if !visited.contains(&edge.target) {
            visit(flow, &edge.target, visited, on_stack)?;
        }
    }

    on_stack.remove(node_id);
    Ok(())
}

// ============================================================================
// SECTION: Successor resolution
// ============================================================================

/// Resolves which outgoing edge to take after a node completes, applying
/// the tie-break order from spec.md §3:
///
/// 1. An edge whose label matches `wanted_label` exactly, if given.
/// 2. An edge labeled `"default"` or with no label at all.
/// 3. If there is exactly one outgoing edge, take it regardless of label.
/// 4. Otherwise the node is terminal for this path; no edge is taken.
#[must_use]
pub fn choose_successor<'a>(flow: &'a Flow, node_id: &NodeId, wanted_label: Option<&str>) -> Option<&'a Edge> {
    let outgoing: Vec<&Edge> = flow.outgoing_edges(node_id).collect();

    if let Some(label) = wanted_label {
        if let Some(edge) = outgoing.iter().find(|e| e.label.as_deref() == Some(label)) {
            return Some(edge);
        }
    }

    if let Some(edge) = outgoing
        .iter()
        .find(|e| e.label.is_none() || e.label.as_deref() == Some(LABEL_DEFAULT))
    {
        return Some(edge);
    }

    if outgoing.len() == 1 {
        return Some(outgoing[0]);
    }

    None
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::core::flow::FlowMetadata;
    use crate::core::flow::Node;
    use crate::core::identifiers::FlowId;
    use crate::core::time::Timestamp;

    fn node(id: &str) -> Node {
        Node {
            id: NodeId::new(id),
            kind: "noop".into(),
            name: None,
            disabled: false,
            policy: None,
            config: Value::Null,
        }
    }

    fn edge(id: &str, source: &str, target: &str, label: Option<&str>) -> Edge {
        Edge {
            id: EdgeId::new(id),
            source: NodeId::new(source),
            target: NodeId::new(target),
            label: label.map(str::to_string),
        }
    }

    fn flow(nodes: Vec<Node>, edges: Vec<Edge>) -> Flow {
        Flow {
            schema_version: 1,
            id: FlowId::new("f1"),
            name: "test".into(),
            description: None,
            created_at: Timestamp::from_millis(0),
            updated_at: Timestamp::from_millis(0),
            entry_node_id: NodeId::new("a"),
            nodes,
            edges,
            variables: vec![],
            policy: None,
            metadata: FlowMetadata::default(),
        }
    }

    #[test]
    fn acyclic_flow_validates() {
        let f = flow(vec![node("a"), node("b")], vec![edge("e1", "a", "b", None)]);
        assert!(validate(&f).is_ok());
    }

    #[test]
    fn dangling_edge_rejected() {
        let f = flow(vec![node("a")], vec![edge("e1", "a", "missing", None)]);
        assert_eq!(
            validate(&f),
            Err(DagValidationError::DanglingEdge { edge: EdgeId::new("e1"), node: NodeId::new("missing") })
        );
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let f = flow(vec![node("a")], vec![edge("e1", "a", "a", None)]);
        assert_eq!(validate(&f), Err(DagValidationError::Cycle(NodeId::new("a"))));
    }

    #[test]
    fn three_node_cycle_detected() {
        let f = flow(
            vec![node("a"), node("b"), node("c")],
            vec![
                edge("e1", "a", "b", None),
                edge("e2", "b", "c", None),
                edge("e3", "c", "a", None),
            ],
        );
        assert!(validate(&f).is_err());
    }

    #[test]
    fn choose_successor_prefers_exact_label_match() {
        let f = flow(
            vec![node("a"), node("b"), node("c")],
            vec![edge("e1", "a", "b", Some("true")), edge("e2", "a", "c", Some("false"))],
        );
        let chosen = choose_successor(&f, &NodeId::new("a"), Some("false")).unwrap();
        assert_eq!(chosen.target, NodeId::new("c"));
    }

    #[test]
    fn choose_successor_falls_back_to_default_label() {
        let f = flow(
            vec![node("a"), node("b"), node("c")],
            vec![edge("e1", "a", "b", Some("onError")), edge("e2", "a", "c", Some("default"))],
        );
        let chosen = choose_successor(&f, &NodeId::new("a"), None).unwrap();
        assert_eq!(chosen.target, NodeId::new("c"));
    }

    #[test]
    fn choose_successor_falls_back_to_sole_outgoing_edge() {
        let f = flow(vec![node("a"), node("b")], vec![edge("e1", "a", "b", Some("onError"))]);
        let chosen = choose_successor(&f, &NodeId::new("a"), None).unwrap();
        assert_eq!(chosen.target, NodeId::new("b"));
    }

    #[test]
    fn choose_successor_returns_none_when_ambiguous() {
        let f = flow(
            vec![node("a"), node("b"), node("c")],
            vec![edge("e1", "a", "b", Some("x")), edge("e2", "a", "c", Some("y"))],
        );
        assert!(choose_successor(&f, &NodeId::new("a"), None).is_none());
    }
}
