// crates/flowcore-runner/src/registry.rs
// ============================================================================
// Module: Flowcore Node Plugin Registry
// Description: Maps a node's `kind` string to its config schema, default
//              policy, and executor implementation.
// Purpose: Let the runner validate node config and dispatch execution
//          without knowing the node catalogue itself (spec.md §4.8).
// Dependencies: flowcore-model, jsonschema
// ============================================================================

//! ## Overview
//! Each node `kind` is registered once with its JSON Schema, an optional
//! plugin-level default [`NodePolicy`], and a [`NodeExecutor`]. Lookups for
//! an unregistered `kind` fail with [`ErrorCode::UnsupportedNode`] rather
//! than panicking, since a flow authored against a newer plugin set can
//! still be loaded (and partially inspected) by an older runner.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use flowcore_model::core::errors::EngineError;
use flowcore_model::core::errors::ErrorCode;
use flowcore_model::core::policy::NodePolicy;
use jsonschema::Draft;
use jsonschema::Validator;
use serde_json::Value;
use thiserror::Error;

use crate::node::NodeExecutor;

// ============================================================================
// SECTION: Registry Error
// ============================================================================

/// Failure registering a node kind.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The node's config schema failed to compile.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
}

// ============================================================================
// SECTION: Node Definition
// ============================================================================

/// Everything the runner needs to validate and execute one node `kind`.
pub struct NodeDefinition {
    /// Raw JSON Schema the node's `config` is validated against.
    pub schema: Value,
    /// Policy defaults contributed by the plugin itself, overlaid under any
    /// flow-level or node-level policy (spec.md §4.1 "Policy resolution").
    pub default_policy: Option<NodePolicy>,
    /// Compiled validator for `schema`.
    validator: Validator,
    /// The executor implementation for this kind.
    pub executor: Arc<dyn NodeExecutor>,
}

impl NodeDefinition {
    /// Validates `config` against this node's schema.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] with [`ErrorCode::ValidationError`] and no
    /// retry when `config` does not conform.
    pub fn validate_config(&self, config: &Value) -> Result<(), EngineError> {
        if let Err(err) = self.validator.validate(config) {
            return Err(EngineError::new(
                ErrorCode::ValidationError,
                format!("node config failed schema validation: {err}"),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Node Plugin Registry
// ============================================================================

/// Registry of node kinds available to the runner.
///
/// # Invariants
/// - Registering the same `kind` twice replaces the earlier definition; the
///   registry has no notion of versioning beyond "last registered wins".
#[derive(Default)]
pub struct NodePluginRegistry {
    definitions: RwLock<HashMap<String, Arc<NodeDefinition>>>,
}

impl NodePluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the definition for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] describing why `schema` failed to compile
    /// as a Draft 2020-12 JSON Schema.
    pub fn register(
        &self,
        kind: impl Into<String>,
        schema: Value,
        default_policy: Option<NodePolicy>,
        executor: Arc<dyn NodeExecutor>,
    ) -> Result<(), RegistryError> {
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .map_err(|err| RegistryError::InvalidSchema(err.to_string()))?;
        let definition = Arc::new(NodeDefinition { schema, default_policy, validator, executor });
        let mut definitions = self.definitions.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        definitions.insert(kind.into(), definition);
        Ok(())
    }

    /// Looks up the definition for `kind`, if registered.
    #[must_use]
    pub fn get(&self, kind: &str) -> Option<Arc<NodeDefinition>> {
        let definitions = self.definitions.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        definitions.get(kind).cloned()
    }

    /// Looks up the definition for `kind`, failing with
    /// [`ErrorCode::UnsupportedNode`] when it is not registered (spec.md
    /// §4.8 "no executor registered for this kind").
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when `kind` has no registered definition.
    pub fn get_or_unsupported(&self, kind: &str) -> Result<Arc<NodeDefinition>, EngineError> {
        self.get(kind).ok_or_else(|| {
            EngineError::new(ErrorCode::UnsupportedNode, format!("no executor registered for node kind '{kind}'"))
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::node::NodeContext;

    struct NoopExecutor;

    #[async_trait]
    impl NodeExecutor for NoopExecutor {
        async fn execute(&self, _ctx: &mut NodeContext<'_>) -> Result<(), EngineError> {
            Ok(())
        }
    }

    #[test]
    fn register_then_get_round_trips() {
        let registry = NodePluginRegistry::new();
        registry
            .register("noop", json!({"type": "object"}), None, Arc::new(NoopExecutor))
            .expect("register");

        let definition = registry.get("noop").expect("definition present");
        definition.validate_config(&json!({})).expect("valid config");
    }

    #[test]
    fn get_or_unsupported_fails_for_unknown_kind() {
        let registry = NodePluginRegistry::new();
        let err = registry.get_or_unsupported("missing").expect_err("should fail");
        assert_eq!(err.code, ErrorCode::UnsupportedNode);
    }

    #[test]
    fn validate_config_rejects_schema_mismatch() {
        let registry = NodePluginRegistry::new();
        registry
            .register(
                "typed",
                json!({"type": "object", "required": ["url"], "properties": {"url": {"type": "string"}}}),
                None,
                Arc::new(NoopExecutor),
            )
            .expect("register");

        let definition = registry.get("typed").expect("definition present");
        let err = definition.validate_config(&json!({})).expect_err("missing required field");
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert_ne!(err.retryable, Some(true));
    }

    #[test]
    fn re_registering_same_kind_replaces_definition() {
        let registry = NodePluginRegistry::new();
        registry.register("k", json!({"type": "object"}), None, Arc::new(NoopExecutor)).expect("register 1");
        registry.register("k", json!({"type": "string"}), None, Arc::new(NoopExecutor)).expect("register 2");

        let definition = registry.get("k").expect("definition present");
        definition.validate_config(&json!("hello")).expect("string now valid");
    }
}
