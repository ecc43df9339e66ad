// crates/flowcore-runner/src/lib.rs
// ============================================================================
// Module: Flowcore Runner
// Description: Per-run DAG interpreter: node plugin registry, pause and
//              breakpoint control, and the serialized per-run write lane.
// Purpose: Turn one claimed Run Queue item into a sequence of node attempts
//          that drives a Run to a terminal status (spec.md §4.7, §4.8).
// Dependencies: flowcore-model, flowcore-scheduler, tokio, jsonschema, rand
// ============================================================================

//! ## Overview
//! Four pieces compose into one subsystem:
//! - [`node`] defines the [`node::NodeExecutor`] seam and the
//!   [`node::NodeContext`] handed to it for one attempt.
//! - [`registry`] maps a node's `kind` to its config schema, default
//!   policy, and executor ([`registry::NodePluginRegistry`]).
//! - [`pause`] holds the cooperative pause/resume/cancel and
//!   breakpoint/step-over state for one in-flight run.
//! - [`writer_lane`] serializes one run's event appends and run record
//!   updates through a single ordered task.
//!
//! [`runner::RunRunner`] ties these together and implements
//! [`flowcore_scheduler::RunExecutor`], which is the seam the Scheduler
//! calls to drive a claimed run to completion.

pub mod node;
pub mod pause;
pub mod registry;
pub mod runner;
pub mod writer_lane;

pub use node::NodeContext;
pub use node::NodeExecutor;
pub use node::NodeOutcome;
pub use node::NextDirective;
pub use node::VarPatchOp;
pub use pause::PauseState;
pub use pause::StepMode;
pub use registry::NodeDefinition;
pub use registry::NodePluginRegistry;
pub use registry::RegistryError;
pub use runner::RunRunner;
pub use runner::RunnerError;
pub use writer_lane::WriteLane;
