// crates/flowcore-model/src/lib.rs
// ============================================================================
// Module: Flowcore Model
// Description: Core data model, storage-port interfaces, and deterministic
//              runtime primitives shared by every Flowcore crate.
// Purpose: Give the Scheduler, Runner, Store, Triggers, and RPC crates one
//          vocabulary for flows, runs, events, the queue, variables, and
//          triggers, plus the pure algorithms that operate on them.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! Flowcore Model is the foundation crate of the Flowcore workflow engine.
//! It defines:
//!
//! - [`core`]: the persisted record types (Flow, Run, Event, QueueItem,
//!   TriggerSpec, persistent variables) plus the error taxonomy, policy
//!   overlay rules, and the [`core::time::Clock`] seam.
//! - [`interfaces`]: the storage-port traits (`FlowStore`, `RunStore`,
//!   `EventStore`, `QueueStore`, `VarStore`, `TriggerStore`) that are the
//!   sole synchronization boundary between the engine and its backend.
//! - [`runtime`]: graph validation, successor-edge resolution, and retry
//!   backoff math — pure functions with no I/O.
//!
//! No type in this crate reads the wall clock or touches a filesystem or
//! network socket directly; those seams are always injected.

pub mod core;
pub mod interfaces;
pub mod runtime;
