// crates/flowcore-triggers/src/lib.rs
// ============================================================================
// Module: Flowcore Trigger Manager
// Description: Per-kind trigger handlers and the fire-to-run path (spec.md
//              §4.9).
// Purpose: Turn a host-reported or internally-scheduled event into a queued
//          Run, subject to per-trigger cooldown and global storm control.
// Dependencies: flowcore-model, flowcore-scheduler, cron, chrono, chrono-tz,
//               tokio, rand
// ============================================================================

//! ## Overview
//! This crate is grounded on the teacher's disclosure broker: a composite
//! registry of per-kind handlers, installed and uninstalled in bulk, with a
//! coalesced refresh pass. [`manager::TriggerManager`] owns the registry and
//! the fire path; [`handlers`] supplies one [`handler::TriggerHandler`] per
//! [`flowcore_model::core::run::TriggerKind`].

pub mod error;
pub mod handler;
pub mod handlers;
pub mod manager;

pub use error::TriggerError;
pub use handler::FireCallback;
pub use handler::TriggerHandler;
pub use manager::TriggerManager;
pub use manager::TriggerManagerBuilder;
