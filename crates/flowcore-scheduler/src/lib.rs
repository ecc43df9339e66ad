// crates/flowcore-scheduler/src/lib.rs
// ============================================================================
// Module: Flowcore Scheduler
// Description: Lease management, startup recovery, and the parallelism-
//              capped loop that drains the Run Queue into executors.
// Purpose: Give the host one component that turns claimed queue items into
//          running executions while surviving process restarts.
// Dependencies: flowcore-model, tokio, thiserror
// ============================================================================

//! ## Overview
//! Three pieces compose into one subsystem:
//! - [`lease`] refreshes and inspects leases held by this host's [`OwnerId`](flowcore_model::core::identifiers::OwnerId).
//! - [`recovery`] runs once at startup to reconcile the Run Queue against Run
//!   records before any new claim happens.
//! - [`scheduler`] runs the steady-state claim/spawn/heartbeat loop under a
//!   parallelism cap, handing each claimed item to a [`executor::RunExecutor`].

pub mod error;
pub mod executor;
pub mod lease;
pub mod recovery;
pub mod scheduler;

pub use error::SchedulerError;
pub use executor::RunExecutor;
pub use lease::LeaseManager;
pub use recovery::RecoveryCoordinator;
pub use recovery::RecoveryReport;
pub use scheduler::Scheduler;
pub use scheduler::SchedulerConfig;
pub use scheduler::SchedulerHandle;
