// crates/flowcore-triggers/src/handlers/mod.rs
// ============================================================================
// Module: Flowcore Trigger Handlers
// Description: Concrete `TriggerHandler` implementations, one per kind.
// Purpose: Group the per-kind handlers the Trigger Manager's default
//          registry wires together.
// ============================================================================

pub mod cron;
pub mod host_event;
pub mod interval;
pub mod one_shot;

pub use cron::CronHandler;
pub use host_event::HostEventHandler;
pub use interval::IntervalHandler;
pub use one_shot::OneShotHandler;
