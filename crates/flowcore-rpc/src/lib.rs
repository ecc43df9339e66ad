// crates/flowcore-rpc/src/lib.rs
// ============================================================================
// Module: Flowcore RPC Surface
// Description: Request/response plus event streaming to clients (spec.md
//              §4.10, C10).
// Purpose: Give the host binary a transport-agnostic dispatcher and two
//          ready-made transports (stdio, HTTP/SSE).
// Dependencies: flowcore-model, flowcore-contract, flowcore-runner,
//               flowcore-scheduler, flowcore-triggers, axum, tokio
// ============================================================================

//! ## Overview
//! [`dispatch::RpcDispatcher`] implements every method in
//! [`flowcore_contract::RpcMethod`] against the Storage Ports, the
//! Scheduler's kick handle, the Runner's pause state, and the Trigger
//! Manager. [`event_bus::EventBus`] fans out Event Store writes to
//! subscribed connections; wrap the host's real `EventStore` in
//! [`event_bus::PublishingEventStore`] and hand that wrapped handle to
//! every subsystem so every append publishes. [`stdio`] and [`http`] are
//! the two transports
//! spec.md §6's `RpcConfig::transport` selects between.

pub mod dispatch;
pub mod error;
pub mod event_bus;
pub mod http;
pub mod ids;
pub mod stdio;

pub use dispatch::RpcDispatcher;
pub use error::RpcServerError;
pub use event_bus::EventBus;
pub use event_bus::PublishingEventStore;
pub use event_bus::SubscriptionId;
pub use http::HttpState;
pub use stdio::serve_stdio;
