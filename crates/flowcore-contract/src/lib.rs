// crates/flowcore-contract/src/lib.rs
// ============================================================================
// Module: Flowcore RPC Contract
// Description: Wire-level envelope and method/params/result shapes for the
//              RPC surface (spec.md §4.10).
// Purpose: Give flowcore-rpc (and any client) a single source of truth for
//          what goes over the named duplex channel.
// Dependencies: flowcore-model, serde, serde_json
// ============================================================================

//! ## Overview
//! This crate carries no transport or dispatch logic — see `flowcore-rpc`
//! for the server that implements these methods against the Storage Ports,
//! Scheduler, Runner, and Trigger Manager. What lives here is purely the
//! serializable shape of requests, responses, events, and debug commands.

pub mod debug;
pub mod envelope;
pub mod methods;

pub use debug::DebugCommand;
pub use envelope::RpcEvent;
pub use envelope::RpcMessage;
pub use envelope::RpcRequest;
pub use envelope::RpcResponse;
pub use envelope::RpcSubscribeAck;
pub use methods::RpcMethod;
