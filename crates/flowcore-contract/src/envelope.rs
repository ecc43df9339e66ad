// crates/flowcore-contract/src/envelope.rs
// ============================================================================
// Module: Flowcore RPC Envelope
// Description: Wire-level request/response/event/subscribeAck message shapes.
// Purpose: Give clients and the RPC surface a single serializable message
//          type for the named duplex channel (spec.md §4.10, §6).
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Messages on the wire are distinguished by a `type` tag: `request`,
//! `response`, `event`, or `subscribe_ack`. A request carries
//! `{requestId, method, params}`; its response carries
//! `{requestId, ok, result|error}`. Events are pushed asynchronously and are
//! not correlated to a request id.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::methods::RpcMethod;

/// One message on the RPC channel, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RpcMessage {
    /// A client-issued request.
    Request(RpcRequest),
    /// The server's reply to a request.
    Response(RpcResponse),
    /// An asynchronously pushed event.
    Event(RpcEvent),
    /// Acknowledgement that a subscribe/unsubscribe took effect.
    SubscribeAck(RpcSubscribeAck),
}

/// A client request: `{requestId, method, params}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Client-chosen correlation id, echoed on the response.
    pub request_id: String,
    /// The method and its typed parameters.
    #[serde(flatten)]
    pub method: RpcMethod,
}

/// The server's reply: `{requestId, ok, result|error}`.
///
/// # Invariants
/// - Exactly one of `result`/`error` is present, matching `ok`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Echoes the request's `request_id`.
    pub request_id: String,
    /// Whether the call succeeded.
    pub ok: bool,
    /// Present when `ok == true`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<Value>,
    /// Present when `ok == false`. Spec.md §6: "Errors are strings;
    /// detailed codes are carried in events."
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl RpcResponse {
    /// Builds a successful response, serializing `result` into the envelope.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if `result` cannot be serialized.
    pub fn ok(request_id: impl Into<String>, result: impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Self { request_id: request_id.into(), ok: true, result: Some(serde_json::to_value(result)?), error: None })
    }

    /// Builds a failed response carrying a human-readable error string.
    #[must_use]
    pub fn err(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self { request_id: request_id.into(), ok: false, result: None, error: Some(error.into()) }
    }
}

/// An asynchronously pushed event, not correlated to a request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcEvent {
    /// The run the event belongs to, as an opaque string (mirrors
    /// `flowcore_model::core::identifiers::RunId`'s wire form).
    pub run_id: String,
    /// The event payload, as published by the Event Store.
    pub event: Value,
}

/// Acknowledgement of a subscribe/unsubscribe request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcSubscribeAck {
    /// Echoes the request's `request_id`.
    pub request_id: String,
    /// The run id filter now in effect, or `None` for "all runs".
    pub run_id: Option<String>,
    /// Whether the channel is now subscribed (`false` after unsubscribe).
    pub subscribed: bool,
}
