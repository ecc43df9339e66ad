// crates/flowcore-rpc/src/http.rs
// ============================================================================
// Module: Flowcore HTTP Transport
// Description: Serves the RPC surface over HTTP (request/response) and
//              Server-Sent Events (event push), for a standalone host
//              process (spec.md §6 "RPC channel").
// Purpose: Give `flowcore.toml`'s `rpc.transport = "http"` a real listener,
//          grounded on the teacher's axum HTTP transport.
// Dependencies: axum, flowcore-contract, tokio-stream
// ============================================================================

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::response::IntoResponse;
use axum::response::Sse;
use axum::response::sse;
use axum::routing::get;
use axum::routing::post;
use flowcore_contract::RpcRequest;
use flowcore_contract::RpcResponse;
use flowcore_model::core::identifiers::RunId;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::dispatch::RpcDispatcher;

/// Shared state handed to every axum route.
#[derive(Clone)]
pub struct HttpState {
    dispatcher: Arc<RpcDispatcher>,
    auth_token: Option<String>,
}

impl HttpState {
    /// Builds HTTP transport state. `auth_token`, when set, is required as
    /// a bearer token on every request (spec.md §6, mirroring
    /// `flowcore_config::RpcConfig::auth_token`).
    #[must_use]
    pub fn new(dispatcher: Arc<RpcDispatcher>, auth_token: Option<String>) -> Self {
        Self { dispatcher, auth_token }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.auth_token else { return true };
        let Some(header) = headers.get(AUTHORIZATION) else { return false };
        let Ok(value) = header.to_str() else { return false };
        value.strip_prefix("Bearer ").is_some_and(|token| token == expected)
    }
}

/// Builds the axum router: `POST /rpc` for requests, `GET /events` for an
/// SSE event stream optionally filtered by `runId`.
#[must_use]
pub fn router(state: HttpState) -> Router {
    Router::new().route("/rpc", post(handle_rpc)).route("/events", get(handle_events)).with_state(state)
}

/// Binds and serves the router until the process is signaled to stop.
///
/// # Errors
///
/// Returns an I/O error if the bind address cannot be acquired.
pub async fn serve(addr: SocketAddr, state: HttpState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await
}

async fn handle_rpc(State(state): State<HttpState>, headers: HeaderMap, Json(request): Json<RpcRequest>) -> impl IntoResponse {
    if !state.authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(RpcResponse::err(request.request_id, "unauthorized")));
    }
    let request_id = request.request_id.clone();
    let response = match state.dispatcher.dispatch(None, request.method).await {
        Ok(result) => RpcResponse::ok(request_id, result)
            .unwrap_or_else(|err| RpcResponse::err(request.request_id, err.to_string())),
        Err(err) => RpcResponse::err(request_id, err.to_string()),
    };
    (StatusCode::OK, Json(response))
}

/// Query parameters accepted by `GET /events`.
#[derive(Debug, Deserialize)]
struct EventsQuery {
    /// Filter to one run's events; omit for all runs.
    run_id: Option<String>,
}

async fn handle_events(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    if !state.authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let (subscription, receiver) = state.dispatcher.bus().register();
    let run_id = query.run_id.map(RunId::new);
    state.dispatcher.bus().set_filter(subscription, run_id.as_ref(), true);

    let stream = ReceiverStream::new(receiver).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok::<_, Infallible>(sse::Event::default().data(data))
    });
    Ok(Sse::new(stream).keep_alive(sse::KeepAlive::default()))
}
