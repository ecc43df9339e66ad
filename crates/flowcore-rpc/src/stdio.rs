// crates/flowcore-rpc/src/stdio.rs
// ============================================================================
// Module: Flowcore Stdio Transport
// Description: Serves the RPC surface over stdin/stdout as newline-
//              delimited JSON (spec.md §6 "RPC channel... named duplex
//              port").
// Purpose: Give an in-process host embedding (e.g. a browser extension's
//          background worker spawning this binary) a transport with no
//          network surface at all.
// Dependencies: flowcore-contract, tokio
// ============================================================================

//! ## Overview
//! One line in, one JSON [`RpcMessage`] out: requests are answered in
//! place on the reader task; events are interleaved onto the same stdout
//! writer as they arrive from this connection's subscription. Grounded on
//! the teacher's `serve_stdio`, simplified from MCP's Content-Length
//! framing to line-delimited JSON since this protocol is our own.

use std::sync::Arc;

use flowcore_contract::RpcMessage;
use flowcore_contract::RpcRequest;
use flowcore_contract::RpcResponse;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::sync::Mutex as AsyncMutex;

use crate::dispatch::RpcDispatcher;

/// Serves one stdio connection until stdin closes.
///
/// # Errors
///
/// Returns an I/O error only if writing to stdout itself fails; malformed
/// request lines are answered with an error response, not a transport
/// error.
pub async fn serve_stdio(dispatcher: Arc<RpcDispatcher>) -> std::io::Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let stdout = Arc::new(AsyncMutex::new(tokio::io::stdout()));

    let (subscription, mut events) = dispatcher.bus().register();
    let forward_stdout = Arc::clone(&stdout);
    let forward = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let message = RpcMessage::Event(event);
            write_line(&forward_stdout, &message).await;
        }
    });

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => {
                let request_id = request.request_id.clone();
                match dispatcher.dispatch(Some(subscription), request.method).await {
                    Ok(result) => RpcResponse::ok(request_id, result)
                        .unwrap_or_else(|err| RpcResponse::err(request.request_id, err.to_string())),
                    Err(err) => RpcResponse::err(request_id, err.to_string()),
                }
            }
            Err(err) => RpcResponse::err(String::new(), format!("malformed request: {err}")),
        };
        write_line(&stdout, &RpcMessage::Response(response)).await;
    }

    dispatcher.bus().unregister(subscription);
    forward.abort();
    Ok(())
}

async fn write_line(stdout: &Arc<AsyncMutex<tokio::io::Stdout>>, message: &RpcMessage) {
    let Ok(mut payload) = serde_json::to_vec(message) else { return };
    payload.push(b'\n');
    let mut stdout = stdout.lock().await;
    let _ = stdout.write_all(&payload).await;
    let _ = stdout.flush().await;
}
