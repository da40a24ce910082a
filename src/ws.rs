//! WebSocket transport for live session output/input: a JSON-framed
//! protocol over a single socket, split into an outgoing `mpsc` channel
//! (fed by the session's `output`/`exit` subscriptions) and an incoming
//! message loop that dispatches to the Registry.
//!
//! ## Server → client frames
//!
//! | `type`   | Fields                                   |
//! |----------|-------------------------------------------|
//! | `output` | `data` (chunk, lossy UTF-8)                |
//! | `exit`   | `running`, `exit_code`, `signal`           |
//! | `error`  | `message`                                  |
//!
//! ## Client → server frames
//!
//! | `type`       | Fields                        |
//! |--------------|-------------------------------|
//! | `write`      | `data`                        |
//! | `resize`     | `cols`, `rows`                |
//! | `interrupt`  | `signal_only?`                |
//! | `stop`       | —                              |
//! | `kill`       | —                              |

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::warn;

use crate::lifecycle::InterruptOptions;
use crate::AppState;

#[derive(Deserialize)]
pub struct StreamQuery {
    /// API key passed as a query parameter — browsers can't set headers on
    /// WebSocket upgrade requests.
    pub token: String,
}

/// `GET /sessions/{id}/stream?token=<key>` — WebSocket upgrade handler.
pub async fn stream_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if !crate::auth::constant_time_eq(state.config.auth.api_key.as_bytes(), query.token.as_bytes())
    {
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }
    ws.on_upgrade(move |socket| handle_stream(socket, state, id))
}

async fn handle_stream(socket: WebSocket, state: AppState, id: String) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Value>(256);

    let output_handle = {
        let tx = tx.clone();
        match state
            .registry
            .on_output(&id, move |chunk: &[u8]| {
                let msg = json!({
                    "type": "output",
                    "data": String::from_utf8_lossy(chunk),
                });
                let _ = tx.try_send(msg);
            })
            .await
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                let _ = sink
                    .send(Message::Text(json!({"error": e.to_string()}).to_string().into()))
                    .await;
                return;
            }
        }
    };

    let exit_handle = {
        let tx = tx.clone();
        state
            .registry
            .on_exit(&id, move |status| {
                let msg = json!({
                    "type": "exit",
                    "running": status.running,
                    "exit_code": status.exit_code,
                    "signal": status.signal,
                });
                let _ = tx.try_send(msg);
            })
            .await
            .ok()
    };

    let forward_task = tokio::spawn(async move {
        while let Some(value) = rx.recv().await {
            if sink
                .send(Message::Text(value.to_string().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        handle_incoming(&state, &id, &text, &tx).await;
    }

    forward_task.abort();
    if let Some(handle) = output_handle {
        state.registry.remove_output_listener(&id, handle).await;
    }
    if let Some(handle) = exit_handle {
        state.registry.remove_exit_listener(&id, handle).await;
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame {
    Write { data: String },
    Resize { cols: u16, rows: u16 },
    Interrupt {
        #[serde(default)]
        signal_only: bool,
    },
    Stop,
    Kill,
}

async fn handle_incoming(state: &AppState, id: &str, text: &str, tx: &mpsc::Sender<Value>) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            let _ = tx.try_send(json!({"type": "error", "message": e.to_string()}));
            return;
        }
    };

    let result = match frame {
        ClientFrame::Write { data } => state.registry.write(id, &data).await,
        ClientFrame::Resize { cols, rows } => state.registry.resize(id, cols, rows).await,
        ClientFrame::Interrupt { signal_only } => {
            state
                .registry
                .interrupt(id, InterruptOptions { signal_only })
                .await
        }
        ClientFrame::Stop => state.registry.stop(id).await,
        ClientFrame::Kill => state.registry.kill(id).await,
    };

    if let Err(e) = result {
        warn!(session_id = id, error = %e, "ws client frame failed");
        let _ = tx.try_send(json!({"type": "error", "message": e.to_string()}));
    }
}
