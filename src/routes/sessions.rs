//! REST endpoints for session management, backed by the
//! [`crate::registry::Registry`].
//!
//! - `POST   /sessions`              — create a session
//! - `GET    /sessions`              — list sessions (status snapshot each)
//! - `POST   /sessions/{id}/write`   — write bytes
//! - `POST   /sessions/{id}/resize`  — resize the PTY
//! - `POST   /sessions/{id}/interrupt` — send ^C / SIGINT
//! - `POST   /sessions/{id}/stop`    — alias for interrupt
//! - `POST   /sessions/{id}/kill`    — SIGKILL
//! - `DELETE /sessions/{id}`         — close (graceful → force)

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::env_sanitizer::AuthMode;
use crate::error::SupervisorError;
use crate::lifecycle::{CloseOptions, InterruptOptions};
use crate::registry::CreateSessionParams;
use crate::session::StatusSnapshot;
use crate::variant::Variant;
use crate::AppState;

fn error_response(err: SupervisorError) -> (StatusCode, Json<Value>) {
    let status = match err {
        SupervisorError::SessionExists(_) => StatusCode::CONFLICT,
        SupervisorError::UnknownSession(_) => StatusCode::NOT_FOUND,
        SupervisorError::SpawnFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() })))
}

fn status_json(id: &str, status: StatusSnapshot) -> Value {
    json!({
        "id": id,
        "running": status.running,
        "pid": status.pid,
        "exit_code": status.exit_code,
        "signal": status.signal,
    })
}

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub id: Option<String>,
    pub variant: Variant,
    pub profile_id: Option<String>,
    pub cwd: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// `"api"` opts variant-`B` sessions out of the credential strip; any
    /// other value (or absence) means subscription mode.
    pub auth_mode: Option<String>,
}

#[derive(Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
}

/// `POST /sessions` — `createSession`.
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, (StatusCode, Json<Value>)> {
    let auth_mode = match req.auth_mode.as_deref() {
        Some("api") => AuthMode::Api,
        _ => AuthMode::Subscription,
    };

    let session_id = state
        .registry
        .create_session(CreateSessionParams {
            id: req.id,
            variant: req.variant,
            profile_id: req.profile_id,
            cwd: req.cwd,
            extra_args: req.extra_args,
            env: req.env,
            auth_mode,
        })
        .await
        .map_err(error_response)?;

    let _ = state.session_events.send(json!({
        "type": "session.created",
        "session_id": session_id,
    }));

    register_directive_forwarding(&state, session_id.clone());

    Ok(Json(CreateSessionResponse { session_id }))
}

/// Registers an output listener that feeds every chunk through the
/// Directive Parser and republishes any dispatches/question-answers onto
/// `session_events` — one output subscriber per session, dedicated to
/// directive extraction.
fn register_directive_forwarding(state: &AppState, session_id: String) {
    let registry = state.registry.clone();
    let events = state.session_events.clone();
    tokio::spawn(async move {
        let id = session_id.clone();
        let registry_for_listener = registry.clone();
        let events_for_listener = events.clone();
        let _ = registry
            .on_output(&id, move |chunk: &[u8]| {
                let registry = registry_for_listener.clone();
                let events = events_for_listener.clone();
                let id = id.clone();
                let chunk = chunk.to_vec();
                tokio::spawn(async move {
                    let outcome = registry.parse_directives(&id, &chunk).await;
                    for dispatch in outcome.dispatches {
                        let _ = events.send(json!({
                            "type": "session.directive",
                            "session_id": id,
                            "kind": "dispatch",
                            "target": dispatch.target,
                            "text": dispatch.text,
                            "interrupt": dispatch.interrupt,
                            "include_bootstrap_if_present": dispatch.include_bootstrap_if_present,
                        }));
                    }
                    for answer in outcome.question_answers {
                        let _ = events.send(json!({
                            "type": "session.directive",
                            "session_id": id,
                            "kind": "answer",
                            "attention_id": answer.attention_id,
                            "option_id": answer.option_id,
                            "source": answer.source,
                            "meta": answer.meta,
                        }));
                    }
                });
            })
            .await;
    });
}

/// `GET /sessions` — list every session's status snapshot.
pub async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    let sessions = state.registry.list().await;
    let items: Vec<Value> = sessions
        .into_iter()
        .map(|(id, status)| status_json(&id, status))
        .collect();
    Json(json!({ "sessions": items }))
}

/// `GET /sessions/{id}` — single status snapshot.
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let status = state
        .registry
        .get_status(&id)
        .await
        .map_err(error_response)?;
    Ok(Json(status_json(&id, status)))
}

#[derive(Deserialize)]
pub struct WriteRequest {
    pub data: String,
}

/// `POST /sessions/{id}/write` — `write`.
pub async fn write_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<WriteRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .registry
        .write(&id, &req.data)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
pub struct ResizeRequest {
    pub cols: u16,
    pub rows: u16,
}

/// `POST /sessions/{id}/resize` — `resize`.
pub async fn resize_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ResizeRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .registry
        .resize(&id, req.cols, req.rows)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize, Default)]
pub struct InterruptRequest {
    #[serde(default)]
    pub signal_only: bool,
}

/// `POST /sessions/{id}/interrupt` — `interrupt(id, {signalOnly?})`.
pub async fn interrupt_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<InterruptRequest>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let opts = body.map(|Json(r)| r).unwrap_or_default();
    state
        .registry
        .interrupt(
            &id,
            InterruptOptions {
                signal_only: opts.signal_only,
            },
        )
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "ok": true })))
}

/// `POST /sessions/{id}/stop` — `stop`.
pub async fn stop_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.registry.stop(&id).await.map_err(error_response)?;
    Ok(Json(json!({ "ok": true })))
}

/// `POST /sessions/{id}/kill` — `kill`.
pub async fn kill_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.registry.kill(&id).await.map_err(error_response)?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize, Default)]
pub struct CloseRequest {
    pub force: Option<bool>,
    pub grace_ms: Option<u64>,
}

/// `DELETE /sessions/{id}` — `close(id, {force?, graceMs?})`. Always
/// returns `200` — close never fails on an unknown or already-gone session.
pub async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<CloseRequest>>,
) -> Json<Value> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let defaults = CloseOptions::default();
    let result = state
        .registry
        .close(
            &id,
            CloseOptions {
                force: req.force.unwrap_or(defaults.force),
                grace_ms: req.grace_ms.unwrap_or(defaults.grace_ms),
            },
        )
        .await;

    let _ = state.session_events.send(json!({
        "type": "session.closed",
        "session_id": id,
        "existed": result.existed,
        "was_running": result.was_running,
    }));

    Json(json!({
        "existed": result.existed,
        "was_running": result.was_running,
    }))
}
