//! Operator API v1.
//!
//! Endpoints:
//!
//! - `GET    /v1/status`            — Status snapshot
//! - `GET    /v1/bins`              — Bin full/not-full flags
//! - `POST   /v1/bins/reset`        — Clear bin flags (all or by code)
//! - `GET    /v1/detection`         — Detection statistics
//! - `GET    /v1/diagnostics`       — Diagnostics dump
//! - `POST   /v1/sessions`          — Start a session from a validated token
//! - `DELETE /v1/sessions/current`  — End the open session
//! - `POST   /v1/emergency-stop`    — Emergency stop
//! - `POST   /v1/reset`             — Force reset (clears an emergency stop)
//! - `POST   /v1/commands`          — Any operator command, `{"action": ...}`
//! - `GET    /v1/events`            — SSE telemetry stream
//! - `GET    /v1/ws`                — WebSocket: telemetry out, commands in

use axum::{
    Router,
    extract::State,
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    http::StatusCode,
    response::sse::{Event as SseEvent, Sse},
    response::{IntoResponse, Json},
    routing::{delete, get, post},
};
use serde::Serialize;
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use rvm_controller::CommandOutcome;
use rvm_core::error::CommandError;
use rvm_core::{BinReset, OperatorCommand, SessionStart};

use crate::SharedState;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/bins", get(bins_handler))
        .route("/bins/reset", post(reset_bins_handler))
        .route("/detection", get(detection_handler))
        .route("/diagnostics", get(diagnostics_handler))
        .route("/sessions", post(start_session_handler))
        .route("/sessions/current", delete(end_session_handler))
        .route("/emergency-stop", post(emergency_stop_handler))
        .route("/reset", post(force_reset_handler))
        .route("/commands", post(command_handler))
        .route("/events", get(event_stream_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

// ── Command plumbing ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Status code for a command outcome: refusals are conflicts with the
/// current machine state, hardware failures are upstream errors.
fn outcome_status(outcome: &CommandOutcome) -> StatusCode {
    match outcome {
        CommandOutcome::Rejected { .. } => StatusCode::CONFLICT,
        CommandOutcome::Failed { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::OK,
    }
}

async fn dispatch(state: &SharedState, command: OperatorCommand) -> axum::response::Response {
    let name = command.name();
    match state.handle.command(command).await {
        Ok(outcome) => (outcome_status(&outcome), Json(outcome)).into_response(),
        Err(e) => {
            warn!(command = name, error = %e, "Controller unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn status_handler(State(state): State<SharedState>) -> impl IntoResponse {
    dispatch(&state, OperatorCommand::GetStatus).await
}

async fn bins_handler(State(state): State<SharedState>) -> impl IntoResponse {
    dispatch(&state, OperatorCommand::GetBinStatus).await
}

async fn reset_bins_handler(
    State(state): State<SharedState>,
    Json(params): Json<BinReset>,
) -> impl IntoResponse {
    dispatch(&state, OperatorCommand::ResetBinStatus { params }).await
}

async fn detection_handler(State(state): State<SharedState>) -> impl IntoResponse {
    dispatch(&state, OperatorCommand::GetDetectionStats).await
}

async fn diagnostics_handler(State(state): State<SharedState>) -> impl IntoResponse {
    dispatch(&state, OperatorCommand::RunDiagnostics).await
}

async fn start_session_handler(
    State(state): State<SharedState>,
    Json(start): Json<SessionStart>,
) -> impl IntoResponse {
    info!(session_id = %start.session_id, kind = %start.kind, "Session start requested");
    dispatch(&state, OperatorCommand::StartSession { start }).await
}

async fn end_session_handler(State(state): State<SharedState>) -> impl IntoResponse {
    dispatch(&state, OperatorCommand::EndSession).await
}

async fn emergency_stop_handler(State(state): State<SharedState>) -> impl IntoResponse {
    dispatch(&state, OperatorCommand::EmergencyStop).await
}

async fn force_reset_handler(State(state): State<SharedState>) -> impl IntoResponse {
    dispatch(&state, OperatorCommand::ForceReset).await
}

/// `POST /v1/commands` — the generic command channel. Accepts the same
/// `{"action": ...}` messages the kiosk dashboards send.
async fn command_handler(
    State(state): State<SharedState>,
    Json(command): Json<OperatorCommand>,
) -> impl IntoResponse {
    dispatch(&state, command).await
}

// ── SSE ───────────────────────────────────────────────────────────────────

/// `GET /v1/events` — SSE stream of telemetry events, named by their type.
async fn event_stream_handler(
    State(state): State<SharedState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.handle.subscribe();
    let stream = BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|event| {
            let data = serde_json::to_string(event.as_ref()).unwrap_or_default();
            Ok(SseEvent::default().event(event.kind()).data(data))
        });

    Sse::new(stream)
}

// ── WebSocket ─────────────────────────────────────────────────────────────

/// `GET /v1/ws` — bidirectional operator channel.
///
/// - Server → Client: every telemetry event as a JSON frame
/// - Client → Server: `OperatorCommand` JSON; answered with the outcome
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsReply {
    CommandResult {
        action: &'static str,
        outcome: CommandOutcome,
    },
    Error {
        message: String,
    },
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> bool {
    let json = serde_json::to_string(value).unwrap_or_default();
    socket.send(WsMessage::Text(json.into())).await.is_ok()
}

async fn handle_ws_connection(mut socket: WebSocket, state: SharedState) {
    info!("Operator WebSocket connected");
    let mut events = state.handle.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if !send_json(&mut socket, event.as_ref()).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Operator WebSocket lagging");
                }
                Err(RecvError::Closed) => break,
            },
            msg = socket.recv() => {
                let text = match msg {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                };

                let reply = match serde_json::from_str::<OperatorCommand>(&text) {
                    Ok(command) => {
                        let action = command.name();
                        match state.handle.command(command).await {
                            Ok(outcome) => WsReply::CommandResult { action, outcome },
                            Err(e) => WsReply::Error { message: e.to_string() },
                        }
                    }
                    Err(e) => WsReply::Error {
                        message: CommandError::Unknown(e.to_string()).to_string(),
                    },
                };
                if !send_json(&mut socket, &reply).await {
                    break;
                }
            }
        }
    }

    info!("Operator WebSocket closed");
}

// ── Tests ─────────────────────────────────────────────────────────────────
