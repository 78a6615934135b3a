//! HTTP and WebSocket surface
//!
//! REST routes for sessions, turns, artifacts and history, plus the
//! per-session event stream. Turn execution is spawned onto its own task;
//! the submit route returns as soon as the turn record is durable.

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message as WsFrame, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use eca_core::{
    ArtifactKind, ArtifactReference, ProviderConfig, SessionId, TurnId, TurnInput,
};
use eca_pipeline::DeliveryEvent;

use crate::metrics::{metrics_handler, record_request};
use crate::state::AppState;
use crate::ApiError;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics_handler))
        .route("/v1/artifacts/:kind", post(upload_artifact))
        .route("/v1/artifacts/:kind/:key", get(fetch_artifact))
        .route("/v1/sessions", post(create_session))
        .route("/v1/sessions/:id", delete(delete_session))
        .route("/v1/sessions/:id/turns", post(submit_turn))
        .route("/v1/sessions/:id/turns/:turn_id/cancel", post(cancel_turn))
        .route("/v1/sessions/:id/history", get(history))
        .route("/v1/sessions/:id/events", get(events))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Readiness gates on every engine and both stores; a not-ready node must
/// not accept new turns.
async fn ready(State(state): State<AppState>) -> Response {
    if state.controller.ready().await {
        (StatusCode::OK, Json(serde_json::json!({ "ready": true }))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "ready": false })),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
struct ArtifactResponse {
    kind: ArtifactKind,
    key: String,
    url: String,
}

async fn upload_artifact(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<ArtifactResponse>), ApiError> {
    record_request("upload_artifact");
    let kind = ArtifactKind::from_bucket(&kind)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown artifact kind: {}", kind)))?;
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty artifact body".to_string()));
    }

    // Uploads precede the turn they belong to; the submit route re-scopes
    // the reference to the turn it creates.
    let reference = state.artifacts.put(&body, kind, TurnId::new()).await?;
    let url = state.artifacts.presign(
        &reference,
        Duration::from_secs(state.settings.artifacts.presign_ttl_secs),
    )?;

    Ok((
        StatusCode::CREATED,
        Json(ArtifactResponse {
            kind,
            key: reference.key,
            url,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct PresignQuery {
    #[serde(default)]
    expires: i64,
    #[serde(default)]
    sig: String,
}

async fn fetch_artifact(
    State(state): State<AppState>,
    Path((kind, key)): Path<(String, String)>,
    Query(query): Query<PresignQuery>,
) -> Result<Response, ApiError> {
    record_request("fetch_artifact");
    let kind = ArtifactKind::from_bucket(&kind)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown artifact kind: {}", kind)))?;

    let object_path = format!("{}/{}", kind.bucket(), key);
    state
        .presign
        .verify(&object_path, query.expires, &query.sig)?;

    let reference = ArtifactReference::new(kind, key, TurnId::new());
    let bytes = state.artifacts.get(&reference).await?;

    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    user_id: String,
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    session_id: SessionId,
    user_id: String,
    model: String,
    voice_id: String,
    avatar_id: String,
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    record_request("create_session");
    let defaults = &state.settings.defaults;
    let providers = ProviderConfig {
        model: defaults.model.clone(),
        voice_id: defaults.voice_id.clone(),
        avatar_id: defaults.avatar_id.clone(),
    };

    let record = state.registry.create_session(request.user_id, providers)?;
    tracing::info!(session_id = %record.id, user_id = %record.user_id, "session created");

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            session_id: record.id,
            user_id: record.user_id,
            model: record.providers.model,
            voice_id: record.providers.voice_id,
            avatar_id: record.providers.avatar_id,
        }),
    ))
}

/// Tear a session down: the registry slot is freed, the delivery channel
/// dropped, and any in-flight turn asked to cancel. Persisted turns and
/// messages are kept; only the live session state goes away.
async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> Result<StatusCode, ApiError> {
    record_request("delete_session");
    let record = state
        .registry
        .remove_session(session_id)
        .ok_or_else(|| ApiError::NotFound(format!("session {}", session_id)))?;

    if let Some(turn_id) = record.active_turn {
        state.controller.cancel(turn_id);
    }
    state.delivery.remove(session_id);
    tracing::info!(session_id = %session_id, "session deleted");

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct SubmitTurnRequest {
    /// Key of a previously uploaded input-media artifact
    input_key: Option<String>,
    /// Text-only input, skips the perception stage
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubmitTurnResponse {
    turn_id: TurnId,
    seq: u64,
    status: &'static str,
}

async fn submit_turn(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(request): Json<SubmitTurnRequest>,
) -> Result<(StatusCode, Json<SubmitTurnResponse>), ApiError> {
    record_request("submit_turn");

    let input = match (&request.input_key, &request.text) {
        (Some(key), _) if !key.is_empty() => TurnInput::media(ArtifactReference::new(
            ArtifactKind::InputMedia,
            key.clone(),
            TurnId::new(),
        )),
        (_, Some(text)) if !text.trim().is_empty() => TurnInput::text(text.clone()),
        _ => {
            return Err(ApiError::BadRequest(
                "turn requires input_key or text".to_string(),
            ))
        }
    };

    let session = state
        .registry
        .get(session_id)
        .ok_or_else(|| ApiError::NotFound(format!("session {}", session_id)))?;

    let mut turn = state.registry.begin_turn(session_id, input)?;
    if let Some(artifact) = &mut turn.input.artifact {
        artifact.turn_id = turn.id;
    }

    if let Err(e) = state.state_store.create_turn(&turn).await {
        // Give the slot back; nothing was persisted.
        state.registry.finish_turn(session_id, turn.id);
        return Err(e.into());
    }

    let turn_id = turn.id;
    let seq = turn.seq;
    tracing::info!(
        session_id = %session_id,
        turn_id = %turn_id,
        seq,
        media = turn.input.has_media(),
        "turn accepted"
    );

    let controller = state.controller.clone();
    let registry = state.registry.clone();
    let providers = session.providers.clone();
    tokio::spawn(async move {
        if let Err(e) = controller.run_turn(turn, &providers).await {
            tracing::error!(turn_id = %turn_id, error = %e, "turn execution aborted");
        }
        registry.finish_turn(session_id, turn_id);
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitTurnResponse {
            turn_id,
            seq,
            status: "created",
        }),
    ))
}

async fn cancel_turn(
    State(state): State<AppState>,
    Path((session_id, turn_id)): Path<(SessionId, TurnId)>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    record_request("cancel_turn");
    if state.controller.cancel(turn_id) {
        tracing::info!(session_id = %session_id, turn_id = %turn_id, "cancellation requested");
        Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "cancelled": true })),
        ))
    } else {
        Err(ApiError::NotFound(format!("in-flight turn {}", turn_id)))
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn history(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<eca_core::Message>>, ApiError> {
    record_request("history");
    state
        .registry
        .get(session_id)
        .ok_or_else(|| ApiError::NotFound(format!("session {}", session_id)))?;

    let limit = query
        .limit
        .unwrap_or(state.settings.pipeline.history_limit);
    let messages = state.state_store.list_history(session_id, limit).await?;
    Ok(Json(messages))
}

async fn events(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    state
        .registry
        .get(session_id)
        .ok_or_else(|| ApiError::NotFound(format!("session {}", session_id)))?;

    Ok(ws.on_upgrade(move |socket| stream_events(socket, state, session_id)))
}

/// Forward delivery events to the client until either side disconnects.
/// A lagged subscriber keeps receiving; the state store remains the source
/// of truth for anything missed.
async fn stream_events(mut socket: WebSocket, state: AppState, session_id: SessionId) {
    let mut events = state.delivery.subscribe(session_id);
    tracing::debug!(session_id = %session_id, "event stream attached");

    loop {
        tokio::select! {
            event = events.recv() => {
                let event: DeliveryEvent = match event {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(session_id = %session_id, missed, "event stream lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize delivery event");
                        continue;
                    }
                };
                if socket.send(WsFrame::Text(payload)).await.is_err() {
                    break;
                }
            }
            frame = socket.recv() => {
                match frame {
                    // Clients only listen on this channel; drain pings and
                    // ignore anything else.
                    Some(Ok(WsFrame::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => break,
                }
            }
        }
    }

    tracing::debug!(session_id = %session_id, "event stream detached");
}
