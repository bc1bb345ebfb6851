//! Gateway HTTP surface.
//!
//! Only the envelope-facing endpoints live here: tool calls that create
//! envelopes, status reads, the SSE progress stream, the sidecar progress
//! ingest, and a health probe. Tool discovery and the rest of the MCP
//! surface are separate services.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::service::EnvelopeService;
use crate::progress::ProgressUpdate;
use crate::types::Error;

/// Shared state behind every route.
#[derive(Debug)]
pub struct AppState {
    pub service: EnvelopeService,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tools/call", post(call_tool))
        .route("/envelopes/{id}", get(envelope_status))
        .route("/envelopes/{id}/stream", get(envelope_stream))
        .route("/progress", post(ingest_progress))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct ToolCallRequest {
    name: String,

    #[serde(default)]
    arguments: Value,
}

async fn call_tool(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ToolCallRequest>,
) -> impl IntoResponse {
    match state.service.create(&request.name, request.arguments).await {
        Ok(created) => (StatusCode::OK, Json(json!(created))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn envelope_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<ProgressUpdate> {
    Json(state.service.status(&id))
}

/// Server-sent progress events: the current snapshot (when one exists)
/// followed by live updates, terminating after a terminal state.
async fn envelope_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let (snapshot, rx) = state.service.registry().subscribe(&id);
    let already_terminal = snapshot
        .as_ref()
        .map(|s| s.status.is_terminal())
        .unwrap_or(false);
    let initial: Vec<Event> = snapshot.iter().map(sse_event).collect();

    let updates = futures::stream::unfold((rx, already_terminal), |(mut rx, done)| async move {
        if done {
            return None;
        }
        loop {
            match rx.recv().await {
                Ok(update) => {
                    let terminal = update.status.is_terminal();
                    return Some((sse_event(&update), (rx, terminal)));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("SSE subscriber lagged, skipped {} updates", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    let stream = futures::stream::iter(initial)
        .chain(updates)
        .map(Ok::<_, Infallible>);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn ingest_progress(
    State(state): State<Arc<AppState>>,
    Json(update): Json<ProgressUpdate>,
) -> Json<Value> {
    state.service.registry().ingest(update);
    Json(json!({ "ok": true }))
}

fn sse_event(update: &ProgressUpdate) -> Event {
    let data = serde_json::to_string(update).unwrap_or_else(|_| "{}".to_string());
    Event::default().event("update").data(data)
}

fn error_response(e: Error) -> (StatusCode, Json<Value>) {
    let status = match &e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() })))
}
