//! Preview session routes.

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::StreamExt;
use previewly_common::{Error, PreviewId};
use previewly_stream::{NetworkMetrics, PlaybackEnd, WindowSnapshot};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;

use super::error::AppError;
use super::AppContext;
use crate::session::{SessionSnapshot, StartedSession};

/// Chunks buffered between the playback task and the response body.
const STREAM_CHANNEL_CAPACITY: usize = 4;

pub fn preview_routes() -> Router<AppContext> {
    Router::new()
        .route("/start-preview", post(start_preview))
        .route("/end-preview", post(end_preview))
        .route("/debug/sessions", get(list_sessions))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/window", get(get_window))
        .route("/sessions/:id/advance", post(advance_window))
        .route("/sessions/:id/stream", get(stream_session))
}

#[derive(Debug, Deserialize)]
pub struct StartPreviewRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct EndPreviewRequest {
    #[serde(default)]
    pub preview_id: String,
}

#[derive(Debug, Serialize)]
pub struct EndPreviewResponse {
    pub status: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SessionList {
    pub total_sessions: usize,
    pub sessions: Vec<SessionSnapshot>,
}

fn parse_id(raw: &str) -> Result<PreviewId, AppError> {
    raw.parse::<PreviewId>().map_err(AppError)
}

async fn start_preview(
    State(ctx): State<AppContext>,
    Json(req): Json<StartPreviewRequest>,
) -> Result<Json<StartedSession>, AppError> {
    let started = ctx.registry.start_session(&req.url).await?;
    Ok(Json(started))
}

async fn end_preview(
    State(ctx): State<AppContext>,
    Json(req): Json<EndPreviewRequest>,
) -> Result<Json<EndPreviewResponse>, AppError> {
    if req.preview_id.trim().is_empty() {
        return Err(AppError(Error::invalid_input("preview_id must not be empty")));
    }
    let id = parse_id(req.preview_id.trim())?;
    ctx.registry.end_session(id).await?;
    Ok(Json(EndPreviewResponse {
        status: "ended",
        message: format!("Preview session {id} ended"),
    }))
}

async fn list_sessions(State(ctx): State<AppContext>) -> Json<SessionList> {
    let sessions = ctx.registry.list_sessions().await;
    Json(SessionList {
        total_sessions: sessions.len(),
        sessions,
    })
}

async fn get_session(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(ctx.registry.get_session(id).await?))
}

async fn get_window(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<WindowSnapshot>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(ctx.registry.active_window(id).await?))
}

async fn advance_window(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Query(metrics): Query<NetworkMetrics>,
) -> Result<Json<WindowSnapshot>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(ctx.registry.advance(id, &metrics).await?))
}

async fn stream_session(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Query(metrics): Query<NetworkMetrics>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id)?;
    let (playback, cancel) = ctx.registry.open_playback(id, metrics).await?;

    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(STREAM_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        match playback.run(tx, cancel).await {
            Ok(PlaybackEnd::EndOfStream) => {
                tracing::debug!(preview_id = %id, "Playback finished");
            }
            Ok(PlaybackEnd::Cancelled) => {
                tracing::debug!(preview_id = %id, "Playback cancelled");
            }
            Err(e) => {
                tracing::warn!(preview_id = %id, error = %e, "Playback stopped");
            }
        }
    });

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(stream),
    ))
}
