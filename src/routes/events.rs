//! Event ingest: the CRUD layer posts committed mutations here for fan-out.
//!
//! `POST /api/boards/{id}/events` with `Authorization: Bearer <EVENTS_INGEST_KEY>`
//! and a [`DomainEvent`] body. The path board must match the event's
//! `board_id`. The response reports how many subscribers received the event.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use frames::{DomainEvent, ErrorCode, error_reply};
use tracing::{info, warn};
use uuid::Uuid;

use crate::broadcast::BroadcastReport;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("missing or invalid ingest key")]
    Unauthorized,
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("event board {event} does not match path board {path}")]
    BoardMismatch { path: Uuid, event: Uuid },
    #[error("event encode failed: {0}")]
    Encode(String),
}

impl ErrorCode for IngestError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "E_INGEST_UNAUTHORIZED",
            Self::InvalidEvent(_) => "E_INVALID_MESSAGE",
            Self::BoardMismatch { .. } => "E_BOARD_MISMATCH",
            Self::Encode(_) => "E_ENCODE",
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InvalidEvent(_) | Self::BoardMismatch { .. } => StatusCode::BAD_REQUEST,
            Self::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(error_reply(&self))).into_response()
    }
}

pub async fn ingest_event(
    State(state): State<AppState>,
    Path(board_id): Path<Uuid>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<BroadcastReport>, IngestError> {
    let expected = state.ingest_key.as_deref().ok_or(IngestError::Unauthorized)?;
    if bearer_token(&headers) != Some(expected) {
        warn!(%board_id, "events: rejected ingest with bad key");
        return Err(IngestError::Unauthorized);
    }

    let event: DomainEvent = serde_json::from_str(&body).map_err(|e| IngestError::InvalidEvent(e.to_string()))?;
    if event.board_id != board_id {
        return Err(IngestError::BoardMismatch { path: board_id, event: event.board_id });
    }

    let report = state
        .broadcast(board_id, &event)
        .await
        .map_err(|e| IngestError::Encode(e.to_string()))?;
    info!(%board_id, kind = %event.kind(), delivered = report.delivered, skipped = report.skipped, "events: ingested");
    Ok(Json(report))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

#[cfg(test)]
#[path = "events_test.rs"]
mod tests;
