//! Session introspection.
//!
//! - `GET /v1/sessions`  in-memory sessions, most recent first
//! - `GET /v1/sessions/:id`  one session, by provisional or real id
//! - `GET /v1/sessions/:id/transcript`  persisted transcript entries

use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::Deserialize;

use sb_sessions::SessionRef;

use super::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TranscriptQuery {
    /// Return only the last `limit` entries.
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sessions = state.registry.snapshot();
    Json(serde_json::json!({
        "count": sessions.len(),
        "sessions": sessions,
    }))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    SessionRef::parse(&id)?;
    let snapshot = state
        .registry
        .get(&id)
        .ok_or_else(|| ApiError::not_found(format!("session '{id}' is not in memory")))?;
    Ok(Json(serde_json::to_value(snapshot).unwrap_or_default()))
}

/// Transcripts outlive eviction, so an id that is no longer in memory is
/// still looked up on disk.
pub async fn get_transcript(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TranscriptQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    SessionRef::parse(&id)?;
    let key = state
        .registry
        .get(&id)
        .map(|s| s.session_id)
        .unwrap_or_else(|| id.clone());

    let mut entries = state.transcripts.read(&key).await.map_err(|e| {
        tracing::warn!(session_id = %key, error = %e, "failed to read transcript");
        ApiError::internal("failed to read transcript")
    })?;
    if let Some(limit) = query.limit {
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
    }

    Ok(Json(serde_json::json!({
        "session_id": key,
        "count": entries.len(),
        "entries": entries,
    })))
}
