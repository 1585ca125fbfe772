//! `POST /v1/chat/stream`: one turn, streamed back as SSE.
//!
//! Each canonical event becomes one SSE frame whose `event:` is the wire
//! kind (`session_id`, `text_delta`, `tool_use`, `tool_result`, `done`,
//! `error`) and whose `data:` is the JSON payload.  The session id the turn
//! started under is also returned in the `x-session-id` header.

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::stream::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;

use sb_domain::event::AgentEvent;

use super::error::ApiError;
use crate::runtime::{submit_turn, TurnRequest};
use crate::state::AppState;

pub const SESSION_ID_HEADER: &str = "x-session-id";

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// User message text.
    pub content: String,
    /// Provisional or real session id.  Falls back to the `x-session-id`
    /// header; absent in both starts a new session.
    #[serde(default)]
    pub session_id: Option<String>,
}

pub async fn chat_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    if body.content.trim().is_empty() {
        return Err(ApiError::bad_request("empty_content", "content must not be empty"));
    }

    let session_id = body.session_id.or_else(|| {
        headers
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    });

    let handle = submit_turn(
        &state,
        TurnRequest {
            content: body.content,
            session_id,
        },
    )
    .await?;

    let sse = Sse::new(make_sse_stream(handle.events)).keep_alive(KeepAlive::default());
    let mut response = sse.into_response();
    if let Ok(value) = HeaderValue::from_str(&handle.session_id) {
        response.headers_mut().insert(SESSION_ID_HEADER, value);
    }
    Ok(response)
}

/// Dropping the returned stream (client gone) drops the receiver, which the
/// turn driver observes as a disconnect.
fn make_sse_stream(
    mut rx: mpsc::Receiver<AgentEvent>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok(to_sse_event(&event));
        }
    }
}

pub(crate) fn to_sse_event(event: &AgentEvent) -> Event {
    Event::default()
        .event(event.wire_kind())
        .data(event.wire_payload().to_string())
}
