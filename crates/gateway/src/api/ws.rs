//! WebSocket chat transport.
//!
//! Flow:
//! 1. Client connects to `/v1/chat/ws?token=<access token>` (or sends the
//!    token as `Authorization: Bearer`)
//! 2. The token is checked after the upgrade; failures close the socket
//!    with 1008 (policy) or 1011 (token service unconfigured)
//! 3. Client sends `{"type":"message","content":...,"session_id"?}` or
//!    `{"type":"ping"}`; the gateway streams canonical events back as
//!    `{"type": kind, ...payload}`

use std::borrow::Cow;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use sb_auth::{Claims, TokenKind};
use sb_domain::event::AgentEvent;

use super::auth::bearer;
use crate::runtime::{submit_turn, TurnRequest};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query params / client messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Message {
        content: String,
        #[serde(default)]
        session_id: Option<String>,
    },
    Ping,
}

/// Why the socket is refused.
enum Refusal {
    Policy(String),
    Unconfigured,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /v1/chat/ws: upgrade, then authenticate inside the socket so the
/// refusal can carry a close code.
pub async fn chat_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let provided = query
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| bearer(&headers).map(str::to_owned));

    let auth = authenticate(&state, provided.as_deref());
    ws.on_upgrade(move |socket| async move {
        match auth {
            Ok(claims) => handle_socket(socket, state, claims).await,
            Err(refusal) => refuse(socket, refusal).await,
        }
    })
}

fn authenticate(state: &AppState, provided: Option<&str>) -> Result<Claims, Refusal> {
    let Some(tokens) = &state.tokens else {
        return Err(Refusal::Unconfigured);
    };
    let Some(token) = provided else {
        return Err(Refusal::Policy("missing token".into()));
    };
    tokens
        .validate(token, TokenKind::Access)
        .map_err(|e| Refusal::Policy(e.to_string()))
}

async fn refuse(mut socket: WebSocket, refusal: Refusal) {
    let (code, reason) = match refusal {
        Refusal::Policy(reason) => (close_code::POLICY, reason),
        Refusal::Unconfigured => (close_code::ERROR, "token service unconfigured".to_owned()),
    };
    tracing::info!(code, reason = %reason, "websocket refused");
    let frame = CloseFrame {
        code,
        reason: Cow::Owned(reason),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(socket: WebSocket, state: AppState, claims: Claims) {
    let (ws_sink, mut ws_stream) = socket.split();
    tracing::info!(subject = %claims.sub, "chat socket connected");

    let (outbound_tx, outbound_rx) = mpsc::channel::<Value>(64);
    let writer = tokio::spawn(write_loop(ws_sink, outbound_rx));

    // One relay task per accepted turn.  Aborting a relay drops its event
    // receiver, which the turn driver treats as a disconnect.
    let mut relays = JoinSet::new();

    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Ping) => {
                    let _ = outbound_tx.send(serde_json::json!({ "type": "pong" })).await;
                }
                Ok(ClientMessage::Message { content, .. }) if content.trim().is_empty() => {
                    let event =
                        AgentEvent::error_with_code("content must not be empty", "empty_content");
                    let _ = outbound_tx.send(event.to_ws_message()).await;
                }
                Ok(ClientMessage::Message { content, session_id }) => {
                    let req = TurnRequest {
                        content,
                        session_id,
                    };
                    match submit_turn(&state, req).await {
                        Ok(handle) => {
                            relays.spawn(relay(handle.events, outbound_tx.clone()));
                        }
                        Err(e) => {
                            let event = AgentEvent::error_with_code(e.to_string(), e.code());
                            let _ = outbound_tx.send(event.to_ws_message()).await;
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "ignoring unparseable client message");
                    let event =
                        AgentEvent::error_with_code(format!("bad message: {e}"), "bad_message");
                    let _ = outbound_tx.send(event.to_ws_message()).await;
                }
            },
            Message::Close(_) => break,
            // axum answers WS-level pings itself.
            _ => {}
        }
        // Reap finished relays so the set does not grow with the socket's life.
        while relays.try_join_next().is_some() {}
    }

    relays.abort_all();
    drop(outbound_tx);
    writer.abort();
    tracing::info!(subject = %claims.sub, "chat socket disconnected");
}

async fn relay(mut events: mpsc::Receiver<AgentEvent>, out: mpsc::Sender<Value>) {
    while let Some(event) = events.recv().await {
        if out.send(event.to_ws_message()).await.is_err() {
            break;
        }
    }
}

async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Value>) {
    while let Some(value) = rx.recv().await {
        if sink.send(Message::Text(value.to_string())).await.is_err() {
            break;
        }
    }
}
