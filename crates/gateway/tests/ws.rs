//! WebSocket chat transport over a real listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use sb_agent_runtime::{AgentRuntime, ScriptStep, ScriptedRuntime, ScriptedTurn};
use sb_auth::{Lifetimes, TokenService};
use sb_domain::config::Config;
use sb_domain::normalize::RawEnvelope;
use sb_gateway::api;
use sb_gateway::state::AppState;
use sb_sessions::{MemorySink, SessionRegistry};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &[u8] = b"a-websocket-test-secret-long-enough";

struct Server {
    addr: SocketAddr,
    tokens: Option<Arc<TokenService>>,
    runtime: Arc<ScriptedRuntime>,
}

async fn start(with_tokens: bool) -> Server {
    let config = Config::default();
    let runtime = Arc::new(ScriptedRuntime::new());
    let tokens = with_tokens
        .then(|| Arc::new(TokenService::new(SECRET, Lifetimes::default()).unwrap()));
    let state = AppState {
        registry: Arc::new(SessionRegistry::new(&config.sessions)),
        config: Arc::new(config),
        runtime: runtime.clone() as Arc<dyn AgentRuntime>,
        transcripts: Arc::new(MemorySink::new()),
        tokens: tokens.clone(),
        api_key_hash: None,
    };
    let app = api::router(state.clone()).with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Server {
        addr,
        tokens,
        runtime,
    }
}

impl Server {
    fn access_token(&self) -> String {
        self.tokens.as_ref().unwrap().issue("alice").unwrap().access_token
    }

    async fn connect(&self, token: Option<&str>) -> Socket {
        let url = match token {
            Some(t) => format!("ws://{}/v1/chat/ws?token={t}", self.addr),
            None => format!("ws://{}/v1/chat/ws", self.addr),
        };
        let (socket, _) = connect_async(url).await.unwrap();
        socket
    }
}

async fn send(socket: &mut Socket, value: Value) {
    socket.send(Message::Text(value.to_string())).await.unwrap();
}

/// Next JSON text frame, failing the test after a few seconds.
async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Read frames until `pred` matches, returning everything read.
async fn read_until(socket: &mut Socket, pred: impl Fn(&Value) -> bool) -> Vec<Value> {
    let mut seen = Vec::new();
    loop {
        let value = next_json(socket).await;
        let done = pred(&value);
        seen.push(value);
        if done {
            return seen;
        }
    }
}

async fn close_code(socket: &mut Socket) -> u16 {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for close")
            .expect("socket ended without a close frame")
            .unwrap();
        if let Message::Close(frame) = msg {
            return frame.map(|f| u16::from(f.code)).unwrap_or_default();
        }
    }
}

#[tokio::test]
async fn missing_token_closes_with_policy_violation() {
    let server = start(true).await;
    let mut socket = server.connect(None).await;
    assert_eq!(close_code(&mut socket).await, 1008);
}

#[tokio::test]
async fn invalid_token_closes_with_policy_violation() {
    let server = start(true).await;
    let mut socket = server.connect(Some("not-a-token")).await;
    assert_eq!(close_code(&mut socket).await, 1008);
}

#[tokio::test]
async fn expired_token_closes_with_policy_violation() {
    let server = start(true).await;
    let two_days_ago = chrono::Utc::now().timestamp() - 2 * 24 * 3600;
    let stale = server
        .tokens
        .as_ref()
        .unwrap()
        .issue_at("alice", two_days_ago)
        .unwrap()
        .access_token;
    let mut socket = server.connect(Some(&stale)).await;
    assert_eq!(close_code(&mut socket).await, 1008);
}

#[tokio::test]
async fn revoked_token_closes_with_policy_violation() {
    let server = start(true).await;
    let token = server.access_token();
    server.tokens.as_ref().unwrap().revoke_token(&token).unwrap();
    let mut socket = server.connect(Some(&token)).await;
    assert_eq!(close_code(&mut socket).await, 1008);
}

#[tokio::test]
async fn unconfigured_token_service_closes_with_internal_error() {
    let server = start(false).await;
    let mut socket = server.connect(Some("anything")).await;
    assert_eq!(close_code(&mut socket).await, 1011);
}

#[tokio::test]
async fn ping_gets_pong() {
    let server = start(true).await;
    let mut socket = server.connect(Some(&server.access_token())).await;
    send(&mut socket, json!({ "type": "ping" })).await;
    assert_eq!(next_json(&mut socket).await, json!({ "type": "pong" }));
}

#[tokio::test]
async fn turn_events_are_relayed_as_typed_messages() {
    let server = start(true).await;
    server.runtime.push(ScriptedTurn::emit([
        RawEnvelope::sse("session_id", r#"{"session_id":"sdk-ws-1"}"#),
        RawEnvelope::sse("text_delta", r#"{"text":"hello back"}"#),
        RawEnvelope::sse("done", "{}"),
    ]));
    let mut socket = server.connect(Some(&server.access_token())).await;

    send(
        &mut socket,
        json!({ "type": "message", "content": "hello", "session_id": "pending-1000" }),
    )
    .await;
    let frames = read_until(&mut socket, |v| v["type"] == "done").await;

    let kinds: Vec<&str> = frames.iter().filter_map(|v| v["type"].as_str()).collect();
    assert_eq!(kinds, vec!["session_id", "session_id", "text_delta", "done"]);
    assert_eq!(frames[0]["session_id"], "pending-1000");
    assert_eq!(frames[0]["provisional"], true);
    assert_eq!(frames[1]["session_id"], "sdk-ws-1");
    assert_eq!(frames[2]["text"], "hello back");
}

#[tokio::test]
async fn busy_session_is_reported_as_error_event() {
    let server = start(true).await;
    server.runtime.push(ScriptedTurn::Steps(vec![
        ScriptStep::Sleep(Duration::from_millis(500)),
        ScriptStep::Emit(RawEnvelope::sse("done", "{}")),
    ]));
    let mut socket = server.connect(Some(&server.access_token())).await;

    let turn = json!({ "type": "message", "content": "one", "session_id": "pending-2000" });
    send(&mut socket, turn.clone()).await;
    // The leading provisional id confirms the first turn holds the lock.
    let first = next_json(&mut socket).await;
    assert_eq!(first["type"], "session_id");

    send(&mut socket, turn).await;
    let frames = read_until(&mut socket, |v| v["type"] == "error").await;
    let error = frames.last().unwrap();
    assert_eq!(error["code"], "session_busy");

    // The first turn still completes.
    read_until(&mut socket, |v| v["type"] == "done").await;
}

#[tokio::test]
async fn empty_content_is_rejected_like_sse() {
    let server = start(true).await;
    let mut socket = server.connect(Some(&server.access_token())).await;
    send(&mut socket, json!({ "type": "message", "content": "   " })).await;
    let reply = next_json(&mut socket).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["code"], "empty_content");
    assert!(server.runtime.requests().is_empty());
}
