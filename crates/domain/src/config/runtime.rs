use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent runtime connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How the gateway reaches the external agent runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub transport: RuntimeTransport,

    /// Endpoint of the runtime (`http(s)://` for SSE, `ws(s)://` for WebSocket).
    #[serde(default = "d_url")]
    pub url: String,

    /// Environment variable holding a bearer token for the runtime, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default = "d_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Hard ceiling on one turn, from invocation to terminal event.
    #[serde(default = "d_turn_timeout")]
    pub turn_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            transport: RuntimeTransport::default(),
            url: d_url(),
            api_key_env: None,
            connect_timeout_secs: d_connect_timeout(),
            turn_timeout_secs: d_turn_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeTransport {
    /// `POST <url>` returning `text/event-stream`.
    #[default]
    Sse,
    /// One WebSocket connection per turn.
    Websocket,
    /// Built-in echo runtime for local development.
    Scripted,
}

impl RuntimeTransport {
    pub fn is_network(self) -> bool {
        matches!(self, Self::Sse | Self::Websocket)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_url() -> String {
    "http://127.0.0.1:8765/v1/turns".into()
}
fn d_connect_timeout() -> u64 {
    10
}
fn d_turn_timeout() -> u64 {
    900
}
