use std::sync::Arc;

use sb_agent_runtime::AgentRuntime;
use sb_auth::TokenService;
use sb_domain::config::Config;
use sb_sessions::{SessionRegistry, TranscriptSink};

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core services**: config, the agent runtime
/// - **Session management**: registry, transcripts
/// - **Security (startup-computed)**: token service, API key digest
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub runtime: Arc<dyn AgentRuntime>,

    // ── Session management ────────────────────────────────────────────
    pub registry: Arc<SessionRegistry>,
    pub transcripts: Arc<dyn TranscriptSink>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// `None` when no signing secret is configured: protected routes run
    /// in dev mode and WebSocket upgrades are refused.
    pub tokens: Option<Arc<TokenService>>,
    /// SHA-256 digest of the long-lived API key exchanged at
    /// `POST /v1/auth/token`.  `None` disables the exchange.
    pub api_key_hash: Option<Vec<u8>>,
}
