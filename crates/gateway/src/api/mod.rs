pub mod auth;
pub mod chat;
pub mod downloads;
pub mod error;
pub mod sessions;
pub mod tokens;
pub mod ws;

use axum::extract::State;
use axum::middleware;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth, or the credential is part of
/// the request itself) and **protected** (gated behind the access-token
/// middleware).
///
/// `state` is needed to wire up the auth middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/healthz", get(health))
        .route("/v1/auth/token", post(tokens::issue_token))
        .route("/v1/auth/refresh", post(tokens::refresh_token))
        .route("/v1/downloads/:token", get(downloads::serve_download))
        // Authenticated inside the socket so refusals carry a close code.
        .route("/v1/chat/ws", get(ws::chat_ws));

    let protected = Router::new()
        .route("/v1/chat/stream", post(chat::chat_stream))
        .route("/v1/auth/revoke", post(tokens::revoke_token))
        .route("/v1/downloads", post(downloads::create_download))
        .route("/v1/sessions", get(sessions::list_sessions))
        .route("/v1/sessions/:id", get(sessions::get_session))
        .route("/v1/sessions/:id/transcript", get(sessions::get_transcript))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_access_token,
        ));

    public.merge(protected)
}

/// GET /healthz: lightweight probe.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "runtime": state.runtime.transport(),
        "sessions": state.registry.len(),
        "auth": state.tokens.is_some(),
    }))
}
