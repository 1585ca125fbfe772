//! API authentication middleware.
//!
//! Protected routes require `Authorization: Bearer <access token>`.  The
//! token is checked by the token service and its claims are stored in the
//! request extensions for handlers that need the subject.
//!
//! With no signing secret configured the service is absent and protected
//! routes are open (dev mode, warned about once at startup).

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use sb_auth::TokenKind;

use super::error::ApiError;
use crate::state::AppState;

/// Axum middleware that enforces access-token authentication on protected
/// routes. Attach via `axum::middleware::from_fn_with_state`.
pub async fn require_access_token(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(tokens) = &state.tokens else {
        return next.run(req).await;
    };

    let Some(provided) = bearer(req.headers()) else {
        return ApiError::unauthorized("missing bearer token").into_response();
    };

    match tokens.validate(provided, TokenKind::Access) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// The bearer credential from the `Authorization` header, if any.
pub fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Compare a presented API key against the startup digest.
///
/// The provided key is hashed to a fixed-length digest first, then
/// compared in constant time, so neither content nor length leaks.
pub fn api_key_matches(state: &AppState, provided: &str) -> bool {
    let Some(expected) = &state.api_key_hash else {
        return false;
    };
    let provided_hash = Sha256::digest(provided.as_bytes());
    bool::from(provided_hash.ct_eq(expected.as_slice()))
}
