//! Credential endpoints.
//!
//! - `POST /v1/auth/token`  exchange the long-lived API key for a pair
//! - `POST /v1/auth/refresh`  single-use refresh
//! - `POST /v1/auth/revoke`  revoke by token or by id (protected)

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use super::auth::api_key_matches;
use super::error::ApiError;
use crate::state::AppState;

const DEFAULT_SUBJECT: &str = "api";

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub api_key: String,
    /// Who the tokens are for; defaults to `"api"`.
    #[serde(default)]
    pub subject: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub jti: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/auth/token
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn issue_token(
    State(state): State<AppState>,
    Json(body): Json<TokenRequest>,
) -> Result<Response, ApiError> {
    let tokens = state.tokens.as_ref().ok_or_else(ApiError::tokens_unconfigured)?;
    if state.api_key_hash.is_none() {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "api_key_unconfigured",
            "API key exchange is disabled",
        ));
    }
    if !api_key_matches(&state, &body.api_key) {
        tracing::warn!("token exchange with a wrong API key");
        return Err(ApiError::unauthorized("invalid API key"));
    }

    let subject = body
        .subject
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SUBJECT);

    let pair = tokens.issue(subject).map_err(|e| {
        tracing::error!(error = %e, "failed to issue token pair");
        ApiError::internal("failed to issue tokens")
    })?;
    Ok(Json(pair).into_response())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/auth/refresh
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn refresh_token(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> Result<Response, ApiError> {
    let tokens = state.tokens.as_ref().ok_or_else(ApiError::tokens_unconfigured)?;
    let pair = tokens.refresh(&body.refresh_token)?;
    Ok(Json(pair).into_response())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/auth/revoke
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn revoke_token(
    State(state): State<AppState>,
    Json(body): Json<RevokeRequest>,
) -> Result<Response, ApiError> {
    let tokens = state.tokens.as_ref().ok_or_else(ApiError::tokens_unconfigured)?;

    let jti = match (body.token, body.jti) {
        (Some(token), _) => tokens.revoke_token(&token)?.jti,
        (None, Some(jti)) => {
            if !tokens.revoke(&jti) {
                tracing::debug!(jti = %jti, "token id was already revoked");
            }
            jti
        }
        (None, None) => {
            return Err(ApiError::bad_request(
                "missing_field",
                "either `token` or `jti` is required",
            ))
        }
    };

    Ok(Json(serde_json::json!({ "revoked": true, "jti": jti })).into_response())
}
