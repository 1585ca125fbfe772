//! JSON error responses: `{ "error": "...", "code": "..." }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use sb_auth::TokenError;
use sb_sessions::SessionError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }

    /// No signing secret configured.
    pub fn tokens_unconfigured() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "token_service_unconfigured",
            "token service is not configured",
        )
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        let status = match e {
            SessionError::SessionBusy(_) => StatusCode::CONFLICT,
            SessionError::SessionExpired(_) => StatusCode::GONE,
            SessionError::InvalidSessionId(_) => StatusCode::BAD_REQUEST,
        };
        Self::new(status, e.code(), e.to_string())
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        let status = match e {
            TokenError::PathRejected(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::UNAUTHORIZED,
        };
        Self::new(status, e.code(), e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message, "code": self.code })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_map_to_statuses() {
        let busy: ApiError = SessionError::SessionBusy("sdk-abc".into()).into();
        assert_eq!(busy.status, StatusCode::CONFLICT);
        assert_eq!(busy.code, "session_busy");

        let expired: ApiError = SessionError::SessionExpired("pending-1".into()).into();
        assert_eq!(expired.status, StatusCode::GONE);

        let invalid: ApiError = SessionError::InvalidSessionId("".into()).into();
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn token_errors_are_unauthorized() {
        let e: ApiError = TokenError::TokenRevoked.into();
        assert_eq!(e.status, StatusCode::UNAUTHORIZED);
        assert_eq!(e.code, "token_revoked");

        let e: ApiError = TokenError::PathRejected("../x".into()).into();
        assert_eq!(e.status, StatusCode::BAD_REQUEST);
    }
}
