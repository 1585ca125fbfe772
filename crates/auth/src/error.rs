/// Why a credential was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Bad format, bad encoding or bad signature.
    #[error("token is invalid")]
    TokenInvalid,

    #[error("token has expired")]
    TokenExpired,

    #[error("token has been revoked")]
    TokenRevoked,

    /// Signed correctly but for another purpose (e.g. a refresh token
    /// presented as an access token).
    #[error("expected a {expected} token")]
    WrongKind { expected: &'static str },

    /// A download path that escapes its scope root.
    #[error("path rejected: {0}")]
    PathRejected(String),
}

impl TokenError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::TokenInvalid => "token_invalid",
            Self::TokenExpired => "token_expired",
            Self::TokenRevoked => "token_revoked",
            Self::WrongKind { .. } => "token_wrong_kind",
            Self::PathRejected(_) => "path_rejected",
        }
    }
}
