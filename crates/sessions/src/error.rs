/// Failures surfaced by the session registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Another turn holds the session's writer lock.
    #[error("session {0} is busy: a turn is already in progress")]
    SessionBusy(String),

    /// The provisional id is no longer resolvable; start over with a new one.
    #[error("session {0} has expired")]
    SessionExpired(String),

    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
}

impl SessionError {
    /// Stable machine-readable code used in error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionBusy(_) => "session_busy",
            Self::SessionExpired(_) => "session_expired",
            Self::InvalidSessionId(_) => "invalid_session_id",
        }
    }
}
