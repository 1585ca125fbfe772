//! Session identifier shapes.
//!
//! Two kinds of id address a session:
//!
//! - **provisional**: `pending-<unix-millis>` with an optional
//!   `-<alphanumeric suffix>`, minted before the runtime has answered;
//! - **real**: the runtime's own id, 1–128 characters from
//!   `[A-Za-z0-9._:-]`, never starting with `pending-`.

use std::fmt;

use chrono::Utc;

use crate::error::SessionError;

const PROVISIONAL_PREFIX: &str = "pending-";
const MAX_REAL_ID_LEN: usize = 128;

/// An inbound session reference, classified by shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionRef {
    Provisional(String),
    Real(String),
}

impl SessionRef {
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        if let Some(rest) = raw.strip_prefix(PROVISIONAL_PREFIX) {
            return if is_provisional_tail(rest) {
                Ok(Self::Provisional(raw.to_owned()))
            } else {
                Err(SessionError::InvalidSessionId(raw.to_owned()))
            };
        }

        if is_real_id(raw) {
            Ok(Self::Real(raw.to_owned()))
        } else {
            Err(SessionError::InvalidSessionId(raw.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Provisional(id) | Self::Real(id) => id,
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional(_))
    }
}

impl fmt::Display for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mint a fresh provisional id: `pending-<unix-millis>-<8 hex chars>`.
pub fn generate_provisional() -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{PROVISIONAL_PREFIX}{millis}-{}", &suffix[..8])
}

/// Whether `id` is acceptable as a runtime-issued session id.
pub fn is_real_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_REAL_ID_LEN
        && !id.starts_with(PROVISIONAL_PREFIX)
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'))
}

fn is_provisional_tail(rest: &str) -> bool {
    let (millis, suffix) = match rest.split_once('-') {
        Some((m, s)) => (m, Some(s)),
        None => (rest, None),
    };
    let millis_ok = !millis.is_empty() && millis.chars().all(|c| c.is_ascii_digit());
    let suffix_ok = suffix.map_or(true, |s| {
        !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric())
    });
    millis_ok && suffix_ok
}
