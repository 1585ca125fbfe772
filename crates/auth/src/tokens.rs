//! Access/refresh credential encoding.
//!
//! Compact form: `base64url(claims_json).base64url(hmac)`, where the HMAC
//! covers the first segment as sent.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::TokenError;
use crate::keys::SigningKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
    Download,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
            Self::Download => "download",
        }
    }
}

/// Signed claims carried by access and refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub kind: TokenKind,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expires-at, unix seconds.
    pub exp: i64,
    /// Unique id, the revocation handle.
    pub jti: String,
}

/// A freshly issued access/refresh pair.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub access_expires_at: i64,
    pub refresh_expires_at: i64,
}

pub(crate) fn encode(key: &SigningKey, claims: &Claims) -> Result<String, serde_json::Error> {
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signature = URL_SAFE_NO_PAD.encode(key.sign(payload.as_bytes()));
    Ok(format!("{payload}.{signature}"))
}

/// Verify the signature and decode the claims.  Does not check kind,
/// expiry or revocation.
pub(crate) fn decode(key: &SigningKey, token: &str) -> Result<Claims, TokenError> {
    let (payload, signature) = token.split_once('.').ok_or(TokenError::TokenInvalid)?;
    if payload.is_empty() || signature.is_empty() || signature.contains('.') {
        return Err(TokenError::TokenInvalid);
    }

    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| TokenError::TokenInvalid)?;
    if !key.verify(payload.as_bytes(), &signature) {
        return Err(TokenError::TokenInvalid);
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| TokenError::TokenInvalid)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::TokenInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SESSION_TOKEN_LABEL;

    fn key() -> SigningKey {
        SigningKey::derive(b"test-secret", SESSION_TOKEN_LABEL).unwrap()
    }

    fn claims() -> Claims {
        Claims {
            sub: "alice".into(),
            kind: TokenKind::Access,
            iat: 1_000,
            exp: 1_900,
            jti: "j1".into(),
        }
    }

    #[test]
    fn decode_recovers_claims() {
        let token = encode(&key(), &claims()).unwrap();
        assert_eq!(decode(&key(), &token).unwrap(), claims());
    }

    #[test]
    fn tampered_payload_is_invalid() {
        let token = encode(&key(), &claims()).unwrap();
        let (_, sig) = token.split_once('.').unwrap();
        let forged_claims = Claims {
            sub: "mallory".into(),
            ..claims()
        };
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());
        let forged = format!("{forged_payload}.{sig}");
        assert_eq!(decode(&key(), &forged), Err(TokenError::TokenInvalid));
    }

    #[test]
    fn garbage_is_invalid() {
        for raw in ["", ".", "abc", "a.b.c", "!!.??"] {
            assert_eq!(decode(&key(), raw), Err(TokenError::TokenInvalid), "{raw:?}");
        }
    }
}
