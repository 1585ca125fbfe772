//! Download capabilities.
//!
//! Compact form: `base64url(payload_json).hex(hmac)`, signed with the
//! download key.  The nonce only makes two otherwise identical grants
//! produce different tokens; it is never checked.

use std::path::{Component, Path};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::TokenError;
use crate::keys::SigningKey;

/// What a download token grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadGrant {
    pub sub: String,
    /// Named root configured on the server.
    pub scope: String,
    /// File path relative to the scope root.
    pub path: String,
    /// Expires-at, unix seconds.
    pub exp: i64,
    pub nonce: String,
}

pub(crate) fn encode(key: &SigningKey, grant: &DownloadGrant) -> Result<String, serde_json::Error> {
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(grant)?);
    let signature = hex::encode(key.sign(payload.as_bytes()));
    Ok(format!("{payload}.{signature}"))
}

pub(crate) fn decode(key: &SigningKey, token: &str) -> Result<DownloadGrant, TokenError> {
    let (payload, signature) = token.rsplit_once('.').ok_or(TokenError::TokenInvalid)?;
    if payload.is_empty() || payload.contains('.') {
        return Err(TokenError::TokenInvalid);
    }

    let signature = hex::decode(signature).map_err(|_| TokenError::TokenInvalid)?;
    if !key.verify(payload.as_bytes(), &signature) {
        return Err(TokenError::TokenInvalid);
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| TokenError::TokenInvalid)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::TokenInvalid)
}

/// Accept only plain relative paths: no root, no drive prefix, no `..`.
pub fn check_relative_path(path: &str) -> Result<(), TokenError> {
    let reject = || TokenError::PathRejected(path.to_owned());

    if path.trim().is_empty() || path.starts_with('/') || path.starts_with('\\') {
        return Err(reject());
    }

    let mut normal = 0;
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) => normal += 1,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(reject())
            }
        }
    }
    // Backslash separators are not components on unix; treat `..\` as traversal too.
    if path.split(['/', '\\']).any(|seg| seg == "..") {
        return Err(reject());
    }
    if normal == 0 {
        return Err(reject());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_pass() {
        for ok in ["report.pdf", "2024/q1/report.pdf", "./a/b.txt"] {
            assert!(check_relative_path(ok).is_ok(), "{ok}");
        }
    }

    #[test]
    fn escaping_paths_are_rejected() {
        for bad in ["", "/etc/passwd", "../secret", "a/../../b", "a\\..\\b", "\\\\server\\share", "."] {
            assert!(
                matches!(check_relative_path(bad), Err(TokenError::PathRejected(_))),
                "{bad:?}"
            );
        }
    }
}
