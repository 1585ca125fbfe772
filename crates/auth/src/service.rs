//! The token service: sole issuer and validator of credentials.
//!
//! Validation is lock-free apart from one read of the revocation set; only
//! revoke/refresh take its write lock.

use chrono::Utc;
use rand::RngCore;

use sb_domain::config::AuthConfig;
use sb_domain::error::{Error, Result};
use sb_domain::trace::TraceEvent;

use crate::download::{self, check_relative_path, DownloadGrant};
use crate::error::TokenError;
use crate::keys::{SigningKey, DOWNLOAD_TOKEN_LABEL, SESSION_TOKEN_LABEL};
use crate::revocation::RevocationSet;
use crate::tokens::{self, Claims, TokenKind, TokenPair};

/// Credential lifetimes in seconds.
#[derive(Debug, Clone, Copy)]
pub struct Lifetimes {
    pub access_secs: i64,
    pub refresh_secs: i64,
    pub download_secs: i64,
}

impl Lifetimes {
    pub fn from_config(cfg: &AuthConfig) -> Self {
        Self {
            access_secs: i64::from(cfg.access_ttl_minutes) * 60,
            refresh_secs: i64::from(cfg.refresh_ttl_days) * 86_400,
            download_secs: i64::from(cfg.download_ttl_hours) * 3_600,
        }
    }
}

impl Default for Lifetimes {
    fn default() -> Self {
        Self::from_config(&AuthConfig::default())
    }
}

#[derive(Debug)]
pub struct TokenService {
    session_key: SigningKey,
    download_key: SigningKey,
    lifetimes: Lifetimes,
    revoked: RevocationSet,
}

impl TokenService {
    pub fn new(secret: &[u8], lifetimes: Lifetimes) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::Auth("token signing secret is empty".into()));
        }
        if secret.len() < 32 {
            tracing::warn!(
                len = secret.len(),
                "token signing secret is shorter than 32 bytes"
            );
        }
        let derive = |label: &str| {
            SigningKey::derive(secret, label)
                .map_err(|e| Error::Auth(format!("deriving {label} key: {e}")))
        };
        Ok(Self {
            session_key: derive(SESSION_TOKEN_LABEL)?,
            download_key: derive(DOWNLOAD_TOKEN_LABEL)?,
            lifetimes,
            revoked: RevocationSet::new(),
        })
    }

    pub fn lifetimes(&self) -> Lifetimes {
        self.lifetimes
    }

    // ── Access / refresh ──────────────────────────────────────────────

    pub fn issue(&self, subject: &str) -> Result<TokenPair> {
        self.issue_at(subject, Utc::now().timestamp())
    }

    pub fn issue_at(&self, subject: &str, now: i64) -> Result<TokenPair> {
        let access = self.claims(subject, TokenKind::Access, now, self.lifetimes.access_secs);
        let refresh = self.claims(subject, TokenKind::Refresh, now, self.lifetimes.refresh_secs);

        let pair = TokenPair {
            access_token: tokens::encode(&self.session_key, &access)?,
            refresh_token: tokens::encode(&self.session_key, &refresh)?,
            token_type: "Bearer",
            expires_in: self.lifetimes.access_secs,
            access_expires_at: access.exp,
            refresh_expires_at: refresh.exp,
        };

        TraceEvent::TokenIssued {
            kind: "pair".into(),
            subject: subject.to_owned(),
        }
        .emit();
        Ok(pair)
    }

    pub fn validate(&self, token: &str, expected: TokenKind) -> std::result::Result<Claims, TokenError> {
        self.validate_at(token, expected, Utc::now().timestamp())
    }

    /// Signature, kind, expiry, then revocation.
    pub fn validate_at(
        &self,
        token: &str,
        expected: TokenKind,
        now: i64,
    ) -> std::result::Result<Claims, TokenError> {
        let outcome = tokens::decode(&self.session_key, token).and_then(|claims| {
            if claims.kind != expected {
                return Err(TokenError::WrongKind {
                    expected: expected.as_str(),
                });
            }
            if now >= claims.exp {
                return Err(TokenError::TokenExpired);
            }
            if self.revoked.contains(&claims.jti) {
                return Err(TokenError::TokenRevoked);
            }
            Ok(claims)
        });

        if let Err(e) = &outcome {
            rejected(expected, e);
        }
        outcome
    }

    /// Exchange a refresh token for a new pair.  The presented token is
    /// revoked, so each refresh token works exactly once.
    pub fn refresh(&self, refresh_token: &str) -> std::result::Result<TokenPair, TokenError> {
        self.refresh_at(refresh_token, Utc::now().timestamp())
    }

    pub fn refresh_at(&self, refresh_token: &str, now: i64) -> std::result::Result<TokenPair, TokenError> {
        let claims = self.validate_at(refresh_token, TokenKind::Refresh, now)?;

        // Two concurrent refreshes both pass validation; only one wins here.
        if !self.revoked.insert(&claims.jti, claims.exp) {
            rejected(TokenKind::Refresh, &TokenError::TokenRevoked);
            return Err(TokenError::TokenRevoked);
        }

        self.issue_at(&claims.sub, now).map_err(|e| {
            tracing::error!(error = %e, "failed to issue refreshed token pair");
            TokenError::TokenInvalid
        })
    }

    /// Revoke by unique id.  Without a known expiry the entry is kept for
    /// the longest credential lifetime.
    pub fn revoke(&self, jti: &str) -> bool {
        let keep_until = Utc::now().timestamp() + self.lifetimes.refresh_secs;
        self.revoked.insert(jti, keep_until)
    }

    /// Revoke a presented access or refresh token.  Expired tokens are
    /// accepted: revoking them is a no-op in effect but not an error.
    pub fn revoke_token(&self, token: &str) -> std::result::Result<Claims, TokenError> {
        let claims = tokens::decode(&self.session_key, token)?;
        if claims.kind == TokenKind::Download {
            return Err(TokenError::WrongKind {
                expected: "access or refresh",
            });
        }
        self.revoked.insert(&claims.jti, claims.exp);
        tracing::info!(jti = %claims.jti, kind = claims.kind.as_str(), "token revoked");
        Ok(claims)
    }

    pub fn is_revoked(&self, jti: &str) -> bool {
        self.revoked.contains(jti)
    }

    /// Drop revocation entries whose credentials have expired anyway.
    pub fn prune_expired(&self) -> usize {
        self.prune_expired_at(Utc::now().timestamp())
    }

    pub fn prune_expired_at(&self, now: i64) -> usize {
        let pruned = self.revoked.prune_expired(now);
        if pruned > 0 {
            tracing::debug!(pruned, remaining = self.revoked.len(), "revocation set pruned");
        }
        pruned
    }

    // ── Downloads ─────────────────────────────────────────────────────

    pub fn issue_download(
        &self,
        subject: &str,
        scope: &str,
        path: &str,
    ) -> std::result::Result<(String, DownloadGrant), TokenError> {
        self.issue_download_at(subject, scope, path, Utc::now().timestamp())
    }

    pub fn issue_download_at(
        &self,
        subject: &str,
        scope: &str,
        path: &str,
        now: i64,
    ) -> std::result::Result<(String, DownloadGrant), TokenError> {
        check_relative_path(path)?;

        let mut nonce = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce);

        let grant = DownloadGrant {
            sub: subject.to_owned(),
            scope: scope.to_owned(),
            path: path.to_owned(),
            exp: now + self.lifetimes.download_secs,
            nonce: hex::encode(nonce),
        };
        let token = download::encode(&self.download_key, &grant).map_err(|e| {
            tracing::error!(error = %e, "failed to encode download grant");
            TokenError::TokenInvalid
        })?;

        TraceEvent::TokenIssued {
            kind: TokenKind::Download.as_str().into(),
            subject: subject.to_owned(),
        }
        .emit();
        Ok((token, grant))
    }

    pub fn verify_download(&self, token: &str) -> std::result::Result<DownloadGrant, TokenError> {
        self.verify_download_at(token, Utc::now().timestamp())
    }

    pub fn verify_download_at(&self, token: &str, now: i64) -> std::result::Result<DownloadGrant, TokenError> {
        let outcome = download::decode(&self.download_key, token).and_then(|grant| {
            if now >= grant.exp {
                return Err(TokenError::TokenExpired);
            }
            check_relative_path(&grant.path)?;
            Ok(grant)
        });
        if let Err(e) = &outcome {
            rejected(TokenKind::Download, e);
        }
        outcome
    }

    fn claims(&self, subject: &str, kind: TokenKind, now: i64, ttl: i64) -> Claims {
        Claims {
            sub: subject.to_owned(),
            kind,
            iat: now,
            exp: now + ttl,
            jti: uuid::Uuid::new_v4().to_string(),
        }
    }
}

fn rejected(kind: TokenKind, err: &TokenError) {
    TraceEvent::TokenRejected {
        kind: kind.as_str().into(),
        reason: err.code().into(),
    }
    .emit();
}
