//! In-memory revocation set.
//!
//! Maps a credential's unique id to its expiry.  Entries past expiry can be
//! pruned at any time: validation rejects expired credentials on its own.

use std::collections::HashMap;

use parking_lot::RwLock;

#[derive(Debug, Default)]
pub struct RevocationSet {
    revoked: RwLock<HashMap<String, i64>>,
}

impl RevocationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, jti: &str) -> bool {
        self.revoked.read().contains_key(jti)
    }

    /// Revoke `jti`.  Returns `false` if it was already revoked, which makes
    /// this the single-use check for refresh tokens.
    pub fn insert(&self, jti: &str, expires_at: i64) -> bool {
        let mut revoked = self.revoked.write();
        if revoked.contains_key(jti) {
            return false;
        }
        revoked.insert(jti.to_owned(), expires_at);
        true
    }

    /// Drop entries whose credential expired at or before `now`.
    pub fn prune_expired(&self, now: i64) -> usize {
        let mut revoked = self.revoked.write();
        let before = revoked.len();
        revoked.retain(|_, exp| *exp > now);
        before - revoked.len()
    }

    pub fn len(&self) -> usize {
        self.revoked.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.revoked.read().is_empty()
    }
}
