use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Credential configuration.  The signing secret is read once at startup
/// and handed to the token service; it is never looked up again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Environment variable holding the shared signing secret.
    /// If neither this nor `secret` is set, the token service is
    /// unconfigured: HTTP routes run in dev mode and WebSocket upgrades
    /// are closed with an internal-error code.
    #[serde(default = "d_secret_env")]
    pub secret_env: String,

    /// Inline signing secret (takes precedence over `secret_env`).
    #[serde(default)]
    pub secret: Option<String>,

    /// Environment variable holding the long-lived API key that can be
    /// exchanged for an access/refresh pair.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "d_access_ttl")]
    pub access_ttl_minutes: u32,

    #[serde(default = "d_refresh_ttl")]
    pub refresh_ttl_days: u32,

    #[serde(default = "d_download_ttl")]
    pub download_ttl_hours: u32,

    /// How often expired ids are dropped from the revocation set.
    #[serde(default = "d_prune_secs")]
    pub prune_interval_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_env: d_secret_env(),
            secret: None,
            api_key_env: d_api_key_env(),
            access_ttl_minutes: d_access_ttl(),
            refresh_ttl_days: d_refresh_ttl(),
            download_ttl_hours: d_download_ttl(),
            prune_interval_secs: d_prune_secs(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_secret_env() -> String {
    "SB_TOKEN_SECRET".into()
}
fn d_api_key_env() -> String {
    "SB_API_KEY".into()
}
fn d_access_ttl() -> u32 {
    15
}
fn d_refresh_ttl() -> u32 {
    7
}
fn d_download_ttl() -> u32 {
    24
}
fn d_prune_secs() -> u64 {
    300
}
