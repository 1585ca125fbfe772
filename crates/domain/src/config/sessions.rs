use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session registry configuration: idle eviction, lock contention policy,
/// and where transcripts live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Sessions idle for longer than this are evicted from memory.
    /// Persisted transcripts are never touched by eviction.
    #[serde(default = "d_idle_minutes")]
    pub idle_evict_minutes: u32,

    /// How often the eviction sweep runs.
    #[serde(default = "d_sweep_secs")]
    pub sweep_interval_secs: u64,

    /// What a second turn does when the session is already running one.
    #[serde(default)]
    pub busy_policy: BusyPolicy,

    /// Maximum wait for the session lock under [`BusyPolicy::Wait`].
    #[serde(default = "d_busy_wait_secs")]
    pub busy_wait_secs: u64,

    /// How long an evicted provisional id is remembered so it can be
    /// answered with `SessionExpired` instead of starting over.
    #[serde(default = "d_tombstone_hours")]
    pub tombstone_retention_hours: u32,

    /// Root directory for gateway state (transcripts live in
    /// `<state_path>/transcripts`).
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_evict_minutes: d_idle_minutes(),
            sweep_interval_secs: d_sweep_secs(),
            busy_policy: BusyPolicy::default(),
            busy_wait_secs: d_busy_wait_secs(),
            tombstone_retention_hours: d_tombstone_hours(),
            state_path: d_state_path(),
        }
    }
}

/// Lock contention policy for a session that already has a turn in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Reject immediately with `SessionBusy`.
    #[default]
    FailFast,
    /// Queue behind the running turn for up to `busy_wait_secs`.
    Wait,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_idle_minutes() -> u32 {
    60
}
fn d_sweep_secs() -> u64 {
    60
}
fn d_busy_wait_secs() -> u64 {
    30
}
fn d_tombstone_hours() -> u32 {
    24
}
fn d_state_path() -> PathBuf {
    PathBuf::from("./data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_policy_parses_snake_case() {
        let cfg: SessionsConfig = toml::from_str(r#"busy_policy = "wait""#).unwrap();
        assert_eq!(cfg.busy_policy, BusyPolicy::Wait);
        assert_eq!(cfg.idle_evict_minutes, 60);
    }
}
