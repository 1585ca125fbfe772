//! AppState construction and background-task spawning extracted from `main.rs`.
//!
//! `serve` uses both; one-shot CLI commands (`token issue`) only need the
//! token service and call [`build_token_service`] directly.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sha2::{Digest, Sha256};

use sb_auth::{Lifetimes, TokenService};
use sb_domain::config::{AuthConfig, Config, ConfigSeverity, RuntimeTransport};
use sb_sessions::{MemorySink, SessionRegistry, TranscriptSink, TranscriptWriter};

use crate::state::AppState;

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Agent runtime ────────────────────────────────────────────────
    let runtime = sb_agent_runtime::from_config(&config.runtime).context("creating runtime client")?;
    tracing::info!(
        transport = runtime.transport(),
        url = %config.runtime.url,
        "agent runtime client ready"
    );

    // ── Session management ───────────────────────────────────────────
    let registry = Arc::new(SessionRegistry::new(&config.sessions));
    let transcripts: Arc<dyn TranscriptSink> = match config.runtime.transport {
        // The echo runtime has nothing worth keeping on disk.
        RuntimeTransport::Scripted => Arc::new(MemorySink::new()),
        _ => {
            let dir = config.sessions.state_path.join("transcripts");
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating transcript dir {}", dir.display()))?;
            tracing::info!(path = %dir.display(), "transcript writer ready");
            Arc::new(TranscriptWriter::new(&dir))
        }
    };
    tracing::info!(
        idle_evict_minutes = config.sessions.idle_evict_minutes,
        busy_policy = ?config.sessions.busy_policy,
        "session registry ready"
    );

    // ── Token service (secret read once) ─────────────────────────────
    let tokens = build_token_service(&config.auth)?;
    if tokens.is_none() {
        tracing::warn!(
            "token auth DISABLED: set {} (or auth.secret); protected routes are open and \
             websocket connections will be refused",
            config.auth.secret_env
        );
    }

    // ── API key (read once, hash for constant-time comparison) ───────
    let api_key_hash = {
        let env_var = &config.auth.api_key_env;
        match std::env::var(env_var).ok().filter(|k| !k.is_empty()) {
            Some(key) => {
                tracing::info!(source = %format!("env:{env_var}"), "API key exchange enabled");
                Some(Sha256::digest(key.as_bytes()).to_vec())
            }
            None => {
                tracing::warn!("API key exchange DISABLED: set the {env_var} env var");
                None
            }
        }
    };

    for (scope, root) in &config.downloads.scopes {
        if !root.is_dir() {
            tracing::warn!(scope = %scope, root = %root.display(), "download scope root does not exist");
        }
    }

    Ok(AppState {
        config,
        runtime,
        registry,
        transcripts,
        tokens,
        api_key_hash,
    })
}

/// Build the token service from the configured secret.
///
/// Priority: `auth.secret` > env var (`auth.secret_env`).  Returns `None`
/// when neither is set.
pub fn build_token_service(auth: &AuthConfig) -> anyhow::Result<Option<Arc<TokenService>>> {
    let secret = auth
        .secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| ("config".to_string(), s.to_string()))
        .or_else(|| {
            std::env::var(&auth.secret_env)
                .ok()
                .filter(|s| !s.is_empty())
                .map(|s| (format!("env:{}", auth.secret_env), s))
        });

    let Some((source, secret)) = secret else {
        return Ok(None);
    };
    let service = TokenService::new(secret.as_bytes(), Lifetimes::from_config(auth))
        .context("initializing token service")?;
    tracing::info!(
        source = %source,
        access_ttl_minutes = auth.access_ttl_minutes,
        refresh_ttl_days = auth.refresh_ttl_days,
        "token service ready"
    );
    Ok(Some(Arc::new(service)))
}

/// Spawn the long-running background tokio tasks (idle-session eviction,
/// revocation pruning).
///
/// Call this **after** [`build_app_state`] when running the HTTP server.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Idle-session eviction + tombstone pruning ────────────────────
    {
        let registry = state.registry.clone();
        let every = Duration::from_secs(state.config.sessions.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let evicted = registry.evict_idle();
                tracing::debug!(
                    evicted,
                    live = registry.len(),
                    tombstones = registry.tombstone_count(),
                    "session sweep"
                );
            }
        });
    }

    // ── Revocation-set pruning ───────────────────────────────────────
    if let Some(tokens) = state.tokens.clone() {
        let every = Duration::from_secs(state.config.auth.prune_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                tokens.prune_expired();
            }
        });
    }
}
