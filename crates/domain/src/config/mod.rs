mod auth;
mod downloads;
mod observability;
mod runtime;
mod server;
mod sessions;

pub use auth::*;
pub use downloads::*;
pub use observability::*;
pub use runtime::*;
pub use server::*;
pub use sessions::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub downloads: DownloadsConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl ConfigError {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }

        if self.sessions.idle_evict_minutes == 0 {
            errors.push(ConfigError::error(
                "sessions.idle_evict_minutes",
                "idle threshold must be greater than 0",
            ));
        }
        if self.sessions.sweep_interval_secs == 0 {
            errors.push(ConfigError::error(
                "sessions.sweep_interval_secs",
                "sweep interval must be greater than 0",
            ));
        }

        if self.auth.access_ttl_minutes == 0 {
            errors.push(ConfigError::error(
                "auth.access_ttl_minutes",
                "access token lifetime must be greater than 0",
            ));
        }
        if self.auth.refresh_ttl_days == 0 {
            errors.push(ConfigError::error(
                "auth.refresh_ttl_days",
                "refresh token lifetime must be greater than 0",
            ));
        }
        if self.auth.download_ttl_hours == 0 {
            errors.push(ConfigError::error(
                "auth.download_ttl_hours",
                "download token lifetime must be greater than 0",
            ));
        }
        if self.auth.secret.is_some() {
            errors.push(ConfigError::warning(
                "auth.secret",
                "signing secret stored in plaintext config; prefer auth.secret_env",
            ));
        }

        if self.runtime.transport.is_network() && self.runtime.url.trim().is_empty() {
            errors.push(ConfigError::error(
                "runtime.url",
                "runtime url must be set for sse/websocket transports",
            ));
        }

        for (scope, root) in &self.downloads.scopes {
            if scope.is_empty() {
                errors.push(ConfigError::error("downloads.scopes", "scope name must not be empty"));
            }
            if root.as_os_str().is_empty() {
                errors.push(ConfigError::error(
                    format!("downloads.scopes.{scope}"),
                    "scope root must not be empty",
                ));
            }
        }

        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let issues = Config::default().validate();
        assert!(
            issues.iter().all(|i| i.severity == ConfigSeverity::Warning),
            "unexpected errors: {issues:?}"
        );
    }

    #[test]
    fn network_runtime_without_url_is_an_error() {
        let mut cfg = Config::default();
        cfg.runtime.transport = RuntimeTransport::Sse;
        cfg.runtime.url = String::new();
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "runtime.url" && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn zero_ttl_is_an_error() {
        let mut cfg = Config::default();
        cfg.auth.access_ttl_minutes = 0;
        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.field == "auth.access_ttl_minutes"));
    }

    #[test]
    fn display_includes_severity_tag() {
        let err = ConfigError::warning("a.b", "careful");
        assert_eq!(err.to_string(), "[WARN] a.b: careful");
    }
}
