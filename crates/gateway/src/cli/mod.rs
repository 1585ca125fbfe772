pub mod config;
pub mod token;

use clap::{Parser, Subcommand};

use sb_domain::config::Config;

/// SessionBridge: a session-aware gateway in front of an agent runtime.
#[derive(Debug, Parser)]
#[command(name = "sessionbridge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Credential utilities.
    #[command(subcommand)]
    Token(TokenCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

#[derive(Debug, Subcommand)]
pub enum TokenCommand {
    /// Mint an access/refresh pair locally, for testing.
    Issue {
        /// Subject the tokens are issued to.
        subject: String,
    },
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `SB_CONFIG` (or
/// `config.toml` by default).  Returns the parsed [`Config`] and the
/// path that was used.
///
/// This is shared by `serve`, `config` and `token` subcommands so the
/// logic lives in one place.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("SB_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        parse_config(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        Config::default()
    };

    Ok((config, config_path))
}

pub fn parse_config(raw: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_domain::config::{BusyPolicy, RuntimeTransport};

    #[test]
    fn cli_defaults_to_serve() {
        let cli = Cli::parse_from(["sessionbridge"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn token_issue_takes_subject() {
        let cli = Cli::parse_from(["sessionbridge", "token", "issue", "alice"]);
        match cli.command {
            Some(Command::Token(TokenCommand::Issue { subject })) => assert_eq!(subject, "alice"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn full_config_parses() {
        let cfg = parse_config(
            r#"
            [server]
            port = 8080

            [sessions]
            busy_policy = "wait"
            idle_evict_minutes = 5

            [auth]
            access_ttl_minutes = 30

            [downloads.scopes]
            reports = "/srv/reports"

            [runtime]
            transport = "scripted"
        "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.sessions.busy_policy, BusyPolicy::Wait);
        assert_eq!(cfg.sessions.idle_evict_minutes, 5);
        assert_eq!(cfg.auth.access_ttl_minutes, 30);
        assert!(cfg.downloads.scopes.contains_key("reports"));
        assert_eq!(cfg.runtime.transport, RuntimeTransport::Scripted);
    }
}
