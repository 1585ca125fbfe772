use sb_domain::config::Config;

use crate::bootstrap::build_token_service;

/// Mint an access/refresh pair with the configured secret and print it as
/// JSON.  Useful for poking at a local gateway with curl.
pub fn issue(config: &Config, subject: &str) -> anyhow::Result<()> {
    let Some(tokens) = build_token_service(&config.auth)? else {
        anyhow::bail!(
            "no signing secret configured: set {} or auth.secret",
            config.auth.secret_env
        );
    };
    let pair = tokens.issue(subject)?;
    println!("{}", serde_json::to_string_pretty(&pair)?);
    Ok(())
}
