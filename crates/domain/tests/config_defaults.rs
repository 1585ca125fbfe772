use sb_domain::config::{BusyPolicy, Config, RuntimeTransport};

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 3320);
}

#[test]
fn explicit_zero_host_parses() {
    let toml_str = r#"
[server]
host = "0.0.0.0"
port = 8080
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 8080);
}

#[test]
fn default_cors_allows_only_localhost() {
    let config = Config::default();
    assert!(config
        .server
        .cors
        .allowed_origins
        .contains(&"http://localhost:*".to_string()));
    assert!(config
        .server
        .cors
        .allowed_origins
        .contains(&"http://127.0.0.1:*".to_string()));
}

#[test]
fn session_defaults() {
    let config = Config::default();
    assert_eq!(config.sessions.idle_evict_minutes, 60);
    assert_eq!(config.sessions.busy_policy, BusyPolicy::FailFast);
}

#[test]
fn token_lifetimes_default() {
    let config = Config::default();
    assert_eq!(config.auth.access_ttl_minutes, 15);
    assert_eq!(config.auth.refresh_ttl_days, 7);
    assert_eq!(config.auth.download_ttl_hours, 24);
    assert_eq!(config.auth.secret_env, "SB_TOKEN_SECRET");
}

#[test]
fn full_config_parses() {
    let toml_str = r#"
[sessions]
idle_evict_minutes = 5
busy_policy = "wait"
busy_wait_secs = 3

[auth]
access_ttl_minutes = 30

[downloads.scopes]
reports = "/srv/reports"

[runtime]
transport = "websocket"
url = "ws://127.0.0.1:9000/turns"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.sessions.idle_evict_minutes, 5);
    assert_eq!(config.sessions.busy_policy, BusyPolicy::Wait);
    assert_eq!(config.auth.access_ttl_minutes, 30);
    assert_eq!(config.runtime.transport, RuntimeTransport::Websocket);
    assert!(config.downloads.scopes.contains_key("reports"));
    assert!(config.validate().is_empty());
}
