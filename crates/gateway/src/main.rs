use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::Router;
use clap::Parser;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use sb_domain::config::{Config, CorsConfig, ObservabilityConfig, RateLimitConfig};
use sb_gateway::api;
use sb_gateway::bootstrap;
use sb_gateway::cli::{self, Cli, Command, ConfigCommand, TokenCommand};
use sb_gateway::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let (config, config_path) = cli::load_config()?;
            let tracer_provider = init_tracing(&config.observability);
            let result = serve(Arc::new(config), &config_path).await;

            // Flush pending spans before exit, even when serving failed.
            if let Some(provider) = tracer_provider {
                if let Err(e) = provider.shutdown() {
                    tracing::warn!(error = ?e, "tracer provider shutdown failed");
                }
            }
            result
        }
        Command::Config(ConfigCommand::Validate) => {
            let (config, config_path) = cli::load_config()?;
            if !cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => {
            let (config, _) = cli::load_config()?;
            cli::config::show(&config)
        }
        Command::Token(TokenCommand::Issue { subject }) => {
            init_cli_tracing();
            let (config, _) = cli::load_config()?;
            cli::token::issue(&config, &subject)
        }
        Command::Version => {
            println!("sessionbridge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tracing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// JSON logs for `serve`, plus an OTLP span exporter when
/// `[observability] otlp_endpoint` is set.  The returned provider must be
/// shut down on exit.
fn init_tracing(obs: &ObservabilityConfig) -> Option<SdkTracerProvider> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sb_gateway=debug"));

    let provider = obs.otlp_endpoint.as_deref().and_then(|endpoint| {
        match build_tracer_provider(obs, endpoint) {
            Ok(provider) => Some(provider),
            Err(e) => {
                // The subscriber is not installed yet.
                eprintln!("WARNING: OTLP export to {endpoint} disabled: {e}");
                None
            }
        }
    });

    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("sessionbridge")));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .with(otel_layer)
        .init();

    provider
}

fn build_tracer_provider(
    obs: &ObservabilityConfig,
    endpoint: &str,
) -> anyhow::Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let resource = opentelemetry_sdk::Resource::builder()
        .with_service_name(obs.service_name.clone())
        .build();

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(
            obs.effective_sample_rate(),
        ))
        .with_resource(resource)
        .build())
}

/// Compact stderr logging for one-shot commands; stdout stays clean for
/// their output.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn serve(config: Arc<Config>, config_path: &str) -> anyhow::Result<()> {
    tracing::info!(config_path, "SessionBridge starting");

    let state = bootstrap::build_app_state(config.clone()).await?;
    bootstrap::spawn_background_tasks(&state);

    let app = build_app(&config, state.clone());

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "SessionBridge listening");

    // The rate limiter keys on the peer address.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("axum server error")?;

    tracing::info!(sessions = state.registry.len(), "shutdown complete");
    Ok(())
}

/// Routes plus the outer middleware stack: CORS, the in-flight ceiling and
/// the optional per-peer rate limit.
fn build_app(config: &Config, state: AppState) -> Router {
    let max_concurrent = config.server.max_concurrent_requests.max(1);
    tracing::info!(max_concurrent, "concurrency limit set");

    let router = api::router(state.clone())
        .layer(build_cors_layer(&config.server.cors))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));

    let governor = config.server.rate_limit.as_ref().and_then(|rl: &RateLimitConfig| {
        let Some(gov_config) = tower_governor::governor::GovernorConfigBuilder::default()
            .per_second(rl.requests_per_second)
            .burst_size(rl.burst_size)
            .finish()
        else {
            tracing::warn!(
                requests_per_second = rl.requests_per_second,
                burst_size = rl.burst_size,
                "rate_limit values must be > 0; per-IP rate limiting disabled"
            );
            return None;
        };
        tracing::info!(
            requests_per_second = rl.requests_per_second,
            burst_size = rl.burst_size,
            "per-IP rate limiting enabled"
        );
        Some(tower_governor::GovernorLayer {
            config: Arc::new(gov_config),
        })
    });

    match governor {
        Some(gov) => router.layer(gov).with_state(state),
        None => router.with_state(state),
    }
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            },
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for SIGINT");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("received SIGINT, shutting down");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CORS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Browsers need `x-session-id` both allowed on requests and exposed on
/// responses to carry the session handle across SSE turns.
fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    let session_header = HeaderName::from_static(api::chat::SESSION_ID_HEADER);
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            session_header.clone(),
        ])
        .expose_headers([session_header]);

    if cors.allowed_origins.iter().any(|o| o == "*") {
        // Credentials cannot be combined with a wildcard origin.
        tracing::warn!("CORS allows every origin");
        return base.allow_origin(tower_http::cors::Any);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut port_wildcards: Vec<String> = Vec::new();
    for origin in &cors.allowed_origins {
        if let Some(prefix) = origin.strip_suffix('*').filter(|p| p.ends_with(':')) {
            port_wildcards.push(prefix.to_owned());
        } else if let Ok(value) = origin.parse::<HeaderValue>() {
            exact.push(value);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if port_wildcards.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            exact.iter().any(|e| e == origin)
                || origin
                    .to_str()
                    .map(|o| matches_port_wildcard(&port_wildcards, o))
                    .unwrap_or(false)
        })
    };

    base.allow_origin(allow_origin).allow_credentials(true)
}

/// `http://localhost:` matches `http://localhost:5173` but not
/// `http://localhost:` or `http://localhost:80x`.
fn matches_port_wildcard(prefixes: &[String], origin: &str) -> bool {
    prefixes.iter().any(|prefix| {
        origin
            .strip_prefix(prefix.as_str())
            .is_some_and(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_wildcard_requires_digits() {
        let prefixes = vec!["http://localhost:".to_owned()];
        assert!(matches_port_wildcard(&prefixes, "http://localhost:5173"));
        assert!(!matches_port_wildcard(&prefixes, "http://localhost:"));
        assert!(!matches_port_wildcard(&prefixes, "http://localhost:80x"));
        assert!(!matches_port_wildcard(&prefixes, "http://evil.com:80"));
    }
}
