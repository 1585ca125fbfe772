//! The boundary to the external agent runtime.
//!
//! The gateway only ever sees [`AgentRuntime`]: a turn goes in, a stream of
//! raw transport envelopes comes out.

pub mod http;
pub mod scripted;
pub(crate) mod sse;
pub mod traits;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use sb_domain::config::{RuntimeConfig, RuntimeTransport};
use sb_domain::error::{Error, Result};

pub use http::HttpSseRuntime;
pub use scripted::{ScriptStep, ScriptedRuntime, ScriptedTurn};
pub use traits::{AgentRuntime, EnvelopeStream, RuntimeRequest};
pub use ws::WsRuntime;

/// Build the runtime client selected by `[runtime] transport`.
pub fn from_config(cfg: &RuntimeConfig) -> Result<Arc<dyn AgentRuntime>> {
    let api_key = match &cfg.api_key_env {
        Some(var) => match std::env::var(var) {
            Ok(v) if !v.is_empty() => Some(v),
            _ => {
                return Err(Error::Config(format!(
                    "runtime.api_key_env: environment variable '{var}' is not set"
                )))
            }
        },
        None => None,
    };
    let connect_timeout = Duration::from_secs(cfg.connect_timeout_secs);

    let runtime: Arc<dyn AgentRuntime> = match cfg.transport {
        RuntimeTransport::Sse => Arc::new(HttpSseRuntime::new(&cfg.url, api_key, connect_timeout)?),
        RuntimeTransport::Websocket => Arc::new(WsRuntime::new(&cfg.url, api_key, connect_timeout)),
        RuntimeTransport::Scripted => Arc::new(ScriptedRuntime::new()),
    };
    Ok(runtime)
}
