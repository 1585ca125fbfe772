//! SessionBridge gateway: HTTP/SSE and WebSocket front door for a stateful
//! agent runtime.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod runtime;
pub mod state;
