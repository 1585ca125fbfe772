//! Token service for SessionBridge.
//!
//! Access/refresh credentials authenticate API calls and WebSocket
//! upgrades; download capabilities authorize one file for a bounded time.
//! All signing keys derive from a single injected root secret.

pub mod download;
pub mod error;
pub mod keys;
pub mod revocation;
pub mod service;
pub mod tokens;

pub use download::DownloadGrant;
pub use error::TokenError;
pub use service::{Lifetimes, TokenService};
pub use tokens::{Claims, TokenKind, TokenPair};
