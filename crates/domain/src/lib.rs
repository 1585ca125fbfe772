//! Shared types for SessionBridge: configuration, errors, the canonical
//! agent event model and the transport normalizer.

pub mod config;
pub mod error;
pub mod event;
pub mod normalize;
pub mod stream;
pub mod trace;
