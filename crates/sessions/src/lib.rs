//! Session management for SessionBridge.
//!
//! The registry maps provisional ids to the runtime's real ids and owns the
//! single-writer lock per session; the history tracker turns one turn's
//! event stream into ordered transcript entries; the transcript module
//! stores them append-only.

pub mod error;
pub mod history;
pub mod registry;
pub mod session_id;
pub mod transcript;

pub use error::SessionError;
pub use history::{HistoryTracker, TrackerState};
pub use registry::{BindOutcome, SessionRegistry, SessionSlot, SessionSnapshot, TurnGuard};
pub use session_id::{generate_provisional, is_real_id, SessionRef};
pub use transcript::{MemorySink, Role, TranscriptEntry, TranscriptSink, TranscriptWriter};
