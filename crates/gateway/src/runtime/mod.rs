//! Turn orchestration: the path from an inbound message to a stream of
//! canonical events.
//!
//! Entry point: [`submit_turn`] resolves the session, takes its writer
//! lock, persists the user message and spawns the turn driver.  Both chat
//! transports (SSE and WebSocket) consume the returned receiver.

mod turn;

use sb_domain::event::AgentEvent;
use sb_sessions::{SessionError, SessionRef, TranscriptEntry, Role};
use tokio::sync::mpsc;

use crate::state::AppState;

/// Bounded so a slow client applies backpressure to the runtime stream.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn parameters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One inbound turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub content: String,
    /// Provisional or real id; `None` starts a new session.
    pub session_id: Option<String>,
}

/// An accepted turn.
pub struct TurnHandle {
    /// The id the session is known by when the turn starts.
    pub session_id: String,
    /// `true` while the runtime has not yet issued a real id.
    pub provisional: bool,
    pub events: mpsc::Receiver<AgentEvent>,
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Failed,
    Interrupted,
    TimedOut,
}

impl TurnOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
            Self::TimedOut => "timed_out",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// submit_turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accept a turn for `req.session_id` (or a new session).
///
/// Fails with `SessionBusy`, `SessionExpired` or `InvalidSessionId` before
/// anything is persisted.  Once accepted, every later failure, including
/// runtime errors, arrives as a terminal `error` event on the stream.
pub async fn submit_turn(state: &AppState, req: TurnRequest) -> Result<TurnHandle, SessionError> {
    let session_ref = req
        .session_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(SessionRef::parse)
        .transpose()?;

    let guard = state.registry.begin_turn(session_ref.as_ref()).await?;
    let session_id = guard.session_id();
    let provisional = !guard.is_bound();

    if let Err(e) = state
        .transcripts
        .append(&session_id, &[TranscriptEntry::new(Role::User, req.content.clone())])
        .await
    {
        tracing::warn!(session_id = %session_id, error = %e, "failed to persist user message");
    }

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    turn::spawn_driver(state.clone(), guard, req.content, tx);

    Ok(TurnHandle {
        session_id,
        provisional,
        events: rx,
    })
}
