use serde::Serialize;

/// Structured trace events emitted across all SessionBridge crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionCreated {
        session_id: String,
        provisional: bool,
    },
    SessionBound {
        provisional_id: String,
        real_id: String,
    },
    SessionEvicted {
        session_id: String,
        idle_secs: u64,
    },
    TurnStarted {
        session_id: String,
        resumed: bool,
    },
    TurnFinished {
        session_id: String,
        outcome: String,
        events: usize,
        duration_ms: u64,
    },
    TranscriptAppend {
        session_id: String,
        lines: usize,
    },
    EventDropped {
        transport: String,
        reason: String,
    },
    TokenIssued {
        kind: String,
        subject: String,
    },
    TokenRejected {
        kind: String,
        reason: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "sb_event");
    }
}
