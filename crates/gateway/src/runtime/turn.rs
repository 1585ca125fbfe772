use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::sync::mpsc;

use sb_agent_runtime::RuntimeRequest;
use sb_domain::error::Result;
use sb_domain::event::AgentEvent;
use sb_domain::normalize::{normalize, RawEnvelope};
use sb_domain::trace::TraceEvent;
use sb_sessions::{BindOutcome, HistoryTracker, TranscriptEntry, TurnGuard};

use super::TurnOutcome;
use crate::state::AppState;

/// Spawn the driver for an accepted turn.  The guard moves into the task
/// and is released when the turn ends, however it ends.
pub(super) fn spawn_driver(
    state: AppState,
    guard: TurnGuard,
    content: String,
    tx: mpsc::Sender<AgentEvent>,
) {
    let turn_span = tracing::info_span!(
        "turn",
        session_id = %guard.session_id(),
        transport = state.runtime.transport(),
        "otel.kind" = "SERVER",
    );
    tokio::spawn(tracing::Instrument::instrument(
        async move {
            TurnDriver::new(state, guard, tx).run(content).await;
        },
        turn_span,
    ));
}

/// What woke the driver loop.
enum Step {
    Envelope(Option<Result<RawEnvelope>>),
    ClientGone,
    TimedOut,
}

struct TurnDriver {
    state: AppState,
    guard: TurnGuard,
    tx: mpsc::Sender<AgentEvent>,
    tracker: HistoryTracker,
    /// Where transcript entries go: the provisional id until the session
    /// binds, the real id after.
    transcript_key: String,
    forwarded: usize,
}

impl TurnDriver {
    fn new(state: AppState, guard: TurnGuard, tx: mpsc::Sender<AgentEvent>) -> Self {
        let transcript_key = guard.session_id();
        Self {
            state,
            guard,
            tx,
            tracker: HistoryTracker::new(),
            transcript_key,
            forwarded: 0,
        }
    }

    async fn run(mut self, content: String) {
        let started = Instant::now();
        let resume = self.guard.resume_id();

        TraceEvent::TurnStarted {
            session_id: self.transcript_key.clone(),
            resumed: resume.is_some(),
        }
        .emit();

        if resume.is_none() {
            let handle = AgentEvent::SessionId {
                session_id: self.transcript_key.clone(),
                provisional: true,
            };
            if !self.forward(handle).await {
                tracing::debug!("client left before the turn started");
            }
        }

        let outcome = self.drive(content, resume).await;

        TraceEvent::TurnFinished {
            session_id: self.guard.session_id(),
            outcome: outcome.as_str().into(),
            events: self.forwarded,
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
    }

    async fn drive(&mut self, content: String, resume: Option<String>) -> TurnOutcome {
        let request = RuntimeRequest {
            content,
            resume_session_id: resume,
        };
        let mut stream = match self.state.runtime.invoke(request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "runtime invocation failed");
                let event = AgentEvent::error_with_code(
                    format!("runtime invocation failed: {e}"),
                    "runtime_failed",
                );
                self.finish_with(event).await;
                return TurnOutcome::Failed;
            }
        };

        let timeout = Duration::from_secs(self.state.config.runtime.turn_timeout_secs);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            let step = tokio::select! {
                biased;
                _ = self.tx.closed() => Step::ClientGone,
                _ = &mut deadline => Step::TimedOut,
                next = stream.next() => Step::Envelope(next),
            };

            match step {
                Step::ClientGone => return self.interrupt().await,
                Step::TimedOut => {
                    tracing::warn!(timeout_secs = timeout.as_secs(), "turn timed out");
                    let event = AgentEvent::error_with_code(
                        format!("turn exceeded {}s", timeout.as_secs()),
                        "turn_timeout",
                    );
                    self.finish_with(event).await;
                    return TurnOutcome::TimedOut;
                }
                Step::Envelope(Some(Ok(envelope))) => {
                    let Some(event) = normalize(&envelope) else {
                        continue;
                    };
                    let terminal = match &event {
                        AgentEvent::TerminalOk { .. } => Some(TurnOutcome::Completed),
                        AgentEvent::TerminalError { .. } => Some(TurnOutcome::Failed),
                        _ => None,
                    };
                    if !self.handle(event).await {
                        return self.interrupt().await;
                    }
                    if let Some(outcome) = terminal {
                        return outcome;
                    }
                }
                Step::Envelope(Some(Err(e))) => {
                    tracing::warn!(error = %e, "runtime stream failed");
                    self.finish_with(AgentEvent::error_with_code(e.to_string(), "runtime_failed"))
                        .await;
                    return TurnOutcome::Failed;
                }
                Step::Envelope(None) => {
                    tracing::warn!("runtime stream ended without a terminal event");
                    let event = AgentEvent::error_with_code(
                        "runtime stream ended unexpectedly",
                        "runtime_stream_ended",
                    );
                    self.finish_with(event).await;
                    return TurnOutcome::Failed;
                }
            }
        }
    }

    /// Record and forward one canonical event.  Returns `false` once the
    /// client is gone.
    async fn handle(&mut self, event: AgentEvent) -> bool {
        if let AgentEvent::SessionId {
            session_id,
            provisional,
        } = &event
        {
            if *provisional {
                tracing::debug!(session_id, "runtime sent a provisional id; ignored");
                return true;
            }
            if !self.bind(session_id).await {
                return true;
            }
        }

        let entries = self.tracker.observe(&event);
        self.persist(entries).await;
        self.forward(event).await
    }

    /// Attach the runtime's id.  Returns whether the event should reach the
    /// client.
    async fn bind(&mut self, real_id: &str) -> bool {
        match self.state.registry.bind(&self.guard, real_id) {
            Ok(BindOutcome::Bound { provisional_id }) => {
                if let Some(from) = provisional_id.filter(|p| p != real_id) {
                    if let Err(e) = self.state.transcripts.relocate(&from, real_id).await {
                        tracing::warn!(from, to = real_id, error = %e, "transcript relocation failed");
                    }
                }
                self.transcript_key = real_id.to_owned();
                true
            }
            Ok(BindOutcome::AlreadyBound) => true,
            Ok(BindOutcome::Rejected) => false,
            Err(e) => {
                tracing::warn!(error = %e, "runtime issued an unusable session id");
                false
            }
        }
    }

    /// Close the turn with `event` on both the transcript and the stream.
    async fn finish_with(&mut self, event: AgentEvent) {
        let entries = self.tracker.observe(&event);
        self.persist(entries).await;
        self.forward(event).await;
    }

    async fn interrupt(&mut self) -> TurnOutcome {
        tracing::info!(session_id = %self.transcript_key, "client disconnected mid-turn");
        let entries = self.tracker.interrupt("client disconnected");
        self.persist(entries).await;
        TurnOutcome::Interrupted
    }

    async fn persist(&self, entries: Vec<TranscriptEntry>) {
        if entries.is_empty() {
            return;
        }
        if let Err(e) = self
            .state
            .transcripts
            .append(&self.transcript_key, &entries)
            .await
        {
            tracing::warn!(
                session_id = %self.transcript_key,
                error = %e,
                "failed to persist transcript entries"
            );
        }
    }

    async fn forward(&mut self, event: AgentEvent) -> bool {
        if self.tx.send(event).await.is_err() {
            return false;
        }
        self.forwarded += 1;
        true
    }
}
