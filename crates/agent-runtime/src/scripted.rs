//! A runtime that plays back prepared turns.
//!
//! Used by tests and by `transport = "scripted"` for local demos.  Queued
//! turns are consumed in order; once the queue is empty every turn echoes
//! the user's message back.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use sb_domain::error::{Error, Result};
use sb_domain::normalize::RawEnvelope;

use crate::traits::{AgentRuntime, EnvelopeStream, RuntimeRequest};

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Emit(RawEnvelope),
    Sleep(Duration),
    /// Yield a stream error and stop.
    Fail(String),
}

#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    Steps(Vec<ScriptStep>),
    /// `invoke` itself fails.
    Refuse(String),
}

impl ScriptedTurn {
    /// A turn made only of envelopes.
    pub fn emit(envelopes: impl IntoIterator<Item = RawEnvelope>) -> Self {
        Self::Steps(envelopes.into_iter().map(ScriptStep::Emit).collect())
    }
}

#[derive(Default)]
pub struct ScriptedRuntime {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<RuntimeRequest>>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, turn: ScriptedTurn) -> &Self {
        self.turns.lock().push_back(turn);
        self
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<RuntimeRequest> {
        self.requests.lock().clone()
    }

    fn echo(req: &RuntimeRequest) -> ScriptedTurn {
        let session_id = req.resume_session_id.clone().unwrap_or_else(|| {
            let id = uuid::Uuid::new_v4().simple().to_string();
            format!("scripted-{}", &id[..12])
        });
        ScriptedTurn::emit([
            RawEnvelope::sse("session_id", json!({ "session_id": session_id }).to_string()),
            RawEnvelope::sse("text_delta", json!({ "text": req.content }).to_string()),
            RawEnvelope::sse("done", json!({ "model": "scripted-echo" }).to_string()),
        ])
    }
}

#[async_trait::async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn invoke(&self, req: RuntimeRequest) -> Result<EnvelopeStream> {
        self.requests.lock().push(req.clone());
        let turn = self
            .turns
            .lock()
            .pop_front()
            .unwrap_or_else(|| Self::echo(&req));

        let steps = match turn {
            ScriptedTurn::Refuse(reason) => return Err(Error::Runtime(reason)),
            ScriptedTurn::Steps(steps) => steps,
        };

        let stream = async_stream::stream! {
            for step in steps {
                match step {
                    ScriptStep::Emit(envelope) => yield Ok(envelope),
                    ScriptStep::Sleep(d) => tokio::time::sleep(d).await,
                    ScriptStep::Fail(reason) => {
                        yield Err(Error::Runtime(reason));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    fn transport(&self) -> &'static str {
        "scripted"
    }
}
