use sb_domain::error::Result;
use sb_domain::normalize::RawEnvelope;
use sb_domain::stream::BoxStream;

/// One turn as handed to the external runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeRequest {
    /// The user's message.
    pub content: String,
    /// The runtime's own session id when continuing a bound session.
    pub resume_session_id: Option<String>,
}

/// Stream of raw transport envelopes for one turn.
pub type EnvelopeStream = BoxStream<'static, Result<RawEnvelope>>;

/// The external agent runtime: an opaque producer of raw event streams.
///
/// `invoke` fails only when the turn could not be started at all; failures
/// after that arrive as `Err` items on the stream.
#[async_trait::async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn invoke(&self, req: RuntimeRequest) -> Result<EnvelopeStream>;

    /// Short transport name for logs.
    fn transport(&self) -> &'static str;
}
