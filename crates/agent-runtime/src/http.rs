//! Runtime client over HTTP + SSE.

use std::time::Duration;

use serde_json::json;

use sb_domain::error::{Error, Result};

use crate::sse::{from_reqwest, sse_envelope_stream};
use crate::traits::{AgentRuntime, EnvelopeStream, RuntimeRequest};

/// POSTs `{content, session_id?}` to the runtime's turn endpoint and reads
/// the response body as an SSE stream.
pub struct HttpSseRuntime {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpSseRuntime {
    pub fn new(url: &str, api_key: Option<String>, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_owned(),
            api_key,
        })
    }
}

#[async_trait::async_trait]
impl AgentRuntime for HttpSseRuntime {
    async fn invoke(&self, req: RuntimeRequest) -> Result<EnvelopeStream> {
        let mut body = json!({ "content": req.content });
        if let Some(id) = &req.resume_session_id {
            body["session_id"] = json!(id);
        }

        let mut request = self
            .client
            .post(&self.url)
            .header("accept", "text/event-stream")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Runtime(format!("runtime returned {status}: {text}")));
        }

        tracing::debug!(url = %self.url, resumed = req.resume_session_id.is_some(), "runtime stream opened");
        Ok(sse_envelope_stream(response))
    }

    fn transport(&self) -> &'static str {
        "sse"
    }
}
