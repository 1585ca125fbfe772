//! Runtime client over WebSocket.
//!
//! One connection per turn: connect, send a `turn` message, then relay
//! every text frame as a [`RawEnvelope::WebSocket`] until the runtime closes
//! the socket or the caller drops the stream.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use sb_domain::error::{Error, Result};
use sb_domain::normalize::RawEnvelope;

use crate::traits::{AgentRuntime, EnvelopeStream, RuntimeRequest};

pub struct WsRuntime {
    url: String,
    api_key: Option<String>,
    connect_timeout: Duration,
}

impl WsRuntime {
    pub fn new(url: &str, api_key: Option<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.to_owned(),
            api_key,
            connect_timeout,
        }
    }
}

#[async_trait::async_trait]
impl AgentRuntime for WsRuntime {
    async fn invoke(&self, req: RuntimeRequest) -> Result<EnvelopeStream> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Runtime(format!("invalid runtime url: {e}")))?;
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| Error::Config(format!("runtime api key: {e}")))?;
            request.headers_mut().insert("authorization", value);
        }

        let (ws, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| Error::Timeout(format!("connecting to {}", self.url)))?
                .map_err(|e| Error::Runtime(format!("websocket connect: {e}")))?;
        let (mut sink, mut stream) = ws.split();

        let mut turn = json!({ "type": "turn", "content": req.content });
        if let Some(id) = &req.resume_session_id {
            turn["session_id"] = json!(id);
        }
        sink.send(Message::Text(turn.to_string()))
            .await
            .map_err(|e| Error::Runtime(format!("sending turn: {e}")))?;

        tracing::debug!(url = %self.url, resumed = req.resume_session_id.is_some(), "runtime socket opened");

        let envelopes = async_stream::stream! {
            // Keep the write half alive so the socket is not half-closed.
            let mut sink = sink;
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => yield Ok(RawEnvelope::WebSocket { text }),
                    Ok(Message::Ping(payload)) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(?frame, "runtime closed socket");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        yield Err(Error::Runtime(format!("websocket read: {e}")));
                        break;
                    }
                }
            }
            let _ = sink.close().await;
        };

        Ok(Box::pin(envelopes))
    }

    fn transport(&self) -> &'static str {
        "websocket"
    }
}
