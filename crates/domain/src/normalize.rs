//! Event normalizer: transport envelope → [`AgentEvent`].
//!
//! Pure and stateless.  An SSE frame (`event:` name + JSON `data:`) and a
//! WebSocket text message (`{"type": ..., ...}`) describing the same thing
//! produce the same canonical event.  Keep-alives yield `None`; unknown
//! kinds pass through as [`AgentEvent::Unknown`]; envelopes missing a
//! required field are dropped with a warning.

use serde_json::{Map, Value};

use crate::event::AgentEvent;
use crate::trace::TraceEvent;

/// A raw message as received from a transport, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEnvelope {
    /// One SSE frame.  `event` is `None` when the frame had no `event:` line.
    Sse { event: Option<String>, data: String },
    /// One WebSocket text message.
    WebSocket { text: String },
}

impl RawEnvelope {
    pub fn sse(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Sse {
            event: Some(event.into()),
            data: data.into(),
        }
    }

    pub fn ws(text: impl Into<String>) -> Self {
        Self::WebSocket { text: text.into() }
    }

    fn transport(&self) -> &'static str {
        match self {
            Self::Sse { .. } => "sse",
            Self::WebSocket { .. } => "websocket",
        }
    }
}

/// Why an envelope did not produce an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dropped {
    /// Intentionally ignored (keep-alive, ping).
    KeepAlive,
    /// Structurally invalid: unparseable body or missing required field.
    Malformed(String),
}

/// Normalize one envelope, logging malformed input.
pub fn normalize(envelope: &RawEnvelope) -> Option<AgentEvent> {
    match try_normalize(envelope) {
        Ok(event) => Some(event),
        Err(Dropped::KeepAlive) => None,
        Err(Dropped::Malformed(reason)) => {
            tracing::warn!(
                transport = envelope.transport(),
                reason = %reason,
                "dropping malformed event"
            );
            TraceEvent::EventDropped {
                transport: envelope.transport().to_owned(),
                reason,
            }
            .emit();
            None
        }
    }
}

/// Normalize one envelope, reporting why it was dropped.
pub fn try_normalize(envelope: &RawEnvelope) -> Result<AgentEvent, Dropped> {
    let (kind, payload) = match envelope {
        RawEnvelope::Sse { event, data } => split_sse(event.as_deref(), data)?,
        RawEnvelope::WebSocket { text } => split_ws(text)?,
    };
    from_parts(&kind, payload)
}

/// Map a `(kind, payload)` pair to the canonical event.
pub fn from_parts(kind: &str, payload: Value) -> Result<AgentEvent, Dropped> {
    let kind = kind.trim();
    match kind {
        "ping" | "pong" | "keepalive" | "keep_alive" | "heartbeat" => Err(Dropped::KeepAlive),

        "session_id" | "session" | "session_started" => {
            let session_id = str_field(&payload, &["session_id", "id"])
                .ok_or_else(|| missing(kind, "session_id"))?;
            Ok(AgentEvent::SessionId {
                session_id,
                provisional: false,
            })
        }

        "text_delta" | "text" | "assistant_delta" | "content_delta" => {
            let text = str_field(&payload, &["text", "delta", "content"])
                .ok_or_else(|| missing(kind, "text"))?;
            Ok(AgentEvent::TextFragment {
                text,
                model: str_field(&payload, &["model"]),
            })
        }

        "reasoning_delta" | "reasoning" | "thinking" | "thinking_delta" => {
            let text = str_field(&payload, &["text", "thinking", "delta", "content"])
                .ok_or_else(|| missing(kind, "text"))?;
            Ok(AgentEvent::ReasoningFragment {
                text,
                model: str_field(&payload, &["model"]),
            })
        }

        "tool_use" | "tool_call" | "tool_invocation" => {
            let tool_name = str_field(&payload, &["name", "tool_name"])
                .ok_or_else(|| missing(kind, "name"))?;
            Ok(AgentEvent::ToolInvocationStart {
                call_id: str_field(&payload, &["id", "call_id", "tool_use_id"]).unwrap_or_default(),
                tool_name,
                input: payload
                    .get("input")
                    .or_else(|| payload.get("arguments"))
                    .cloned()
                    .unwrap_or(Value::Null),
                model: str_field(&payload, &["model"]),
            })
        }

        "tool_result" => {
            let content = ["content", "output", "result"]
                .iter()
                .find_map(|k| payload.get(*k))
                .map(content_to_string)
                .ok_or_else(|| missing(kind, "content"))?;
            Ok(AgentEvent::ToolResult {
                call_id: str_field(&payload, &["tool_use_id", "call_id", "id"]).unwrap_or_default(),
                content,
                is_error: payload
                    .get("is_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            })
        }

        "done" | "complete" | "turn_complete" => Ok(AgentEvent::TerminalOk {
            model: str_field(&payload, &["model"]),
            usage: payload.get("usage").cloned(),
        }),

        "error" => {
            let message = str_field(&payload, &["message", "error"])
                .or_else(|| {
                    payload
                        .get("error")
                        .and_then(|e| e.get("message"))
                        .and_then(Value::as_str)
                        .map(str::to_owned)
                })
                .or_else(|| payload.as_str().map(str::to_owned))
                .unwrap_or_else(|| "runtime reported an error".to_owned());
            Ok(AgentEvent::TerminalError {
                message,
                code: str_field(&payload, &["code"]),
            })
        }

        "" => Err(Dropped::Malformed("empty event kind".into())),

        other => Ok(AgentEvent::Unknown {
            kind: other.to_owned(),
            payload,
        }),
    }
}

// ── Envelope splitting ──────────────────────────────────────────────

fn split_sse(event: Option<&str>, data: &str) -> Result<(String, Value), Dropped> {
    let named = event
        .map(str::trim)
        .filter(|e| !e.is_empty() && *e != "message");

    let data = data.trim();
    if data.is_empty() {
        // An SSE comment or blank frame is a keep-alive.
        return match named {
            Some(kind) => Ok((kind.to_owned(), Value::Object(Map::new()))),
            None => Err(Dropped::KeepAlive),
        };
    }

    let payload: Value = serde_json::from_str(data)
        .map_err(|e| Dropped::Malformed(format!("sse data is not JSON: {e}")))?;

    match named {
        Some(kind) => Ok((kind.to_owned(), strip_named(kind, payload))),
        None => take_type(payload),
    }
}

/// Give a named SSE frame the same payload shape a WebSocket message gets:
/// an embedded discriminant equal to the frame name is dropped and a lone
/// `data` wrapper is unwrapped.  A discriminant that disagrees with the
/// name is payload and stays.
fn strip_named(kind: &str, payload: Value) -> Value {
    let Value::Object(mut obj) = payload else {
        return payload;
    };
    for key in ["type", "event"] {
        if obj.get(key).and_then(Value::as_str).map(str::trim) == Some(kind) {
            obj.remove(key);
        }
    }
    unwrap_data(obj)
}

fn split_ws(text: &str) -> Result<(String, Value), Dropped> {
    let payload: Value = serde_json::from_str(text)
        .map_err(|e| Dropped::Malformed(format!("websocket message is not JSON: {e}")))?;
    take_type(payload)
}

/// Pull the discriminant out of a self-describing object.  A message of
/// the shape `{"type": k, "data": {...}}` is unwrapped to its `data`.
fn take_type(payload: Value) -> Result<(String, Value), Dropped> {
    let Value::Object(mut obj) = payload else {
        return Err(Dropped::Malformed("message is not a JSON object".into()));
    };

    let kind = match obj.remove("type").or_else(|| obj.remove("event")) {
        Some(Value::String(k)) => k,
        Some(_) => return Err(Dropped::Malformed("`type` is not a string".into())),
        None => return Err(Dropped::Malformed("missing `type`".into())),
    };

    Ok((kind, unwrap_data(obj)))
}

fn unwrap_data(mut obj: Map<String, Value>) -> Value {
    if obj.len() == 1 {
        if let Some(data) = obj.remove("data") {
            return data;
        }
    }
    Value::Object(obj)
}

// ── Field helpers ───────────────────────────────────────────────────

fn str_field(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| payload.get(*k).and_then(Value::as_str))
        .map(str::to_owned)
}

fn content_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        // Content-block arrays: join the text parts.
        Value::Array(parts) if parts.iter().all(|p| p.get("text").is_some()) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        other => other.to_string(),
    }
}

fn missing(kind: &str, field: &str) -> Dropped {
    Dropped::Malformed(format!("`{kind}` event missing required field `{field}`"))
}
