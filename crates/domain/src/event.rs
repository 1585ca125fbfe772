//! The canonical agent event.
//!
//! Every transport (the runtime's SSE or WebSocket stream on the way in,
//! the client's SSE or WebSocket connection on the way out) is reduced to
//! this one closed union.  The wire discriminants are shared by both
//! directions and both transports:
//!
//! | variant               | wire kind         |
//! |-----------------------|-------------------|
//! | `SessionId`           | `session_id`      |
//! | `TextFragment`        | `text_delta`      |
//! | `ReasoningFragment`   | `reasoning_delta` |
//! | `ToolInvocationStart` | `tool_use`        |
//! | `ToolResult`          | `tool_result`     |
//! | `TerminalOk`          | `done`            |
//! | `TerminalError`       | `error`           |
//! | `Unknown`             | raw kind, as sent |

use serde::Serialize;
use serde_json::{Map, Value};

/// Closed set of event discriminants known to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionId,
    TextDelta,
    ReasoningDelta,
    ToolUse,
    ToolResult,
    Done,
    Error,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionId => "session_id",
            Self::TextDelta => "text_delta",
            Self::ReasoningDelta => "reasoning_delta",
            Self::ToolUse => "tool_use",
            Self::ToolResult => "tool_result",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

/// One item of a turn's event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// The runtime announced its session id (`provisional == false`), or
    /// the gateway is telling the client which provisional handle the
    /// turn runs under (`provisional == true`).
    SessionId { session_id: String, provisional: bool },

    /// A chunk of assistant text.
    TextFragment { text: String, model: Option<String> },

    /// A chunk of model reasoning.
    ReasoningFragment { text: String, model: Option<String> },

    /// The runtime started a tool call.
    ToolInvocationStart {
        call_id: String,
        tool_name: String,
        input: Value,
        model: Option<String>,
    },

    /// A tool call finished.
    ToolResult {
        call_id: String,
        content: String,
        is_error: bool,
    },

    /// The turn completed.
    TerminalOk {
        model: Option<String>,
        usage: Option<Value>,
    },

    /// The turn failed.  `code` carries a machine-readable reason for
    /// gateway-originated failures (`session_busy`, `runtime_failed`, ...).
    TerminalError {
        message: String,
        code: Option<String>,
    },

    /// A kind this gateway does not model; forwarded untouched.
    Unknown { kind: String, payload: Value },
}

impl AgentEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextFragment {
            text: text.into(),
            model: None,
        }
    }

    pub fn tool_use(call_id: impl Into<String>, tool_name: impl Into<String>, input: Value) -> Self {
        Self::ToolInvocationStart {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            input,
            model: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn done() -> Self {
        Self::TerminalOk {
            model: None,
            usage: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::TerminalError {
            message: message.into(),
            code: None,
        }
    }

    pub fn error_with_code(message: impl Into<String>, code: &str) -> Self {
        Self::TerminalError {
            message: message.into(),
            code: Some(code.to_owned()),
        }
    }

    /// `None` for [`AgentEvent::Unknown`].
    pub fn known_kind(&self) -> Option<EventKind> {
        Some(match self {
            Self::SessionId { .. } => EventKind::SessionId,
            Self::TextFragment { .. } => EventKind::TextDelta,
            Self::ReasoningFragment { .. } => EventKind::ReasoningDelta,
            Self::ToolInvocationStart { .. } => EventKind::ToolUse,
            Self::ToolResult { .. } => EventKind::ToolResult,
            Self::TerminalOk { .. } => EventKind::Done,
            Self::TerminalError { .. } => EventKind::Error,
            Self::Unknown { .. } => return None,
        })
    }

    /// Wire discriminant, identical for SSE event names and WebSocket `type`.
    pub fn wire_kind(&self) -> &str {
        match self {
            Self::Unknown { kind, .. } => kind,
            other => other.known_kind().map(EventKind::as_str).unwrap_or_default(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TerminalOk { .. } | Self::TerminalError { .. })
    }

    /// Wire payload: the SSE `data:` body, or the WebSocket message minus `type`.
    pub fn wire_payload(&self) -> Value {
        let mut obj = Map::new();
        match self {
            Self::SessionId {
                session_id,
                provisional,
            } => {
                obj.insert("session_id".into(), Value::String(session_id.clone()));
                if *provisional {
                    obj.insert("provisional".into(), Value::Bool(true));
                }
            }
            Self::TextFragment { text, model } | Self::ReasoningFragment { text, model } => {
                obj.insert("text".into(), Value::String(text.clone()));
                insert_opt(&mut obj, "model", model);
            }
            Self::ToolInvocationStart {
                call_id,
                tool_name,
                input,
                model,
            } => {
                obj.insert("id".into(), Value::String(call_id.clone()));
                obj.insert("name".into(), Value::String(tool_name.clone()));
                obj.insert("input".into(), input.clone());
                insert_opt(&mut obj, "model", model);
            }
            Self::ToolResult {
                call_id,
                content,
                is_error,
            } => {
                obj.insert("tool_use_id".into(), Value::String(call_id.clone()));
                obj.insert("content".into(), Value::String(content.clone()));
                if *is_error {
                    obj.insert("is_error".into(), Value::Bool(true));
                }
            }
            Self::TerminalOk { model, usage } => {
                insert_opt(&mut obj, "model", model);
                if let Some(usage) = usage {
                    obj.insert("usage".into(), usage.clone());
                }
            }
            Self::TerminalError { message, code } => {
                obj.insert("message".into(), Value::String(message.clone()));
                insert_opt(&mut obj, "code", code);
            }
            Self::Unknown { payload, .. } => return payload.clone(),
        }
        Value::Object(obj)
    }

    /// The event as a single WebSocket JSON message: `{"type": kind, ...payload}`.
    ///
    /// Non-object payloads of unknown kinds are nested under `data`.
    pub fn to_ws_message(&self) -> Value {
        let kind = Value::String(self.wire_kind().to_owned());
        match self.wire_payload() {
            Value::Object(mut obj) => {
                obj.insert("type".into(), kind);
                Value::Object(obj)
            }
            other => {
                let mut obj = Map::new();
                obj.insert("type".into(), kind);
                obj.insert("data".into(), other);
                Value::Object(obj)
            }
        }
    }
}

fn insert_opt(obj: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        obj.insert(key.into(), Value::String(v.clone()));
    }
}
