//! History tracker: one turn's canonical event stream → transcript entries.
//!
//! Contiguous text fragments coalesce into a single assistant entry, and
//! contiguous reasoning fragments into a single reasoning entry.  Pending
//! text is always flushed before a tool invocation or tool result is
//! appended, so the persisted order matches the order the runtime produced.
//! No entry is ever persisted with empty content: blank text is discarded
//! and a blank tool result or error message gets a placeholder.

use std::collections::HashMap;

use serde_json::{json, Value};

use sb_domain::event::AgentEvent;

use crate::transcript::{Role, TranscriptEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    AccumulatingText,
    AccumulatingReasoning,
    InToolCall,
    Finalized,
}

pub struct HistoryTracker {
    state: TrackerState,
    buffer: String,
    pending_models: HashMap<Role, String>,
    emitted: usize,
}

impl Default for HistoryTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryTracker {
    pub fn new() -> Self {
        Self {
            state: TrackerState::Idle,
            buffer: String::new(),
            pending_models: HashMap::new(),
            emitted: 0,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn is_finalized(&self) -> bool {
        self.state == TrackerState::Finalized
    }

    /// Number of entries produced so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Feed one event; returns the entries it finalized, in append order.
    pub fn observe(&mut self, event: &AgentEvent) -> Vec<TranscriptEntry> {
        if self.is_finalized() {
            tracing::debug!(kind = event.wire_kind(), "event after terminal ignored");
            return Vec::new();
        }

        let mut out = Vec::new();
        match event {
            AgentEvent::TextFragment { text, model } => {
                self.note_model(Role::Assistant, model);
                if self.state != TrackerState::AccumulatingText {
                    self.flush(&mut out);
                    self.state = TrackerState::AccumulatingText;
                }
                self.buffer.push_str(text);
            }

            AgentEvent::ReasoningFragment { text, model } => {
                self.note_model(Role::Reasoning, model);
                if self.state != TrackerState::AccumulatingReasoning {
                    self.flush(&mut out);
                    self.state = TrackerState::AccumulatingReasoning;
                }
                self.buffer.push_str(text);
            }

            AgentEvent::ToolInvocationStart {
                call_id,
                tool_name,
                input,
                model,
            } => {
                self.flush(&mut out);
                self.note_model(Role::ToolInvocation, model);
                let meta = json!({
                    "call_id": call_id,
                    "tool_name": tool_name,
                    "input": input,
                });
                self.push(&mut out, Role::ToolInvocation, tool_name.clone(), Some(meta));
                self.state = TrackerState::InToolCall;
            }

            AgentEvent::ToolResult {
                call_id,
                content,
                is_error,
            } => {
                self.flush(&mut out);
                let meta = json!({ "call_id": call_id, "is_error": is_error });
                self.push(&mut out, Role::ToolResult, content.clone(), Some(meta));
                self.state = TrackerState::InToolCall;
            }

            AgentEvent::TerminalOk { model, .. } => {
                // A model reported on completion describes the text that
                // preceded it, unless a fragment already named one.
                if let Some(m) = model {
                    self.pending_models
                        .entry(Role::Assistant)
                        .or_insert_with(|| m.clone());
                }
                self.flush(&mut out);
                self.state = TrackerState::Finalized;
            }

            AgentEvent::TerminalError { message, code } => {
                self.flush(&mut out);
                let mut meta = json!({ "kind": "terminal_error" });
                if let Some(code) = code {
                    meta["code"] = Value::String(code.clone());
                }
                self.push(&mut out, Role::System, message.clone(), Some(meta));
                self.state = TrackerState::Finalized;
            }

            AgentEvent::SessionId { .. } | AgentEvent::Unknown { .. } => {}
        }
        out
    }

    /// The turn was cut short (client gone, timeout).  Flushes whatever
    /// text was pending and records a system marker.
    pub fn interrupt(&mut self, reason: &str) -> Vec<TranscriptEntry> {
        if self.is_finalized() {
            return Vec::new();
        }
        let mut out = Vec::new();
        self.flush(&mut out);
        self.push(
            &mut out,
            Role::System,
            reason.to_owned(),
            Some(json!({ "kind": "interrupted" })),
        );
        self.state = TrackerState::Finalized;
        out
    }

    // ── Private helpers ───────────────────────────────────────────────

    fn note_model(&mut self, role: Role, model: &Option<String>) {
        if let Some(m) = model {
            self.pending_models.insert(role, m.clone());
        }
    }

    /// Finalize the accumulating text or reasoning entry, if any.
    /// Whitespace-only buffers are discarded.
    fn flush(&mut self, out: &mut Vec<TranscriptEntry>) {
        let role = match self.state {
            TrackerState::AccumulatingText => Role::Assistant,
            TrackerState::AccumulatingReasoning => Role::Reasoning,
            _ => return,
        };
        let content = std::mem::take(&mut self.buffer);
        self.state = TrackerState::Idle;
        if content.trim().is_empty() {
            return;
        }
        self.push(out, role, content, None);
    }

    fn push(
        &mut self,
        out: &mut Vec<TranscriptEntry>,
        role: Role,
        content: String,
        meta: Option<Value>,
    ) {
        let mut meta = meta;
        if let Some(model) = self.pending_models.remove(&role) {
            let obj = meta.get_or_insert_with(|| json!({}));
            obj["model"] = Value::String(model);
        }
        let content = if content.trim().is_empty() {
            placeholder(role).to_owned()
        } else {
            content
        };
        let mut entry = TranscriptEntry::new(role, content);
        if let Some(meta) = meta {
            entry = entry.with_metadata(meta);
        }
        out.push(entry);
        self.emitted += 1;
    }
}

/// Content for an entry whose payload carried no text.  Structured
/// details stay in the metadata.
fn placeholder(role: Role) -> &'static str {
    match role {
        Role::ToolResult => "(empty tool result)",
        Role::ToolInvocation => "(unnamed tool)",
        Role::System => "(no message)",
        _ => "(empty)",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(entries: &[TranscriptEntry]) -> Vec<Role> {
        entries.iter().map(|e| e.role).collect()
    }

    #[test]
    fn contiguous_text_coalesces() {
        let mut t = HistoryTracker::new();
        assert!(t.observe(&AgentEvent::text("Hel")).is_empty());
        assert!(t.observe(&AgentEvent::text("lo")).is_empty());
        assert_eq!(t.state(), TrackerState::AccumulatingText);

        let out = t.observe(&AgentEvent::done());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, "Hello");
        assert_eq!(out[0].role, Role::Assistant);
        assert!(t.is_finalized());
    }

    #[test]
    fn text_flushes_before_tool_invocation() {
        let mut t = HistoryTracker::new();
        t.observe(&AgentEvent::text("Let me check"));
        let out = t.observe(&AgentEvent::tool_use("t1", "lookup", json!({})));
        assert_eq!(roles(&out), vec![Role::Assistant, Role::ToolInvocation]);
        assert_eq!(out[0].content, "Let me check");
        assert_eq!(t.state(), TrackerState::InToolCall);
    }

    #[test]
    fn whitespace_text_is_dropped() {
        let mut t = HistoryTracker::new();
        t.observe(&AgentEvent::text("  \n"));
        let out = t.observe(&AgentEvent::done());
        assert!(out.is_empty());
        assert_eq!(t.emitted(), 0);
    }

    #[test]
    fn empty_tool_result_gets_placeholder() {
        let mut t = HistoryTracker::new();
        t.observe(&AgentEvent::tool_use("t1", "touch", json!({})));
        let out = t.observe(&AgentEvent::tool_result("t1", ""));
        assert_eq!(roles(&out), vec![Role::ToolResult]);
        assert_eq!(out[0].content, "(empty tool result)");
        assert_eq!(out[0].metadata.as_ref().unwrap()["call_id"], "t1");
        assert!(out.iter().all(|e| !e.content.is_empty()));
    }

    #[test]
    fn reasoning_never_merges_with_text() {
        let mut t = HistoryTracker::new();
        t.observe(&AgentEvent::ReasoningFragment {
            text: "thinking".into(),
            model: None,
        });
        let out = t.observe(&AgentEvent::text("answer"));
        assert_eq!(roles(&out), vec![Role::Reasoning]);
        let out = t.observe(&AgentEvent::done());
        assert_eq!(roles(&out), vec![Role::Assistant]);
    }

    #[test]
    fn terminal_error_appends_system_entry() {
        let mut t = HistoryTracker::new();
        t.observe(&AgentEvent::text("partial"));
        let out = t.observe(&AgentEvent::error_with_code("boom", "runtime_failed"));
        assert_eq!(roles(&out), vec![Role::Assistant, Role::System]);
        assert_eq!(out[1].content, "boom");
        assert_eq!(out[1].metadata.as_ref().unwrap()["code"], "runtime_failed");
    }

    #[test]
    fn events_after_terminal_are_ignored() {
        let mut t = HistoryTracker::new();
        t.observe(&AgentEvent::done());
        assert!(t.observe(&AgentEvent::text("late")).is_empty());
        assert!(t.interrupt("gone").is_empty());
    }

    #[test]
    fn interrupt_flushes_pending_text() {
        let mut t = HistoryTracker::new();
        t.observe(&AgentEvent::text("half an ans"));
        let out = t.interrupt("client disconnected");
        assert_eq!(roles(&out), vec![Role::Assistant, Role::System]);
        assert_eq!(out[0].content, "half an ans");
        assert_eq!(out[1].metadata.as_ref().unwrap()["kind"], "interrupted");
    }

    #[test]
    fn model_attaches_to_next_entry_of_matching_role() {
        let mut t = HistoryTracker::new();
        t.observe(&AgentEvent::TextFragment {
            text: "a".into(),
            model: Some("m-1".into()),
        });
        let out = t.observe(&AgentEvent::tool_use("t1", "grep", json!({})));
        assert_eq!(out[0].metadata.as_ref().unwrap()["model"], "m-1");
        // The tool entry did not inherit the assistant model.
        assert!(out[1].metadata.as_ref().unwrap().get("model").is_none());
    }

    #[test]
    fn model_on_done_labels_pending_text() {
        let mut t = HistoryTracker::new();
        t.observe(&AgentEvent::text("hi"));
        let out = t.observe(&AgentEvent::TerminalOk {
            model: Some("m-2".into()),
            usage: None,
        });
        assert_eq!(out[0].metadata.as_ref().unwrap()["model"], "m-2");
    }

    #[test]
    fn unknown_and_session_events_are_transparent() {
        let mut t = HistoryTracker::new();
        t.observe(&AgentEvent::text("a"));
        t.observe(&AgentEvent::Unknown {
            kind: "status".into(),
            payload: json!({}),
        });
        t.observe(&AgentEvent::SessionId {
            session_id: "sdk".into(),
            provisional: false,
        });
        t.observe(&AgentEvent::text("b"));
        let out = t.observe(&AgentEvent::done());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, "ab");
    }
}
