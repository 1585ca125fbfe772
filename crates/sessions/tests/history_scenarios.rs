use sb_domain::event::AgentEvent;
use sb_domain::normalize::{normalize, RawEnvelope};
use sb_sessions::{HistoryTracker, Role, TranscriptEntry};
use serde_json::json;

fn run(events: &[AgentEvent]) -> Vec<TranscriptEntry> {
    let mut tracker = HistoryTracker::new();
    events.iter().flat_map(|e| tracker.observe(e)).collect()
}

fn summary(entries: &[TranscriptEntry]) -> Vec<(Role, String)> {
    entries.iter().map(|e| (e.role, e.content.clone())).collect()
}

#[test]
fn tool_round_between_two_answers() {
    let entries = run(&[
        AgentEvent::text("Hi"),
        AgentEvent::tool_use("t1", "lookup", json!({"q": "answer"})),
        AgentEvent::tool_result("t1", "42"),
        AgentEvent::text("answer is 42"),
        AgentEvent::done(),
    ]);

    assert_eq!(
        summary(&entries),
        vec![
            (Role::Assistant, "Hi".to_string()),
            (Role::ToolInvocation, "lookup".to_string()),
            (Role::ToolResult, "42".to_string()),
            (Role::Assistant, "answer is 42".to_string()),
        ]
    );
    assert_eq!(entries[1].metadata.as_ref().unwrap()["call_id"], "t1");
    assert_eq!(entries[2].metadata.as_ref().unwrap()["call_id"], "t1");
}

#[test]
fn fragmented_text_before_tool_is_one_entry_ahead_of_it() {
    let mut events: Vec<AgentEvent> = "Let me look that up"
        .split_inclusive(' ')
        .map(AgentEvent::text)
        .collect();
    events.push(AgentEvent::tool_use("t1", "search", json!({})));
    events.push(AgentEvent::done());

    let entries = run(&events);
    assert_eq!(
        summary(&entries),
        vec![
            (Role::Assistant, "Let me look that up".to_string()),
            (Role::ToolInvocation, "search".to_string()),
        ]
    );
}

#[test]
fn no_empty_entries_and_no_merge_across_tool_rounds() {
    let entries = run(&[
        AgentEvent::text(""),
        AgentEvent::tool_use("a", "one", json!(null)),
        AgentEvent::tool_result("a", "r1"),
        AgentEvent::text("between"),
        AgentEvent::tool_use("b", "two", json!(null)),
        AgentEvent::tool_result("b", "r2"),
        AgentEvent::text(" "),
        AgentEvent::text("after"),
        AgentEvent::done(),
    ]);

    assert!(entries.iter().all(|e| !e.content.trim().is_empty()));
    let assistant: Vec<_> = entries
        .iter()
        .filter(|e| e.role == Role::Assistant)
        .map(|e| e.content.as_str())
        .collect();
    assert_eq!(assistant, vec!["between", " after"]);
}

#[test]
fn parallel_tool_calls_keep_runtime_order() {
    let entries = run(&[
        AgentEvent::tool_use("a", "read", json!({})),
        AgentEvent::tool_use("b", "grep", json!({})),
        AgentEvent::tool_result("b", "grep out"),
        AgentEvent::tool_result("a", "read out"),
        AgentEvent::done(),
    ]);
    let contents: Vec<_> = entries.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(contents, vec!["read", "grep", "grep out", "read out"]);
}

#[test]
fn sse_and_websocket_streams_build_the_same_transcript() {
    let sse = [
        RawEnvelope::sse("session_id", r#"{"session_id":"sdk-abc"}"#),
        RawEnvelope::sse("text_delta", r#"{"text":"Hi"}"#),
        RawEnvelope::sse("ping", ""),
        RawEnvelope::sse("tool_use", r#"{"id":"t1","name":"lookup","input":{}}"#),
        RawEnvelope::sse("tool_result", r#"{"tool_use_id":"t1","content":"42"}"#),
        RawEnvelope::sse("text_delta", r#"{"text":"answer is 42"}"#),
        RawEnvelope::sse("done", "{}"),
    ];
    let ws = [
        RawEnvelope::ws(r#"{"type":"session_id","session_id":"sdk-abc"}"#),
        RawEnvelope::ws(r#"{"type":"text_delta","text":"Hi"}"#),
        RawEnvelope::ws(r#"{"type":"ping"}"#),
        RawEnvelope::ws(r#"{"type":"tool_use","id":"t1","name":"lookup","input":{}}"#),
        RawEnvelope::ws(r#"{"type":"tool_result","tool_use_id":"t1","content":"42"}"#),
        RawEnvelope::ws(r#"{"type":"text_delta","text":"answer is 42"}"#),
        RawEnvelope::ws(r#"{"type":"done"}"#),
    ];

    let from_sse: Vec<AgentEvent> = sse.iter().filter_map(normalize).collect();
    let from_ws: Vec<AgentEvent> = ws.iter().filter_map(normalize).collect();
    assert_eq!(from_sse, from_ws);

    assert_eq!(summary(&run(&from_sse)), summary(&run(&from_ws)));
    assert_eq!(run(&from_sse).len(), 4);
}

#[test]
fn malformed_event_does_not_abort_the_turn() {
    let envelopes = [
        RawEnvelope::sse("text_delta", r#"{"text":"one "}"#),
        RawEnvelope::sse("text_delta", r#"{"oops":true}"#),
        RawEnvelope::sse("text_delta", r#"{"text":"two"}"#),
        RawEnvelope::sse("done", "{}"),
    ];
    let events: Vec<AgentEvent> = envelopes.iter().filter_map(normalize).collect();
    let entries = run(&events);
    assert_eq!(summary(&entries), vec![(Role::Assistant, "one two".to_string())]);
}
