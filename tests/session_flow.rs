//! End-to-end flows through the router using wire-format events.
//!
//! Events are parsed from the JSON the server sends, commands are captured
//! from an unbounded channel standing in for the transport, and time is paused
//! so debounce flushes happen exactly when a tick is delivered.

use std::sync::Arc;

use agentview_lib::engine::{FlushTick, RouterEffect, SessionEventRouter};
use agentview_lib::protocol::{ClientCommand, SessionEvent};
use agentview_lib::storage::{ClientState, FileStore};
use agentview_lib::transcript::MessageKind;
use agentview_lib::{EngineConfig, Provider, RouteContext};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc::{self, UnboundedReceiver};

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    router: SessionEventRouter,
    commands: UnboundedReceiver<ClientCommand>,
    ticks: UnboundedReceiver<FlushTick>,
    ctx: RouteContext,
}

impl Harness {
    fn new(state: Option<ClientState>) -> Self {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (tick_tx, ticks) = mpsc::unbounded_channel();
        let router = SessionEventRouter::new(&EngineConfig::default(), Arc::new(command_tx), tick_tx, state);
        Self {
            router,
            commands,
            ticks,
            ctx: RouteContext::new(Provider::Claude).with_project("demo", "/work/demo"),
        }
    }

    fn send(&mut self, value: Value) -> Vec<RouterEffect> {
        let event: SessionEvent = serde_json::from_value(value).unwrap();
        self.router.route(Arc::new(event), &self.ctx)
    }

    /// Wait for the pending debounce timer and apply its flush.
    async fn flush(&mut self) {
        let tick = self.ticks.recv().await.unwrap();
        self.router.on_tick(tick);
    }

    fn sent(&mut self) -> Vec<ClientCommand> {
        let mut out = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            out.push(command);
        }
        out
    }
}

fn delta(session: &str, text: &str) -> Value {
    json!({
        "type": "claude-response",
        "sessionId": session,
        "data": {"type": "content_block_delta", "delta": {"type": "text_delta", "text": text}}
    })
}

fn tool_result(session: &str, tool_id: &str, content: &str) -> Value {
    json!({
        "type": "claude-response",
        "sessionId": session,
        "data": {"type": "user", "message": {"role": "user", "content": [
            {"type": "tool_result", "tool_use_id": tool_id, "content": content}
        ]}}
    })
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_placeholder_conversation_is_confirmed_with_streamed_reply() {
    let mut h = Harness::new(None);

    let ctx = h.ctx.clone();
    h.router.submit("hello", Vec::new(), &ctx).unwrap();
    let placeholder = h.router.active_view_id().unwrap().to_string();
    assert!(placeholder.starts_with("new-session-"));

    match h.sent().as_slice() {
        [ClientCommand::ClaudeCommand(cmd)] => {
            assert_eq!(cmd.command, "hello");
            assert_eq!(cmd.session_id, None);
        }
        other => panic!("unexpected commands {:?}", other),
    }

    h.send(delta(&placeholder, "Hi"));
    h.send(delta(&placeholder, " there"));
    h.flush().await;

    let effects = h.send(json!({"type": "session-created", "sessionId": "abc123"}));
    assert!(effects.contains(&RouterEffect::ReplacePlaceholder {
        placeholder: placeholder.clone(),
        real: "abc123".to_string(),
    }));

    h.send(json!({"type": "claude-complete", "sessionId": "abc123", "exitCode": 0}));

    let messages = h.router.transcript().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].kind, MessageKind::User);
    assert_eq!(messages[0].content, "hello");
    assert_eq!(messages[1].kind, MessageKind::Assistant);
    assert_eq!(messages[1].content, "Hi there");
    assert!(messages.iter().all(|m| m.session_id.as_deref() == Some("abc123")));
    assert!(messages.iter().all(|m| !m.is_streaming));
    assert!(!h.router.status().is_loading);
    assert!(!h.router.is_processing(&placeholder));
}

#[tokio::test]
async fn test_container_tool_tracks_child_and_completes() {
    let mut h = Harness::new(None);
    let ctx = h.ctx.clone();
    h.router.switch_session(Some("s1"), &ctx);

    h.send(json!({
        "type": "cursor-tool-use", "sessionId": "s1",
        "id": "t1", "toolName": "Task", "input": {"subagent_type": "x"}
    }));
    h.send(json!({
        "type": "cursor-tool-use", "sessionId": "s1",
        "id": "t2", "toolName": "Read", "input": {"file_path": "/a"}, "parentId": "t1"
    }));
    h.send(tool_result("s1", "t2", "contents of a"));
    h.send(tool_result("s1", "t1", "agent finished"));

    let messages = h.router.transcript().messages();
    assert_eq!(messages.len(), 1);
    let state = messages[0].subagent.as_ref().unwrap();
    assert_eq!(state.child_tools.len(), 1);
    assert_eq!(state.child_tools[0].tool_id, "t2");
    assert_eq!(
        state.child_tools[0].tool_result.as_ref().unwrap().content,
        json!("contents of a")
    );
    assert!(state.is_complete);
}

#[tokio::test]
async fn test_remembered_git_permission_answers_whole_batch() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::new(dir.path().join("state.json")));
    let state = ClientState::new(store, 50);
    let mut h = Harness::new(Some(state.clone()));
    let ctx = h.ctx.clone();
    h.router.switch_session(Some("s1"), &ctx);

    for (id, command) in [("r1", "git status"), ("r2", "git log --oneline")] {
        h.send(json!({
            "type": "claude-permission-request", "sessionId": "s1",
            "requestId": id, "toolName": "Bash", "input": {"command": command}
        }));
    }
    assert_eq!(h.router.pending_permissions().len(), 2);
    assert!(h.router.status().awaiting_permission);

    h.router.remember("r1").unwrap();

    let decisions: Vec<_> = h
        .sent()
        .into_iter()
        .map(|c| match c {
            ClientCommand::ClaudePermissionResponse(r) => (r.request_id, r.allow),
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(decisions, vec![("r1".to_string(), true), ("r2".to_string(), true)]);
    assert!(h.router.pending_permissions().is_empty());
    assert!(!h.router.status().awaiting_permission);
    assert_eq!(state.allowed_tools().unwrap(), vec!["Bash(git:*)"]);
}

#[tokio::test(start_paused = true)]
async fn test_streamed_text_equals_concatenated_deltas() {
    let cases: Vec<Vec<&str>> = vec![
        vec!["a"],
        vec!["Hello", ", ", "world", "!"],
        vec!["line one\n", "line two\n", "", "line three"],
        vec!["ü", "ñ", "í", "código ", "🦀"],
    ];

    for deltas in cases {
        let mut h = Harness::new(None);
        let ctx = h.ctx.clone();
        h.router.switch_session(Some("s1"), &ctx);

        for (i, text) in deltas.iter().enumerate() {
            h.send(delta("s1", text));
            if i % 2 == 1 {
                h.flush().await;
            }
        }
        h.send(json!({"type": "claude-response", "sessionId": "s1", "data": {"type": "content_block_stop"}}));

        let messages = h.router.transcript().messages();
        assert_eq!(messages.len(), 1, "deltas {:?}", deltas);
        assert_eq!(messages[0].content, deltas.concat());
        assert!(!messages[0].is_streaming);
    }
}

#[tokio::test]
async fn test_orphan_tool_result_leaves_transcript_untouched() {
    let mut h = Harness::new(None);
    let ctx = h.ctx.clone();
    h.router.switch_session(Some("s1"), &ctx);
    h.send(json!({
        "type": "claude-response", "sessionId": "s1",
        "data": {"message": {"role": "assistant", "content": [
            {"type": "tool_use", "id": "t1", "name": "Read", "input": {"file_path": "/a"}}
        ]}}
    }));
    let before = h.router.transcript().messages().to_vec();

    let effects = h.send(tool_result("s1", "never-seen", "late"));

    assert!(effects.is_empty());
    let after = h.router.transcript().messages();
    assert_eq!(after.len(), before.len());
    assert!(Arc::ptr_eq(&after[0], &before[0]));
}

#[tokio::test(start_paused = true)]
async fn test_switching_sessions_discards_stale_stream_and_tools() {
    let mut h = Harness::new(None);
    let ctx = h.ctx.clone();
    h.router.switch_session(Some("s1"), &ctx);
    h.send(json!({
        "type": "cursor-tool-use", "sessionId": "s1", "id": "t9", "toolName": "Bash"
    }));
    h.send(delta("s1", "half a sentence"));

    h.router.switch_session(Some("s2"), &ctx);
    h.send(tool_result("s2", "t9", "late result"));
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    while let Ok(tick) = h.ticks.try_recv() {
        h.router.on_tick(tick);
    }

    assert!(h.router.transcript().is_empty());
}
