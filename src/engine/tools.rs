//! Correlates tool invocations with their results.
//!
//! Results are matched by tool id, never by arrival order. Calls made by a
//! sub-agent are folded into the container call that spawned them instead of
//! becoming transcript entries of their own.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;

use crate::protocol::{ToolCall, ToolOutcome};
use crate::transcript::{ChildToolCall, SubagentState, ToolResult, Transcript, TranscriptMessage};

/// Tool names whose calls run a sub-agent and own child calls.
const CONTAINER_TOOLS: &[&str] = &["Task", "Agent"];

pub fn is_container_tool(name: &str) -> bool {
    CONTAINER_TOOLS.contains(&name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingToolCall {
    /// Transcript entry showing the call. For children this is the container's entry.
    message_id: String,
    /// Set for children: the container tool id.
    parent_id: Option<String>,
    is_container: bool,
}

#[derive(Debug, Default)]
pub struct ToolCorrelator {
    pending: HashMap<String, PendingToolCall>,
}

impl ToolCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_pending(&self, tool_id: &str) -> bool {
        self.pending.contains_key(tool_id)
    }

    /// Record a tool invocation. Returns `true` if the transcript changed.
    pub fn on_tool_use(
        &mut self,
        call: &ToolCall,
        transcript: &mut Transcript,
        session_id: Option<&str>,
    ) -> bool {
        if let Some(existing) = self.pending.get(&call.id).cloned() {
            return Self::refresh_call(&existing, call, transcript);
        }

        if let Some(parent_id) = call.parent_id.as_deref() {
            match self.pending.get(parent_id) {
                Some(parent) if parent.is_container => {
                    let message_id = parent.message_id.clone();
                    return self.attach_child(parent_id, message_id, call, transcript);
                }
                _ => log::debug!(
                    "Parent {} of tool {} is not a pending container; showing it top-level",
                    parent_id,
                    call.id
                ),
            }
        }

        let is_container = is_container_tool(&call.name);
        let mut message = TranscriptMessage::tool_use(&call.id, &call.name, call.input.clone())
            .with_session(session_id.map(str::to_string));
        if is_container {
            message.subagent = Some(SubagentState::default());
        }
        let message_id = transcript.push(message).id.clone();

        self.pending.insert(
            call.id.clone(),
            PendingToolCall {
                message_id,
                parent_id: None,
                is_container,
            },
        );
        true
    }

    fn attach_child(
        &mut self,
        parent_id: &str,
        message_id: String,
        call: &ToolCall,
        transcript: &mut Transcript,
    ) -> bool {
        let child = ChildToolCall {
            tool_id: call.id.clone(),
            tool_name: call.name.clone(),
            tool_input: call.input.clone(),
            tool_result: None,
            timestamp: Utc::now(),
        };
        let attached = transcript.update(&message_id, |container| {
            let state = container.subagent.get_or_insert_with(SubagentState::default);
            state.child_tools.push(child);
            state.current_index = Some(state.child_tools.len() - 1);
        });
        if !attached {
            log::debug!("Container message for {} is gone; dropping child {}", parent_id, call.id);
            return false;
        }

        self.pending.insert(
            call.id.clone(),
            PendingToolCall {
                message_id,
                parent_id: Some(parent_id.to_string()),
                is_container: false,
            },
        );
        true
    }

    /// A repeated tool-use for a known id updates the entry in place.
    fn refresh_call(pending: &PendingToolCall, call: &ToolCall, transcript: &mut Transcript) -> bool {
        match pending.parent_id {
            Some(_) => transcript.update(&pending.message_id, |container| {
                if let Some(child) = container
                    .subagent
                    .as_mut()
                    .and_then(|s| s.child_tools.iter_mut().find(|c| c.tool_id == call.id))
                {
                    child.tool_name = call.name.clone();
                    child.tool_input = call.input.clone();
                }
            }),
            None => transcript.update(&pending.message_id, |message| {
                message.tool_name = Some(call.name.clone());
                message.tool_input = Some(call.input.clone());
            }),
        }
    }

    /// Apply a tool result. Results for ids that are not pending are dropped.
    pub fn on_tool_result(&mut self, outcome: &ToolOutcome, transcript: &mut Transcript) -> bool {
        let Some(pending) = self.pending.remove(&outcome.tool_use_id) else {
            log::debug!("Dropping result for untracked tool {}", outcome.tool_use_id);
            return false;
        };

        let result = ToolResult {
            content: outcome.content.clone(),
            is_error: outcome.is_error,
            timestamp: Utc::now(),
        };

        match pending.parent_id {
            Some(_) => transcript.update(&pending.message_id, |container| {
                if let Some(child) = container
                    .subagent
                    .as_mut()
                    .and_then(|s| s.child_tools.iter_mut().find(|c| c.tool_id == outcome.tool_use_id))
                {
                    child.tool_result = Some(result);
                }
            }),
            None => transcript.update(&pending.message_id, |message| {
                message.tool_result = Some(result);
                if pending.is_container {
                    message
                        .subagent
                        .get_or_insert_with(SubagentState::default)
                        .is_complete = true;
                }
            }),
        }
    }

    /// Forget every pending call; late results will then be dropped.
    pub fn abandon_all(&mut self) {
        if !self.pending.is_empty() {
            log::debug!("Abandoning {} pending tool calls", self.pending.len());
        }
        self.pending.clear();
    }
}

/// Human-readable text of a tool result payload.
pub fn result_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn call(id: &str, name: &str, parent: Option<&str>) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            input: json!({"id": id}),
            parent_id: parent.map(str::to_string),
        }
    }

    fn outcome(id: &str, content: &str, is_error: bool) -> ToolOutcome {
        ToolOutcome {
            tool_use_id: id.to_string(),
            content: json!(content),
            is_error,
        }
    }

    fn message_for<'a>(transcript: &'a Transcript, tool_id: &str) -> &'a Arc<TranscriptMessage> {
        transcript
            .messages()
            .iter()
            .find(|m| m.tool_id.as_deref() == Some(tool_id))
            .unwrap()
    }

    #[test]
    fn test_results_match_by_id_not_order() {
        let mut tools = ToolCorrelator::new();
        let mut transcript = Transcript::new();

        tools.on_tool_use(&call("a", "Read", None), &mut transcript, Some("s"));
        tools.on_tool_use(&call("b", "Grep", None), &mut transcript, Some("s"));
        assert!(tools.on_tool_result(&outcome("b", "grep out", false), &mut transcript));
        tools.on_tool_use(&call("c", "Bash", None), &mut transcript, Some("s"));
        assert!(tools.on_tool_result(&outcome("a", "file body", true), &mut transcript));

        let a = message_for(&transcript, "a").tool_result.clone().unwrap();
        assert_eq!(a.content, json!("file body"));
        assert!(a.is_error);
        let b = message_for(&transcript, "b").tool_result.clone().unwrap();
        assert_eq!(b.content, json!("grep out"));
        assert!(message_for(&transcript, "c").tool_result.is_none());
        assert_eq!(tools.len(), 1);
    }

    #[test]
    fn test_orphan_result_is_noop() {
        let mut tools = ToolCorrelator::new();
        let mut transcript = Transcript::new();
        tools.on_tool_use(&call("a", "Read", None), &mut transcript, None);
        let before: Vec<_> = transcript.messages().to_vec();

        assert!(!tools.on_tool_result(&outcome("ghost", "late", false), &mut transcript));

        assert_eq!(transcript.len(), before.len());
        assert!(Arc::ptr_eq(&transcript.messages()[0], &before[0]));
    }

    #[test]
    fn test_container_collects_children_and_completes() {
        let mut tools = ToolCorrelator::new();
        let mut transcript = Transcript::new();

        tools.on_tool_use(&call("t1", "Task", None), &mut transcript, Some("s"));
        tools.on_tool_use(&call("t2", "Read", Some("t1")), &mut transcript, Some("s"));
        tools.on_tool_use(&call("t3", "Grep", Some("t1")), &mut transcript, Some("s"));
        assert_eq!(transcript.len(), 1);

        tools.on_tool_result(&outcome("t2", "read ok", false), &mut transcript);
        tools.on_tool_result(&outcome("t1", "agent done", false), &mut transcript);

        let container = message_for(&transcript, "t1");
        let state = container.subagent.as_ref().unwrap();
        assert_eq!(state.child_tools.len(), 2);
        assert_eq!(state.current_index, Some(1));
        assert!(state.child_tools[0].tool_result.is_some());
        assert!(state.child_tools[1].tool_result.is_none());
        assert!(state.is_complete);
        assert!(container.tool_result.is_some());
    }

    #[test]
    fn test_child_of_unknown_parent_is_top_level() {
        let mut tools = ToolCorrelator::new();
        let mut transcript = Transcript::new();

        tools.on_tool_use(&call("x", "Read", Some("missing")), &mut transcript, None);
        tools.on_tool_use(&call("y", "Bash", Some("x")), &mut transcript, None);

        assert_eq!(transcript.len(), 2);
        assert!(transcript.messages().iter().all(|m| m.subagent.is_none()));
    }

    #[test]
    fn test_duplicate_tool_use_updates_entry() {
        let mut tools = ToolCorrelator::new();
        let mut transcript = Transcript::new();

        tools.on_tool_use(&call("a", "Edit", None), &mut transcript, None);
        let mut again = call("a", "Edit", None);
        again.input = json!({"file_path": "/b.rs"});
        tools.on_tool_use(&again, &mut transcript, None);

        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.messages()[0].tool_input, Some(json!({"file_path": "/b.rs"})));
    }

    #[test]
    fn test_abandoned_calls_do_not_resolve() {
        let mut tools = ToolCorrelator::new();
        let mut transcript = Transcript::new();
        tools.on_tool_use(&call("a", "Read", None), &mut transcript, None);

        tools.abandon_all();

        assert!(tools.is_empty());
        assert!(!tools.on_tool_result(&outcome("a", "late", false), &mut transcript));
        assert!(transcript.messages()[0].tool_result.is_none());
    }

    #[test]
    fn test_result_text_flattens_content_parts() {
        assert_eq!(result_text(&json!("plain")), "plain");
        assert_eq!(
            result_text(&json!([{"type": "text", "text": "a"}, {"type": "text", "text": "b"}])),
            "a\nb"
        );
        assert_eq!(result_text(&Value::Null), "");
    }
}
