//! Conversation transcript.
//!
//! Entries are held as `Arc<TranscriptMessage>` and edited copy-on-write, so an
//! update replaces one entry and every untouched entry keeps its pointer identity.

pub mod diff;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

pub use diff::{edit_diff, DiffCache, DiffKind, DiffLine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    User,
    Assistant,
    Error,
    TaskNotification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub name: String,
    /// Data URL or server path returned by the upload endpoint.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: Value,
    pub is_error: bool,
    pub timestamp: DateTime<Utc>,
}

/// A tool call made by a sub-agent inside a container call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildToolCall {
    pub tool_id: String,
    pub tool_name: String,
    pub tool_input: Value,
    pub tool_result: Option<ToolResult>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentState {
    pub child_tools: Vec<ChildToolCall>,
    /// Index of the most recently started child, if any.
    pub current_index: Option<usize>,
    pub is_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptMessage {
    pub id: String,
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Session this entry belongs to; `None` until any id exists.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageAttachment>,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagent: Option<SubagentState>,
}

impl TranscriptMessage {
    pub fn new(kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            content: content.into(),
            timestamp: Utc::now(),
            session_id: None,
            images: Vec::new(),
            is_streaming: false,
            tool_id: None,
            tool_name: None,
            tool_input: None,
            tool_result: None,
            subagent: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageKind::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Assistant, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Error, content)
    }

    /// An assistant entry representing a tool invocation.
    pub fn tool_use(tool_id: impl Into<String>, tool_name: impl Into<String>, input: Value) -> Self {
        let mut message = Self::assistant("");
        message.tool_id = Some(tool_id.into());
        message.tool_name = Some(tool_name.into());
        message.tool_input = Some(input);
        message
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn is_tool_use(&self) -> bool {
        self.tool_id.is_some()
    }
}

/// Ordered list of transcript entries for the conversation on screen.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Arc<TranscriptMessage>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<TranscriptMessage>) -> Self {
        Self {
            messages: messages.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Arc<TranscriptMessage>] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Arc<TranscriptMessage>> {
        self.messages.last()
    }

    pub fn push(&mut self, message: TranscriptMessage) -> &Arc<TranscriptMessage> {
        self.messages.push(Arc::new(message));
        &self.messages[self.messages.len() - 1]
    }

    /// Insert older entries ahead of the current ones.
    pub fn prepend(&mut self, older: Vec<TranscriptMessage>) {
        let mut merged: Vec<Arc<TranscriptMessage>> = older.into_iter().map(Arc::new).collect();
        merged.append(&mut self.messages);
        self.messages = merged;
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<TranscriptMessage>> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Apply `edit` to the entry with `id`, replacing it with a fresh `Arc`.
    ///
    /// Returns `false` when no such entry exists.
    pub fn update<F>(&mut self, id: &str, edit: F) -> bool
    where
        F: FnOnce(&mut TranscriptMessage),
    {
        match self.position(id) {
            Some(index) => {
                let mut replacement = TranscriptMessage::clone(&self.messages[index]);
                edit(&mut replacement);
                self.messages[index] = Arc::new(replacement);
                true
            }
            None => false,
        }
    }

    /// The entry currently receiving streamed text, if any.
    pub fn streaming_message(&self) -> Option<&Arc<TranscriptMessage>> {
        self.messages.iter().rev().find(|m| m.is_streaming)
    }

    /// Re-attribute every entry owned by `from` to `to`. Returns how many moved.
    pub fn reattribute(&mut self, from: &str, to: &str) -> usize {
        self.retag(|m| m.session_id.as_deref() == Some(from), to)
    }

    /// Attribute every entry created before any session id existed to `to`.
    pub fn adopt_unattributed(&mut self, to: &str) -> usize {
        self.retag(|m| m.session_id.is_none(), to)
    }

    /// Replace every matching entry with a fresh `Arc` attributed to `to`.
    fn retag<P>(&mut self, matches: P, to: &str) -> usize
    where
        P: Fn(&TranscriptMessage) -> bool,
    {
        let mut count = 0;
        for entry in self.messages.iter_mut() {
            if matches(entry.as_ref()) {
                let mut replacement = TranscriptMessage::clone(entry.as_ref());
                replacement.session_id = Some(to.to_string());
                *entry = Arc::new(replacement);
                count += 1;
            }
        }
        count
    }

    /// Clone the newest `limit` entries for persistence.
    pub fn tail(&self, limit: usize) -> Vec<TranscriptMessage> {
        let start = self.messages.len().saturating_sub(limit);
        self.messages[start..]
            .iter()
            .map(|m| TranscriptMessage::clone(m))
            .collect()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
