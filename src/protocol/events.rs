//! Inbound transport events.
//!
//! The transport delivers loosely shaped JSON objects keyed by a `type` string.
//! They are first deserialized into [`WireEvent`] and then folded into the closed
//! [`SessionEvent`] sum type, so every consumer matches exhaustively.
//!
//! ```rust,ignore
//! let event: SessionEvent = serde_json::from_str(line)?;
//! match event {
//!     SessionEvent::Response { payload, .. } => { /* text, tools */ }
//!     SessionEvent::Complete { .. } => { /* turn finished */ }
//!     // ...
//! }
//! ```

use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::codex::normalize_codex_item;
use crate::backends::Provider;

// ============================================================================
// Wire envelope
// ============================================================================

/// Raw envelope as sent by the server.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub is_processing: Option<bool>,
    #[serde(default)]
    pub success: Option<bool>,
    /// Fields this client does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// Typed events
// ============================================================================

/// A tool invocation announced by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
    /// Set when the call was made by a sub-agent running inside a container call.
    pub parent_id: Option<String>,
}

/// The result of a tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub tool_use_id: String,
    pub content: Value,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    ToolUse(ToolCall),
    ToolResult(ToolOutcome),
}

/// Body of a `<provider>-response` event.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    /// Incremental assistant text.
    TextDelta(String),
    /// The streamed text block ended.
    TextBlockStop,
    /// A complete message made of content blocks.
    Message { blocks: Vec<ContentBlock> },
    /// The provider finished the turn without a separate completion event.
    TurnComplete,
    /// The provider reported a failure inside the response stream.
    Failed(String),
    /// Recognized but irrelevant to the transcript (usage, reasoning, ...).
    Ignored,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenBudget {
    pub used: u64,
    pub total: u64,
}

/// Live status line reported while a provider is working.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderStatus {
    pub text: String,
    pub tokens: u64,
    pub can_interrupt: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PermissionRequest {
    pub request_id: String,
    pub tool_name: String,
    pub input: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub exit_code: Option<i32>,
    pub is_error: bool,
    /// Final text carried by providers that do not stream (cursor results).
    pub result_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "WireEvent")]
pub enum SessionEvent {
    SessionCreated {
        session_id: String,
    },
    TokenBudget {
        session_id: Option<String>,
        budget: TokenBudget,
    },
    Response {
        provider: Provider,
        session_id: Option<String>,
        payload: ResponsePayload,
    },
    /// Line-oriented raw output (terminal style).
    RawOutput {
        provider: Provider,
        session_id: Option<String>,
        text: String,
    },
    InteractivePrompt {
        session_id: Option<String>,
        text: String,
    },
    PermissionRequest {
        session_id: Option<String>,
        request: PermissionRequest,
    },
    PermissionCancelled {
        session_id: Option<String>,
        request_id: String,
    },
    ProviderError {
        provider: Provider,
        session_id: Option<String>,
        message: String,
    },
    /// A provider announced the id of the session it is running.
    SystemInit {
        provider: Provider,
        session_id: Option<String>,
        init_session_id: String,
    },
    ToolUse {
        provider: Provider,
        session_id: Option<String>,
        call: ToolCall,
    },
    Complete {
        provider: Provider,
        session_id: Option<String>,
        completion: Completion,
    },
    Error {
        session_id: Option<String>,
        message: String,
    },
    SessionAborted {
        provider: Provider,
        session_id: Option<String>,
        success: bool,
    },
    SessionStatus {
        provider: Provider,
        session_id: Option<String>,
        is_processing: bool,
    },
    ProviderStatus {
        provider: Provider,
        session_id: Option<String>,
        status: ProviderStatus,
    },
    ProjectsUpdated {
        payload: Value,
    },
    ProjectTasksUpdated {
        payload: Value,
    },
    /// Catch-all for event types added in newer servers.
    Unknown {
        kind: String,
    },
}

impl SessionEvent {
    /// Session the event is addressed to, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            SessionEvent::SessionCreated { session_id } => Some(session_id),
            SessionEvent::TokenBudget { session_id, .. }
            | SessionEvent::Response { session_id, .. }
            | SessionEvent::RawOutput { session_id, .. }
            | SessionEvent::InteractivePrompt { session_id, .. }
            | SessionEvent::PermissionRequest { session_id, .. }
            | SessionEvent::PermissionCancelled { session_id, .. }
            | SessionEvent::ProviderError { session_id, .. }
            | SessionEvent::SystemInit { session_id, .. }
            | SessionEvent::ToolUse { session_id, .. }
            | SessionEvent::Complete { session_id, .. }
            | SessionEvent::Error { session_id, .. }
            | SessionEvent::SessionAborted { session_id, .. }
            | SessionEvent::SessionStatus { session_id, .. }
            | SessionEvent::ProviderStatus { session_id, .. } => session_id.as_deref(),
            SessionEvent::ProjectsUpdated { .. }
            | SessionEvent::ProjectTasksUpdated { .. }
            | SessionEvent::Unknown { .. } => None,
        }
    }

    /// Events that affect state outside any single transcript.
    pub fn bypasses_session_scope(&self) -> bool {
        matches!(
            self,
            SessionEvent::SessionCreated { .. }
                | SessionEvent::ProjectsUpdated { .. }
                | SessionEvent::ProjectTasksUpdated { .. }
        )
    }

    /// Events that end a turn; they clear busy state even for background sessions.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            SessionEvent::Complete { .. }
                | SessionEvent::ProviderError { .. }
                | SessionEvent::Error { .. }
                | SessionEvent::SessionAborted { .. }
        )
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::SessionCreated { .. } => "session-created",
            SessionEvent::TokenBudget { .. } => "token-budget",
            SessionEvent::Response { .. } => "response",
            SessionEvent::RawOutput { .. } => "output",
            SessionEvent::InteractivePrompt { .. } => "interactive-prompt",
            SessionEvent::PermissionRequest { .. } => "permission-request",
            SessionEvent::PermissionCancelled { .. } => "permission-cancelled",
            SessionEvent::ProviderError { .. } => "provider-error",
            SessionEvent::SystemInit { .. } => "system-init",
            SessionEvent::ToolUse { .. } => "tool-use",
            SessionEvent::Complete { .. } => "complete",
            SessionEvent::Error { .. } => "error",
            SessionEvent::SessionAborted { .. } => "session-aborted",
            SessionEvent::SessionStatus { .. } => "session-status",
            SessionEvent::ProviderStatus { .. } => "provider-status",
            SessionEvent::ProjectsUpdated { .. } => "projects-updated",
            SessionEvent::ProjectTasksUpdated { .. } => "project-tasks-updated",
            SessionEvent::Unknown { .. } => "unknown",
        }
    }
}

// ============================================================================
// Wire -> typed conversion
// ============================================================================

impl From<WireEvent> for SessionEvent {
    fn from(wire: WireEvent) -> Self {
        match wire.kind.as_str() {
            "session-created" => match wire.session_id {
                Some(session_id) => SessionEvent::SessionCreated { session_id },
                None => SessionEvent::Unknown { kind: wire.kind },
            },
            "token-budget" => SessionEvent::TokenBudget {
                budget: TokenBudget {
                    used: u64_field(&wire.data, "used"),
                    total: u64_field(&wire.data, "total"),
                },
                session_id: wire.session_id,
            },
            "error" => SessionEvent::Error {
                message: error_message(&wire),
                session_id: wire.session_id,
            },
            "session-aborted" => SessionEvent::SessionAborted {
                provider: wire_provider(&wire),
                success: wire.success.unwrap_or(true),
                session_id: wire.session_id,
            },
            "session-status" => SessionEvent::SessionStatus {
                provider: wire_provider(&wire),
                is_processing: wire.is_processing.unwrap_or(false),
                session_id: wire.session_id,
            },
            "projects_updated" => SessionEvent::ProjectsUpdated {
                payload: Value::Object(wire.extra),
            },
            "taskmaster-project-updated" => SessionEvent::ProjectTasksUpdated {
                payload: Value::Object(wire.extra),
            },
            other => match Provider::split_event_type(other) {
                Some((provider, suffix)) => {
                    let suffix = suffix.to_string();
                    provider_event(provider, &suffix, wire)
                }
                None => SessionEvent::Unknown { kind: wire.kind },
            },
        }
    }
}

fn provider_event(provider: Provider, suffix: &str, wire: WireEvent) -> SessionEvent {
    match suffix {
        "response" => parse_response(provider, wire),
        "output" => SessionEvent::RawOutput {
            provider,
            text: text_of(&wire.data),
            session_id: wire.session_id,
        },
        "interactive-prompt" => SessionEvent::InteractivePrompt {
            text: text_of(&wire.data),
            session_id: wire.session_id,
        },
        "permission-request" => match wire.request_id {
            Some(request_id) => SessionEvent::PermissionRequest {
                request: PermissionRequest {
                    request_id,
                    tool_name: wire.tool_name.unwrap_or_else(|| "UnknownTool".to_string()),
                    input: wire.input.unwrap_or(Value::Null),
                },
                session_id: wire.session_id,
            },
            None => SessionEvent::Unknown { kind: wire.kind },
        },
        "permission-cancelled" => match wire.request_id {
            Some(request_id) => SessionEvent::PermissionCancelled {
                request_id,
                session_id: wire.session_id,
            },
            None => SessionEvent::Unknown { kind: wire.kind },
        },
        "error" => SessionEvent::ProviderError {
            provider,
            message: error_message(&wire),
            session_id: wire.session_id,
        },
        "system" => match system_init_id(&wire.data) {
            Some(init_session_id) => SessionEvent::SystemInit {
                provider,
                init_session_id,
                session_id: wire.session_id,
            },
            None => SessionEvent::Unknown { kind: wire.kind },
        },
        "tool-use" => SessionEvent::ToolUse {
            provider,
            call: ToolCall {
                id: string_field(&wire.extra, &["toolId", "toolUseId", "id"])
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                name: wire
                    .tool_name
                    .clone()
                    .or_else(|| string_field(&wire.extra, &["tool"]))
                    .unwrap_or_else(|| "UnknownTool".to_string()),
                input: wire.input.clone().unwrap_or(Value::Null),
                parent_id: string_field(&wire.extra, &["parentToolUseId", "parentId"]),
            },
            session_id: wire.session_id,
        },
        "complete" | "result" => SessionEvent::Complete {
            provider,
            completion: Completion {
                exit_code: wire.exit_code,
                is_error: wire
                    .data
                    .get("is_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
                    || wire.success == Some(false),
                result_text: wire
                    .data
                    .get("result")
                    .and_then(Value::as_str)
                    .filter(|text| !text.trim().is_empty())
                    .map(str::to_string),
            },
            session_id: wire.session_id,
        },
        "status" => SessionEvent::ProviderStatus {
            provider,
            status: ProviderStatus {
                text: wire
                    .data
                    .get("message")
                    .or_else(|| wire.data.get("status"))
                    .and_then(Value::as_str)
                    .unwrap_or("Working...")
                    .to_string(),
                tokens: u64_field(&wire.data, "tokens"),
                can_interrupt: wire
                    .data
                    .get("can_interrupt")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
            },
            session_id: wire.session_id,
        },
        _ => SessionEvent::Unknown { kind: wire.kind },
    }
}

/// Raw content block as it appears in `message.content` arrays.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Unknown,
}

fn parse_response(provider: Provider, wire: WireEvent) -> SessionEvent {
    if let Some(init_session_id) = system_init_id(&wire.data) {
        return SessionEvent::SystemInit {
            provider,
            init_session_id,
            session_id: wire.session_id,
        };
    }

    let payload = match provider {
        Provider::Codex => normalize_codex_item(&wire.data),
        Provider::Claude | Provider::Cursor => parse_claude_payload(&wire.data),
    };

    SessionEvent::Response {
        provider,
        session_id: wire.session_id,
        payload,
    }
}

fn parse_claude_payload(data: &Value) -> ResponsePayload {
    match data.get("type").and_then(Value::as_str) {
        Some("content_block_delta") => {
            return match data.pointer("/delta/text").and_then(Value::as_str) {
                Some(text) => ResponsePayload::TextDelta(text.to_string()),
                None => ResponsePayload::Ignored,
            };
        }
        Some("content_block_stop") => return ResponsePayload::TextBlockStop,
        _ => {}
    }

    let parent_id = data
        .get("parent_tool_use_id")
        .and_then(Value::as_str)
        .map(str::to_string);

    let content = data.pointer("/message/content").or_else(|| data.get("content"));
    let blocks = match content {
        Some(Value::String(text)) if !text.trim().is_empty() => {
            vec![ContentBlock::Text(text.clone())]
        }
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match serde_json::from_value::<RawBlock>(item.clone()) {
                Ok(RawBlock::Text { text }) => Some(ContentBlock::Text(text)),
                Ok(RawBlock::ToolUse { id, name, input }) => Some(ContentBlock::ToolUse(ToolCall {
                    id,
                    name,
                    input,
                    parent_id: parent_id.clone(),
                })),
                Ok(RawBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                }) => Some(ContentBlock::ToolResult(ToolOutcome {
                    tool_use_id,
                    content,
                    is_error,
                })),
                Ok(RawBlock::Unknown) => None,
                Err(e) => {
                    log::debug!("Skipping malformed content block: {}", e);
                    None
                }
            })
            .collect(),
        _ => Vec::new(),
    };

    if blocks.is_empty() {
        ResponsePayload::Ignored
    } else {
        ResponsePayload::Message { blocks }
    }
}

fn system_init_id(data: &Value) -> Option<String> {
    let is_init = data.get("type").and_then(Value::as_str) == Some("system")
        && data.get("subtype").and_then(Value::as_str) == Some("init");
    if !is_init {
        return None;
    }
    data.get("session_id")
        .or_else(|| data.get("sessionId"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn wire_provider(wire: &WireEvent) -> Provider {
    wire.provider
        .as_deref()
        .and_then(|p| p.parse().ok())
        .unwrap_or_default()
}

fn error_message(wire: &WireEvent) -> String {
    match &wire.error {
        Some(Value::String(message)) => message.clone(),
        Some(Value::Object(obj)) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(obj.clone()).to_string()),
        Some(other) if !other.is_null() => other.to_string(),
        _ => text_of(&wire.data),
    }
}

/// Text of a `data` field that may be a plain string or `{ "message": ... }`.
fn text_of(data: &Value) -> String {
    match data {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other
            .get("message")
            .or_else(|| other.get("content"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

fn u64_field(data: &Value, key: &str) -> u64 {
    data.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn string_field(extra: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| extra.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}
