//! Pending tool permission requests and the decisions sent back for them.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::backends::CommandSink;
use crate::error::EngineError;
use crate::protocol::{ClientCommand, PermissionRequest, PermissionResponse};
use crate::storage::ClientState;

#[derive(Debug, Clone, PartialEq)]
pub struct PendingPermission {
    pub request_id: String,
    pub tool_name: String,
    pub input: Value,
    /// `None` when the request arrived before the backend echoed an id.
    pub session_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl PendingPermission {
    pub fn remember_key(&self) -> String {
        remember_key(&self.tool_name, &self.input)
    }
}

/// The user's answer to one or more requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decision {
    pub allow: bool,
    pub message: Option<String>,
    pub updated_input: Option<Value>,
    /// Persist the derived key so matching requests are approved automatically.
    pub remember: bool,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allow: true,
            ..Default::default()
        }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        Self {
            allow: false,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn allow_and_remember() -> Self {
        Self {
            allow: true,
            remember: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Queued,
    Duplicate,
    /// Matched the allow-list; an allow decision was sent without queuing.
    AutoApproved,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecideOutcome {
    pub sent: Vec<String>,
    pub skipped: Vec<String>,
    /// The queue drained, so the "waiting for input" status can be cleared.
    pub queue_empty: bool,
}

/// Coarse key used to batch-approve requests of the same shape.
///
/// Shell commands are keyed by their program (`Bash(git:*)`), every other tool
/// by its name.
pub fn remember_key(tool_name: &str, input: &Value) -> String {
    if tool_name == "Bash" {
        let program = input
            .get("command")
            .and_then(|v| v.as_str())
            .and_then(|cmd| cmd.split_whitespace().next());
        if let Some(program) = program {
            return format!("Bash({}:*)", program);
        }
    }
    tool_name.to_string()
}

/// Check a request against one allow-list pattern.
///
/// Patterns are `Tool`, `Tool(arg)` for an exact argument, or `Tool(prefix:*)`.
pub fn matches_pattern(pattern: &str, tool_name: &str, tool_input: &Value) -> bool {
    let Some(paren_pos) = pattern.find('(') else {
        return pattern == tool_name;
    };
    if !pattern.ends_with(')') {
        return false;
    }

    let pattern_tool = &pattern[..paren_pos];
    let pattern_arg = &pattern[paren_pos + 1..pattern.len() - 1];
    if pattern_tool != tool_name {
        return false;
    }

    let arg_value = match tool_name {
        "Bash" => tool_input.get("command"),
        _ => tool_input
            .get("pattern")
            .or_else(|| tool_input.get("path"))
            .or_else(|| tool_input.get("file_path"))
            .or_else(|| tool_input.get("url"))
            .or_else(|| tool_input.get("query")),
    }
    .and_then(|v| v.as_str())
    .unwrap_or("");

    match pattern_arg.strip_suffix(":*") {
        Some(prefix) => arg_value.starts_with(prefix),
        None => arg_value == pattern_arg,
    }
}

pub struct PermissionManager {
    queue: Vec<PendingPermission>,
    allow_list: Vec<String>,
    state: Option<ClientState>,
}

impl PermissionManager {
    pub fn new(state: Option<ClientState>) -> Self {
        let allow_list = match &state {
            Some(state) => state.allowed_tools().unwrap_or_else(|e| {
                log::warn!("Could not load allowed tools: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };
        Self {
            queue: Vec::new(),
            allow_list,
            state,
        }
    }

    pub fn pending(&self) -> &[PendingPermission] {
        &self.queue
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn allow_list(&self) -> &[String] {
        &self.allow_list
    }

    fn is_allowed(&self, tool_name: &str, input: &Value) -> bool {
        self.allow_list
            .iter()
            .any(|pattern| matches_pattern(pattern, tool_name, input))
    }

    pub fn on_request(
        &mut self,
        request: &PermissionRequest,
        session_id: Option<&str>,
        sink: &dyn CommandSink,
    ) -> Result<RequestOutcome, EngineError> {
        if self.queue.iter().any(|p| p.request_id == request.request_id) {
            return Ok(RequestOutcome::Duplicate);
        }

        if self.is_allowed(&request.tool_name, &request.input) {
            log::info!("Auto-approving {} ({})", request.tool_name, request.request_id);
            sink.send(ClientCommand::ClaudePermissionResponse(PermissionResponse {
                request_id: request.request_id.clone(),
                allow: true,
                updated_input: None,
                message: None,
                remember_entry: None,
            }))?;
            return Ok(RequestOutcome::AutoApproved);
        }

        self.queue.push(PendingPermission {
            request_id: request.request_id.clone(),
            tool_name: request.tool_name.clone(),
            input: request.input.clone(),
            session_id: session_id.map(str::to_string),
            received_at: Utc::now(),
        });
        Ok(RequestOutcome::Queued)
    }

    /// The backend withdrew a request; nothing is sent.
    pub fn on_cancelled(&mut self, request_id: &str) -> bool {
        let before = self.queue.len();
        self.queue.retain(|p| p.request_id != request_id);
        before != self.queue.len()
    }

    /// Send one decision per known id and remove them from the queue together.
    pub fn decide(
        &mut self,
        ids: &[String],
        decision: &Decision,
        sink: &dyn CommandSink,
    ) -> Result<DecideOutcome, EngineError> {
        let mut outcome = DecideOutcome::default();
        let mut remember_entry = None;

        let mut targets: Vec<PendingPermission> = Vec::new();
        for id in ids {
            if targets.iter().any(|t| &t.request_id == id) {
                continue;
            }
            match self.queue.iter().find(|p| &p.request_id == id) {
                Some(request) => targets.push(request.clone()),
                None => {
                    log::debug!("Skipping decision for unknown permission request {}", id);
                    outcome.skipped.push(id.clone());
                }
            }
        }

        if decision.remember && decision.allow {
            remember_entry = targets.first().map(PendingPermission::remember_key);
        }

        let mut result = Ok(());
        for target in &targets {
            let response = PermissionResponse {
                request_id: target.request_id.clone(),
                allow: decision.allow,
                updated_input: decision.updated_input.clone(),
                message: decision.message.clone(),
                remember_entry: remember_entry.clone(),
            };
            if let Err(e) = sink.send(ClientCommand::ClaudePermissionResponse(response)) {
                result = Err(e);
                break;
            }
            outcome.sent.push(target.request_id.clone());
        }

        self.queue.retain(|p| !outcome.sent.contains(&p.request_id));
        outcome.queue_empty = self.queue.is_empty();

        if let (Ok(()), Some(entry)) = (&result, remember_entry) {
            self.persist_entry(entry);
        }

        result.map(|()| outcome)
    }

    /// Allow `request_id` and every queued request sharing its remember key.
    pub fn remember(
        &mut self,
        request_id: &str,
        sink: &dyn CommandSink,
    ) -> Result<DecideOutcome, EngineError> {
        let Some(key) = self
            .queue
            .iter()
            .find(|p| p.request_id == request_id)
            .map(PendingPermission::remember_key)
        else {
            log::debug!("Skipping remember for unknown permission request {}", request_id);
            return Ok(DecideOutcome {
                skipped: vec![request_id.to_string()],
                queue_empty: self.queue.is_empty(),
                ..Default::default()
            });
        };

        let ids: Vec<String> = self
            .queue
            .iter()
            .filter(|p| p.remember_key() == key)
            .map(|p| p.request_id.clone())
            .collect();
        self.decide(&ids, &Decision::allow_and_remember(), sink)
    }

    fn persist_entry(&mut self, entry: String) {
        if let Some(state) = &self.state {
            if let Err(e) = state.remember_tool(&entry) {
                log::warn!("Failed to persist allowed tool {}: {}", entry, e);
            }
        }
        if !self.allow_list.contains(&entry) {
            self.allow_list.push(entry);
        }
    }

    /// Drop requests tied to a different concrete session; keep unscoped ones.
    pub fn retain_for_session(&mut self, active: Option<&str>) -> usize {
        let before = self.queue.len();
        self.queue.retain(|p| match p.session_id.as_deref() {
            None => true,
            Some(id) => Some(id) == active,
        });
        before - self.queue.len()
    }

    /// Move requests scoped to a placeholder over to the confirmed id.
    pub fn reattribute(&mut self, from: &str, to: &str) {
        for request in self.queue.iter_mut() {
            if request.session_id.as_deref() == Some(from) {
                request.session_id = Some(to.to_string());
            }
        }
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
