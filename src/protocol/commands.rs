//! Outbound commands sent to the transport.

use serde::Serialize;
use serde_json::Value;

use crate::backends::Provider;
use crate::transcript::ImageAttachment;

/// Options attached to a provider command.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub resume: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageAttachment>,
}

/// A user turn addressed to one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCommand {
    pub command: String,
    pub session_id: Option<String>,
    pub options: CommandOptions,
}

/// Answer to a `claude-permission-request`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionResponse {
    pub request_id: String,
    pub allow: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remember_entry: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRef {
    pub session_id: String,
    pub provider: Provider,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientCommand {
    ClaudeCommand(ProviderCommand),
    CursorCommand(ProviderCommand),
    CodexCommand(ProviderCommand),
    AbortSession(SessionRef),
    ClaudePermissionResponse(PermissionResponse),
    CheckSessionStatus(SessionRef),
}

impl ClientCommand {
    pub fn for_provider(provider: Provider, command: ProviderCommand) -> Self {
        match provider {
            Provider::Claude => ClientCommand::ClaudeCommand(command),
            Provider::Cursor => ClientCommand::CursorCommand(command),
            Provider::Codex => ClientCommand::CodexCommand(command),
        }
    }
}
