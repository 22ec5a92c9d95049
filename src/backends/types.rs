//! Core types for the provider abstraction layer.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Identifies the AI backend a session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Claude,
    Cursor,
    Codex,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Claude, Provider::Cursor, Provider::Codex];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Claude => "claude",
            Provider::Cursor => "cursor",
            Provider::Codex => "codex",
        }
    }

    /// Splits a wire type such as `codex-error` into its provider and suffix.
    pub fn split_event_type(event_type: &str) -> Option<(Provider, &str)> {
        Provider::ALL.into_iter().find_map(|provider| {
            event_type
                .strip_prefix(provider.as_str())
                .and_then(|rest| rest.strip_prefix('-'))
                .map(|suffix| (provider, suffix))
        })
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" => Ok(Provider::Claude),
            "cursor" => Ok(Provider::Cursor),
            "codex" => Ok(Provider::Codex),
            _ => Err(EngineError::Config(format!("Unknown provider: {}", s))),
        }
    }
}

/// Explicit UI context threaded into routing and submission.
#[derive(Debug, Clone, Default)]
pub struct RouteContext {
    pub provider: Provider,
    /// Selected project name as known to the server.
    pub project_name: Option<String>,
    /// Absolute project path sent as `projectPath`/`cwd`.
    pub project_path: Option<String>,
    pub model: Option<String>,
    pub permission_mode: Option<String>,
}

impl RouteContext {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            ..Default::default()
        }
    }

    pub fn with_project(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.project_name = Some(name.into());
        self.project_path = Some(path.into());
        self
    }
}
