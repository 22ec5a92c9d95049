//! Transport wire protocol: inbound session events and outbound commands.

mod codex;
pub mod commands;
pub mod events;

pub use commands::{ClientCommand, CommandOptions, PermissionResponse, ProviderCommand, SessionRef};
pub use events::{
    Completion, ContentBlock, PermissionRequest, ProviderStatus, ResponsePayload, SessionEvent,
    TokenBudget, ToolCall, ToolOutcome, WireEvent,
};
