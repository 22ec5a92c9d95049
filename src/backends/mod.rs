//! Provider plumbing shared by every backend.
//!
//! The three providers (Claude, Cursor, Codex) all speak through one transport.
//! This module holds the provider enum, the [`CommandSink`] seam commands leave
//! through, and the [`SessionRuntime`] loop that feeds inbound events to the
//! router.

mod runtime;
pub(crate) mod types;
pub(crate) mod utils;

use tokio::sync::mpsc::UnboundedSender;

use crate::error::EngineError;
use crate::protocol::ClientCommand;

pub use runtime::SessionRuntime;
pub use types::{Provider, RouteContext};

/// Outgoing half of the transport.
#[cfg_attr(test, mockall::automock)]
pub trait CommandSink: Send + Sync {
    fn send(&self, command: ClientCommand) -> Result<(), EngineError>;
}

impl CommandSink for UnboundedSender<ClientCommand> {
    fn send(&self, command: ClientCommand) -> Result<(), EngineError> {
        UnboundedSender::send(self, command)
            .map_err(|e| EngineError::transport(format!("transport closed: {}", e)))
    }
}
