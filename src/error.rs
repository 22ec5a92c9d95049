//! Error types shared by the engine, the history client and storage.

use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The transport refused or dropped an outgoing command.
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("History fetch failed: {0}")]
    History(String),
    #[error("Image upload failed: {0}")]
    Upload(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    pub fn transport(message: impl Into<String>) -> Self {
        EngineError::Transport(message.into())
    }
}
