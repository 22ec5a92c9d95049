//! Client core for driving Claude, Cursor and Codex sessions over one shared
//! realtime transport.

pub mod backends;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod protocol;
pub mod storage;
pub mod transcript;

pub use backends::{CommandSink, Provider, RouteContext, SessionRuntime};
pub use config::{load_config, EngineConfig};
pub use engine::{Decision, MessageWindow, RouterEffect, SessionEventRouter};
pub use error::EngineError;
pub use protocol::{ClientCommand, SessionEvent};
pub use transcript::{Transcript, TranscriptMessage};
