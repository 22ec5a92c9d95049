//! Shared utilities used by the engine components.

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::task::JoinHandle;

/// CSI sequences (colors, cursor movement) and OSC sequences (titles, links).
static ANSI_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .unwrap_or_else(|e| panic!("invalid ANSI pattern: {e}"))
});

/// Remove terminal control sequences from raw provider output.
pub fn strip_ansi(input: &str) -> String {
    ANSI_PATTERN.replace_all(input, "").into_owned()
}

/// Abort a background task held in an optional slot.
///
/// The task is not awaited; callers run on the event loop and must not block.
pub fn abort_task_slot(slot: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = slot.take() {
        handle.abort();
    }
}

/// Placeholder session id minted for a conversation the server has not named yet.
pub fn placeholder_session_id(now_millis: i64) -> String {
    format!("new-session-{}", now_millis)
}

pub fn is_placeholder_session_id(id: &str) -> bool {
    id.starts_with("new-session-")
}
