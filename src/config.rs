//! Engine configuration loaded from `<config dir>/agentview/engine.json`.
//!
//! Every field has a default, so a missing or partial file is fine. A malformed
//! file is logged and ignored.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Quiet period before buffered stream text is flushed into the transcript.
    pub stream_debounce_ms: u64,
    pub history_page_size: usize,
    pub diff_cache_capacity: usize,
    /// Newest entries kept per cached transcript.
    pub transcript_cache_limit: usize,
    pub near_top_threshold_px: f64,
    pub visible_window: usize,
    /// Transcript size above which "load all" flags a performance warning.
    pub load_all_warning_threshold: usize,
    pub api_base_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stream_debounce_ms: 100,
            history_page_size: 20,
            diff_cache_capacity: 100,
            transcript_cache_limit: 50,
            near_top_threshold_px: 100.0,
            visible_window: 100,
            load_all_warning_threshold: 500,
            api_base_url: "http://localhost:3001".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn stream_debounce(&self) -> Duration {
        Duration::from_millis(self.stream_debounce_ms)
    }
}

fn get_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("agentview").join("engine.json"))
}

/// Load the user configuration, falling back to defaults.
pub fn load_config() -> EngineConfig {
    match get_config_path() {
        Some(path) => load_config_from(&path),
        None => EngineConfig::default(),
    }
}

pub fn load_config_from(path: &Path) -> EngineConfig {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return EngineConfig::default(),
    };
    match serde_json::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            log::warn!("Ignoring malformed config {}: {}", path.display(), e);
            EngineConfig::default()
        }
    }
}
