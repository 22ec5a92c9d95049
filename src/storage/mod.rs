//! Persisted client-side state: drafts, cached transcripts and the tool allow-list.
//!
//! State lives in a flat key-value store. [`FileStore`] keeps it in one JSON file
//! written atomically; [`MemoryStore`] is used in tests and as a fallback when no
//! data directory exists. Both can enforce a byte quota, mirroring the browser
//! storage limits the original client ran under.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::transcript::{Transcript, TranscriptMessage};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Storage quota exceeded")]
    QuotaExceeded,
    #[error("Could not find app data directory")]
    NoAppDir,
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

fn stored_size(data: &BTreeMap<String, String>) -> usize {
    data.iter().map(|(k, v)| k.len() + v.len()).sum()
}

/// In-memory store with an optional byte quota.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            data: Mutex::new(BTreeMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut data = self.data.lock();
        if let Some(quota) = self.quota_bytes {
            let current = stored_size(&data) - data.get(key).map_or(0, |v| key.len() + v.len());
            if current + key.len() + value.len() > quota {
                return Err(StorageError::QuotaExceeded);
            }
        }
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.data.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.data.lock().keys().cloned().collect())
    }
}

/// JSON-file store; every write goes to a temp file and is renamed into place.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    quota_bytes: Option<usize>,
    lock: Mutex<()>,
}

fn get_app_dir() -> Result<PathBuf, StorageError> {
    let dir = dirs::data_local_dir()
        .ok_or(StorageError::NoAppDir)?
        .join("agentview");

    if !dir.exists() {
        fs::create_dir_all(&dir)?;
    }

    Ok(dir)
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            quota_bytes: None,
            lock: Mutex::new(()),
        }
    }

    /// Store at `<local data dir>/agentview/state.json`.
    pub fn open_default() -> Result<Self, StorageError> {
        Ok(Self::new(get_app_dir()?.join("state.json")))
    }

    pub fn with_quota(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, data: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let dir = self.path.parent().ok_or(StorageError::NoAppDir)?;
        let content = serde_json::to_string_pretty(data)?;

        let mut temp_file = NamedTempFile::new_in(dir)?;
        temp_file.write_all(content.as_bytes())?;
        temp_file
            .persist(&self.path)
            .map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock();
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        let mut data = self.load()?;
        data.insert(key.to_string(), value.to_string());
        if let Some(quota) = self.quota_bytes {
            if stored_size(&data) > quota {
                return Err(StorageError::QuotaExceeded);
            }
        }
        self.save(&data)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        let mut data = self.load()?;
        if data.remove(key).is_some() {
            self.save(&data)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let _guard = self.lock.lock();
        Ok(self.load()?.into_keys().collect())
    }
}

const DRAFT_PREFIX: &str = "draft_input_";
const TRANSCRIPT_PREFIX: &str = "chat_messages_";
const ALLOWED_TOOLS_KEY: &str = "allowed_tools";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedTranscript {
    /// Unix millis of the last write; used to pick pruning victims.
    saved_at: i64,
    messages: Vec<TranscriptMessage>,
}

/// Typed view over a [`KeyValueStore`].
#[derive(Clone)]
pub struct ClientState {
    store: Arc<dyn KeyValueStore>,
    transcript_limit: usize,
}

impl ClientState {
    pub fn new(store: Arc<dyn KeyValueStore>, transcript_limit: usize) -> Self {
        Self {
            store,
            transcript_limit,
        }
    }

    fn transcript_key(project: &str, session_id: &str) -> String {
        format!("{}{}_{}", TRANSCRIPT_PREFIX, project, session_id)
    }

    pub fn load_draft(&self, project: &str) -> Result<Option<String>, StorageError> {
        self.store.get(&format!("{}{}", DRAFT_PREFIX, project))
    }

    /// Save the composer text; an empty draft removes the entry.
    pub fn save_draft(&self, project: &str, text: &str) -> Result<(), StorageError> {
        let key = format!("{}{}", DRAFT_PREFIX, project);
        if text.is_empty() {
            return self.store.remove(&key);
        }
        self.write_with_recovery(&key, text)
    }

    pub fn cache_transcript(
        &self,
        project: &str,
        session_id: &str,
        transcript: &Transcript,
    ) -> Result<(), StorageError> {
        let cached = CachedTranscript {
            saved_at: Utc::now().timestamp_millis(),
            messages: transcript.tail(self.transcript_limit),
        };
        let value = serde_json::to_string(&cached)?;
        self.write_with_recovery(&Self::transcript_key(project, session_id), &value)
    }

    pub fn load_cached_transcript(
        &self,
        project: &str,
        session_id: &str,
    ) -> Result<Vec<TranscriptMessage>, StorageError> {
        match self.store.get(&Self::transcript_key(project, session_id))? {
            Some(raw) => Ok(serde_json::from_str::<CachedTranscript>(&raw)?.messages),
            None => Ok(Vec::new()),
        }
    }

    /// Move a cached transcript from a placeholder id to the confirmed id.
    pub fn rekey_transcript(&self, project: &str, from: &str, to: &str) -> Result<(), StorageError> {
        let old_key = Self::transcript_key(project, from);
        if let Some(raw) = self.store.get(&old_key)? {
            let mut cached: CachedTranscript = serde_json::from_str(&raw)?;
            for message in cached.messages.iter_mut() {
                if message.session_id.as_deref() == Some(from) {
                    message.session_id = Some(to.to_string());
                }
            }
            let value = serde_json::to_string(&cached)?;
            self.write_with_recovery(&Self::transcript_key(project, to), &value)?;
            self.store.remove(&old_key)?;
        }
        Ok(())
    }

    pub fn allowed_tools(&self) -> Result<Vec<String>, StorageError> {
        match self.store.get(ALLOWED_TOOLS_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// Add an entry to the allow-list. Returns `false` if it was already present.
    pub fn remember_tool(&self, entry: &str) -> Result<bool, StorageError> {
        let mut allowed = self.allowed_tools()?;
        if allowed.iter().any(|existing| existing == entry) {
            return Ok(false);
        }
        allowed.push(entry.to_string());
        self.write_with_recovery(ALLOWED_TOOLS_KEY, &serde_json::to_string(&allowed)?)?;
        Ok(true)
    }

    /// Write, and on quota exhaustion prune the oldest cached transcripts and
    /// retry once. A second failure is logged and dropped.
    fn write_with_recovery(&self, key: &str, value: &str) -> Result<(), StorageError> {
        match self.store.set(key, value) {
            Err(StorageError::QuotaExceeded) => {
                let pruned = self.prune_cached_transcripts(key)?;
                log::warn!("Storage quota hit writing {}; pruned {} cached transcripts", key, pruned);
                match self.store.set(key, value) {
                    Err(StorageError::QuotaExceeded) => {
                        log::warn!("Dropping write of {} after pruning", key);
                        Ok(())
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    /// Remove the older half (at least one) of cached transcripts, never `keep`.
    fn prune_cached_transcripts(&self, keep: &str) -> Result<usize, StorageError> {
        let mut cached: Vec<(i64, String)> = Vec::new();
        for key in self.store.keys()? {
            if !key.starts_with(TRANSCRIPT_PREFIX) || key == keep {
                continue;
            }
            let saved_at = self
                .store
                .get(&key)?
                .and_then(|raw| serde_json::from_str::<CachedTranscript>(&raw).ok())
                .map_or(0, |c| c.saved_at);
            cached.push((saved_at, key));
        }
        cached.sort();

        let victims = cached.len().div_ceil(2);
        for (_, key) in cached.iter().take(victims) {
            self.store.remove(key)?;
        }
        Ok(victims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn transcript_of(n: usize) -> Transcript {
        Transcript::from_messages(
            (0..n)
                .map(|i| TranscriptMessage::user(format!("message {}", i)))
                .collect(),
        )
    }

    #[test]
    fn test_file_store_roundtrip_and_remove() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("state.json"));

        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v").unwrap();
        store.set("other", "w").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        assert_eq!(store.keys().unwrap(), vec!["k".to_string(), "other".to_string()]);

        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_file_store_reports_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ invalid json ").unwrap();

        let result = FileStore::new(&path).get("k");
        assert!(matches!(result.unwrap_err(), StorageError::Json(_)));
    }

    #[test]
    fn test_file_store_enforces_quota_without_writing() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("state.json")).with_quota(16);

        store.set("a", "1234").unwrap();
        assert!(matches!(
            store.set("b", "0123456789abcdef"),
            Err(StorageError::QuotaExceeded)
        ));
        assert_eq!(store.get("b").unwrap(), None);
    }

    #[test]
    fn test_drafts_are_per_project_and_cleared_when_empty() {
        let state = ClientState::new(Arc::new(MemoryStore::new()), 50);
        state.save_draft("alpha", "half typed").unwrap();
        state.save_draft("beta", "other").unwrap();

        assert_eq!(state.load_draft("alpha").unwrap().as_deref(), Some("half typed"));
        state.save_draft("alpha", "").unwrap();
        assert_eq!(state.load_draft("alpha").unwrap(), None);
        assert_eq!(state.load_draft("beta").unwrap().as_deref(), Some("other"));
    }

    #[test]
    fn test_cached_transcript_keeps_newest_entries() {
        let state = ClientState::new(Arc::new(MemoryStore::new()), 3);
        state.cache_transcript("p", "s1", &transcript_of(5)).unwrap();

        let loaded = state.load_cached_transcript("p", "s1").unwrap();
        let contents: Vec<_> = loaded.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["message 2", "message 3", "message 4"]);
        assert!(state.load_cached_transcript("p", "missing").unwrap().is_empty());
    }

    #[test]
    fn test_rekey_moves_placeholder_transcript() {
        let state = ClientState::new(Arc::new(MemoryStore::new()), 50);
        let transcript = Transcript::from_messages(vec![
            TranscriptMessage::user("hello").with_session(Some("new-session-1".into()))
        ]);
        state.cache_transcript("p", "new-session-1", &transcript).unwrap();

        state.rekey_transcript("p", "new-session-1", "abc123").unwrap();

        assert!(state.load_cached_transcript("p", "new-session-1").unwrap().is_empty());
        let moved = state.load_cached_transcript("p", "abc123").unwrap();
        assert_eq!(moved[0].session_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_allow_list_deduplicates() {
        let state = ClientState::new(Arc::new(MemoryStore::new()), 50);
        assert!(state.remember_tool("Bash(git:*)").unwrap());
        assert!(!state.remember_tool("Bash(git:*)").unwrap());
        assert!(state.remember_tool("WebFetch").unwrap());
        assert_eq!(state.allowed_tools().unwrap(), vec!["Bash(git:*)", "WebFetch"]);
    }

    #[test]
    fn test_quota_pressure_prunes_oldest_transcripts_and_retries() {
        let store = Arc::new(MemoryStore::with_quota(2_000));
        let state = ClientState::new(store.clone(), 50);
        for session in ["s1", "s2", "s3"] {
            state.cache_transcript("p", session, &transcript_of(2)).unwrap();
        }

        let draft = "d".repeat(1_200);
        state.save_draft("p", &draft).unwrap();

        assert_eq!(state.load_draft("p").unwrap().as_deref(), Some(draft.as_str()));
        let remaining = store
            .keys()
            .unwrap()
            .into_iter()
            .filter(|k| k.starts_with(TRANSCRIPT_PREFIX))
            .count();
        assert!(remaining < 3);
    }

    #[test]
    fn test_quota_failure_after_pruning_is_swallowed() {
        let state = ClientState::new(Arc::new(MemoryStore::with_quota(10)), 50);
        assert!(state.save_draft("p", &"x".repeat(100)).is_ok());
        assert_eq!(state.load_draft("p").unwrap(), None);
    }
}
