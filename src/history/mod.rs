//! Session history and attachment upload over the server's HTTP API.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::EngineError;
use crate::engine::tools::is_container_tool;
use crate::transcript::{
    ImageAttachment, MessageKind, SubagentState, ToolResult, TranscriptMessage,
};

/// One page of a session's stored messages, oldest first.
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub messages: Vec<TranscriptMessage>,
    pub has_more: bool,
    pub total: usize,
}

#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Messages `offset..offset + limit` counted back from the newest.
    async fn fetch_page(
        &self,
        project: &str,
        session_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<HistoryPage, EngineError>;

    async fn fetch_all(&self, project: &str, session_id: &str) -> Result<HistoryPage, EngineError>;
}

#[async_trait]
pub trait AttachmentUploader: Send + Sync {
    /// Upload images given as data URLs; returns them as the server stored them.
    async fn upload_images(
        &self,
        project: &str,
        images: Vec<ImageAttachment>,
    ) -> Result<Vec<ImageAttachment>, EngineError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHistoryPage {
    #[serde(default)]
    messages: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    total: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    images: Vec<ImageAttachment>,
}

/// Client for the server's REST endpoints.
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Base URL extended with percent-encoded path segments.
    fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url, EngineError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| EngineError::Config(format!("invalid API base URL {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| EngineError::Config(format!("API base URL {} cannot have a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn messages_url(&self, project: &str, session_id: &str) -> Result<reqwest::Url, EngineError> {
        self.endpoint(&["api", "projects", project, "sessions", session_id, "messages"])
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_messages(
        &self,
        project: &str,
        session_id: &str,
        query: &[(&str, usize)],
    ) -> Result<HistoryPage, EngineError> {
        let url = self.messages_url(project, session_id)?;
        let response = self
            .authorized(self.client.get(url.clone()).query(query))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::History(format!("{} returned {}: {}", url, status, body)));
        }

        let raw: RawHistoryPage = response.json().await?;
        let messages = convert_history(&raw.messages);
        log::debug!(
            "Fetched {} history entries for {} ({} messages)",
            raw.messages.len(),
            session_id,
            messages.len()
        );
        Ok(HistoryPage {
            total: raw.total.unwrap_or(raw.messages.len()),
            has_more: raw.has_more,
            messages,
        })
    }
}

#[async_trait]
impl HistorySource for HttpApiClient {
    async fn fetch_page(
        &self,
        project: &str,
        session_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<HistoryPage, EngineError> {
        self.get_messages(project, session_id, &[("limit", limit), ("offset", offset)])
            .await
    }

    async fn fetch_all(&self, project: &str, session_id: &str) -> Result<HistoryPage, EngineError> {
        self.get_messages(project, session_id, &[]).await
    }
}

#[async_trait]
impl AttachmentUploader for HttpApiClient {
    async fn upload_images(
        &self,
        project: &str,
        images: Vec<ImageAttachment>,
    ) -> Result<Vec<ImageAttachment>, EngineError> {
        let mut form = reqwest::multipart::Form::new();
        for image in &images {
            let (mime, bytes) = decode_data_url(&image.data)?;
            let part = reqwest::multipart::Part::bytes(bytes)
                .file_name(image.name.clone())
                .mime_str(&mime)?;
            form = form.part("images", part);
        }

        let url = self.endpoint(&["api", "projects", project, "upload-images"])?;
        let response = self
            .authorized(self.client.post(url).multipart(form))
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Upload(body));
        }

        let uploaded: UploadResponse = response.json().await?;
        Ok(uploaded.images)
    }
}

/// Split a `data:<mime>;base64,<payload>` URL into its MIME type and bytes.
pub fn decode_data_url(data_url: &str) -> Result<(String, Vec<u8>), EngineError> {
    let (header, payload) = data_url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(','))
        .ok_or_else(|| EngineError::Upload("image is not a data URL".to_string()))?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| EngineError::Upload("image data URL is not base64".to_string()))?;
    let bytes = BASE64
        .decode(payload)
        .map_err(|e| EngineError::Upload(format!("invalid image data: {}", e)))?;
    Ok((mime.to_string(), bytes))
}

// ============================================================================
// Stored session entries -> transcript
// ============================================================================

/// Background task reports are stored as user turns wrapped in a marker tag.
fn kind_for(kind: MessageKind, text: &str) -> MessageKind {
    if kind == MessageKind::User && text.trim_start().starts_with("<task-notification>") {
        MessageKind::TaskNotification
    } else {
        kind
    }
}

/// Convert stored session entries into transcript messages.
///
/// Tool results are attached to the matching tool entry on the same page; a
/// result whose call is on an older page is dropped.
pub fn convert_history(entries: &[Value]) -> Vec<TranscriptMessage> {
    let mut out: Vec<TranscriptMessage> = Vec::new();

    for entry in entries {
        let Some(message) = entry.get("message") else {
            continue;
        };
        let role = message
            .get("role")
            .or_else(|| entry.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let kind = match role {
            "user" => MessageKind::User,
            "assistant" => MessageKind::Assistant,
            _ => continue,
        };
        let timestamp = entry
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let session_id = entry
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string);

        let stamp = |mut m: TranscriptMessage| {
            m.timestamp = timestamp;
            m.session_id = session_id.clone();
            m
        };

        match message.get("content") {
            Some(Value::String(text)) if !text.trim().is_empty() => {
                let mut converted = stamp(TranscriptMessage::new(kind_for(kind, text), text.as_str()));
                if let Some(uuid) = entry.get("uuid").and_then(Value::as_str) {
                    converted.id = uuid.to_string();
                }
                out.push(converted);
            }
            Some(Value::Array(blocks)) => {
                for block in blocks {
                    match block.get("type").and_then(Value::as_str) {
                        Some("text") => {
                            let text = block.get("text").and_then(Value::as_str).unwrap_or("");
                            if !text.trim().is_empty() {
                                out.push(stamp(TranscriptMessage::new(kind_for(kind, text), text)));
                            }
                        }
                        Some("tool_use") => {
                            let id = block.get("id").and_then(Value::as_str).unwrap_or_default();
                            let name = block.get("name").and_then(Value::as_str).unwrap_or("UnknownTool");
                            let input = block.get("input").cloned().unwrap_or(Value::Null);
                            let mut tool = stamp(TranscriptMessage::tool_use(id, name, input));
                            if is_container_tool(name) {
                                tool.subagent = Some(SubagentState::default());
                            }
                            out.push(tool);
                        }
                        Some("tool_result") => {
                            let tool_use_id = block
                                .get("tool_use_id")
                                .and_then(Value::as_str)
                                .unwrap_or_default();
                            let result = ToolResult {
                                content: block.get("content").cloned().unwrap_or(Value::Null),
                                is_error: block.get("is_error").and_then(Value::as_bool).unwrap_or(false),
                                timestamp,
                            };
                            match out
                                .iter_mut()
                                .rev()
                                .find(|m| m.tool_id.as_deref() == Some(tool_use_id))
                            {
                                Some(call) => {
                                    if let Some(state) = call.subagent.as_mut() {
                                        state.is_complete = true;
                                    }
                                    call.tool_result = Some(result);
                                }
                                None => log::debug!("History result {} has no call on this page", tool_use_id),
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_convert_history_pairs_results_with_calls() {
        let entries = vec![
            json!({"type": "user", "uuid": "u1", "sessionId": "s1",
                   "timestamp": "2025-01-02T03:04:05Z",
                   "message": {"role": "user", "content": "list files"}}),
            json!({"type": "assistant", "sessionId": "s1",
                   "message": {"role": "assistant", "content": [
                       {"type": "text", "text": "Sure."},
                       {"type": "tool_use", "id": "t1", "name": "Bash", "input": {"command": "ls"}}
                   ]}}),
            json!({"type": "user", "sessionId": "s1",
                   "message": {"role": "user", "content": [
                       {"type": "tool_result", "tool_use_id": "t1", "content": "a.rs"},
                       {"type": "tool_result", "tool_use_id": "older", "content": "?"}
                   ]}}),
            json!({"type": "summary", "summary": "ignored"}),
        ];

        let messages = convert_history(&entries);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].id, "u1");
        assert_eq!(messages[0].kind, MessageKind::User);
        assert_eq!(messages[0].timestamp.to_rfc3339(), "2025-01-02T03:04:05+00:00");
        assert_eq!(messages[1].content, "Sure.");
        let tool = &messages[2];
        assert_eq!(tool.tool_name.as_deref(), Some("Bash"));
        assert_eq!(tool.tool_result.as_ref().unwrap().content, json!("a.rs"));
        assert!(messages.iter().all(|m| m.session_id.as_deref() == Some("s1")));
    }

    #[test]
    fn test_container_history_marked_complete() {
        let entries = vec![
            json!({"message": {"role": "assistant", "content": [
                {"type": "tool_use", "id": "t1", "name": "Task", "input": {"prompt": "explore"}}
            ]}}),
            json!({"message": {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "t1", "content": "report"}
            ]}}),
        ];

        let messages = convert_history(&entries);

        assert!(messages[0].subagent.as_ref().unwrap().is_complete);
    }

    #[test]
    fn test_decode_data_url() {
        let (mime, bytes) = decode_data_url("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, b"hello");

        assert!(matches!(decode_data_url("/tmp/a.png"), Err(EngineError::Upload(_))));
        assert!(matches!(decode_data_url("data:image/png,raw"), Err(EngineError::Upload(_))));
    }

    #[test]
    fn test_messages_url_trims_trailing_slash() {
        let client = HttpApiClient::new("http://localhost:3001/");
        assert_eq!(
            client.messages_url("demo", "abc").unwrap().as_str(),
            "http://localhost:3001/api/projects/demo/sessions/abc/messages"
        );
    }

    #[test]
    fn test_url_segments_are_percent_encoded() {
        let client = HttpApiClient::new("http://localhost:3001/base");
        assert_eq!(
            client.messages_url("my proj/x", "a?b#c").unwrap().as_str(),
            "http://localhost:3001/base/api/projects/my%20proj%2Fx/sessions/a%3Fb%23c/messages"
        );
        assert!(matches!(
            HttpApiClient::new("not a url").messages_url("p", "s"),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_task_notification_entries_keep_their_kind() {
        let entries = vec![
            json!({"message": {"role": "user",
                   "content": "<task-notification>build finished</task-notification>"}}),
            json!({"message": {"role": "assistant",
                   "content": "<task-notification> is just text here"}}),
        ];

        let messages = convert_history(&entries);

        assert_eq!(messages[0].kind, MessageKind::TaskNotification);
        assert_eq!(messages[1].kind, MessageKind::Assistant);
    }
}
