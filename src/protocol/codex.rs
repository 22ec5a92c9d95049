//! Normalization of `codex-response` items.
//!
//! Codex reports finished items rather than streamed blocks: a command execution
//! arrives once, already carrying its output. Items are folded into the same
//! [`ResponsePayload`] shape the other providers use, pairing the call with its
//! result so the correlator resolves it immediately.

use serde_json::{json, Value};
use uuid::Uuid;

use super::events::{ContentBlock, ResponsePayload, ToolCall, ToolOutcome};

/// Look up the first string present at any of the given JSON pointer paths.
fn first_string<'a>(value: &'a Value, paths: &[&str]) -> Option<&'a str> {
    paths
        .iter()
        .find_map(|path| value.pointer(path).and_then(Value::as_str))
}

pub(crate) fn normalize_codex_item(data: &Value) -> ResponsePayload {
    match data.get("type").and_then(Value::as_str) {
        Some("item") => {}
        Some("turn_complete") => return ResponsePayload::TurnComplete,
        Some("turn_failed") => {
            let message = first_string(data, &["/error/message", "/error", "/message"])
                .unwrap_or("Turn failed");
            return ResponsePayload::Failed(message.to_string());
        }
        _ => return ResponsePayload::Ignored,
    }

    let item_id = first_string(data, &["/itemId", "/id", "/item/id"])
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    match data.get("itemType").and_then(Value::as_str).unwrap_or("") {
        "agent_message" => match first_string(data, &["/message/content", "/text"]) {
            Some(text) if !text.trim().is_empty() => ResponsePayload::Message {
                blocks: vec![ContentBlock::Text(text.to_string())],
            },
            _ => ResponsePayload::Ignored,
        },
        "command_execution" => {
            let Some(command) = first_string(data, &["/command"]) else {
                return ResponsePayload::Ignored;
            };
            let exit_code = data.get("exitCode").and_then(Value::as_i64);
            let output = first_string(data, &["/output", "/aggregated_output"]).unwrap_or("");
            completed_tool(
                item_id,
                "Bash",
                json!({ "command": command }),
                Value::String(output.to_string()),
                exit_code.is_some_and(|code| code != 0),
            )
        }
        "file_change" => match data.get("changes").and_then(Value::as_array) {
            Some(changes) if !changes.is_empty() => {
                let summary = changes
                    .iter()
                    .map(|change| {
                        let kind = first_string(change, &["/kind"]).unwrap_or("update");
                        let path = first_string(change, &["/path"]).unwrap_or("unknown");
                        format!("{}: {}", kind, path)
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                let failed = first_string(data, &["/status"]) == Some("failed");
                completed_tool(
                    item_id,
                    "FileChanges",
                    json!({ "changes": changes }),
                    Value::String(summary),
                    failed,
                )
            }
            _ => ResponsePayload::Ignored,
        },
        "mcp_tool_call" => {
            let server = first_string(data, &["/server"]).unwrap_or("mcp");
            let tool = first_string(data, &["/tool"]).unwrap_or("tool");
            let error = first_string(data, &["/error/message", "/error"]);
            let result = match error {
                Some(message) => Value::String(message.to_string()),
                None => data.get("result").cloned().unwrap_or(Value::Null),
            };
            completed_tool(
                item_id,
                &format!("{}:{}", server, tool),
                data.get("arguments").cloned().unwrap_or(Value::Null),
                result,
                error.is_some(),
            )
        }
        "error" => ResponsePayload::Failed(
            first_string(data, &["/message/content", "/message"])
                .unwrap_or("Unknown Codex error")
                .to_string(),
        ),
        // Reasoning and unrecognized items are not transcript material.
        _ => ResponsePayload::Ignored,
    }
}

fn completed_tool(
    id: String,
    name: &str,
    input: Value,
    content: Value,
    is_error: bool,
) -> ResponsePayload {
    ResponsePayload::Message {
        blocks: vec![
            ContentBlock::ToolUse(ToolCall {
                id: id.clone(),
                name: name.to_string(),
                input,
                parent_id: None,
            }),
            ContentBlock::ToolResult(ToolOutcome {
                tool_use_id: id,
                content,
                is_error,
            }),
        ],
    }
}
