//! Anthropic-style content blocks, shared by the Claude.ai and Claude Code
//! adapters.
//!
//! A message body is either a plain string or a list of typed blocks. The
//! `type` tag is read first: known block kinds are decoded strictly and a
//! decode failure is malformed input, unknown kinds are recorded by name so
//! the adapter can keep them in message metadata instead of dropping them.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConvosError, Result};
use crate::models::Source;

const KNOWN_BLOCKS: &[&str] = &[
    "text",
    "thinking",
    "redacted_thinking",
    "tool_use",
    "tool_result",
    "image",
    "document",
];

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    RedactedThinking {},
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: Option<String>,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: Option<bool>,
    },
    Image {
        source: MediaSource,
    },
    Document {
        source: MediaSource,
        #[serde(default)]
        title: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct MediaSource {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolUse {
    pub id: Option<String>,
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub tool_use_id: Option<String>,
    pub content: Value,
    pub is_error: bool,
}

/// Inline media (image or document) referenced from a message.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRef {
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<i64>,
    pub url: Option<String>,
}

/// Everything extracted from one message body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedContent {
    pub text: String,
    pub thinking: Option<String>,
    pub tool_uses: Vec<ToolUse>,
    pub tool_results: Vec<ToolResult>,
    pub media: Vec<MediaRef>,
    /// Block kinds with no canonical counterpart, in order of appearance.
    pub unhandled: Vec<String>,
    pub redacted_thinking: usize,
}

impl ExtractedContent {
    /// A body made only of tool results, the shape CLI logs use to return
    /// tool output on a synthetic user turn.
    pub fn is_tool_result_only(&self) -> bool {
        !self.tool_results.is_empty()
            && self.text.is_empty()
            && self.thinking.is_none()
            && self.tool_uses.is_empty()
            && self.media.is_empty()
    }

    pub fn has_payload(&self) -> bool {
        !self.text.is_empty()
            || self.thinking.is_some()
            || !self.tool_uses.is_empty()
            || !self.tool_results.is_empty()
            || !self.media.is_empty()
            || !self.unhandled.is_empty()
    }
}

/// Extract text, thinking, tool traffic and media from a message body.
///
/// `unit` names the input unit for error messages (file path or conversation
/// id).
pub fn extract(provider: Source, unit: &str, content: &Value) -> Result<ExtractedContent> {
    let mut out = ExtractedContent::default();
    let items = match content {
        Value::Null => return Ok(out),
        Value::String(s) => {
            out.text = s.trim().to_string();
            return Ok(out);
        }
        Value::Array(items) => items,
        other => {
            return Err(ConvosError::malformed(
                provider,
                unit,
                format!("message content must be a string or a list, got {}", kind_of(other)),
            ))
        }
    };

    let mut text_parts: Vec<String> = Vec::new();
    let mut thinking_parts: Vec<String> = Vec::new();

    for (i, item) in items.iter().enumerate() {
        let tag = match item {
            Value::String(s) => {
                text_parts.push(s.clone());
                continue;
            }
            Value::Object(map) => match map.get("type").and_then(Value::as_str) {
                Some(tag) => tag,
                None => {
                    return Err(ConvosError::malformed(
                        provider,
                        unit,
                        format!("content block {} has no type", i),
                    ))
                }
            },
            other => {
                return Err(ConvosError::malformed(
                    provider,
                    unit,
                    format!("content block {} is a {}", i, kind_of(other)),
                ))
            }
        };

        if !KNOWN_BLOCKS.contains(&tag) {
            out.unhandled.push(tag.to_string());
            continue;
        }

        let block: Block = serde_json::from_value(item.clone()).map_err(|e| {
            ConvosError::malformed(provider, unit, format!("{} block {}: {}", tag, i, e))
        })?;

        match block {
            Block::Text { text } => text_parts.push(text),
            Block::Thinking { thinking } => thinking_parts.push(thinking),
            Block::RedactedThinking {} => out.redacted_thinking += 1,
            Block::ToolUse { id, name, input } => out.tool_uses.push(ToolUse { id, name, input }),
            Block::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => out.tool_results.push(ToolResult {
                tool_use_id,
                content,
                is_error: is_error.unwrap_or(false),
            }),
            Block::Image { source } => out.media.push(media_ref(source, None)),
            Block::Document { source, title } => out.media.push(media_ref(source, title)),
        }
    }

    out.text = join_nonempty(&text_parts);
    let thinking = join_nonempty(&thinking_parts);
    out.thinking = (!thinking.is_empty()).then_some(thinking);
    Ok(out)
}

/// Flatten a tool result payload to display text.
pub fn result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(map) => map.get("text").and_then(Value::as_str).map(String::from),
                    _ => None,
                })
                .collect();
            parts.join("\n")
        }
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn media_ref(source: MediaSource, title: Option<String>) -> MediaRef {
    let size = match (source.kind.as_str(), &source.data) {
        ("base64", Some(data)) => Some(base64_decoded_len(data)),
        (_, Some(data)) if source.kind == "text" => Some(data.len() as i64),
        _ => None,
    };
    MediaRef {
        filename: title,
        mime_type: source.media_type,
        size,
        url: source.url,
    }
}

/// Decoded byte length of a base64 payload, without decoding it.
fn base64_decoded_len(data: &str) -> i64 {
    let trimmed = data.trim_end();
    let padding = trimmed.chars().rev().take_while(|c| *c == '=').count();
    ((trimmed.len() / 4) * 3).saturating_sub(padding) as i64
}

fn join_nonempty(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(content: Value) -> ExtractedContent {
        extract(Source::ClaudeCode, "test", &content).unwrap()
    }

    #[test]
    fn test_plain_string_is_text() {
        let c = run(json!("  hello  "));
        assert_eq!(c.text, "hello");
        assert!(c.thinking.is_none());
    }

    #[test]
    fn test_blocks_split_into_channels() {
        let c = run(json!([
            {"type": "thinking", "thinking": "let me see", "signature": "x"},
            {"type": "text", "text": "Answer"},
            {"type": "tool_use", "id": "toolu_1", "name": "Read", "input": {"file_path": "/a"}},
        ]));
        assert_eq!(c.text, "Answer");
        assert_eq!(c.thinking.as_deref(), Some("let me see"));
        assert_eq!(c.tool_uses.len(), 1);
        assert_eq!(c.tool_uses[0].id.as_deref(), Some("toolu_1"));
        assert_eq!(c.tool_uses[0].input["file_path"], "/a");
    }

    #[test]
    fn test_tool_result_only() {
        let c = run(json!([
            {"type": "tool_result", "tool_use_id": "toolu_1", "content": "ok", "is_error": true}
        ]));
        assert!(c.is_tool_result_only());
        assert!(c.tool_results[0].is_error);
    }

    #[test]
    fn test_unknown_block_is_recorded_not_dropped() {
        let c = run(json!([{"type": "server_tool_use", "id": "s"}, {"type": "text", "text": "t"}]));
        assert_eq!(c.unhandled, vec!["server_tool_use".to_string()]);
        assert_eq!(c.text, "t");
    }

    #[test]
    fn test_known_block_with_bad_shape_is_malformed() {
        let err = extract(
            Source::Claude,
            "conv",
            &json!([{"type": "tool_use", "input": {}}]),
        )
        .unwrap_err();
        assert!(matches!(err, ConvosError::MalformedInput { .. }));
    }

    #[test]
    fn test_non_list_content_is_malformed() {
        assert!(extract(Source::Claude, "conv", &json!(42)).is_err());
    }

    #[test]
    fn test_image_size_from_base64() {
        let c = run(json!([
            {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "aGVsbG8="}}
        ]));
        assert_eq!(c.media[0].mime_type.as_deref(), Some("image/png"));
        assert_eq!(c.media[0].size, Some(5));
    }

    #[test]
    fn test_result_text_flattens_blocks() {
        let v = json!([{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]);
        assert_eq!(result_text(&v), "a\nb");
        assert_eq!(result_text(&json!("plain")), "plain");
    }
}
