//! Claude.ai conversations, from the data export (`conversations.json`) or
//! the `chat_conversations/{uuid}` detail payload.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use super::content::{extract, ExtractedContent};
use super::tree::{linearize, Node};
use super::{duration_ms, metadata, settle_time_bounds, SourceAdapter};
use crate::error::{ConvosError, Result};
use crate::identity::IdentityMint;
use crate::models::{
    ts_from_iso, Artifact, Attachment, Conversation, Message, Role, Source, ToolCall, ToolStatus,
};
use crate::normalize::NormalizationResult;

#[derive(Debug, Deserialize)]
struct RawConversation {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    project_uuid: Option<String>,
    #[serde(default)]
    project: Option<RawProject>,
    #[serde(default)]
    current_leaf_message_uuid: Option<String>,
    chat_messages: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawProject {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    id: Option<String>,
    sender: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    parent_message_uuid: Option<String>,
    #[serde(default)]
    attachments: Vec<RawAttachment>,
    #[serde(default)]
    files: Vec<RawFile>,
}

#[derive(Debug, Deserialize)]
struct RawAttachment {
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    file_type: Option<String>,
    #[serde(default)]
    file_size: Option<i64>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    file_kind: Option<String>,
    #[serde(default)]
    preview_url: Option<String>,
    #[serde(default)]
    thumbnail_url: Option<String>,
}

/// Latest known revision of one artifact.
#[derive(Debug, Clone)]
struct ArtifactState {
    version: i64,
    content: String,
    artifact_type: Option<String>,
    title: Option<String>,
    language: Option<String>,
}

/// Adapter for Claude.ai conversation payloads.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClaudeAdapter;

impl SourceAdapter for ClaudeAdapter {
    type Input = Value;

    fn source(&self) -> Source {
        Source::Claude
    }

    fn normalize(&self, input: &Value) -> Result<NormalizationResult> {
        let items: Vec<&Value> = match input {
            Value::Array(items) => items.iter().collect(),
            Value::Object(map) if map.contains_key("chat_messages") => vec![input],
            _ => {
                return Err(ConvosError::malformed(
                    Source::Claude,
                    "input",
                    "expected a conversation object or a list of conversations",
                ))
            }
        };

        let mut mint = IdentityMint::new(Source::Claude);
        let mut result = NormalizationResult::new();
        for (i, item) in items.into_iter().enumerate() {
            let unit = format!("conversation {}", i);
            let raw: RawConversation = serde_json::from_value(item.clone())
                .map_err(|e| ConvosError::malformed(Source::Claude, &unit, e.to_string()))?;
            normalize_conversation(&mut mint, raw, &unit, &mut result)?;
        }
        Ok(result)
    }
}

fn normalize_conversation(
    mint: &mut IdentityMint,
    raw: RawConversation,
    unit: &str,
    out: &mut NormalizationResult,
) -> Result<()> {
    let original = raw
        .uuid
        .clone()
        .or_else(|| raw.id.clone())
        .ok_or_else(|| ConvosError::malformed(Source::Claude, unit, "conversation has no uuid"))?;
    let unit = original.as_str();
    let conversation_id = mint.mint(&original)?;

    let message_keys: Vec<String> = raw
        .chat_messages
        .iter()
        .enumerate()
        .map(|(i, m)| {
            m.uuid
                .clone()
                .or_else(|| m.id.clone())
                .unwrap_or_else(|| format!("#{}", i))
        })
        .collect();
    let nodes: Vec<Node<'_>> = raw
        .chat_messages
        .iter()
        .zip(&message_keys)
        .map(|(m, key)| Node {
            id: key.as_str(),
            parent: m.parent_message_uuid.as_deref(),
            ts: m.created_at.as_deref().and_then(ts_from_iso),
        })
        .collect();
    let path = linearize(&nodes).map_err(|e| ConvosError::malformed(Source::Claude, unit, e))?;

    let mut messages = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut attachments = Vec::new();
    let mut artifacts = Vec::new();
    let mut pending_by_id: HashMap<String, usize> = HashMap::new();
    let mut pending_anonymous: Vec<usize> = Vec::new();
    let mut artifact_states: HashMap<String, ArtifactState> = HashMap::new();

    for (seq, &idx) in path.iter().enumerate() {
        let raw_msg = &raw.chat_messages[idx];
        let key = &message_keys[idx];
        let msg_unit = format!("{} message {}", unit, key);
        let role = match raw_msg.sender.as_str() {
            "human" => Role::Human,
            other => Role::from_provider(other).ok_or_else(|| {
                ConvosError::malformed(
                    Source::Claude,
                    &msg_unit,
                    format!("unknown sender '{}'", other),
                )
            })?,
        };

        let body = match &raw_msg.content {
            Value::Array(blocks) if !blocks.is_empty() => {
                extract(Source::Claude, &msg_unit, &raw_msg.content)?
            }
            _ => ExtractedContent {
                text: raw_msg.text.clone().unwrap_or_default().trim().to_string(),
                ..ExtractedContent::default()
            },
        };
        if !body.has_payload() && raw_msg.attachments.is_empty() && raw_msg.files.is_empty() {
            continue;
        }

        let created_at = raw_msg.created_at.as_deref().and_then(ts_from_iso);
        let message_id = mint.mint(&format!("{}:{}", original, key))?;

        for (i, a) in raw_msg.attachments.iter().enumerate() {
            attachments.push(Attachment {
                id: mint.mint(&format!("{}:{}:attachment:{}", original, key, i))?,
                message_id: message_id.clone(),
                filename: a.file_name.clone(),
                mime_type: a.file_type.clone(),
                size: a.file_size,
                path: None,
                url: a.url.clone(),
                created_at,
            });
        }
        for (i, f) in raw_msg.files.iter().enumerate() {
            attachments.push(Attachment {
                id: mint.mint(&format!("{}:{}:file:{}", original, key, i))?,
                message_id: message_id.clone(),
                filename: f.file_name.clone(),
                mime_type: f.file_kind.clone(),
                size: None,
                path: None,
                url: f.preview_url.clone().or_else(|| f.thumbnail_url.clone()),
                created_at,
            });
        }
        for (i, media) in body.media.iter().enumerate() {
            attachments.push(Attachment {
                id: mint.mint(&format!("{}:{}:media:{}", original, key, i))?,
                message_id: message_id.clone(),
                filename: media.filename.clone(),
                mime_type: media.mime_type.clone(),
                size: media.size,
                path: None,
                url: media.url.clone(),
                created_at,
            });
        }

        for (j, tool_use) in body.tool_uses.iter().enumerate() {
            tool_calls.push(ToolCall {
                id: mint.mint(&format!("{}:{}:tool:{}", original, key, j))?,
                message_id: message_id.clone(),
                tool_name: tool_use.name.clone(),
                input: tool_use.input.clone(),
                output: None,
                status: ToolStatus::Pending,
                duration_ms: None,
                created_at,
            });
            let index = tool_calls.len() - 1;
            match &tool_use.id {
                Some(id) => {
                    pending_by_id.insert(id.clone(), index);
                }
                None => pending_anonymous.push(index),
            }

            if tool_use.name == "artifacts" {
                if let Some(artifact) =
                    apply_artifact_command(&tool_use.input, &mut artifact_states)
                {
                    artifacts.push(Artifact {
                        id: mint.mint(&format!(
                            "{}:artifact:{}:v{}",
                            original, artifact.0, artifact.1.version
                        ))?,
                        conversation_id: conversation_id.clone(),
                        artifact_type: artifact.1.artifact_type,
                        title: artifact.1.title,
                        content: artifact.1.content,
                        language: artifact.1.language,
                        version: artifact.1.version,
                        created_at,
                    });
                }
            }
        }

        for (j, result) in body.tool_results.iter().enumerate() {
            let status = if result.is_error {
                ToolStatus::Error
            } else {
                ToolStatus::Complete
            };
            let matched = match &result.tool_use_id {
                Some(id) => pending_by_id.remove(id),
                None => pending_anonymous.pop(),
            };
            match matched {
                Some(index) => {
                    let call = &mut tool_calls[index];
                    call.output = Some(result.content.clone());
                    call.status = status;
                    call.duration_ms = duration_ms(call.created_at, created_at);
                }
                None => tool_calls.push(ToolCall {
                    id: mint.mint(&format!("{}:{}:result:{}", original, key, j))?,
                    message_id: message_id.clone(),
                    tool_name: "unknown".to_string(),
                    input: json!({}),
                    output: Some(result.content.clone()),
                    status,
                    duration_ms: None,
                    created_at,
                }),
            }
        }

        messages.push(Message {
            id: message_id,
            conversation_id: conversation_id.clone(),
            role,
            content: body.text,
            thinking: body.thinking,
            created_at,
            seq: seq as i64,
            model: None,
            metadata: metadata([
                ("uuid", Some(json!(key))),
                ("unhandled_blocks", Some(Value::from(body.unhandled))),
                (
                    "redacted_thinking",
                    (body.redacted_thinking > 0).then(|| json!(body.redacted_thinking)),
                ),
            ]),
        });
    }

    let project_id = raw
        .project_uuid
        .clone()
        .or_else(|| raw.project.as_ref().and_then(|p| p.uuid.clone()));
    let mut conversation = Conversation {
        id: conversation_id,
        source: Source::Claude,
        title: raw.name.clone().filter(|n| !n.is_empty()),
        created_at: raw.created_at.as_deref().and_then(ts_from_iso),
        updated_at: raw.updated_at.as_deref().and_then(ts_from_iso),
        model: raw.model.clone(),
        cwd: None,
        git_branch: None,
        project_id,
        metadata: metadata([
            ("original_id", Some(json!(original))),
            ("summary", raw.summary.clone().filter(|s| !s.is_empty()).map(Value::from)),
            (
                "project_name",
                raw.project.as_ref().and_then(|p| p.name.clone()).map(Value::from),
            ),
            (
                "current_leaf",
                raw.current_leaf_message_uuid.clone().map(Value::from),
            ),
        ]),
    };
    settle_time_bounds(&mut conversation, &messages);

    out.conversations.push(conversation);
    out.messages.extend(messages);
    out.tool_calls.extend(tool_calls);
    out.attachments.extend(attachments);
    out.artifacts.extend(artifacts);
    Ok(())
}

/// Apply one `artifacts` tool command and return the resulting revision.
///
/// `create` and `rewrite` carry full content; `update` replaces `old_str`
/// with `new_str` in the previous revision. Artifacts are keyed by their
/// identifier, falling back to the title.
fn apply_artifact_command(
    input: &Value,
    states: &mut HashMap<String, ArtifactState>,
) -> Option<(String, ArtifactState)> {
    let field = |name: &str| input.get(name).and_then(Value::as_str).map(String::from);
    let command = field("command")?;
    let key = field("id")
        .or_else(|| field("title"))
        .unwrap_or_else(|| "artifact".to_string());
    let previous = states.get(&key).cloned();

    let content = match command.as_str() {
        "create" | "rewrite" => field("content").unwrap_or_default(),
        "update" => {
            let new_str = field("new_str").unwrap_or_default();
            match (&previous, field("old_str")) {
                (Some(prev), Some(old_str)) if !old_str.is_empty() => {
                    prev.content.replacen(&old_str, &new_str, 1)
                }
                _ => new_str,
            }
        }
        _ => return None,
    };

    let state = ArtifactState {
        version: previous.as_ref().map_or(1, |p| p.version + 1),
        content,
        artifact_type: field("type").or_else(|| previous.as_ref().and_then(|p| p.artifact_type.clone())),
        title: field("title").or_else(|| previous.as_ref().and_then(|p| p.title.clone())),
        language: field("language").or_else(|| previous.as_ref().and_then(|p| p.language.clone())),
    };
    states.insert(key.clone(), state.clone());
    Some((key, state))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Value {
        json!([{
            "uuid": "c-1",
            "name": "Landing page",
            "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-01T10:05:00Z",
            "project_uuid": "p-9",
            "chat_messages": [
                {
                    "uuid": "m1", "sender": "human", "created_at": "2024-05-01T10:00:00Z",
                    "parent_message_uuid": "00000000-0000-4000-8000-000000000000",
                    "text": "Build a landing page",
                    "content": [{"type": "text", "text": "Build a landing page"}],
                    "attachments": [{"file_name": "brief.txt", "file_type": "text/plain", "file_size": 120, "extracted_content": "..."}],
                    "files": []
                },
                {
                    "uuid": "m2", "sender": "assistant", "created_at": "2024-05-01T10:01:00Z",
                    "parent_message_uuid": "m1",
                    "content": [
                        {"type": "thinking", "thinking": "Start with a hero section"},
                        {"type": "text", "text": "Here is a first version."},
                        {"type": "tool_use", "id": "toolu_a", "name": "artifacts", "input": {
                            "command": "create", "id": "landing", "type": "text/html",
                            "title": "Landing", "content": "<h1>Hello</h1>"
                        }},
                        {"type": "tool_result", "tool_use_id": "toolu_a", "content": [{"type": "text", "text": "OK"}]}
                    ]
                },
                {
                    "uuid": "m3", "sender": "human", "created_at": "2024-05-01T10:02:00Z",
                    "parent_message_uuid": "m2",
                    "content": [{"type": "text", "text": "Say Welcome instead"}]
                },
                {
                    "uuid": "m4", "sender": "assistant", "created_at": "2024-05-01T10:03:00Z",
                    "parent_message_uuid": "m3",
                    "content": [
                        {"type": "tool_use", "id": "toolu_b", "name": "artifacts", "input": {
                            "command": "update", "id": "landing", "old_str": "Hello", "new_str": "Welcome"
                        }},
                        {"type": "text", "text": "Updated."}
                    ]
                }
            ]
        }])
    }

    #[test]
    fn test_messages_in_order_with_roles() {
        let r = ClaudeAdapter.normalize(&fixture()).unwrap();
        let roles: Vec<Role> = r.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::Human, Role::Assistant, Role::Human, Role::Assistant]
        );
        assert_eq!(r.messages[1].thinking.as_deref(), Some("Start with a hero section"));
        assert_eq!(r.messages[1].content, "Here is a first version.");
    }

    #[test]
    fn test_conversation_fields() {
        let r = ClaudeAdapter.normalize(&fixture()).unwrap();
        let c = &r.conversations[0];
        assert_eq!(c.title.as_deref(), Some("Landing page"));
        assert_eq!(c.project_id.as_deref(), Some("p-9"));
    }

    #[test]
    fn test_tool_use_correlated_with_result() {
        let r = ClaudeAdapter.normalize(&fixture()).unwrap();
        assert_eq!(r.tool_calls.len(), 2);
        assert_eq!(r.tool_calls[0].status, ToolStatus::Complete);
        assert_eq!(r.tool_calls[0].output, Some(json!([{"type": "text", "text": "OK"}])));
        assert_eq!(r.tool_calls[1].status, ToolStatus::Pending);
    }

    #[test]
    fn test_artifact_versions() {
        let r = ClaudeAdapter.normalize(&fixture()).unwrap();
        assert_eq!(r.artifacts.len(), 2);
        assert_eq!(r.artifacts[0].version, 1);
        assert_eq!(r.artifacts[0].content, "<h1>Hello</h1>");
        assert_eq!(r.artifacts[1].version, 2);
        assert_eq!(r.artifacts[1].content, "<h1>Welcome</h1>");
        assert_eq!(r.artifacts[1].title.as_deref(), Some("Landing"));
        assert_ne!(r.artifacts[0].id, r.artifacts[1].id);
    }

    #[test]
    fn test_attachment_metadata() {
        let r = ClaudeAdapter.normalize(&fixture()).unwrap();
        assert_eq!(r.attachments.len(), 1);
        let a = &r.attachments[0];
        assert_eq!(a.filename.as_deref(), Some("brief.txt"));
        assert_eq!(a.mime_type.as_deref(), Some("text/plain"));
        assert_eq!(a.size, Some(120));
    }

    #[test]
    fn test_orphan_result_kept_as_unknown_tool() {
        let input = json!({"uuid": "c-2", "chat_messages": [{
            "uuid": "x", "sender": "assistant",
            "content": [{"type": "tool_result", "tool_use_id": "gone", "content": "late"}]
        }]});
        let r = ClaudeAdapter.normalize(&input).unwrap();
        assert_eq!(r.tool_calls.len(), 1);
        assert_eq!(r.tool_calls[0].tool_name, "unknown");
        assert_eq!(r.tool_calls[0].status, ToolStatus::Complete);
    }

    #[test]
    fn test_missing_chat_messages_is_malformed() {
        let err = ClaudeAdapter.normalize(&json!([{"uuid": "c"}])).unwrap_err();
        assert!(matches!(err, ConvosError::MalformedInput { .. }));
    }

    #[test]
    fn test_text_fallback_when_content_empty() {
        let input = json!({"uuid": "c-3", "chat_messages": [
            {"uuid": "a", "sender": "human", "text": "plain text only", "content": []}
        ]});
        let r = ClaudeAdapter.normalize(&input).unwrap();
        assert_eq!(r.messages[0].content, "plain text only");
    }
}
