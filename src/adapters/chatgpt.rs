//! ChatGPT conversations, from the data export (`conversations.json`) or the
//! `backend-api/conversation/{id}` detail payload. Both share one shape: a
//! `mapping` of node id to node, each node holding an optional message and a
//! parent link.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::tree::{linearize, Node};
use super::{duration_ms, json_or_text, metadata, settle_time_bounds, SourceAdapter};
use crate::error::{ConvosError, Result};
use crate::identity::IdentityMint;
use crate::models::{
    ts_from_epoch, Attachment, Conversation, Message, Role, Source, ToolCall, ToolStatus,
};
use crate::normalize::NormalizationResult;

#[derive(Debug, Deserialize)]
struct RawConversation {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    create_time: Value,
    #[serde(default)]
    update_time: Value,
    mapping: BTreeMap<String, RawNode>,
    #[serde(default)]
    current_node: Option<String>,
    #[serde(default)]
    default_model_slug: Option<String>,
    #[serde(default)]
    gizmo_id: Option<String>,
    #[serde(default)]
    is_archived: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(default)]
    message: Option<RawMessage>,
    #[serde(default)]
    parent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    author: RawAuthor,
    #[serde(default)]
    create_time: Value,
    #[serde(default)]
    content: Option<RawContent>,
    #[serde(default)]
    metadata: Value,
    #[serde(default)]
    recipient: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAuthor {
    role: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawContent {
    content_type: String,
    #[serde(default)]
    parts: Vec<Value>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    thoughts: Vec<RawThought>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    user_profile: Option<String>,
    #[serde(default)]
    user_instructions: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawThought {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// What one message body maps to.
#[derive(Debug, Default)]
struct Body {
    text: String,
    thinking: Option<String>,
    language: Option<String>,
    attachments: Vec<PartRef>,
    /// `content_type` of each asset part, in part order.
    asset_kinds: Vec<String>,
    unhandled: Vec<String>,
}

#[derive(Debug)]
struct PartRef {
    filename: Option<String>,
    mime_type: Option<String>,
    size: Option<i64>,
    url: Option<String>,
}

/// Adapter for ChatGPT conversation payloads.
///
/// Input is either a single conversation object or the export's array of
/// them.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChatgptAdapter;

impl SourceAdapter for ChatgptAdapter {
    type Input = Value;

    fn source(&self) -> Source {
        Source::Chatgpt
    }

    fn normalize(&self, input: &Value) -> Result<NormalizationResult> {
        let items: Vec<&Value> = match input {
            Value::Array(items) => items.iter().collect(),
            Value::Object(map) if map.contains_key("mapping") => vec![input],
            _ => {
                return Err(ConvosError::malformed(
                    Source::Chatgpt,
                    "input",
                    "expected a conversation object or a list of conversations",
                ))
            }
        };

        let mut mint = IdentityMint::new(Source::Chatgpt);
        let mut result = NormalizationResult::new();
        for (i, item) in items.into_iter().enumerate() {
            let unit = format!("conversation {}", i);
            let raw: RawConversation = serde_json::from_value(item.clone())
                .map_err(|e| ConvosError::malformed(Source::Chatgpt, &unit, e.to_string()))?;
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
        .id
        .clone()
        .or_else(|| raw.conversation_id.clone())
        .ok_or_else(|| ConvosError::malformed(Source::Chatgpt, unit, "conversation has no id"))?;
    let unit = original.as_str();
    let conversation_id = mint.mint(&original)?;

    let keys: Vec<&String> = raw.mapping.keys().collect();
    let nodes: Vec<Node<'_>> = keys
        .iter()
        .map(|k| {
            let node = &raw.mapping[*k];
            Node {
                id: k.as_str(),
                parent: node.parent.as_deref(),
                ts: node
                    .message
                    .as_ref()
                    .and_then(|m| ts_from_epoch(&m.create_time)),
            }
        })
        .collect();
    let path = linearize(&nodes).map_err(|e| ConvosError::malformed(Source::Chatgpt, unit, e))?;

    let mut messages: Vec<Message> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut attachments: Vec<Attachment> = Vec::new();
    // Invocations still waiting for a tool-authored reply: (tool call index, tool name).
    let mut pending: Vec<(usize, String)> = Vec::new();

    for (seq, &idx) in path.iter().enumerate() {
        let node_id = keys[idx].as_str();
        let Some(message) = raw.mapping[keys[idx]].message.as_ref() else {
            continue;
        };
        let role = Role::from_provider(&message.author.role).ok_or_else(|| {
            ConvosError::malformed(
                Source::Chatgpt,
                unit,
                format!("node {}: unknown author role '{}'", node_id, message.author.role),
            )
        })?;
        let body = match &message.content {
            Some(content) => extract_body(content),
            None => Body::default(),
        };
        let created_at = ts_from_epoch(&message.create_time);
        let recipient = message.recipient.as_deref().filter(|r| *r != "all");
        let is_invocation = role == Role::Assistant && recipient.is_some();
        let files = metadata_attachments(&message.metadata);

        if body.text.is_empty()
            && body.thinking.is_none()
            && body.attachments.is_empty()
            && files.is_empty()
            && !is_invocation
            && role != Role::Tool
        {
            continue;
        }

        let message_id = mint.mint(&format!("{}:{}", original, node_id))?;
        let model = message
            .metadata
            .get("model_slug")
            .and_then(Value::as_str)
            .map(String::from);

        for (i, part) in body.attachments.iter().enumerate() {
            attachments.push(Attachment {
                id: mint.mint(&format!("{}:{}:attachment:{}", original, node_id, i))?,
                message_id: message_id.clone(),
                filename: part.filename.clone(),
                mime_type: part.mime_type.clone(),
                size: part.size,
                path: None,
                url: part.url.clone(),
                created_at,
            });
        }
        for (i, file) in files.into_iter().enumerate() {
            attachments.push(Attachment {
                id: mint.mint(&format!("{}:{}:file:{}", original, node_id, i))?,
                message_id: message_id.clone(),
                filename: file.filename,
                mime_type: file.mime_type,
                size: file.size,
                path: None,
                url: file.url,
                created_at,
            });
        }

        if let Some(name) = recipient.filter(|_| is_invocation) {
            tool_calls.push(ToolCall {
                id: mint.mint(&format!("{}:{}:tool", original, node_id))?,
                message_id: message_id.clone(),
                tool_name: name.to_string(),
                input: json_or_text(&body.text),
                output: None,
                status: ToolStatus::Pending,
                duration_ms: None,
                created_at,
            });
            pending.push((tool_calls.len() - 1, name.to_string()));
        }

        if role == Role::Tool {
            let author = message.author.name.clone();
            let matched = author
                .as_deref()
                .and_then(|name| pending.iter().rposition(|(_, n)| n == name))
                .or_else(|| pending.len().checked_sub(1));
            let output = json_or_text(&body.text);
            match matched {
                Some(pos) => {
                    let (call_index, _) = pending.remove(pos);
                    let call = &mut tool_calls[call_index];
                    call.duration_ms = duration_ms(call.created_at, created_at);
                    call.output = Some(output);
                    call.status = tool_status(&message.metadata);
                }
                None => tool_calls.push(ToolCall {
                    id: mint.mint(&format!("{}:{}:tool", original, node_id))?,
                    message_id: message_id.clone(),
                    tool_name: author.unwrap_or_else(|| "tool".to_string()),
                    input: message.metadata.get("args").cloned().unwrap_or_else(|| json!({})),
                    output: Some(output),
                    status: tool_status(&message.metadata),
                    duration_ms: None,
                    created_at,
                }),
            }
        }

        let content_type = message.content.as_ref().map(|c| c.content_type.clone());
        messages.push(Message {
            id: message_id,
            conversation_id: conversation_id.clone(),
            role,
            content: body.text,
            thinking: body.thinking,
            created_at,
            seq: seq as i64,
            model,
            metadata: metadata([
                ("node_id", Some(json!(node_id))),
                ("content_type", content_type.map(Value::from)),
                ("recipient", recipient.map(Value::from)),
                ("author_name", message.author.name.clone().map(Value::from)),
                ("language", body.language.map(Value::from)),
                ("asset_kinds", Some(Value::from(body.asset_kinds))),
                ("unhandled", Some(Value::from(body.unhandled))),
            ]),
        });
    }

    let model = raw.default_model_slug.clone().or_else(|| {
        messages
            .iter()
            .find(|m| m.role == Role::Assistant && m.model.is_some())
            .and_then(|m| m.model.clone())
    });
    let mut conversation = Conversation {
        id: conversation_id,
        source: Source::Chatgpt,
        title: raw.title.clone().filter(|t| !t.is_empty()),
        created_at: ts_from_epoch(&raw.create_time),
        updated_at: ts_from_epoch(&raw.update_time),
        model,
        cwd: None,
        git_branch: None,
        project_id: raw.gizmo_id.clone(),
        metadata: metadata([
            ("original_id", Some(json!(original))),
            ("gizmo_id", raw.gizmo_id.clone().map(Value::from)),
            ("current_node", raw.current_node.clone().map(Value::from)),
            ("is_archived", raw.is_archived.map(Value::from)),
        ]),
    };
    settle_time_bounds(&mut conversation, &messages);

    out.conversations.push(conversation);
    out.messages.extend(messages);
    out.tool_calls.extend(tool_calls);
    out.attachments.extend(attachments);
    Ok(())
}

fn extract_body(content: &RawContent) -> Body {
    let mut body = Body::default();
    let mut text_parts: Vec<String> = Vec::new();
    match content.content_type.as_str() {
        "text" | "multimodal_text" => {
            for part in &content.parts {
                match part {
                    Value::String(s) => text_parts.push(s.clone()),
                    Value::Object(map) => {
                        let kind = map.get("content_type").and_then(Value::as_str).unwrap_or("");
                        match kind {
                            "image_asset_pointer" | "file" | "audio_asset_pointer" => {
                                body.asset_kinds.push(kind.to_string());
                                body.attachments.push(PartRef {
                                    filename: map.get("name").and_then(Value::as_str).map(String::from),
                                    mime_type: map
                                        .get("mime_type")
                                        .and_then(Value::as_str)
                                        .map(String::from),
                                    size: map
                                        .get("size_bytes")
                                        .or_else(|| map.get("size"))
                                        .and_then(Value::as_i64),
                                    url: map
                                        .get("asset_pointer")
                                        .or_else(|| map.get("url"))
                                        .and_then(Value::as_str)
                                        .map(String::from),
                                })
                            }
                            "audio_transcription" => {
                                if let Some(t) = map.get("text").and_then(Value::as_str) {
                                    text_parts.push(t.to_string());
                                }
                            }
                            other => body.unhandled.push(other.to_string()),
                        }
                    }
                    _ => {}
                }
            }
        }
        "code" | "execution_output" | "system_error" | "tether_quote" => {
            text_parts.extend(content.text.clone());
        }
        "tether_browsing_display" => {
            text_parts.extend(content.result.clone());
        }
        "thoughts" => {
            let thoughts: Vec<String> = content
                .thoughts
                .iter()
                .filter_map(|t| t.content.clone().or_else(|| t.summary.clone()))
                .collect();
            let joined = thoughts.join("\n").trim().to_string();
            body.thinking = (!joined.is_empty()).then_some(joined);
        }
        "reasoning_recap" => {
            body.thinking = content.content.clone().filter(|c| !c.trim().is_empty());
        }
        "user_editable_context" => {
            text_parts.extend(content.user_profile.clone());
            text_parts.extend(content.user_instructions.clone());
        }
        other => body.unhandled.push(other.to_string()),
    }
    if content.content_type == "code" {
        body.language = content.language.clone().filter(|l| l != "unknown");
    }
    body.text = text_parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    body
}

fn metadata_attachments(meta: &Value) -> Vec<PartRef> {
    meta.get("attachments")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .map(|a| PartRef {
                    filename: a.get("name").and_then(Value::as_str).map(String::from),
                    mime_type: a.get("mime_type").and_then(Value::as_str).map(String::from),
                    size: a.get("size").and_then(Value::as_i64),
                    url: a
                        .get("id")
                        .and_then(Value::as_str)
                        .map(|id| format!("file-service://{}", id)),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn tool_status(meta: &Value) -> ToolStatus {
    let failed = meta
        .get("aggregate_result")
        .and_then(|r| r.get("status"))
        .and_then(Value::as_str)
        .is_some_and(|s| s.contains("exception") || s == "failed");
    if failed {
        ToolStatus::Error
    } else {
        ToolStatus::Complete
    }
}
