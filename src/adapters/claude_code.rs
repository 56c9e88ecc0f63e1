//! Claude Code session logs (`~/.claude/projects/<dir>/<session>.jsonl`).
//!
//! One file is one session and one conversation. Each line is an event;
//! `user` and `assistant` events carry a Messages-API `message`, `summary`
//! events carry a title. Tool results come back on synthetic user lines that
//! hold nothing but `tool_result` blocks; those lines complete the matching
//! tool call instead of becoming messages.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;

use super::content::{extract, ExtractedContent};
use super::shell::written_paths;
use super::{duration_ms, metadata, resolve, settle_time_bounds, SessionLog, SourceAdapter};
use crate::error::{ConvosError, Result};
use crate::identity::IdentityMint;
use crate::models::{
    ts_from_iso, Attachment, Conversation, EditKind, FileEdit, Message, Role, Source, ToolCall,
    ToolStatus,
};
use crate::normalize::NormalizationResult;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    git_branch: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    message: Option<RawMessage>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    is_sidechain: Option<bool>,
    #[serde(default)]
    is_meta: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    model: Option<String>,
}

const SYNTHETIC_MODEL: &str = "<synthetic>";

/// Adapter for one Claude Code session log.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClaudeCodeAdapter;

impl SourceAdapter for ClaudeCodeAdapter {
    type Input = SessionLog;

    fn source(&self) -> Source {
        Source::ClaudeCode
    }

    fn normalize(&self, log: &SessionLog) -> Result<NormalizationResult> {
        let unit = log.unit();
        let mut events = Vec::new();
        for line in log.lines(Source::ClaudeCode)? {
            let event: RawEvent = serde_json::from_value(line.value).map_err(|e| {
                ConvosError::malformed(
                    Source::ClaudeCode,
                    &unit,
                    format!("line {}: {}", line.index + 1, e),
                )
            })?;
            events.push((line.index, event));
        }
        Session::new(log, &unit)?.build(events)
    }
}

/// Working state while one session is normalized.
struct Session<'a> {
    log: &'a SessionLog,
    unit: &'a str,
    mint: IdentityMint,
    conversation_id: String,
    cwd: Option<String>,
    out: NormalizationResult,
    /// tool_use id -> (index into `out.tool_calls`)
    pending: HashMap<String, usize>,
}

impl<'a> Session<'a> {
    fn new(log: &'a SessionLog, unit: &'a str) -> Result<Self> {
        let mut mint = IdentityMint::new(Source::ClaudeCode);
        let conversation_id = mint.mint(unit)?;
        Ok(Self {
            log,
            unit,
            mint,
            conversation_id,
            cwd: None,
            out: NormalizationResult::new(),
            pending: HashMap::new(),
        })
    }

    fn build(mut self, events: Vec<(usize, RawEvent)>) -> Result<NormalizationResult> {
        let mut title: Option<String> = None;
        let mut git_branch: Option<String> = None;
        let mut version: Option<String> = None;
        let mut session_id: Option<String> = None;
        let mut model: Option<String> = None;
        let mut first_ts = None;
        let mut last_ts = None;
        let mut skipped_kinds: Vec<String> = Vec::new();

        for (index, event) in &events {
            let ts = event.timestamp.as_deref().and_then(ts_from_iso);
            if ts.is_some() {
                first_ts = first_ts.or(ts);
                last_ts = ts.max(last_ts);
            }
            if self.cwd.is_none() && event.cwd.is_some() {
                self.cwd = event.cwd.clone();
                git_branch = event.git_branch.clone().filter(|b| !b.is_empty());
                version = event.version.clone();
            }
            if session_id.is_none() {
                session_id = event.session_id.clone();
            }

            match event.kind.as_str() {
                "summary" => {
                    if let Some(s) = event.summary.as_ref().filter(|s| !s.is_empty()) {
                        title = Some(s.clone());
                    }
                }
                "user" | "assistant" => {
                    let Some(message) = &event.message else {
                        return Err(ConvosError::malformed(
                            Source::ClaudeCode,
                            self.unit,
                            format!("line {}: {} event without message", index + 1, event.kind),
                        ));
                    };
                    if model.is_none() && event.kind == "assistant" {
                        model = message.model.clone().filter(|m| m != SYNTHETIC_MODEL);
                    }
                    self.message_event(*index, event, message, ts)?;
                }
                "system" => self.system_event(*index, event, ts)?,
                other => {
                    if !skipped_kinds.iter().any(|k| k == other) {
                        skipped_kinds.push(other.to_string());
                    }
                }
            }
        }

        if self.out.messages.is_empty() {
            return Ok(NormalizationResult::new());
        }

        let mut conversation = Conversation {
            id: self.conversation_id.clone(),
            source: Source::ClaudeCode,
            title: title.or_else(|| Some(derived_title(&self.log.path))),
            created_at: first_ts,
            updated_at: last_ts,
            model,
            cwd: self.cwd.clone(),
            git_branch,
            project_id: None,
            metadata: metadata([
                ("session_id", Some(json!(session_id.unwrap_or_else(|| self.log.stem())))),
                ("cli_version", version.map(Value::from)),
                ("path", Some(json!(self.unit))),
                ("skipped_events", Some(Value::from(skipped_kinds))),
            ]),
        };
        settle_time_bounds(&mut conversation, &self.out.messages);
        self.out.conversations.insert(0, conversation);
        Ok(self.out)
    }

    fn message_event(
        &mut self,
        index: usize,
        event: &RawEvent,
        message: &RawMessage,
        ts: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()> {
        let label = message.role.as_deref().unwrap_or(&event.kind);
        let role = Role::from_provider(label).ok_or_else(|| {
            ConvosError::malformed(
                Source::ClaudeCode,
                self.unit,
                format!("line {}: unknown role '{}'", index + 1, label),
            )
        })?;
        let unit = format!("{} line {}", self.unit, index + 1);
        let body = extract(Source::ClaudeCode, &unit, &message.content)?;

        if body.is_tool_result_only() {
            let orphans = self.complete_results(&body, ts);
            if orphans.is_empty() {
                return Ok(());
            }
            let message_id = self.push_message(index, role, event, &body, None, ts)?;
            return self.push_orphans(index, &message_id, orphans, ts);
        }
        if !body.has_payload() {
            return Ok(());
        }

        let model = message.model.clone().filter(|m| m != SYNTHETIC_MODEL);
        let message_id = self.push_message(index, role, event, &body, model, ts)?;

        for (i, media) in body.media.iter().enumerate() {
            let id = self.mint(&format!("{}:{}:media:{}", self.unit, index, i))?;
            self.out.attachments.push(Attachment {
                id,
                message_id: message_id.clone(),
                filename: media.filename.clone(),
                mime_type: media.mime_type.clone(),
                size: media.size,
                path: None,
                url: media.url.clone(),
                created_at: ts,
            });
        }

        for (j, tool_use) in body.tool_uses.iter().enumerate() {
            let original = match &tool_use.id {
                Some(id) => format!("{}:tool:{}", self.unit, id),
                None => format!("{}:{}:tool:{}", self.unit, index, j),
            };
            let id = self.mint(&original)?;
            self.out.tool_calls.push(ToolCall {
                id,
                message_id: message_id.clone(),
                tool_name: tool_use.name.clone(),
                input: tool_use.input.clone(),
                output: None,
                status: ToolStatus::Pending,
                duration_ms: None,
                created_at: ts,
            });
            if let Some(tool_use_id) = &tool_use.id {
                self.pending
                    .insert(tool_use_id.clone(), self.out.tool_calls.len() - 1);
            }

            for (k, (path, kind, content)) in
                edits_for(&tool_use.name, &tool_use.input, self.cwd.as_deref())
                    .into_iter()
                    .enumerate()
            {
                let id = self.mint(&format!("{}:{}:edit:{}:{}", self.unit, index, j, k))?;
                self.out.file_edits.push(FileEdit {
                    id,
                    message_id: message_id.clone(),
                    file_path: path,
                    edit_type: kind,
                    content,
                    created_at: ts,
                });
            }
        }

        let orphans = self.complete_results(&body, ts);
        self.push_orphans(index, &message_id, orphans, ts)
    }

    fn system_event(
        &mut self,
        index: usize,
        event: &RawEvent,
        ts: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()> {
        let text = match &event.content {
            Some(Value::String(s)) => s.trim().to_string(),
            _ => return Ok(()),
        };
        if text.is_empty() {
            return Ok(());
        }
        let body = ExtractedContent {
            text,
            ..ExtractedContent::default()
        };
        self.push_message(index, Role::System, event, &body, None, ts)?;
        Ok(())
    }

    fn push_message(
        &mut self,
        index: usize,
        role: Role,
        event: &RawEvent,
        body: &ExtractedContent,
        model: Option<String>,
        ts: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<String> {
        let id = self.mint(&format!("{}:{}", self.unit, index))?;
        self.out.messages.push(Message {
            id: id.clone(),
            conversation_id: self.conversation_id.clone(),
            role,
            content: body.text.clone(),
            thinking: body.thinking.clone(),
            created_at: ts,
            seq: index as i64,
            model,
            metadata: metadata([
                ("uuid", event.uuid.clone().map(Value::from)),
                ("is_sidechain", event.is_sidechain.filter(|b| *b).map(Value::from)),
                ("is_meta", event.is_meta.filter(|b| *b).map(Value::from)),
                ("unhandled_blocks", Some(Value::from(body.unhandled.clone()))),
                (
                    "redacted_thinking",
                    (body.redacted_thinking > 0).then(|| json!(body.redacted_thinking)),
                ),
            ]),
        });
        Ok(id)
    }

    /// Complete pending calls from the body's results; returns the results
    /// that matched nothing.
    fn complete_results(
        &mut self,
        body: &ExtractedContent,
        ts: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Vec<(Value, bool)> {
        let mut orphans = Vec::new();
        for result in &body.tool_results {
            let index = result
                .tool_use_id
                .as_ref()
                .and_then(|id| self.pending.remove(id));
            match index {
                Some(i) => {
                    let call = &mut self.out.tool_calls[i];
                    call.output = Some(result.content.clone());
                    call.status = if result.is_error {
                        ToolStatus::Error
                    } else {
                        ToolStatus::Complete
                    };
                    call.duration_ms = duration_ms(call.created_at, ts);
                }
                None => orphans.push((result.content.clone(), result.is_error)),
            }
        }
        orphans
    }

    fn push_orphans(
        &mut self,
        index: usize,
        message_id: &str,
        orphans: Vec<(Value, bool)>,
        ts: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()> {
        for (j, (output, is_error)) in orphans.into_iter().enumerate() {
            let id = self.mint(&format!("{}:{}:result:{}", self.unit, index, j))?;
            self.out.tool_calls.push(ToolCall {
                id,
                message_id: message_id.to_string(),
                tool_name: "unknown".to_string(),
                input: json!({}),
                output: Some(output),
                status: if is_error {
                    ToolStatus::Error
                } else {
                    ToolStatus::Complete
                },
                duration_ms: None,
                created_at: ts,
            });
        }
        Ok(())
    }

    fn mint(&mut self, original: &str) -> Result<String> {
        self.mint.mint(original)
    }
}

/// File edits implied by one tool invocation: (path, kind, content).
fn edits_for(name: &str, input: &Value, cwd: Option<&str>) -> Vec<(String, EditKind, String)> {
    let field = |key: &str| input.get(key).and_then(Value::as_str);
    match name {
        "Write" => field("file_path")
            .map(|p| vec![(p.to_string(), EditKind::Write, field("content").unwrap_or("").to_string())])
            .unwrap_or_default(),
        "Edit" => field("file_path")
            .map(|p| vec![(p.to_string(), EditKind::Patch, field("new_string").unwrap_or("").to_string())])
            .unwrap_or_default(),
        "MultiEdit" => field("file_path")
            .map(|p| {
                let parts: Vec<&str> = input
                    .get("edits")
                    .and_then(Value::as_array)
                    .map(|edits| {
                        edits
                            .iter()
                            .filter_map(|e| e.get("new_string").and_then(Value::as_str))
                            .collect()
                    })
                    .unwrap_or_default();
                vec![(p.to_string(), EditKind::MultiPatch, parts.join("\n"))]
            })
            .unwrap_or_default(),
        "NotebookEdit" => field("notebook_path")
            .map(|p| vec![(p.to_string(), EditKind::Patch, field("new_source").unwrap_or("").to_string())])
            .unwrap_or_default(),
        "Bash" => field("command")
            .map(|command| {
                written_paths(command)
                    .into_iter()
                    .map(|p| (resolve(&p, cwd), EditKind::Shell, command.to_string()))
                    .collect()
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// `-Users-me-src-app/1a2b3c4d-....jsonl` -> `~/me/src/app (1a2b3c4d)`.
fn derived_title(path: &Path) -> String {
    let dir = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().replace("-Users-", "~/").replace('-', "/"))
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().chars().take(8).collect::<String>())
        .unwrap_or_default();
    format!("{} ({})", dir, stem)
}
