//! Codex CLI session logs (`~/.codex/sessions/YYYY/MM/DD/rollout-*.jsonl`).
//!
//! Every line is an envelope `{timestamp, type, payload}`. `session_meta`
//! opens the file with the working directory, git state and CLI version;
//! `turn_context` carries the model for the turns that follow; conversation
//! content lives in `response_item` payloads. `event_msg` lines mirror the
//! response items for the terminal UI and are not read.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use super::content::result_text;
use super::shell::{patched_files, written_paths};
use super::{
    duration_ms, json_or_text, metadata, resolve, settle_time_bounds, SessionLog, SourceAdapter,
};
use crate::error::{ConvosError, Result};
use crate::identity::IdentityMint;
use crate::models::{
    ts_from_iso, Attachment, Conversation, EditKind, FileEdit, Message, Role, Source, ToolCall,
    ToolStatus,
};
use crate::normalize::NormalizationResult;

type Timestamp = Option<chrono::DateTime<chrono::Utc>>;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Default, Deserialize)]
struct SessionMeta {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    cli_version: Option<String>,
    #[serde(default)]
    originator: Option<String>,
    #[serde(default)]
    model_provider: Option<String>,
    #[serde(default)]
    git: Option<GitInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct GitInfo {
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    commit_hash: Option<String>,
    #[serde(default)]
    repository_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TurnContext {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
}

const KNOWN_ITEMS: &[&str] = &[
    "message",
    "reasoning",
    "function_call",
    "function_call_output",
    "local_shell_call",
    "custom_tool_call",
    "custom_tool_call_output",
    "web_search_call",
];

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Item {
    Message {
        role: String,
        #[serde(default)]
        content: Vec<Value>,
    },
    Reasoning {
        #[serde(default)]
        summary: Vec<Value>,
        #[serde(default)]
        content: Option<Vec<Value>>,
    },
    FunctionCall {
        name: String,
        #[serde(default)]
        arguments: Value,
        #[serde(default)]
        call_id: Option<String>,
    },
    FunctionCallOutput {
        call_id: String,
        #[serde(default)]
        output: Value,
    },
    LocalShellCall {
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        action: Value,
    },
    CustomToolCall {
        name: String,
        #[serde(default)]
        input: Value,
        #[serde(default)]
        call_id: Option<String>,
    },
    CustomToolCallOutput {
        call_id: String,
        #[serde(default)]
        output: Value,
    },
    WebSearchCall {
        #[serde(default)]
        action: Value,
        #[serde(default)]
        status: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Part {
    InputText { text: String },
    OutputText { text: String },
    Text { text: String },
    InputImage {
        #[serde(default)]
        image_url: Option<String>,
    },
}

const KNOWN_PARTS: &[&str] = &["input_text", "output_text", "text", "input_image"];

/// Adapter for one Codex session log.
#[derive(Debug, Default, Clone, Copy)]
pub struct CodexAdapter;

impl SourceAdapter for CodexAdapter {
    type Input = SessionLog;

    fn source(&self) -> Source {
        Source::Codex
    }

    fn normalize(&self, log: &SessionLog) -> Result<NormalizationResult> {
        let unit = log.unit();
        let mut rollout = Rollout::new(log, &unit)?;
        for line in log.lines(Source::Codex)? {
            let envelope: Envelope = serde_json::from_value(line.value)
                .map_err(|e| rollout.malformed(line.index, e.to_string()))?;
            rollout.event(line.index, envelope)?;
        }
        rollout.finish()
    }
}

/// Working state while one rollout file is normalized.
struct Rollout<'a> {
    log: &'a SessionLog,
    unit: &'a str,
    mint: IdentityMint,
    conversation_id: String,
    meta: SessionMeta,
    model: Option<String>,
    cwd: Option<String>,
    first_ts: Timestamp,
    last_ts: Timestamp,
    skipped: Vec<String>,
    out: NormalizationResult,
    /// call_id -> index into `out.tool_calls`
    pending: HashMap<String, usize>,
}

impl<'a> Rollout<'a> {
    fn new(log: &'a SessionLog, unit: &'a str) -> Result<Self> {
        let mut mint = IdentityMint::new(Source::Codex);
        let conversation_id = mint.mint(unit)?;
        Ok(Self {
            log,
            unit,
            mint,
            conversation_id,
            meta: SessionMeta::default(),
            model: None,
            cwd: None,
            first_ts: None,
            last_ts: None,
            skipped: Vec::new(),
            out: NormalizationResult::new(),
            pending: HashMap::new(),
        })
    }

    fn malformed(&self, index: usize, reason: impl std::fmt::Display) -> ConvosError {
        ConvosError::malformed(
            Source::Codex,
            self.unit,
            format!("line {}: {}", index + 1, reason),
        )
    }

    fn skip(&mut self, kind: &str) {
        if !self.skipped.iter().any(|k| k == kind) {
            self.skipped.push(kind.to_string());
        }
    }

    fn event(&mut self, index: usize, envelope: Envelope) -> Result<()> {
        let ts = envelope.timestamp.as_deref().and_then(ts_from_iso);
        if ts.is_some() {
            self.first_ts = self.first_ts.or(ts);
            self.last_ts = ts.max(self.last_ts);
        }
        match envelope.kind.as_str() {
            "session_meta" => {
                let meta: SessionMeta = serde_json::from_value(envelope.payload)
                    .map_err(|e| self.malformed(index, e))?;
                if self.cwd.is_none() {
                    self.cwd = meta.cwd.clone();
                }
                self.meta = meta;
            }
            "turn_context" => {
                let turn: TurnContext = serde_json::from_value(envelope.payload)
                    .map_err(|e| self.malformed(index, e))?;
                if turn.model.is_some() {
                    self.model = turn.model;
                }
                if self.cwd.is_none() {
                    self.cwd = turn.cwd;
                }
            }
            "response_item" => self.item(index, envelope.payload, ts)?,
            "event_msg" => {}
            other => self.skip(other),
        }
        Ok(())
    }

    fn item(&mut self, index: usize, payload: Value, ts: Timestamp) -> Result<()> {
        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| self.malformed(index, "response_item without type"))?;
        if !KNOWN_ITEMS.contains(&kind) {
            let kind = kind.to_string();
            self.skip(&kind);
            return Ok(());
        }
        let item: Item = serde_json::from_value(payload).map_err(|e| self.malformed(index, e))?;

        match item {
            Item::Message { role, content } => self.message(index, &role, &content, ts),
            Item::Reasoning { summary, content } => {
                let thinking = summary
                    .iter()
                    .chain(content.iter().flatten())
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                if thinking.is_empty() {
                    return Ok(());
                }
                self.push_message(index, Role::Assistant, String::new(), Some(thinking), "reasoning", ts)?;
                Ok(())
            }
            Item::FunctionCall {
                name,
                arguments,
                call_id,
            } => {
                let input = match arguments {
                    Value::String(s) => json_or_text(&s),
                    other => other,
                };
                let edits = shell_edits(&input, self.cwd.as_deref());
                self.invocation(index, name, input, call_id, edits, "function_call", ts)
            }
            Item::LocalShellCall { call_id, action } => {
                let edits = shell_edits(&action, self.cwd.as_deref());
                self.invocation(index, "local_shell".into(), action, call_id, edits, "local_shell_call", ts)
            }
            Item::CustomToolCall {
                name,
                input,
                call_id,
            } => {
                let edits = match (&name[..], input.as_str()) {
                    ("apply_patch", Some(patch)) => patch_edits(patch, self.cwd.as_deref()),
                    _ => Vec::new(),
                };
                self.invocation(index, name, input, call_id, edits, "custom_tool_call", ts)
            }
            Item::WebSearchCall { action, status } => {
                let message_id = self.push_message(index, Role::Assistant, String::new(), None, "web_search_call", ts)?;
                let id = self.mint.mint(&format!("{}:{}:tool", self.unit, index))?;
                let done = status.as_deref() == Some("completed");
                self.out.tool_calls.push(ToolCall {
                    id,
                    message_id,
                    tool_name: "web_search".into(),
                    input: action,
                    output: done.then(|| json!({"status": "completed"})),
                    status: if done {
                        ToolStatus::Complete
                    } else {
                        ToolStatus::Pending
                    },
                    duration_ms: None,
                    created_at: ts,
                });
                Ok(())
            }
            Item::FunctionCallOutput { call_id, output }
            | Item::CustomToolCallOutput { call_id, output } => {
                self.output(index, &call_id, output, ts)
            }
        }
    }

    fn message(&mut self, index: usize, label: &str, parts: &[Value], ts: Timestamp) -> Result<()> {
        let role = Role::from_provider(label)
            .ok_or_else(|| self.malformed(index, format!("unknown role '{}'", label)))?;

        let mut texts = Vec::new();
        let mut images = Vec::new();
        let mut unhandled = Vec::new();
        for part in parts {
            let kind = part
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| self.malformed(index, "content part without type"))?;
            if !KNOWN_PARTS.contains(&kind) {
                unhandled.push(kind.to_string());
                continue;
            }
            let part: Part =
                serde_json::from_value(part.clone()).map_err(|e| self.malformed(index, e))?;
            match part {
                Part::InputText { text } | Part::OutputText { text } | Part::Text { text } => {
                    if !text.trim().is_empty() {
                        texts.push(text);
                    }
                }
                Part::InputImage { image_url } => images.push(image_url),
            }
        }
        if texts.is_empty() && images.is_empty() && unhandled.is_empty() {
            return Ok(());
        }

        let model = (role == Role::Assistant).then(|| self.model.clone()).flatten();
        let id = self.mint.mint(&format!("{}:{}", self.unit, index))?;
        self.out.messages.push(Message {
            id: id.clone(),
            conversation_id: self.conversation_id.clone(),
            role,
            content: texts.join("\n").trim().to_string(),
            thinking: None,
            created_at: ts,
            seq: index as i64,
            model,
            metadata: metadata([
                ("item_type", Some(json!("message"))),
                ("provider_role", (label != role.as_str()).then(|| json!(label))),
                ("unhandled_parts", Some(Value::from(unhandled))),
            ]),
        });

        for (i, url) in images.into_iter().enumerate() {
            let attachment_id = self.mint.mint(&format!("{}:{}:image:{}", self.unit, index, i))?;
            let (mime_type, size, url) = match url {
                Some(u) if u.starts_with("data:") => {
                    let (mime, size) = data_url_info(&u);
                    (mime, size, None)
                }
                other => (None, None, other),
            };
            self.out.attachments.push(Attachment {
                id: attachment_id,
                message_id: id.clone(),
                filename: None,
                mime_type,
                size,
                path: None,
                url,
                created_at: ts,
            });
        }
        Ok(())
    }

    fn push_message(
        &mut self,
        index: usize,
        role: Role,
        content: String,
        thinking: Option<String>,
        item_type: &str,
        ts: Timestamp,
    ) -> Result<String> {
        let id = self.mint.mint(&format!("{}:{}", self.unit, index))?;
        let model = (role == Role::Assistant).then(|| self.model.clone()).flatten();
        self.out.messages.push(Message {
            id: id.clone(),
            conversation_id: self.conversation_id.clone(),
            role,
            content,
            thinking,
            created_at: ts,
            seq: index as i64,
            model,
            metadata: json!({ "item_type": item_type }),
        });
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    fn invocation(
        &mut self,
        index: usize,
        name: String,
        input: Value,
        call_id: Option<String>,
        edits: Vec<(String, EditKind, String)>,
        item_type: &str,
        ts: Timestamp,
    ) -> Result<()> {
        let message_id = self.push_message(index, Role::Assistant, String::new(), None, item_type, ts)?;
        let original = match &call_id {
            Some(call) => format!("{}:tool:{}", self.unit, call),
            None => format!("{}:{}:tool", self.unit, index),
        };
        let id = self.mint.mint(&original)?;
        self.out.tool_calls.push(ToolCall {
            id,
            message_id: message_id.clone(),
            tool_name: name,
            input,
            output: None,
            status: ToolStatus::Pending,
            duration_ms: None,
            created_at: ts,
        });
        if let Some(call) = call_id {
            self.pending.insert(call, self.out.tool_calls.len() - 1);
        }
        for (k, (path, kind, content)) in edits.into_iter().enumerate() {
            let id = self.mint.mint(&format!("{}:{}:edit:{}", self.unit, index, k))?;
            self.out.file_edits.push(FileEdit {
                id,
                message_id: message_id.clone(),
                file_path: path,
                edit_type: kind,
                content,
                created_at: ts,
            });
        }
        Ok(())
    }

    fn output(&mut self, index: usize, call_id: &str, raw: Value, ts: Timestamp) -> Result<()> {
        let output = match raw {
            Value::String(s) => json_or_text(&s),
            other => other,
        };
        let failed = output
            .pointer("/metadata/exit_code")
            .and_then(Value::as_i64)
            .is_some_and(|code| code != 0)
            || output.get("success").and_then(Value::as_bool) == Some(false);
        let reported = output
            .pointer("/metadata/duration_seconds")
            .and_then(Value::as_f64)
            .map(|secs| (secs * 1000.0).round() as i64);
        let status = if failed {
            ToolStatus::Error
        } else {
            ToolStatus::Complete
        };

        if let Some(i) = self.pending.remove(call_id) {
            let call = &mut self.out.tool_calls[i];
            call.duration_ms = reported.or_else(|| duration_ms(call.created_at, ts));
            call.output = Some(output);
            call.status = status;
            return Ok(());
        }

        let message_id = self.push_message(index, Role::Tool, result_text(&output), None, "orphan_output", ts)?;
        let id = self.mint.mint(&format!("{}:{}:result", self.unit, index))?;
        self.out.tool_calls.push(ToolCall {
            id,
            message_id,
            tool_name: "unknown".into(),
            input: json!({ "call_id": call_id }),
            output: Some(output),
            status,
            duration_ms: reported,
            created_at: ts,
        });
        Ok(())
    }

    fn finish(mut self) -> Result<NormalizationResult> {
        if self.out.messages.is_empty() {
            return Ok(NormalizationResult::new());
        }
        let meta = std::mem::take(&mut self.meta);
        let git = meta.git.unwrap_or_default();
        let title = self.cwd.clone().unwrap_or_else(|| self.log.stem());
        let mut conversation = Conversation {
            id: self.conversation_id.clone(),
            source: Source::Codex,
            title: Some(title),
            created_at: self.first_ts,
            updated_at: self.last_ts,
            model: self.model.clone().or_else(|| meta.model_provider.clone()),
            cwd: self.cwd.clone(),
            git_branch: git.branch.filter(|b| !b.is_empty()),
            project_id: None,
            metadata: metadata([
                ("session_id", Some(json!(meta.id.unwrap_or_else(|| self.log.stem())))),
                ("cli_version", meta.cli_version.map(Value::from)),
                ("originator", meta.originator.map(Value::from)),
                ("model_provider", meta.model_provider.map(Value::from)),
                ("commit", git.commit_hash.map(Value::from)),
                ("repository_url", git.repository_url.map(Value::from)),
                ("path", Some(json!(self.unit))),
                ("skipped_items", Some(Value::from(std::mem::take(&mut self.skipped)))),
            ]),
        };
        settle_time_bounds(&mut conversation, &self.out.messages);
        self.out.conversations.insert(0, conversation);
        Ok(self.out)
    }
}

/// File edits for a shell invocation: `{"command": [...]}`, `{"command": "..."}`
/// or `{"cmd": "..."}`, with an optional working directory.
fn shell_edits(args: &Value, cwd: Option<&str>) -> Vec<(String, EditKind, String)> {
    let workdir = ["workdir", "working_directory"]
        .iter()
        .find_map(|k| args.get(*k).and_then(Value::as_str))
        .or(cwd);
    let script = match args.get("command").or_else(|| args.get("cmd")) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(argv)) => {
            let argv: Vec<&str> = argv.iter().filter_map(Value::as_str).collect();
            match argv.as_slice() {
                [shell, flag, script, ..]
                    if matches!(*shell, "bash" | "sh" | "zsh") && flag.ends_with('c') =>
                {
                    script.to_string()
                }
                ["apply_patch", patch, ..] => patch.to_string(),
                _ => argv.join(" "),
            }
        }
        _ => return Vec::new(),
    };
    if script.contains("*** Begin Patch") {
        return patch_edits(&script, workdir);
    }
    written_paths(&script)
        .into_iter()
        .map(|p| (resolve(&p, workdir), EditKind::Shell, script.clone()))
        .collect()
}

fn patch_edits(patch: &str, cwd: Option<&str>) -> Vec<(String, EditKind, String)> {
    patched_files(patch)
        .into_iter()
        .map(|f| (resolve(&f.path, cwd), f.kind, f.body))
        .collect()
}

/// Mime type and decoded size of a `data:` URL.
fn data_url_info(url: &str) -> (Option<String>, Option<i64>) {
    let Some((header, data)) = url.trim_start_matches("data:").split_once(',') else {
        return (None, None);
    };
    let mime = header.split(';').next().filter(|m| !m.is_empty()).map(String::from);
    let size = header.ends_with(";base64").then(|| {
        let padding = data.bytes().rev().take_while(|b| *b == b'=').count();
        (data.len() / 4 * 3).saturating_sub(padding) as i64
    });
    (mime, size)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "/home/u/.codex/sessions/2024/06/01/rollout-abc.jsonl";

    fn line(ts: &str, kind: &str, payload: Value) -> String {
        json!({"timestamp": ts, "type": kind, "payload": payload}).to_string()
    }

    fn session() -> Vec<String> {
        vec![
            line("2024-06-01T10:00:00Z", "session_meta", json!({
                "id": "abc", "cwd": "/work/app", "cli_version": "0.30.0", "model_provider": "openai",
                "git": {"branch": "feature", "commit_hash": "deadbeef"}
            })),
            line("2024-06-01T10:00:00Z", "turn_context", json!({"model": "gpt-5-codex", "cwd": "/work/app"})),
            line("2024-06-01T10:00:01Z", "response_item", json!({
                "type": "message", "role": "user", "content": [{"type": "input_text", "text": "Add a README"}]
            })),
            line("2024-06-01T10:00:01Z", "event_msg", json!({"type": "user_message", "message": "Add a README"})),
            line("2024-06-01T10:00:02Z", "response_item", json!({
                "type": "reasoning", "summary": [{"type": "summary_text", "text": "Need a new file"}]
            })),
            line("2024-06-01T10:00:03Z", "response_item", json!({
                "type": "function_call", "name": "shell", "call_id": "call_1",
                "arguments": "{\"command\":[\"bash\",\"-lc\",\"echo hi > README.md\"],\"workdir\":\"/work/app\"}"
            })),
            line("2024-06-01T10:00:04Z", "response_item", json!({
                "type": "function_call_output", "call_id": "call_1",
                "output": "{\"output\":\"\",\"metadata\":{\"exit_code\":0,\"duration_seconds\":0.2}}"
            })),
            line("2024-06-01T10:00:05Z", "response_item", json!({
                "type": "message", "role": "assistant", "content": [{"type": "output_text", "text": "Done."}]
            })),
        ]
    }

    fn normalize(lines: &[String]) -> NormalizationResult {
        CodexAdapter
            .normalize(&SessionLog::new(PATH, lines.join("\n") + "\n"))
            .unwrap()
    }

    #[test]
    fn test_session_meta_fields() {
        let r = normalize(&session());
        let c = &r.conversations[0];
        assert_eq!(c.cwd.as_deref(), Some("/work/app"));
        assert_eq!(c.title.as_deref(), Some("/work/app"));
        assert_eq!(c.git_branch.as_deref(), Some("feature"));
        assert_eq!(c.model.as_deref(), Some("gpt-5-codex"));
        assert_eq!(c.metadata["cli_version"], "0.30.0");
        assert_eq!(c.metadata["session_id"], "abc");
    }

    #[test]
    fn test_messages_reasoning_and_event_mirror() {
        let r = normalize(&session());
        let roles: Vec<Role> = r.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Assistant, Role::Assistant]
        );
        assert_eq!(r.messages[1].thinking.as_deref(), Some("Need a new file"));
        assert_eq!(r.messages[3].content, "Done.");
        assert_eq!(r.messages[3].model.as_deref(), Some("gpt-5-codex"));
    }

    #[test]
    fn test_function_call_completed_by_output() {
        let r = normalize(&session());
        assert_eq!(r.tool_calls.len(), 1);
        let call = &r.tool_calls[0];
        assert_eq!(call.tool_name, "shell");
        assert_eq!(call.status, ToolStatus::Complete);
        assert_eq!(call.duration_ms, Some(200));
        assert_eq!(call.input["workdir"], "/work/app");
        assert_eq!(r.file_edits.len(), 1);
        assert_eq!(r.file_edits[0].file_path, "/work/app/README.md");
        assert_eq!(r.file_edits[0].edit_type, EditKind::Shell);
    }

    #[test]
    fn test_nonzero_exit_is_error() {
        let mut lines = session();
        lines[6] = line("2024-06-01T10:00:04Z", "response_item", json!({
            "type": "function_call_output", "call_id": "call_1",
            "output": "{\"output\":\"denied\",\"metadata\":{\"exit_code\":1}}"
        }));
        let r = normalize(&lines);
        assert_eq!(r.tool_calls[0].status, ToolStatus::Error);
        assert_eq!(r.tool_calls[0].duration_ms, Some(1000));
    }

    #[test]
    fn test_call_without_output_stays_pending() {
        let mut lines = session();
        lines.remove(6);
        let r = normalize(&lines);
        assert_eq!(r.tool_calls[0].status, ToolStatus::Pending);
        assert!(r.tool_calls[0].output.is_none());
    }

    #[test]
    fn test_apply_patch_yields_edit_per_file() {
        let patch = "*** Begin Patch\n*** Add File: docs/a.md\n+hello\n*** Update File: src/lib.rs\n@@\n-old\n+new\n*** End Patch\n";
        let mut lines = session();
        lines.push(line("2024-06-01T10:00:06Z", "response_item", json!({
            "type": "custom_tool_call", "name": "apply_patch", "call_id": "call_2", "input": patch
        })));
        let r = normalize(&lines);
        let edits: Vec<(&str, EditKind)> = r.file_edits[1..]
            .iter()
            .map(|e| (e.file_path.as_str(), e.edit_type))
            .collect();
        assert_eq!(
            edits,
            vec![
                ("/work/app/docs/a.md", EditKind::Write),
                ("/work/app/src/lib.rs", EditKind::Patch),
            ]
        );
    }

    #[test]
    fn test_developer_message_kept_as_system() {
        let mut lines = session();
        lines.insert(2, line("2024-06-01T10:00:00Z", "response_item", json!({
            "type": "message", "role": "developer", "content": [{"type": "input_text", "text": "Be brief"}]
        })));
        let r = normalize(&lines);
        assert_eq!(r.messages[0].role, Role::System);
        assert_eq!(r.messages[0].metadata["provider_role"], "developer");
    }

    #[test]
    fn test_orphan_output_kept() {
        let lines = vec![line("2024-06-01T10:00:04Z", "response_item", json!({
            "type": "function_call_output", "call_id": "missing", "output": "ok"
        }))];
        let r = normalize(&lines);
        assert_eq!(r.messages[0].role, Role::Tool);
        assert_eq!(r.tool_calls[0].tool_name, "unknown");
        assert_eq!(r.tool_calls[0].status, ToolStatus::Complete);
    }

    #[test]
    fn test_missing_envelope_type_is_malformed() {
        let err = CodexAdapter
            .normalize(&SessionLog::new(PATH, "{\"payload\": {}}\n"))
            .unwrap_err();
        assert!(matches!(err, ConvosError::MalformedInput { .. }));
    }

    #[test]
    fn test_meta_only_session_is_empty() {
        let r = normalize(&session()[..2]);
        assert!(r.is_empty());
    }

    #[test]
    fn test_data_url_info() {
        assert_eq!(
            data_url_info("data:image/png;base64,AAAA"),
            (Some("image/png".to_string()), Some(3))
        );
    }
}
