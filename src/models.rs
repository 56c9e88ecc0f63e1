//! Canonical record shapes shared by every source adapter.
//!
//! Adapters produce these records, the reconciler persists them, and the
//! query layer reads them back. Every child record is owned by exactly one
//! parent: a [`Conversation`] owns its [`Message`]s and [`Artifact`]s, a
//! [`Message`] owns its [`ToolCall`]s, [`Attachment`]s and [`FileEdit`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Provider a conversation was ingested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    /// ChatGPT web conversations (API payloads or data exports).
    Chatgpt,
    /// Claude.ai web conversations (API payloads or data exports).
    Claude,
    /// Claude Code session logs (`~/.claude/projects/**/*.jsonl`).
    ClaudeCode,
    /// Codex CLI session logs (`~/.codex/sessions/**/*.jsonl`).
    Codex,
}

impl Source {
    pub const ALL: [Source; 4] = [
        Source::Chatgpt,
        Source::Claude,
        Source::ClaudeCode,
        Source::Codex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Chatgpt => "chatgpt",
            Source::Claude => "claude",
            Source::ClaudeCode => "claude-code",
            Source::Codex => "codex",
        }
    }

    /// Whether this source is a local CLI tool with per-session log files.
    pub fn is_local(&self) -> bool {
        matches!(self, Source::ClaudeCode | Source::Codex)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chatgpt" => Ok(Source::Chatgpt),
            "claude" => Ok(Source::Claude),
            "claude-code" | "claude_code" => Ok(Source::ClaudeCode),
            "codex" => Ok(Source::Codex),
            other => Err(format!(
                "unknown source '{}'. Use chatgpt, claude, claude-code, or codex.",
                other
            )),
        }
    }
}

/// Message author role. The set is closed; providers map onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Human,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Human => "human",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }

    /// Map a provider role label onto the closed set.
    ///
    /// `developer` is the Codex name for system instructions. Returns `None`
    /// for labels with no canonical counterpart.
    pub fn from_provider(label: &str) -> Option<Role> {
        match label {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "human" => Some(Role::Human),
            "system" | "developer" => Some(Role::System),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::from_provider(s).ok_or_else(|| {
            format!(
                "unknown role '{}'. Use user, assistant, human, system, or tool.",
                s
            )
        })
    }
}

/// Lifecycle of a tool invocation. Stays `Pending` until an output is seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Pending,
    Complete,
    Error,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Pending => "pending",
            ToolStatus::Complete => "complete",
            ToolStatus::Error => "error",
        }
    }
}

impl FromStr for ToolStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ToolStatus::Pending),
            "complete" => Ok(ToolStatus::Complete),
            "error" => Ok(ToolStatus::Error),
            other => Err(format!("unknown tool status '{}'", other)),
        }
    }
}

/// How a file was modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EditKind {
    /// Whole-file write.
    Write,
    /// Single find/replace or patch hunk.
    Patch,
    /// Several replacements applied to one file in one call.
    MultiPatch,
    /// Inferred from a shell command.
    Shell,
}

impl EditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditKind::Write => "write",
            EditKind::Patch => "patch",
            EditKind::MultiPatch => "multi-patch",
            EditKind::Shell => "shell",
        }
    }
}

impl FromStr for EditKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "write" => Ok(EditKind::Write),
            "patch" => Ok(EditKind::Patch),
            "multi-patch" => Ok(EditKind::MultiPatch),
            "shell" => Ok(EditKind::Shell),
            other => Err(format!("unknown edit kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversation {
    pub id: String,
    pub source: Source,
    pub title: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub model: Option<String>,
    /// Working directory, CLI sources only.
    pub cwd: Option<String>,
    /// Git branch, CLI sources only.
    pub git_branch: Option<String>,
    pub project_id: Option<String>,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub thinking: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// Position within the conversation; breaks `created_at` ties.
    pub seq: i64,
    pub model: Option<String>,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub id: String,
    pub message_id: String,
    pub tool_name: String,
    pub input: Value,
    pub output: Option<Value>,
    pub status: ToolStatus,
    pub duration_ms: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
    pub id: String,
    pub message_id: String,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<i64>,
    pub path: Option<String>,
    pub url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub id: String,
    pub conversation_id: String,
    pub artifact_type: Option<String>,
    pub title: Option<String>,
    pub content: String,
    pub language: Option<String>,
    pub version: i64,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileEdit {
    pub id: String,
    pub message_id: String,
    pub file_path: String,
    pub edit_type: EditKind,
    pub content: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Convert a timestamp to the on-disk representation (epoch millis).
pub fn to_millis(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(|t| t.timestamp_millis())
}

/// Convert the on-disk representation back to a timestamp.
pub fn from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

/// Parse a provider epoch timestamp (seconds, possibly fractional).
pub fn ts_from_epoch(value: &Value) -> Option<DateTime<Utc>> {
    let secs = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) if !s.is_empty() => s.parse::<f64>().ok()?,
        _ => return None,
    };
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
}

/// Parse a provider ISO-8601 timestamp (`Z` or offset suffix).
pub fn ts_from_iso(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
