//! Source adapters: provider payloads in, canonical records out.
//!
//! Each provider gets one [`SourceAdapter`] implementation. Adapters are pure
//! and synchronous: they take an already-read input (a JSON document for the
//! hosted sources, a [`SessionLog`] for the CLI tools), validate it once
//! against a strict intermediate shape, and map it onto the canonical schema
//! in a [`NormalizationResult`].
//!
//! ```text
//! ┌───────────────┐   ┌──────────────┐   ┌──────────────────────┐
//! │ conversations │──▶│ ChatgptAdapter│──▶│                      │
//! │ .json / API   │   │ ClaudeAdapter │   │ NormalizationResult  │
//! ├───────────────┤   ├──────────────┤   │ convs / msgs / tools │
//! │ session.jsonl │──▶│ ClaudeCode   │──▶│ attachs / artifacts  │
//! │               │   │ Codex        │   │ edits                │
//! └───────────────┘   └──────────────┘   └──────────────────────┘
//! ```
//!
//! Adapters fail fast: a structural mismatch aborts the whole input unit with
//! [`ConvosError::MalformedInput`]. Nothing is silently skipped except content
//! that carries no representable payload at all.

pub mod chatgpt;
pub mod claude;
pub mod claude_code;
pub mod codex;
pub mod content;
pub mod shell;
pub mod tree;

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::error::{ConvosError, Result};
use crate::models::{Conversation, Message, Source};
use crate::normalize::NormalizationResult;

pub use chatgpt::ChatgptAdapter;
pub use claude::ClaudeAdapter;
pub use claude_code::ClaudeCodeAdapter;
pub use codex::CodexAdapter;

// ═══════════════════════════════════════════════════════════════════════
// Adapter Trait
// ═══════════════════════════════════════════════════════════════════════

/// Converts one raw input unit of a provider into canonical records.
///
/// # Contract
///
/// - Identities are derived from stable provider identifiers (or the log
///   path and line index), so normalizing the same input twice yields the
///   same records.
/// - Tool invocations and their results are correlated by call id; an
///   invocation whose result never arrived is kept as `Pending`.
/// - Unknown but well-formed content is kept in message metadata rather
///   than dropped.
pub trait SourceAdapter {
    /// The already-read input this adapter consumes.
    type Input: ?Sized;

    /// The provider tag stamped on every conversation this adapter emits.
    fn source(&self) -> Source;

    /// Normalize one input unit.
    fn normalize(&self, input: &Self::Input) -> Result<NormalizationResult>;
}

// ═══════════════════════════════════════════════════════════════════════
// Session Logs
// ═══════════════════════════════════════════════════════════════════════

/// One append-only session log file read into memory.
#[derive(Debug, Clone)]
pub struct SessionLog {
    pub path: PathBuf,
    pub text: String,
}

/// A parsed log line and its physical line index.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub index: usize,
    pub value: Value,
}

impl SessionLog {
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConvosError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            text,
        })
    }

    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }

    /// The path as used in identities and error messages.
    pub fn unit(&self) -> String {
        self.path.display().to_string()
    }

    /// File stem, used as the session id.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Parse every non-blank line as JSON.
    ///
    /// Line indices are physical, so they stay stable as the file grows. A
    /// final line without a trailing newline that does not parse is a write
    /// in progress and is left for the next sync; any other unparsable line
    /// is malformed input.
    pub fn lines(&self, provider: Source) -> Result<Vec<LogLine>> {
        let terminated = self.text.ends_with('\n');
        let raw: Vec<&str> = self.text.split('\n').collect();
        let last = raw.len().saturating_sub(1);
        let mut out = Vec::with_capacity(raw.len());
        for (index, line) in raw.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(value) => out.push(LogLine { index, value }),
                Err(_) if index == last && !terminated => {
                    tracing::debug!(path = %self.path.display(), line = index + 1, "skipping partial final line");
                }
                Err(e) => {
                    return Err(ConvosError::malformed(
                        provider,
                        self.unit(),
                        format!("line {}: {}", index + 1, e),
                    ))
                }
            }
        }
        Ok(out)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Shared helpers
// ═══════════════════════════════════════════════════════════════════════

/// Fill missing conversation bounds from its messages and keep
/// `updated_at >= created_at`.
pub(crate) fn settle_time_bounds(conversation: &mut Conversation, messages: &[Message]) {
    let times = messages
        .iter()
        .filter(|m| m.conversation_id == conversation.id)
        .filter_map(|m| m.created_at);
    let (first, last) = times.fold((None, None), |(lo, hi), t| {
        (
            Some(lo.map_or(t, |lo: chrono::DateTime<chrono::Utc>| lo.min(t))),
            Some(hi.map_or(t, |hi: chrono::DateTime<chrono::Utc>| hi.max(t))),
        )
    });
    if conversation.created_at.is_none() {
        conversation.created_at = first;
    }
    if conversation.updated_at.is_none() {
        conversation.updated_at = last.or(conversation.created_at);
    }
    if let (Some(created), Some(updated)) = (conversation.created_at, conversation.updated_at) {
        if updated < created {
            conversation.updated_at = Some(created);
        }
    }
}

/// Build a metadata object, leaving out absent values.
pub(crate) fn metadata<I>(entries: I) -> Value
where
    I: IntoIterator<Item = (&'static str, Option<Value>)>,
{
    let map: Map<String, Value> = entries
        .into_iter()
        .filter_map(|(k, v)| match v {
            None | Some(Value::Null) => None,
            Some(Value::Array(a)) if a.is_empty() => None,
            Some(v) => Some((k.to_string(), v)),
        })
        .collect();
    Value::Object(map)
}

/// Parse a JSON string payload when it holds JSON, else keep it as text.
pub(crate) fn json_or_text(text: &str) -> Value {
    match serde_json::from_str::<Value>(text) {
        Ok(v @ (Value::Object(_) | Value::Array(_))) => v,
        _ => Value::String(text.to_string()),
    }
}

/// Anchor a relative path at the session's working directory.
pub(crate) fn resolve(path: &str, cwd: Option<&str>) -> String {
    match cwd {
        Some(dir) if !Path::new(path).is_absolute() && !path.starts_with('~') => {
            Path::new(dir).join(path).display().to_string()
        }
        _ => path.to_string(),
    }
}

/// Milliseconds between two optional timestamps, when both are known and
/// ordered.
pub(crate) fn duration_ms(
    start: Option<chrono::DateTime<chrono::Utc>>,
    end: Option<chrono::DateTime<chrono::Utc>>,
) -> Option<i64> {
    match (start, end) {
        (Some(s), Some(e)) if e >= s => Some((e - s).num_milliseconds()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ts_from_iso, Role};
    use serde_json::json;

    #[test]
    fn test_lines_keep_physical_index() {
        let log = SessionLog::new("/tmp/s.jsonl", "{\"a\":1}\n\n{\"b\":2}\n");
        let lines = log.lines(Source::Codex).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].index, 2);
    }

    #[test]
    fn test_partial_final_line_ignored() {
        let log = SessionLog::new("/tmp/s.jsonl", "{\"a\":1}\n{\"b\":");
        let lines = log.lines(Source::ClaudeCode).unwrap();
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn test_unterminated_but_complete_final_line_kept() {
        let log = SessionLog::new("/tmp/s.jsonl", "{\"a\":1}\n{\"b\":2}");
        assert_eq!(log.lines(Source::ClaudeCode).unwrap().len(), 2);
    }

    #[test]
    fn test_corrupt_middle_line_is_malformed() {
        let log = SessionLog::new("/tmp/s.jsonl", "{\"a\":1}\nnot json\n{\"b\":2}\n");
        let err = log.lines(Source::ClaudeCode).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_settle_time_bounds() {
        let mut conv = Conversation {
            id: "c".into(),
            source: Source::Claude,
            title: None,
            created_at: None,
            updated_at: None,
            model: None,
            cwd: None,
            git_branch: None,
            project_id: None,
            metadata: json!({}),
        };
        let msg = |t: &str| Message {
            id: t.into(),
            conversation_id: "c".into(),
            role: Role::User,
            content: String::new(),
            thinking: None,
            created_at: ts_from_iso(t),
            seq: 0,
            model: None,
            metadata: json!({}),
        };
        let msgs = vec![msg("2024-01-02T00:00:00Z"), msg("2024-01-01T00:00:00Z")];
        settle_time_bounds(&mut conv, &msgs);
        assert_eq!(conv.created_at, ts_from_iso("2024-01-01T00:00:00Z"));
        assert_eq!(conv.updated_at, ts_from_iso("2024-01-02T00:00:00Z"));
    }

    #[test]
    fn test_metadata_skips_absent_values() {
        let m = metadata([("a", Some(json!(1))), ("b", None), ("c", Some(json!([])))]);
        assert_eq!(m, json!({"a": 1}));
    }
}
