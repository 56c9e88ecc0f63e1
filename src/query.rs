//! Read side of the archive: id-prefix resolution, listings and ordered
//! conversation retrieval.
//!
//! Messages are always returned in conversation order, which is
//! `created_at` ascending with `seq` breaking ties (messages without a
//! timestamp sort first).

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use crate::db::Store;
use crate::error::{ConvosError, Result};
use crate::models::{
    from_millis, Artifact, Attachment, Conversation, FileEdit, Message, Source,
    ToolCall,
};

const CONVERSATION_FIELDS: &str =
    "c.id, c.source, c.title, c.created_at, c.updated_at, c.model, c.cwd, c.git_branch, c.project_id, c.metadata";
const MESSAGE_FIELDS: &str =
    "m.id, m.conversation_id, m.role, m.content, m.thinking, m.created_at, m.seq, m.model, m.metadata";
const TOOL_CALL_FIELDS: &str =
    "t.id, t.message_id, t.tool_name, t.input, t.output, t.status, t.duration_ms, t.created_at";
const FILE_EDIT_FIELDS: &str =
    "e.id, e.message_id, e.file_path, e.edit_type, e.content, e.created_at";

/// Filters for [`list_conversations`].
#[derive(Debug, Clone, Default)]
pub struct ListFilters {
    /// Keep only these sources; empty keeps all.
    pub sources: Vec<Source>,
    /// Keep conversations created within the last N days.
    pub days: Option<i64>,
    /// Substring of the working directory.
    pub cwd: Option<String>,
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub message_count: i64,
}

/// A conversation with everything it owns, in conversation order.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<Message>,
    pub tool_calls: Vec<ToolCall>,
    pub attachments: Vec<Attachment>,
    pub artifacts: Vec<Artifact>,
    pub file_edits: Vec<FileEdit>,
}

/// Pagination cursor for [`get_messages`]. Both bounds are exclusive and
/// may be combined.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    /// Only messages created strictly after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Only messages that come after the message with this id prefix.
    pub after: Option<String>,
    pub limit: i64,
}

/// Parse a `--since` value: RFC 3339, a naive `YYYY-MM-DD[T ]HH:MM:SS`
/// (taken as UTC) or a bare date.
pub fn parse_since(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Epoch millis `days` days before now, or `None` when that instant is
/// out of range (the window then has no lower bound).
pub(crate) fn window_start(days: i64) -> Option<i64> {
    let span = chrono::Duration::try_days(days)?;
    Utc::now()
        .checked_sub_signed(span)
        .map(|start| start.timestamp_millis())
}

async fn resolve(
    store: &Store,
    table: &'static str,
    kind: &'static str,
    prefix: &str,
    conversation_id: Option<&str>,
) -> Result<String> {
    let not_found = || ConvosError::NotFound {
        kind,
        prefix: prefix.to_string(),
    };
    if prefix.is_empty() {
        return Err(not_found());
    }

    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT id FROM {table} WHERE substr(id, 1, "));
    qb.push_bind(prefix.len() as i64);
    qb.push(") = ");
    qb.push_bind(prefix.to_string());
    if let Some(cid) = conversation_id {
        qb.push(" AND conversation_id = ");
        qb.push_bind(cid.to_string());
    }
    qb.push(" ORDER BY id");

    let mut ids: Vec<String> = qb
        .build_query_scalar()
        .fetch_all(store.pool())
        .await?;
    match ids.len() {
        0 => Err(not_found()),
        1 => Ok(ids.remove(0)),
        matches => Err(ConvosError::AmbiguousPrefix {
            kind,
            prefix: prefix.to_string(),
            matches,
        }),
    }
}

/// Resolve a conversation id prefix to the one full id it names.
pub async fn resolve_conversation(store: &Store, prefix: &str) -> Result<String> {
    resolve(store, "conversations", "conversation", prefix, None).await
}

/// Resolve a message id prefix, optionally within one conversation.
pub async fn resolve_message(
    store: &Store,
    prefix: &str,
    conversation_id: Option<&str>,
) -> Result<String> {
    resolve(store, "messages", "message", prefix, conversation_id).await
}

pub async fn conversation(store: &Store, id: &str) -> Result<Conversation> {
    let row = sqlx::query(&format!(
        "SELECT {CONVERSATION_FIELDS} FROM conversations c WHERE c.id = ?"
    ))
    .bind(id)
    .fetch_optional(store.pool())
    .await?;
    match row {
        Some(row) => Ok(conversation_from_row(&row)?),
        None => Err(ConvosError::NotFound {
            kind: "conversation",
            prefix: id.to_string(),
        }),
    }
}

/// Most recently created conversations first.
pub async fn list_conversations(
    store: &Store,
    filters: &ListFilters,
) -> Result<Vec<ConversationSummary>> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {CONVERSATION_FIELDS}, \
         (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id) AS message_count \
         FROM conversations c WHERE 1 = 1"
    ));
    if !filters.sources.is_empty() {
        qb.push(" AND c.source IN (");
        let mut list = qb.separated(", ");
        for source in &filters.sources {
            list.push_bind(source.as_str());
        }
        list.push_unseparated(")");
    }
    if let Some(start) = filters.days.and_then(window_start) {
        qb.push(" AND c.created_at > ");
        qb.push_bind(start);
    }
    if let Some(cwd) = &filters.cwd {
        qb.push(" AND instr(c.cwd, ");
        qb.push_bind(cwd.clone());
        qb.push(") > 0");
    }
    qb.push(" ORDER BY c.created_at DESC, c.id LIMIT ");
    qb.push_bind(filters.limit);

    let rows = qb.build().fetch_all(store.pool()).await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(ConversationSummary {
            conversation: conversation_from_row(row)?,
            message_count: row.try_get("message_count")?,
        });
    }
    Ok(out)
}

/// Full reconstruction of one conversation.
pub async fn show(store: &Store, id: &str) -> Result<ConversationView> {
    let conversation = conversation(store, id).await?;
    let pool = store.pool();

    let messages = sqlx::query(&format!(
        "SELECT {MESSAGE_FIELDS} FROM messages m WHERE m.conversation_id = ? \
         ORDER BY m.created_at, m.seq"
    ))
    .bind(id)
    .fetch_all(pool)
    .await?
    .iter()
    .map(message_from_row)
    .collect::<std::result::Result<Vec<_>, _>>()?;

    let tool_calls = sqlx::query(&format!(
        "SELECT {TOOL_CALL_FIELDS} FROM tool_calls t JOIN messages m ON m.id = t.message_id \
         WHERE m.conversation_id = ? ORDER BY m.created_at, m.seq, t.created_at, t.id"
    ))
    .bind(id)
    .fetch_all(pool)
    .await?
    .iter()
    .map(tool_call_from_row)
    .collect::<std::result::Result<Vec<_>, _>>()?;

    let attachments = sqlx::query(
        "SELECT a.id, a.message_id, a.filename, a.mime_type, a.size, a.path, a.url, a.created_at \
         FROM attachments a JOIN messages m ON m.id = a.message_id \
         WHERE m.conversation_id = ? ORDER BY m.created_at, m.seq, a.id",
    )
    .bind(id)
    .fetch_all(pool)
    .await?
    .iter()
    .map(attachment_from_row)
    .collect::<std::result::Result<Vec<_>, _>>()?;

    let artifacts = sqlx::query(
        "SELECT id, conversation_id, artifact_type, title, content, language, version, created_at \
         FROM artifacts WHERE conversation_id = ? ORDER BY title, version",
    )
    .bind(id)
    .fetch_all(pool)
    .await?
    .iter()
    .map(artifact_from_row)
    .collect::<std::result::Result<Vec<_>, _>>()?;

    let file_edits = sqlx::query(&format!(
        "SELECT {FILE_EDIT_FIELDS} FROM file_edits e JOIN messages m ON m.id = e.message_id \
         WHERE m.conversation_id = ? ORDER BY m.created_at, m.seq, e.id"
    ))
    .bind(id)
    .fetch_all(pool)
    .await?
    .iter()
    .map(file_edit_from_row)
    .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(ConversationView {
        conversation,
        messages,
        tool_calls,
        attachments,
        artifacts,
        file_edits,
    })
}

/// One page of a conversation's messages. `after` is resolved within the
/// conversation and fails on an ambiguous or unknown prefix.
pub async fn get_messages(
    store: &Store,
    conversation_id: &str,
    cursor: &Cursor,
) -> Result<Vec<Message>> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {MESSAGE_FIELDS} FROM messages m WHERE m.conversation_id = "
    ));
    qb.push_bind(conversation_id.to_string());

    if let Some(since) = cursor.since {
        qb.push(" AND m.created_at > ");
        qb.push_bind(since.timestamp_millis());
    }

    if let Some(prefix) = &cursor.after {
        let anchor_id = resolve_message(store, prefix, Some(conversation_id)).await?;
        let (created_at, seq): (Option<i64>, i64) =
            sqlx::query_as("SELECT created_at, seq FROM messages WHERE id = ?")
                .bind(&anchor_id)
                .fetch_one(store.pool())
                .await?;
        match created_at {
            Some(ts) => {
                qb.push(" AND (m.created_at > ");
                qb.push_bind(ts);
                qb.push(" OR (m.created_at = ");
                qb.push_bind(ts);
                qb.push(" AND m.seq > ");
                qb.push_bind(seq);
                qb.push("))");
            }
            None => {
                qb.push(" AND (m.created_at IS NOT NULL OR m.seq > ");
                qb.push_bind(seq);
                qb.push(")");
            }
        }
    }

    qb.push(" ORDER BY m.created_at, m.seq LIMIT ");
    qb.push_bind(cursor.limit);

    let rows = qb.build().fetch_all(store.pool()).await?;
    Ok(rows
        .iter()
        .map(message_from_row)
        .collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Newest tool calls, optionally matching `needle` (case-insensitive) in
/// the tool name, input or output.
pub async fn recent_tool_calls(
    store: &Store,
    needle: Option<&str>,
    limit: i64,
) -> Result<Vec<ToolCall>> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {TOOL_CALL_FIELDS} FROM tool_calls t"));
    if let Some(needle) = needle {
        let needle = needle.to_lowercase();
        qb.push(" WHERE instr(lower(t.tool_name), ");
        qb.push_bind(needle.clone());
        qb.push(") > 0 OR instr(lower(t.input), ");
        qb.push_bind(needle.clone());
        qb.push(") > 0 OR instr(lower(COALESCE(t.output, '')), ");
        qb.push_bind(needle);
        qb.push(") > 0");
    }
    qb.push(" ORDER BY t.created_at DESC, t.id LIMIT ");
    qb.push_bind(limit);

    let rows = qb.build().fetch_all(store.pool()).await?;
    Ok(rows
        .iter()
        .map(tool_call_from_row)
        .collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Newest file edits, optionally with `path` as a substring of the file path.
pub async fn recent_edits(store: &Store, path: Option<&str>, limit: i64) -> Result<Vec<FileEdit>> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {FILE_EDIT_FIELDS} FROM file_edits e"));
    if let Some(path) = path {
        qb.push(" WHERE instr(e.file_path, ");
        qb.push_bind(path.to_string());
        qb.push(") > 0");
    }
    qb.push(" ORDER BY e.created_at DESC, e.id LIMIT ");
    qb.push_bind(limit);

    let rows = qb.build().fetch_all(store.pool()).await?;
    Ok(rows
        .iter()
        .map(file_edit_from_row)
        .collect::<std::result::Result<Vec<_>, _>>()?)
}

// ============ Row decoding ============

fn decode_error(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> sqlx::Error {
    sqlx::Error::Decode(err.into())
}

fn json_column(row: &SqliteRow, name: &str) -> std::result::Result<Value, sqlx::Error> {
    let text: String = row.try_get(name)?;
    serde_json::from_str(&text).map_err(decode_error)
}

fn ts_column(
    row: &SqliteRow,
    name: &str,
) -> std::result::Result<Option<DateTime<Utc>>, sqlx::Error> {
    Ok(from_millis(row.try_get(name)?))
}

pub(crate) fn conversation_from_row(row: &SqliteRow) -> std::result::Result<Conversation, sqlx::Error> {
    let source: String = row.try_get("source")?;
    Ok(Conversation {
        id: row.try_get("id")?,
        source: source.parse().map_err(decode_error)?,
        title: row.try_get("title")?,
        created_at: ts_column(row, "created_at")?,
        updated_at: ts_column(row, "updated_at")?,
        model: row.try_get("model")?,
        cwd: row.try_get("cwd")?,
        git_branch: row.try_get("git_branch")?,
        project_id: row.try_get("project_id")?,
        metadata: json_column(row, "metadata")?,
    })
}

pub(crate) fn message_from_row(row: &SqliteRow) -> std::result::Result<Message, sqlx::Error> {
    let role: String = row.try_get("role")?;
    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        role: role.parse().map_err(decode_error)?,
        content: row.try_get("content")?,
        thinking: row.try_get("thinking")?,
        created_at: ts_column(row, "created_at")?,
        seq: row.try_get("seq")?,
        model: row.try_get("model")?,
        metadata: json_column(row, "metadata")?,
    })
}

pub(crate) fn tool_call_from_row(row: &SqliteRow) -> std::result::Result<ToolCall, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let output: Option<String> = row.try_get("output")?;
    Ok(ToolCall {
        id: row.try_get("id")?,
        message_id: row.try_get("message_id")?,
        tool_name: row.try_get("tool_name")?,
        input: json_column(row, "input")?,
        output: output
            .map(|text| serde_json::from_str(&text))
            .transpose()
            .map_err(decode_error)?,
        status: status.parse().map_err(decode_error)?,
        duration_ms: row.try_get("duration_ms")?,
        created_at: ts_column(row, "created_at")?,
    })
}

pub(crate) fn attachment_from_row(row: &SqliteRow) -> std::result::Result<Attachment, sqlx::Error> {
    Ok(Attachment {
        id: row.try_get("id")?,
        message_id: row.try_get("message_id")?,
        filename: row.try_get("filename")?,
        mime_type: row.try_get("mime_type")?,
        size: row.try_get("size")?,
        path: row.try_get("path")?,
        url: row.try_get("url")?,
        created_at: ts_column(row, "created_at")?,
    })
}

pub(crate) fn artifact_from_row(row: &SqliteRow) -> std::result::Result<Artifact, sqlx::Error> {
    Ok(Artifact {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        artifact_type: row.try_get("artifact_type")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        language: row.try_get("language")?,
        version: row.try_get("version")?,
        created_at: ts_column(row, "created_at")?,
    })
}

pub(crate) fn file_edit_from_row(row: &SqliteRow) -> std::result::Result<FileEdit, sqlx::Error> {
    let kind: String = row.try_get("edit_type")?;
    Ok(FileEdit {
        id: row.try_get("id")?,
        message_id: row.try_get("message_id")?,
        file_path: row.try_get("file_path")?,
        edit_type: kind.parse().map_err(decode_error)?,
        content: row.try_get("content")?,
        created_at: ts_column(row, "created_at")?,
    })
}
