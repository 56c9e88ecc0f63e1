//! Identity-keyed merge of normalized records into the store.
//!
//! Every record is written with `INSERT .. ON CONFLICT(id) DO UPDATE`, and the
//! update only fires when some column actually differs. Re-reconciling an
//! unchanged batch therefore touches zero rows, and a grown session log
//! yields inserts for its new lines plus one conversation-row replace.
//!
//! A batch always carries complete conversations, so messages stored for a
//! batch conversation that the batch no longer contains (a hosted branch that
//! lost to a newer one) are removed along with everything they own.

use serde::Serialize;
use sqlx::{Sqlite, Transaction};
use std::collections::{HashMap, HashSet};

use crate::db::Store;
use crate::error::{ConvosError, Result};
use crate::models::to_millis;
use crate::normalize::{NormalizationResult, RecordCounts};

/// Outcome of one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    /// Conversations that did not exist before.
    pub new: usize,
    /// Existing conversations whose row changed or that gained messages.
    pub updated: usize,
    /// Records in the batch.
    #[serde(skip)]
    pub processed: RecordCounts,
    /// Rows inserted, replaced or pruned.
    pub rows_written: usize,
}

impl ReconcileStats {
    pub fn changed(&self) -> bool {
        self.rows_written > 0
    }

    pub fn add(&mut self, other: &ReconcileStats) {
        self.new += other.new;
        self.updated += other.updated;
        self.processed.add(&other.processed);
        self.rows_written += other.rows_written;
    }
}

const CONVERSATION_COLUMNS: &[&str] = &[
    "source",
    "title",
    "created_at",
    "updated_at",
    "model",
    "cwd",
    "git_branch",
    "project_id",
    "metadata",
];
const MESSAGE_COLUMNS: &[&str] = &[
    "conversation_id",
    "role",
    "content",
    "thinking",
    "created_at",
    "seq",
    "model",
    "metadata",
];
const TOOL_CALL_COLUMNS: &[&str] = &[
    "message_id",
    "tool_name",
    "input",
    "output",
    "status",
    "duration_ms",
    "created_at",
];
const ATTACHMENT_COLUMNS: &[&str] = &[
    "message_id",
    "filename",
    "mime_type",
    "size",
    "path",
    "url",
    "created_at",
];
const ARTIFACT_COLUMNS: &[&str] = &[
    "conversation_id",
    "artifact_type",
    "title",
    "content",
    "language",
    "version",
    "created_at",
];
const FILE_EDIT_COLUMNS: &[&str] = &[
    "message_id",
    "file_path",
    "edit_type",
    "content",
    "created_at",
];

/// `INSERT .. ON CONFLICT(id) DO UPDATE .. WHERE <some column differs>`.
fn upsert_sql(table: &str, columns: &[&str]) -> String {
    let placeholders = vec!["?"; columns.len() + 1].join(", ");
    let assignments = columns
        .iter()
        .map(|c| format!("{c} = excluded.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let differs = columns
        .iter()
        .map(|c| format!("{table}.{c} IS NOT excluded.{c}"))
        .collect::<Vec<_>>()
        .join(" OR ");
    format!(
        "INSERT INTO {table} (id, {}) VALUES ({placeholders}) \
         ON CONFLICT(id) DO UPDATE SET {assignments} WHERE {differs}",
        columns.join(", ")
    )
}

/// Merge one normalization result. `label` names the input in errors and
/// logs (a source tag or a file path).
pub async fn reconcile(
    store: &Store,
    label: &str,
    result: &NormalizationResult,
) -> Result<ReconcileStats> {
    let processed = result.counts();
    if result.is_empty() {
        return Ok(ReconcileStats::default());
    }
    let fail = |source: sqlx::Error| ConvosError::Reconcile {
        label: label.to_string(),
        batch: processed.total(),
        source,
    };

    let mut tx = store.pool().begin().await.map_err(fail)?;
    let stats = write_batch(&mut tx, result).await.map_err(fail)?;
    tx.commit().await.map_err(fail)?;

    tracing::debug!(
        label,
        new = stats.new,
        updated = stats.updated,
        rows = stats.rows_written,
        "reconciled batch"
    );
    Ok(ReconcileStats {
        processed,
        ..stats
    })
}

async fn write_batch(
    tx: &mut Transaction<'_, Sqlite>,
    result: &NormalizationResult,
) -> std::result::Result<ReconcileStats, sqlx::Error> {
    let mut stats = ReconcileStats::default();

    // Existing message ids per batch conversation, read before any write.
    let mut existing: HashMap<&str, Option<HashSet<String>>> = HashMap::new();
    for conversation in &result.conversations {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM conversations WHERE id = ?")
            .bind(&conversation.id)
            .fetch_optional(&mut **tx)
            .await?;
        let messages = match found {
            Some(_) => {
                let ids: Vec<String> =
                    sqlx::query_scalar("SELECT id FROM messages WHERE conversation_id = ?")
                        .bind(&conversation.id)
                        .fetch_all(&mut **tx)
                        .await?;
                Some(ids.into_iter().collect())
            }
            None => None,
        };
        existing.insert(conversation.id.as_str(), messages);
    }

    let sql = upsert_sql("conversations", CONVERSATION_COLUMNS);
    let mut changed_conversations: HashSet<&str> = HashSet::new();
    for c in &result.conversations {
        let done = sqlx::query(&sql)
            .bind(&c.id)
            .bind(c.source.as_str())
            .bind(&c.title)
            .bind(to_millis(c.created_at))
            .bind(to_millis(c.updated_at))
            .bind(&c.model)
            .bind(&c.cwd)
            .bind(&c.git_branch)
            .bind(&c.project_id)
            .bind(c.metadata.to_string())
            .execute(&mut **tx)
            .await?;
        if done.rows_affected() > 0 {
            changed_conversations.insert(c.id.as_str());
        }
        stats.rows_written += done.rows_affected() as usize;
    }

    // Stale messages go first so a replaced branch never shares the store
    // with its successor.
    let batch_messages: HashSet<&str> = result.messages.iter().map(|m| m.id.as_str()).collect();
    for known in existing.values().flatten() {
        for id in known.iter().filter(|id| !batch_messages.contains(id.as_str())) {
            let done = sqlx::query("DELETE FROM messages WHERE id = ?")
                .bind(id)
                .execute(&mut **tx)
                .await?;
            stats.rows_written += done.rows_affected() as usize;
        }
    }

    let sql = upsert_sql("messages", MESSAGE_COLUMNS);
    let mut grown: HashSet<&str> = HashSet::new();
    for m in &result.messages {
        if let Some(Some(known)) = existing.get(m.conversation_id.as_str()) {
            if !known.contains(&m.id) {
                grown.insert(m.conversation_id.as_str());
            }
        }
        let done = sqlx::query(&sql)
            .bind(&m.id)
            .bind(&m.conversation_id)
            .bind(m.role.as_str())
            .bind(&m.content)
            .bind(&m.thinking)
            .bind(to_millis(m.created_at))
            .bind(m.seq)
            .bind(&m.model)
            .bind(m.metadata.to_string())
            .execute(&mut **tx)
            .await?;
        stats.rows_written += done.rows_affected() as usize;
    }

    let sql = upsert_sql("tool_calls", TOOL_CALL_COLUMNS);
    for t in &result.tool_calls {
        let done = sqlx::query(&sql)
            .bind(&t.id)
            .bind(&t.message_id)
            .bind(&t.tool_name)
            .bind(t.input.to_string())
            .bind(t.output.as_ref().map(|o| o.to_string()))
            .bind(t.status.as_str())
            .bind(t.duration_ms)
            .bind(to_millis(t.created_at))
            .execute(&mut **tx)
            .await?;
        stats.rows_written += done.rows_affected() as usize;
    }

    let sql = upsert_sql("attachments", ATTACHMENT_COLUMNS);
    for a in &result.attachments {
        let done = sqlx::query(&sql)
            .bind(&a.id)
            .bind(&a.message_id)
            .bind(&a.filename)
            .bind(&a.mime_type)
            .bind(a.size)
            .bind(&a.path)
            .bind(&a.url)
            .bind(to_millis(a.created_at))
            .execute(&mut **tx)
            .await?;
        stats.rows_written += done.rows_affected() as usize;
    }

    let sql = upsert_sql("artifacts", ARTIFACT_COLUMNS);
    for a in &result.artifacts {
        let done = sqlx::query(&sql)
            .bind(&a.id)
            .bind(&a.conversation_id)
            .bind(&a.artifact_type)
            .bind(&a.title)
            .bind(&a.content)
            .bind(&a.language)
            .bind(a.version)
            .bind(to_millis(a.created_at))
            .execute(&mut **tx)
            .await?;
        stats.rows_written += done.rows_affected() as usize;
    }

    let sql = upsert_sql("file_edits", FILE_EDIT_COLUMNS);
    for e in &result.file_edits {
        let done = sqlx::query(&sql)
            .bind(&e.id)
            .bind(&e.message_id)
            .bind(&e.file_path)
            .bind(e.edit_type.as_str())
            .bind(&e.content)
            .bind(to_millis(e.created_at))
            .execute(&mut **tx)
            .await?;
        stats.rows_written += done.rows_affected() as usize;
    }

    for (id, known) in &existing {
        match known {
            None => stats.new += 1,
            Some(_) if changed_conversations.contains(id) || grown.contains(id) => {
                stats.updated += 1
            }
            Some(_) => {}
        }
    }
    Ok(stats)
}
