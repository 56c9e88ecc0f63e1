use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Config;
use crate::error::{ConvosError, Result};
use crate::normalize::RecordCounts;

/// Handle to the archive database. Opened once per process and passed to
/// every component; cloning shares the underlying pool.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    path: PathBuf,
}

impl Store {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConvosError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    pub async fn checkpoint(&self, key: &str) -> Result<Option<String>> {
        let cursor: Option<String> =
            sqlx::query_scalar("SELECT cursor FROM checkpoints WHERE source = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(cursor)
    }

    pub async fn set_checkpoint(&self, key: &str, cursor: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO checkpoints (source, cursor, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(source) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(cursor)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear_checkpoint(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM checkpoints WHERE source = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Checkpoints whose key starts with `prefix`, keyed without the prefix.
    pub async fn checkpoints(&self, prefix: &str) -> Result<BTreeMap<String, String>> {
        let rows = sqlx::query(
            "SELECT source, cursor FROM checkpoints WHERE substr(source, 1, length(?1)) = ?1",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let key: String = row.get("source");
                (key[prefix.len()..].to_string(), row.get("cursor"))
            })
            .collect())
    }

    /// Remove a conversation; owned messages, tool calls, attachments,
    /// artifacts and file edits go with it. Returns whether a row existed.
    pub async fn delete_conversation(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM messages_fts WHERE message_id IN (SELECT id FROM messages WHERE conversation_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        let done = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(done.rows_affected() > 0)
    }

    /// Stored record counts per source tag.
    pub async fn counts_by_source(&self) -> Result<BTreeMap<String, RecordCounts>> {
        const QUERIES: [&str; 6] = [
            "SELECT source, COUNT(*) FROM conversations GROUP BY source",
            "SELECT c.source, COUNT(*) FROM messages m \
             JOIN conversations c ON c.id = m.conversation_id GROUP BY c.source",
            "SELECT c.source, COUNT(*) FROM tool_calls t JOIN messages m ON m.id = t.message_id \
             JOIN conversations c ON c.id = m.conversation_id GROUP BY c.source",
            "SELECT c.source, COUNT(*) FROM attachments a JOIN messages m ON m.id = a.message_id \
             JOIN conversations c ON c.id = m.conversation_id GROUP BY c.source",
            "SELECT c.source, COUNT(*) FROM artifacts a \
             JOIN conversations c ON c.id = a.conversation_id GROUP BY c.source",
            "SELECT c.source, COUNT(*) FROM file_edits e JOIN messages m ON m.id = e.message_id \
             JOIN conversations c ON c.id = m.conversation_id GROUP BY c.source",
        ];

        let mut out: BTreeMap<String, RecordCounts> = BTreeMap::new();
        for (i, sql) in QUERIES.iter().enumerate() {
            let rows: Vec<(String, i64)> = sqlx::query_as(sql).fetch_all(&self.pool).await?;
            for (source, count) in rows {
                let counts = out.entry(source).or_default();
                let slot = match i {
                    0 => &mut counts.conversations,
                    1 => &mut counts.messages,
                    2 => &mut counts.tool_calls,
                    3 => &mut counts.attachments,
                    4 => &mut counts.artifacts,
                    _ => &mut counts.file_edits,
                };
                *slot = count as usize;
            }
        }
        Ok(out)
    }
}

/// Open the configured archive, creating the schema on first use.
pub async fn connect(config: &Config) -> anyhow::Result<Store> {
    let store = Store::open(&config.db.path).await?;
    crate::migrate::run_migrations(&store).await?;
    Ok(store)
}
