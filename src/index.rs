//! Full-text index over message content and thinking.
//!
//! The index is rebuilt whole after a batch of reconciliations. A batch that
//! wrote nothing leaves the index as it was.

use crate::db::Store;
use crate::error::Result;
use crate::reconcile::ReconcileStats;

/// What a refresh has to cover.
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    /// Rebuild unconditionally, e.g. after `init` or a manual repair.
    Full,
    /// Rebuild only if the given batch changed any row.
    After(&'a ReconcileStats),
}

/// Bring the index up to date. Returns the number of indexed messages, or
/// `None` when the refresh was skipped.
pub async fn refresh(store: &Store, scope: Scope<'_>) -> Result<Option<u64>> {
    if let Scope::After(stats) = scope {
        if !stats.changed() {
            tracing::debug!("index refresh skipped, nothing changed");
            return Ok(None);
        }
    }
    rebuild(store).await.map(Some)
}

/// Drop every index row and re-insert one per stored message.
pub async fn rebuild(store: &Store) -> Result<u64> {
    let mut tx = store.pool().begin().await?;

    sqlx::query("DELETE FROM messages_fts")
        .execute(&mut *tx)
        .await?;

    let done = sqlx::query(
        r#"
        INSERT INTO messages_fts (message_id, content, thinking)
        SELECT id, content, COALESCE(thinking, '') FROM messages
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(messages = done.rows_affected(), "rebuilt search index");
    Ok(done.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::run_migrations;
    use tempfile::TempDir;

    async fn open() -> (TempDir, Store) {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(&tmp.path().join("i.sqlite")).await.unwrap();
        run_migrations(&store).await.unwrap();
        (tmp, store)
    }

    async fn seed(store: &Store) {
        sqlx::query("INSERT INTO conversations (id, source) VALUES ('c1', 'codex')")
            .execute(store.pool())
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, thinking, seq) \
             VALUES ('m1', 'c1', 'user', 'borrow checker', NULL, 0), \
                    ('m2', 'c1', 'assistant', 'lifetimes', 'consider the borrow', 1)",
        )
        .execute(store.pool())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_refresh_skips_unchanged_batch() {
        let (_tmp, store) = open().await;
        seed(&store).await;
        let idle = ReconcileStats::default();
        assert_eq!(refresh(&store, Scope::After(&idle)).await.unwrap(), None);
        let indexed: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages_fts")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(indexed, 0);
    }

    #[tokio::test]
    async fn test_rebuild_indexes_content_and_thinking() {
        let (_tmp, store) = open().await;
        seed(&store).await;
        assert_eq!(refresh(&store, Scope::Full).await.unwrap(), Some(2));
        // Twice in a row must not duplicate rows.
        assert_eq!(rebuild(&store).await.unwrap(), 2);

        let hits: Vec<String> = sqlx::query_scalar(
            "SELECT message_id FROM messages_fts WHERE messages_fts MATCH 'borrow' ORDER BY message_id",
        )
        .fetch_all(store.pool())
        .await
        .unwrap();
        assert_eq!(hits, vec!["m1".to_string(), "m2".to_string()]);
    }
}
