use crate::db::Store;
use crate::error::Result;

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        source TEXT NOT NULL,
        title TEXT,
        created_at INTEGER,
        updated_at INTEGER,
        model TEXT,
        cwd TEXT,
        git_branch TEXT,
        project_id TEXT,
        metadata TEXT NOT NULL DEFAULT '{}'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
        role TEXT NOT NULL,
        content TEXT NOT NULL DEFAULT '',
        thinking TEXT,
        created_at INTEGER,
        seq INTEGER NOT NULL DEFAULT 0,
        model TEXT,
        metadata TEXT NOT NULL DEFAULT '{}'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tool_calls (
        id TEXT PRIMARY KEY,
        message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        tool_name TEXT NOT NULL,
        input TEXT NOT NULL DEFAULT '{}',
        output TEXT,
        status TEXT NOT NULL,
        duration_ms INTEGER,
        created_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS attachments (
        id TEXT PRIMARY KEY,
        message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        filename TEXT,
        mime_type TEXT,
        size INTEGER,
        path TEXT,
        url TEXT,
        created_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS artifacts (
        id TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
        artifact_type TEXT,
        title TEXT,
        content TEXT NOT NULL,
        language TEXT,
        version INTEGER NOT NULL,
        created_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS file_edits (
        id TEXT PRIMARY KEY,
        message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        file_path TEXT NOT NULL,
        edit_type TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS checkpoints (
        source TEXT PRIMARY KEY,
        cursor TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_conversations_source ON conversations(source)",
    "CREATE INDEX IF NOT EXISTS idx_conversations_created_at ON conversations(created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at, seq)",
    "CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_tool_calls_message ON tool_calls(message_id)",
    "CREATE INDEX IF NOT EXISTS idx_tool_calls_created_at ON tool_calls(created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(message_id)",
    "CREATE INDEX IF NOT EXISTS idx_artifacts_conversation ON artifacts(conversation_id)",
    "CREATE INDEX IF NOT EXISTS idx_file_edits_message ON file_edits(message_id)",
    "CREATE INDEX IF NOT EXISTS idx_file_edits_path ON file_edits(file_path)",
];

pub async fn run_migrations(store: &Store) -> Result<()> {
    let pool = store.pool();

    for ddl in TABLES {
        sqlx::query(ddl).execute(pool).await?;
    }

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='messages_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE messages_fts USING fts5(
                message_id UNINDEXED,
                content,
                thinking
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    for ddl in INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}

/// Whether every table the archive needs exists.
pub async fn schema_ready(store: &Store) -> Result<bool> {
    let present: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM sqlite_master
        WHERE type = 'table' AND name IN (
            'conversations', 'messages', 'tool_calls', 'attachments',
            'artifacts', 'file_edits', 'checkpoints', 'messages_fts'
        )
        "#,
    )
    .fetch_one(store.pool())
    .await?;
    Ok(present == 8)
}
