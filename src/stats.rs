//! Archive statistics.
//!
//! Totals per entity, per-source breakdown, and the directories, tools and
//! files that show up most. Used by `convos stats` to confirm that syncs are
//! landing where expected.

use anyhow::Result;
use std::collections::BTreeMap;

use crate::config::Config;
use crate::db::{self, Store};
use crate::normalize::RecordCounts;

#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub totals: RecordCounts,
    pub with_thinking: i64,
    pub by_source: BTreeMap<String, RecordCounts>,
    pub top_directories: Vec<(String, i64)>,
    pub top_tools: Vec<(String, i64)>,
    pub top_files: Vec<(String, i64)>,
    /// Most recent checkpoint write, epoch millis.
    pub last_sync: Option<i64>,
}

pub async fn collect(store: &Store) -> Result<Stats> {
    let pool = store.pool();
    let by_source = store.counts_by_source().await?;
    let mut totals = RecordCounts::default();
    for counts in by_source.values() {
        totals.add(counts);
    }

    let with_thinking: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM messages WHERE thinking IS NOT NULL AND thinking != ''",
    )
    .fetch_one(pool)
    .await?;

    let top_directories: Vec<(String, i64)> = sqlx::query_as(
        "SELECT cwd, COUNT(*) AS n FROM conversations WHERE cwd IS NOT NULL \
         GROUP BY cwd ORDER BY n DESC, cwd LIMIT 5",
    )
    .fetch_all(pool)
    .await?;

    let top_tools: Vec<(String, i64)> = sqlx::query_as(
        "SELECT tool_name, COUNT(*) AS n FROM tool_calls \
         GROUP BY tool_name ORDER BY n DESC, tool_name LIMIT 10",
    )
    .fetch_all(pool)
    .await?;

    let top_files: Vec<(String, i64)> = sqlx::query_as(
        "SELECT file_path, COUNT(*) AS n FROM file_edits \
         GROUP BY file_path ORDER BY n DESC, file_path LIMIT 5",
    )
    .fetch_all(pool)
    .await?;

    let last_sync: Option<i64> = sqlx::query_scalar("SELECT MAX(updated_at) FROM checkpoints")
        .fetch_one(pool)
        .await?;

    Ok(Stats {
        totals,
        with_thinking,
        by_source,
        top_directories,
        top_tools,
        top_files,
        last_sync,
    })
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let store = db::connect(config).await?;
    let stats = collect(&store).await?;
    store.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);
    let t = &stats.totals;

    println!("Database: {} ({})", config.db.path.display(), format_bytes(db_size));
    println!(
        "Last sync: {}",
        stats
            .last_sync
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();
    println!("Conversations: {}", t.conversations);
    println!("Messages: {}", t.messages);
    println!("Tool calls: {}", t.tool_calls);
    println!("Attachments: {}", t.attachments);
    println!("Artifacts: {}", t.artifacts);
    println!("File edits: {}", t.file_edits);
    println!("With thinking: {}", stats.with_thinking);

    println!("\nBy source:");
    for (source, counts) in &stats.by_source {
        println!(
            "  {}: {} convs, {} msgs",
            source, counts.conversations, counts.messages
        );
    }

    for (heading, rows) in [
        ("Top directories:", &stats.top_directories),
        ("Top tools:", &stats.top_tools),
        ("Most edited files:", &stats.top_files),
    ] {
        if rows.is_empty() {
            continue;
        }
        println!("\n{}", heading);
        for (name, count) in rows {
            println!("  {}: {}", name, count);
        }
    }

    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format epoch millis as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ms: i64) -> String {
    let delta = (chrono::Utc::now().timestamp_millis() - ms) / 1000;

    if delta < 0 {
        return format_ts(ms);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts(ms)
    }
}

fn format_ts(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}
