//! Listings: conversations, recent tool calls, recent file edits.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::display::{head, rule, truncate, ts};
use crate::query::{self, ConversationSummary, ListFilters};

fn list_line(summary: &ConversationSummary) -> String {
    let c = &summary.conversation;
    let created = c
        .created_at
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "?".to_string());
    let location = c
        .cwd
        .as_deref()
        .map(|d| format!(" [{}]", d))
        .unwrap_or_default();
    let branch = c
        .git_branch
        .as_deref()
        .map(|b| format!(" ({})", b))
        .unwrap_or_default();
    format!(
        "{}  [{:<12}]  {:<16}  {:>3} msgs  {}{}{}",
        head(&c.id, 8),
        c.source.as_str(),
        created,
        summary.message_count,
        head(c.title.as_deref().unwrap_or("Untitled"), 30),
        location,
        branch
    )
}

pub async fn run_list(config: &Config, mut filters: ListFilters) -> Result<()> {
    if filters.limit < 1 {
        filters.limit = config.retrieval.list_limit;
    }
    let store = db::connect(config).await?;
    let rows = query::list_conversations(&store, &filters).await?;
    store.close().await;

    for summary in &rows {
        println!("{}", list_line(summary));
    }
    println!("\n{} conversations", rows.len());
    Ok(())
}

pub async fn run_tools(config: &Config, needle: Option<&str>, limit: i64) -> Result<()> {
    let store = db::connect(config).await?;
    let calls = query::recent_tool_calls(&store, needle, limit).await?;
    store.close().await;

    for call in &calls {
        let output = call.output.as_ref().map(|o| o.to_string()).unwrap_or_default();
        println!("\n{}", rule('-', 40));
        println!(
            "{} [{}] @ {}",
            call.tool_name,
            call.status.as_str(),
            ts(call.created_at)
        );
        println!("In: {}", truncate(&call.input.to_string(), 100));
        println!("Out: {}", truncate(&output, 100));
    }
    println!("\n{} tool calls", calls.len());
    Ok(())
}

pub async fn run_edits(config: &Config, path: Option<&str>, limit: i64) -> Result<()> {
    let store = db::connect(config).await?;
    let edits = query::recent_edits(&store, path, limit).await?;
    store.close().await;

    for edit in &edits {
        println!("\n{}", rule('-', 40));
        println!(
            "{} [{}] @ {}",
            edit.file_path,
            edit.edit_type.as_str(),
            ts(edit.created_at)
        );
        println!("{}", truncate(&edit.content, 200));
    }
    println!("\n{} edits", edits.len());
    Ok(())
}
