//! Conversation retrieval by id prefix.
//!
//! `show` prints a whole conversation; `get` prints one page of it, bounded
//! by `--since` and `--after`, and tags each message with its id prefix so
//! the next page can start after it.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::display::{head, rule, truncate, ts};
use crate::models::{Conversation, Message};
use crate::query::{self, Cursor};

fn print_message(message: &Message, tag_id: bool, show_thinking: bool) {
    let model = message
        .model
        .as_deref()
        .map(|m| format!(" [{}]", m))
        .unwrap_or_default();
    let id = if tag_id {
        format!(" ({})", head(&message.id, 8))
    } else {
        String::new()
    };
    println!(
        "\n--- {}{} @ {}{} ---",
        message.role.as_str().to_uppercase(),
        model,
        ts(message.created_at),
        id
    );
    println!("{}", message.content);
    if show_thinking {
        if let Some(thinking) = message.thinking.as_deref().filter(|t| !t.is_empty()) {
            println!("\n[THINKING]\n{}", thinking);
        }
    }
}

fn print_header(conversation: &Conversation) {
    println!("{}", rule('=', 60));
    println!(
        "[{}] {}",
        conversation.source,
        conversation.title.as_deref().unwrap_or("Untitled")
    );
    println!("ID: {}", conversation.id);
}

pub async fn run_show(
    config: &Config,
    prefix: &str,
    show_tools: bool,
    show_thinking: bool,
) -> Result<()> {
    let store = db::connect(config).await?;
    let id = query::resolve_conversation(&store, prefix).await?;
    let view = query::show(&store, &id).await?;
    store.close().await;

    let c = &view.conversation;
    print_header(c);
    println!("Created: {}", ts(c.created_at));
    println!("Model: {}", c.model.as_deref().unwrap_or("?"));
    if let Some(cwd) = &c.cwd {
        println!("Directory: {}", cwd);
    }
    if let Some(branch) = &c.git_branch {
        println!("Branch: {}", branch);
    }
    if let Some(project) = &c.project_id {
        println!("Project: {}", project);
    }
    println!("{}\n", rule('=', 60));

    for message in &view.messages {
        print_message(message, false, show_thinking);
    }

    if show_tools && !view.tool_calls.is_empty() {
        println!("\n{}", rule('=', 60));
        println!("TOOL CALLS ({})", view.tool_calls.len());
        println!("{}", rule('=', 60));
        for call in &view.tool_calls {
            let duration = call
                .duration_ms
                .map(|d| format!(" ({}ms)", d))
                .unwrap_or_default();
            let output = call.output.as_ref().map(|o| o.to_string()).unwrap_or_default();
            println!("\n{} [{}]{}", call.tool_name, call.status.as_str(), duration);
            println!("In: {}", truncate(&call.input.to_string(), 200));
            println!("Out: {}", truncate(&output, 200));
        }
    }

    if !view.artifacts.is_empty() {
        println!("\n{}", rule('=', 60));
        println!("ARTIFACTS ({})", view.artifacts.len());
        println!("{}", rule('=', 60));
        for artifact in &view.artifacts {
            println!(
                "\n{} v{} [{}]",
                artifact.title.as_deref().unwrap_or("untitled"),
                artifact.version,
                artifact.artifact_type.as_deref().unwrap_or("?")
            );
            println!("{}", truncate(&artifact.content, 200));
        }
    }

    Ok(())
}

pub async fn run_get(
    config: &Config,
    prefix: &str,
    since: Option<&str>,
    after: Option<String>,
    limit: Option<i64>,
    show_thinking: bool,
) -> Result<()> {
    let since = match since {
        Some(raw) => match query::parse_since(raw) {
            Some(t) => Some(t),
            None => bail!(
                "Invalid --since '{}'. Use RFC 3339, 'YYYY-MM-DD HH:MM:SS' or YYYY-MM-DD.",
                raw
            ),
        },
        None => None,
    };
    let cursor = Cursor {
        since,
        after,
        limit: limit.unwrap_or(config.retrieval.get_limit),
    };

    let store = db::connect(config).await?;
    let id = query::resolve_conversation(&store, prefix).await?;
    let conversation = query::conversation(&store, &id).await?;
    let messages = query::get_messages(&store, &id, &cursor).await?;
    store.close().await;

    print_header(&conversation);
    println!("{}\n", rule('=', 60));
    for message in &messages {
        print_message(message, true, show_thinking);
    }
    println!("\n{} messages", messages.len());

    Ok(())
}
