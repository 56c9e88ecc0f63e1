use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::io::IsTerminal;

use crate::config::Config;
use crate::db::{self, Store};
use crate::models::{from_millis, Role, Source};
use crate::query::window_start;

/// Independently combinable search filters. Empty sets and `None` keep
/// everything.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub sources: Vec<Source>,
    /// Messages created within the last N days.
    pub days: Option<i64>,
    pub roles: Vec<Role>,
    /// `Some(true)` keeps only messages with reasoning text, `Some(false)`
    /// only those without.
    pub thinking: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub message_id: String,
    pub conversation_id: String,
    pub source: Source,
    pub title: Option<String>,
    pub cwd: Option<String>,
    pub role: Role,
    pub created_at: Option<DateTime<Utc>>,
    /// Lexical relevance; higher is better.
    pub score: f64,
    pub snippet: String,
    pub thinking: Option<String>,
}

/// Split free text into FTS5 terms. Each term is quoted so punctuation in
/// the input is never read as query syntax; terms are implicitly ANDed.
fn match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

fn term_pattern(query: &str) -> Option<Regex> {
    let alternation = query
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("|");
    if alternation.is_empty() {
        return None;
    }
    RegexBuilder::new(&alternation)
        .case_insensitive(true)
        .build()
        .ok()
}

/// A window of at most `width` characters around the first term match,
/// with `...` marking cut ends.
fn snippet(content: &str, terms: Option<&Regex>, width: usize) -> String {
    let total = content.chars().count();
    if total <= width {
        return content.to_string();
    }
    let hit = terms
        .and_then(|re| re.find(content))
        .map(|m| content[..m.start()].chars().count())
        .unwrap_or(0);
    let start = hit.saturating_sub(width / 4).min(total - width);
    let end = start + width;

    let mut out = String::new();
    if start > 0 {
        out.push_str("...");
    }
    out.extend(content.chars().skip(start).take(width));
    if end < total {
        out.push_str("...");
    }
    out
}

/// Ranked full-text search over message content and thinking.
///
/// Results are ordered by descending score, then most recent first. A query
/// with no terms, or one that matches nothing, yields an empty list.
pub async fn search(
    store: &Store,
    query: &str,
    filters: &SearchFilters,
    limit: i64,
    width: usize,
) -> crate::error::Result<Vec<SearchHit>> {
    let expression = match match_expression(query) {
        Some(e) => e,
        None => return Ok(Vec::new()),
    };

    let mut qb = QueryBuilder::<Sqlite>::new(
        r#"
        SELECT m.id, m.conversation_id, m.role, m.content, m.thinking, m.created_at,
               c.source, c.title, c.cwd, bm25(messages_fts) AS score_rank
        FROM messages_fts
        JOIN messages m ON m.id = messages_fts.message_id
        JOIN conversations c ON c.id = m.conversation_id
        WHERE messages_fts MATCH "#,
    );
    qb.push_bind(expression);

    if !filters.sources.is_empty() {
        qb.push(" AND c.source IN (");
        let mut list = qb.separated(", ");
        for source in &filters.sources {
            list.push_bind(source.as_str());
        }
        list.push_unseparated(")");
    }
    if let Some(start) = filters.days.and_then(window_start) {
        qb.push(" AND m.created_at > ");
        qb.push_bind(start);
    }
    if !filters.roles.is_empty() {
        qb.push(" AND m.role IN (");
        let mut list = qb.separated(", ");
        for role in &filters.roles {
            list.push_bind(role.as_str());
        }
        list.push_unseparated(")");
    }
    match filters.thinking {
        Some(true) => {
            qb.push(" AND m.thinking IS NOT NULL AND m.thinking != ''");
        }
        Some(false) => {
            qb.push(" AND (m.thinking IS NULL OR m.thinking = '')");
        }
        None => {}
    }

    // bm25() is lower-is-better
    qb.push(" ORDER BY score_rank, m.created_at DESC, m.id LIMIT ");
    qb.push_bind(limit);

    let rows = qb.build().fetch_all(store.pool()).await?;
    let terms = term_pattern(query);

    let mut hits = Vec::with_capacity(rows.len());
    for row in &rows {
        let source: String = row.try_get("source")?;
        let role: String = row.try_get("role")?;
        let content: String = row.try_get("content")?;
        let rank: f64 = row.try_get("score_rank")?;
        hits.push(SearchHit {
            message_id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            source: source
                .parse()
                .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            title: row.try_get("title")?,
            cwd: row.try_get("cwd")?,
            role: role
                .parse()
                .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            created_at: from_millis(row.try_get("created_at")?),
            score: -rank,
            snippet: snippet(&content, terms.as_ref(), width),
            thinking: row.try_get("thinking")?,
        });
    }

    tracing::debug!(query, hits = hits.len(), "search");
    Ok(hits)
}

fn highlight(text: &str, terms: Option<&Regex>) -> String {
    match terms {
        Some(re) => re.replace_all(text, "\x1b[1;33m$0\x1b[0m").into_owned(),
        None => text.to_string(),
    }
}

pub async fn run_search(
    config: &Config,
    query: &str,
    filters: &SearchFilters,
    limit: Option<i64>,
    width: Option<usize>,
    show_thinking: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results");
        return Ok(());
    }

    let store = db::connect(config).await?;
    let limit = limit.unwrap_or(config.retrieval.search_limit);
    let width = width.unwrap_or(config.retrieval.snippet_width);
    let hits = search(&store, query, filters, limit, width).await?;
    store.close().await;

    if hits.is_empty() {
        println!("No results");
        return Ok(());
    }

    let terms = if std::io::stdout().is_terminal() {
        term_pattern(query)
    } else {
        None
    };

    for hit in &hits {
        let location = hit
            .cwd
            .as_deref()
            .map(|c| format!(" @ {}", c))
            .unwrap_or_default();
        let ts = hit
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "?".to_string());

        println!("\n{}", "=".repeat(60));
        println!(
            "[{}] {}{} ({})",
            hit.source,
            hit.title.as_deref().unwrap_or("Untitled"),
            location,
            &hit.conversation_id[..8.min(hit.conversation_id.len())]
        );
        println!("{} @ {} (score: {:.2})", hit.role, ts, hit.score);
        println!("{}", "-".repeat(40));
        println!("{}", highlight(&hit.snippet, terms.as_ref()));

        if show_thinking {
            if let Some(thinking) = hit.thinking.as_deref().filter(|t| !t.is_empty()) {
                println!("\n[THINKING]\n{}", snippet(thinking, terms.as_ref(), width));
            }
        }
    }
    println!("\n{} results", hits.len());

    Ok(())
}
