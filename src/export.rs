//! Export the archive as JSON or CSV.
//!
//! JSON holds one object per conversation with its messages, tool calls,
//! attachments, artifacts and file edits nested inside. CSV holds one row
//! per message, suitable for spreadsheets.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::Path;

use crate::config::Config;
use crate::db::{self, Store};
use crate::models::Source;
use crate::query::{self, ConversationView};

const CSV_HEADER: [&str; 7] = ["id", "source", "title", "cwd", "role", "content", "created_at"];

/// Every conversation (optionally of one source), oldest first.
pub async fn collect(store: &Store, source: Option<Source>) -> Result<Vec<ConversationView>> {
    let ids: Vec<String> = match source {
        Some(source) => {
            sqlx::query_scalar(
                "SELECT id FROM conversations WHERE source = ? ORDER BY created_at, id",
            )
            .bind(source.as_str())
            .fetch_all(store.pool())
            .await?
        }
        None => {
            sqlx::query_scalar("SELECT id FROM conversations ORDER BY created_at, id")
                .fetch_all(store.pool())
                .await?
        }
    };

    let mut views = Vec::with_capacity(ids.len());
    for id in &ids {
        views.push(query::show(store, id).await?);
    }
    Ok(views)
}

pub fn write_json<W: Write>(views: &[ConversationView], mut out: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut out, views)?;
    writeln!(out)?;
    Ok(())
}

pub fn write_csv<W: Write>(views: &[ConversationView], out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(CSV_HEADER)?;
    for view in views {
        let c = &view.conversation;
        for m in &view.messages {
            let created = m.created_at.map(|t| t.to_rfc3339()).unwrap_or_default();
            writer.write_record([
                c.id.as_str(),
                c.source.as_str(),
                c.title.as_deref().unwrap_or(""),
                c.cwd.as_deref().unwrap_or(""),
                m.role.as_str(),
                m.content.as_str(),
                created.as_str(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub async fn run_export(
    config: &Config,
    output: &Path,
    format: &str,
    source: Option<Source>,
) -> Result<()> {
    match format {
        "json" | "csv" => {}
        other => bail!("Unknown export format: {}. Use json or csv.", other),
    }

    let store = db::connect(config).await?;
    let views = collect(&store, source).await?;
    store.close().await;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let file = std::io::BufWriter::new(file);

    if format == "json" {
        write_json(&views, file)?;
    } else {
        write_csv(&views, file)?;
    }

    let messages: usize = views.iter().map(|v| v.messages.len()).sum();
    tracing::info!(conversations = views.len(), messages, "export finished");
    println!("Exported to {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ts_from_iso, Conversation, Message, Role};
    use serde_json::json;

    fn view() -> ConversationView {
        ConversationView {
            conversation: Conversation {
                id: "c1".into(),
                source: Source::Claude,
                title: Some("Plans, \"quoted\"".into()),
                created_at: ts_from_iso("2024-02-01T00:00:00Z"),
                updated_at: None,
                model: None,
                cwd: None,
                git_branch: None,
                project_id: None,
                metadata: json!({}),
            },
            messages: vec![Message {
                id: "m1".into(),
                conversation_id: "c1".into(),
                role: Role::Human,
                content: "line one\nline two".into(),
                thinking: None,
                created_at: ts_from_iso("2024-02-01T00:00:05Z"),
                seq: 0,
                model: None,
                metadata: json!({}),
            }],
            tool_calls: vec![],
            attachments: vec![],
            artifacts: vec![],
            file_edits: vec![],
        }
    }

    #[test]
    fn test_csv_quotes_and_header() {
        let mut buf = Vec::new();
        write_csv(&[view()], &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), CSV_HEADER.to_vec());
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[2], "Plans, \"quoted\"");
        assert_eq!(&row[4], "human");
        assert_eq!(&row[5], "line one\nline two");
        assert_eq!(&row[6], "2024-02-01T00:00:05+00:00");
    }

    #[test]
    fn test_json_nests_messages() {
        let mut buf = Vec::new();
        write_json(&[view()], &mut buf).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value[0]["id"], "c1");
        assert_eq!(value[0]["source"], "claude");
        assert_eq!(value[0]["messages"][0]["role"], "human");
        assert!(value[0]["tool_calls"].as_array().unwrap().is_empty());
    }
}
