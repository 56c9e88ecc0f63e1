//! End-to-end tests over a real SQLite file: adapters, reconciliation, the
//! search index and the query layer.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

use convos::config::Config;
use convos::db::{self, Store};
use convos::error::ConvosError;
use convos::fetch::{Batch, Head, HostedFetcher, Window};
use convos::import;
use convos::index::{self, Scope};
use convos::models::{
    from_millis, to_millis, Conversation, Message, Role, Source, ToolCall, ToolStatus,
};
use convos::normalize::NormalizationResult;
use convos::query::{self, Cursor, ListFilters};
use convos::reconcile::{reconcile, ReconcileStats};
use convos::search::{self, SearchFilters};
use convos::sync;

// ═══════════════════════════════════════════════════════════════════════
// Fixtures
// ═══════════════════════════════════════════════════════════════════════

fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config::default();
    config.db.path = tmp.path().join("data").join("convos.sqlite");
    config.sync.claude_code_dir = tmp.path().join("projects");
    config.sync.codex_dir = tmp.path().join("codex");
    config.sync.import_paths.clear();
    config
}

async fn open(tmp: &TempDir) -> (Config, Store) {
    let config = test_config(tmp);
    let store = db::connect(&config).await.unwrap();
    (config, store)
}

fn base_time() -> DateTime<Utc> {
    Utc::now() - Duration::hours(2)
}

fn conversation(id: &str, source: Source) -> Conversation {
    Conversation {
        id: id.to_string(),
        source,
        title: Some(format!("conversation {}", id)),
        created_at: Some(base_time()),
        updated_at: Some(base_time()),
        model: None,
        cwd: None,
        git_branch: None,
        project_id: None,
        metadata: json!({}),
    }
}

fn message(id: &str, conversation_id: &str, seq: i64, role: Role, content: &str) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        role,
        content: content.to_string(),
        thinking: None,
        created_at: Some(base_time() + Duration::seconds(seq)),
        seq,
        model: None,
        metadata: json!({}),
    }
}

async fn store_batch(store: &Store, batch: &NormalizationResult) {
    let stats = reconcile(store, "test", batch).await.unwrap();
    index::refresh(store, Scope::After(&stats)).await.unwrap();
}

async fn count(store: &Store, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(store.pool())
        .await
        .unwrap()
}

fn session_lines() -> Vec<String> {
    vec![
        json!({"type": "user", "uuid": "u1", "sessionId": "sess-1", "cwd": "/work/app",
               "gitBranch": "main", "version": "1.0.30", "timestamp": "2024-06-01T09:00:00Z",
               "message": {"role": "user", "content": "Fix the build"}})
        .to_string(),
        json!({"type": "assistant", "uuid": "a1", "timestamp": "2024-06-01T09:00:05Z",
               "message": {"role": "assistant", "model": "claude-sonnet-4", "content": [
                   {"type": "text", "text": "Updating the config."},
                   {"type": "tool_use", "id": "toolu_1", "name": "Write",
                    "input": {"file_path": "/work/app/build.toml", "content": "[build]"}}
               ]}})
        .to_string(),
        json!({"type": "user", "uuid": "u2", "timestamp": "2024-06-01T09:00:07Z",
               "message": {"role": "user", "content": [
                   {"type": "tool_result", "tool_use_id": "toolu_1", "content": "written"}
               ]}})
        .to_string(),
        json!({"type": "summary", "summary": "Build fix", "leafUuid": "a1"}).to_string(),
        json!({"type": "user", "uuid": "u3", "timestamp": "2024-06-01T09:01:00Z",
               "message": {"role": "user", "content": "Now run the tests"}})
        .to_string(),
    ]
}

fn write_lines(path: &Path, lines: &[String]) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
}

const CHATGPT_EXPORT: &str = r#"[{
    "id": "g-1", "title": "Sorting", "create_time": 1717230000.0, "update_time": 1717230100.0,
    "default_model_slug": "gpt-4o", "current_node": "n2",
    "mapping": {
        "root": {"message": null, "parent": null, "children": ["n1"]},
        "n1": {"parent": "root", "children": ["n2"], "message": {
            "author": {"role": "user"}, "create_time": 1717230010.0,
            "content": {"content_type": "text", "parts": ["How do I sort a vec?"]}, "metadata": {}}},
        "n2": {"parent": "n1", "children": [], "message": {
            "author": {"role": "assistant"}, "create_time": 1717230020.0,
            "content": {"content_type": "text", "parts": ["Call sort on the slice."]},
            "metadata": {"model_slug": "gpt-4o"}}}
    }
}]"#;

const CLAUDE_EXPORT: &str = r#"[{
    "uuid": "c-9", "name": "Haiku", "created_at": "2024-06-01T10:00:00Z",
    "updated_at": "2024-06-01T10:01:00Z",
    "chat_messages": [
        {"uuid": "m1", "sender": "human", "created_at": "2024-06-01T10:00:00Z",
         "parent_message_uuid": "00000000-0000-4000-8000-000000000000",
         "content": [{"type": "text", "text": "Write a haiku about autumn"}]},
        {"uuid": "m2", "sender": "assistant", "created_at": "2024-06-01T10:00:30Z",
         "parent_message_uuid": "m1",
         "content": [{"type": "text", "text": "Maple leaves drifting"}]}
    ]
}]"#;

// ═══════════════════════════════════════════════════════════════════════
// Reconciliation
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_unchanged_batch_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let (_config, store) = open(&tmp).await;

    let mut batch = NormalizationResult::new();
    batch.conversations.push(conversation("c1", Source::Claude));
    batch.messages.push(message("m1", "c1", 0, Role::Human, "hello"));
    batch.messages.push(message("m2", "c1", 1, Role::Assistant, "hi there"));

    let first = reconcile(&store, "test", &batch).await.unwrap();
    assert_eq!(first.new, 1);
    assert!(first.changed());

    let second = reconcile(&store, "test", &batch).await.unwrap();
    assert_eq!(second.new, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.rows_written, 0);
    assert_eq!(second.processed.messages, 2);
    assert_eq!(index::refresh(&store, Scope::After(&second)).await.unwrap(), None);

    assert_eq!(count(&store, "conversations").await, 1);
    assert_eq!(count(&store, "messages").await, 2);
}

#[tokio::test]
async fn test_grown_session_log_updates_in_place() {
    let tmp = TempDir::new().unwrap();
    let (config, store) = open(&tmp).await;
    let project = config.sync.claude_code_dir.join("-work-app");
    std::fs::create_dir_all(&project).unwrap();
    let log = project.join("sess-1.jsonl");
    let lines = session_lines();

    write_lines(&log, &lines[..2]);
    let first = sync::run_cycle(&store, &config, false).await.unwrap();
    assert!(first.failures.is_empty());
    assert_eq!(first.total.new, 1);
    assert!(first.indexed.is_some());
    assert_eq!(count(&store, "messages").await, 2);

    let idle = sync::run_cycle(&store, &config, false).await.unwrap();
    assert_eq!(idle.total.processed.total(), 0);
    assert!(!idle.total.changed());
    assert_eq!(idle.indexed, None);

    write_lines(&log, &lines[2..]);
    let grown = sync::run_cycle(&store, &config, false).await.unwrap();
    assert_eq!(grown.total.new, 0);
    assert_eq!(grown.total.updated, 1);

    assert_eq!(count(&store, "conversations").await, 1);
    assert_eq!(count(&store, "messages").await, 3);
    let listed = query::list_conversations(&store, &ListFilters { limit: 10, ..Default::default() })
        .await
        .unwrap();
    assert_eq!(listed[0].conversation.title.as_deref(), Some("Build fix"));
    assert_eq!(listed[0].message_count, 3);
}

#[tokio::test]
async fn test_malformed_log_does_not_block_others() {
    let tmp = TempDir::new().unwrap();
    let (config, store) = open(&tmp).await;
    let project = config.sync.claude_code_dir.join("-work-app");
    std::fs::create_dir_all(&project).unwrap();
    write_lines(&project.join("good.jsonl"), &session_lines());
    std::fs::write(project.join("bad.jsonl"), "not json at all\n{}\n").unwrap();

    let report = sync::run_cycle(&store, &config, false).await.unwrap();
    assert_eq!(report.total.new, 1);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].label.ends_with("bad.jsonl"));

    // The broken file is retried next cycle; the good one is not.
    let again = sync::run_cycle(&store, &config, false).await.unwrap();
    assert_eq!(again.failures.len(), 1);
    assert_eq!(again.total.processed.total(), 0);

    let err = again.into_result().unwrap_err();
    assert_eq!(convos::error::exit_code_for(&err), 2);
}

#[tokio::test]
async fn test_exports_from_both_hosted_sources() {
    let tmp = TempDir::new().unwrap();
    let (mut config, store) = open(&tmp).await;
    let gpt = tmp.path().join("chatgpt-export.json");
    let claude = tmp.path().join("claude-export.json");
    std::fs::write(&gpt, CHATGPT_EXPORT).unwrap();
    std::fs::write(&claude, CLAUDE_EXPORT).unwrap();
    config.sync.import_paths = vec![gpt, claude];

    let report = sync::run_cycle(&store, &config, false).await.unwrap();
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(report.total.new, 2);
    let labels: Vec<&str> = report.sources.iter().map(|(l, _)| l.as_str()).collect();
    assert_eq!(labels, ["import:chatgpt-export.json", "import:claude-export.json"]);

    let gpt_only = query::list_conversations(
        &store,
        &ListFilters {
            sources: vec![Source::Chatgpt],
            limit: 10,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(gpt_only.len(), 1);
    let view = query::show(&store, &gpt_only[0].conversation.id).await.unwrap();
    assert_eq!(view.conversation.title.as_deref(), Some("Sorting"));
    assert_eq!(view.conversation.model.as_deref(), Some("gpt-4o"));
    assert_eq!(view.messages.len(), 2);
    assert_eq!(view.messages[0].role, Role::User);
    assert_eq!(view.messages[0].content, "How do I sort a vec?");
    assert_eq!(view.messages[1].role, Role::Assistant);

    let hits = search::search(&store, "haiku", &SearchFilters::default(), 10, 80)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source, Source::Claude);
    assert_eq!(hits[0].role, Role::Human);
}

#[tokio::test]
async fn test_delete_removes_owned_rows() {
    let tmp = TempDir::new().unwrap();
    let (_config, store) = open(&tmp).await;

    let mut batch = NormalizationResult::new();
    batch.conversations.push(conversation("c1", Source::ClaudeCode));
    batch.messages.push(message("m1", "c1", 0, Role::Assistant, "running cargo fmt"));
    batch.tool_calls.push(ToolCall {
        id: "t1".into(),
        message_id: "m1".into(),
        tool_name: "Bash".into(),
        input: json!({"command": "cargo fmt"}),
        output: None,
        status: ToolStatus::Pending,
        duration_ms: None,
        created_at: Some(base_time()),
    });
    store_batch(&store, &batch).await;
    assert_eq!(count(&store, "tool_calls").await, 1);

    assert!(store.delete_conversation("c1").await.unwrap());
    assert!(!store.delete_conversation("c1").await.unwrap());
    assert_eq!(count(&store, "messages").await, 0);
    assert_eq!(count(&store, "tool_calls").await, 0);
    let hits = search::search(&store, "cargo", &SearchFilters::default(), 10, 80)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
// Search
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_search_ranks_denser_match_first() {
    let tmp = TempDir::new().unwrap();
    let (_config, store) = open(&tmp).await;

    let mut batch = NormalizationResult::new();
    batch.conversations.push(conversation("c1", Source::Claude));
    batch.messages.push(message("dense", "c1", 0, Role::Human, "rust rust rust lifetimes"));
    batch.messages.push(message("sparse", "c1", 1, Role::Assistant, "rust python golang lifetimes"));
    batch.messages.push(message("middle", "c1", 2, Role::Human, "rust rust borrow lifetimes"));
    for i in 0..4 {
        batch.messages.push(message(
            &format!("other{}", i),
            "c1",
            3 + i,
            Role::Human,
            "completely unrelated words here",
        ));
    }
    store_batch(&store, &batch).await;

    let hits = search::search(&store, "rust", &SearchFilters::default(), 10, 80)
        .await
        .unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.message_id.as_str()).collect();
    assert_eq!(ids, ["dense", "middle", "sparse"]);
    assert!(hits[0].score > hits[1].score);
    assert!(hits[1].score > hits[2].score);
    assert!(hits[0].snippet.contains("rust"));

    let both = search::search(&store, "rust python", &SearchFilters::default(), 10, 80)
        .await
        .unwrap();
    assert_eq!(both.len(), 1);
    assert_eq!(both[0].message_id, "sparse");

    let limited = search::search(&store, "rust", &SearchFilters::default(), 1, 80)
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn test_search_without_matches_is_empty() {
    let tmp = TempDir::new().unwrap();
    let (_config, store) = open(&tmp).await;
    let mut batch = NormalizationResult::new();
    batch.conversations.push(conversation("c1", Source::Codex));
    batch.messages.push(message("m1", "c1", 0, Role::User, "add a readme"));
    store_batch(&store, &batch).await;

    for query in ["zebra", "", "   "] {
        let hits = search::search(&store, query, &SearchFilters::default(), 10, 80)
            .await
            .unwrap();
        assert!(hits.is_empty(), "query {:?}", query);
    }
}

async fn hit_ids(store: &Store, query: &str, filters: &SearchFilters) -> BTreeSet<String> {
    search::search(store, query, filters, 100, 80)
        .await
        .unwrap()
        .into_iter()
        .map(|h| h.message_id)
        .collect()
}

#[tokio::test]
async fn test_search_filters_intersect() {
    let tmp = TempDir::new().unwrap();
    let (_config, store) = open(&tmp).await;

    let mut batch = NormalizationResult::new();
    batch.conversations.push(conversation("web", Source::Claude));
    batch.conversations.push(conversation("cli", Source::ClaudeCode));
    batch.conversations.push(conversation("gpt", Source::Chatgpt));
    let old = |mut m: Message| {
        m.created_at = Some(Utc::now() - Duration::days(5));
        m
    };
    batch.messages.push(message("w1", "web", 0, Role::Human, "migrate the schema"));
    batch.messages.push(old(message("w2", "web", 1, Role::Assistant, "old schema migration plan")));
    batch.messages.push(message("w3", "web", 2, Role::Assistant, "schema migration plan"));
    batch.messages.push(message("k1", "cli", 0, Role::User, "schema is broken"));
    let mut reasoning = message("k2", "cli", 1, Role::Assistant, "fixed the schema");
    reasoning.thinking = Some("the index was missing".into());
    batch.messages.push(reasoning);
    batch.messages.push(old(message("k3", "cli", 2, Role::Assistant, "schema dump from last week")));
    batch.messages.push(message("g1", "gpt", 0, Role::Assistant, "schema advice"));
    batch.messages.push(old(message("g2", "gpt", 1, Role::User, "schema question")));
    store_batch(&store, &batch).await;

    let by_source = SearchFilters {
        sources: vec![Source::Claude, Source::ClaudeCode],
        ..Default::default()
    };
    let by_days = SearchFilters {
        days: Some(2),
        ..Default::default()
    };
    let by_role = SearchFilters {
        roles: vec![Role::Assistant],
        ..Default::default()
    };
    let combined = SearchFilters {
        sources: by_source.sources.clone(),
        days: by_days.days,
        roles: by_role.roles.clone(),
        thinking: None,
    };

    let sources = hit_ids(&store, "schema", &by_source).await;
    let recent = hit_ids(&store, "schema", &by_days).await;
    let roles = hit_ids(&store, "schema", &by_role).await;
    assert_eq!(sources.len(), 6);
    assert_eq!(recent.len(), 5);
    assert_eq!(roles.len(), 5);

    let expected: BTreeSet<String> = sources
        .intersection(&recent)
        .cloned()
        .collect::<BTreeSet<_>>()
        .intersection(&roles)
        .cloned()
        .collect();
    let hits = hit_ids(&store, "schema", &combined).await;
    assert_eq!(hits, expected);
    assert_eq!(hits, BTreeSet::from(["k2".to_string(), "w3".to_string()]));

    let thinking_only = SearchFilters {
        thinking: Some(true),
        ..Default::default()
    };
    let hits = search::search(&store, "schema", &thinking_only, 10, 80).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].thinking.as_deref(), Some("the index was missing"));

    // Reasoning text is searchable too.
    let hits = search::search(&store, "missing", &SearchFilters::default(), 10, 80)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);

    // A window too wide to represent has no lower bound.
    let unbounded = SearchFilters {
        days: Some(i64::MAX / 1000),
        ..Default::default()
    };
    assert_eq!(hit_ids(&store, "schema", &unbounded).await.len(), 8);
    let listed = query::list_conversations(
        &store,
        &ListFilters {
            days: Some(i64::MAX),
            limit: 10,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(listed.len(), 3);
}

// ═══════════════════════════════════════════════════════════════════════
// Query
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_prefix_resolution() {
    let tmp = TempDir::new().unwrap();
    let (_config, store) = open(&tmp).await;
    let mut batch = NormalizationResult::new();
    batch.conversations.push(conversation("abcd1111aaaaaaaa", Source::Chatgpt));
    batch.conversations.push(conversation("abcd2222bbbbbbbb", Source::Chatgpt));
    store_batch(&store, &batch).await;

    let err = query::resolve_conversation(&store, "abcd").await.unwrap_err();
    assert!(matches!(err, ConvosError::AmbiguousPrefix { matches: 2, .. }));
    assert_eq!(err.exit_code(), 7);

    assert_eq!(
        query::resolve_conversation(&store, "abcd1111").await.unwrap(),
        "abcd1111aaaaaaaa"
    );
    assert_eq!(
        query::resolve_conversation(&store, "abcd2222bbbbbbbb").await.unwrap(),
        "abcd2222bbbbbbbb"
    );

    let err = query::resolve_conversation(&store, "ffff").await.unwrap_err();
    assert!(matches!(err, ConvosError::NotFound { .. }));
}

#[tokio::test]
async fn test_get_messages_pages_after_anchor() {
    let tmp = TempDir::new().unwrap();
    let (_config, store) = open(&tmp).await;

    let mut batch = NormalizationResult::new();
    batch.conversations.push(conversation("c1", Source::Codex));
    let same = base_time();
    for (seq, id) in ["m-aaa", "m-bbb", "m-ccc", "m-ddd"].iter().enumerate() {
        let mut m = message(id, "c1", seq as i64, Role::User, "step");
        // Two messages share a timestamp; seq orders them.
        if seq < 2 {
            m.created_at = Some(same);
        }
        batch.messages.push(m);
    }
    store_batch(&store, &batch).await;

    let all = query::get_messages(&store, "c1", &Cursor { limit: 10, ..Default::default() })
        .await
        .unwrap();
    let ids: Vec<&str> = all.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["m-aaa", "m-bbb", "m-ccc", "m-ddd"]);

    let after = query::get_messages(
        &store,
        "c1",
        &Cursor {
            after: Some("m-a".into()),
            limit: 2,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let ids: Vec<&str> = after.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["m-bbb", "m-ccc"]);

    let since = query::get_messages(
        &store,
        "c1",
        &Cursor {
            since: Some(same + Duration::milliseconds(1500)),
            limit: 10,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let ids: Vec<&str> = since.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["m-ccc", "m-ddd"]);

    let err = query::get_messages(
        &store,
        "c1",
        &Cursor {
            after: Some("m-".into()),
            limit: 10,
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ConvosError::AmbiguousPrefix { .. }));
}

// ═══════════════════════════════════════════════════════════════════════
// Store round trip
// ═══════════════════════════════════════════════════════════════════════

fn at_millis(ts: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    from_millis(to_millis(ts))
}

/// Reconcile `batch` and check that reading each conversation back gives
/// the adapter's records, field for field. Timestamps are stored at
/// millisecond precision.
async fn assert_round_trip(store: &Store, batch: &NormalizationResult) {
    reconcile(store, "round-trip", batch).await.unwrap();

    for conversation in &batch.conversations {
        let view = query::show(store, &conversation.id).await.unwrap();

        let mut expected = conversation.clone();
        expected.created_at = at_millis(expected.created_at);
        expected.updated_at = at_millis(expected.updated_at);
        assert_eq!(view.conversation, expected);

        let mut messages: Vec<Message> = batch
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation.id)
            .cloned()
            .map(|mut m| {
                m.created_at = at_millis(m.created_at);
                m
            })
            .collect();
        let owned: BTreeSet<String> = messages.iter().map(|m| m.id.clone()).collect();
        let mut stored = view.messages.clone();
        messages.sort_by(|a, b| a.id.cmp(&b.id));
        stored.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(stored, messages);

        let mut tool_calls: Vec<ToolCall> = batch
            .tool_calls
            .iter()
            .filter(|t| owned.contains(&t.message_id))
            .cloned()
            .map(|mut t| {
                t.created_at = at_millis(t.created_at);
                t
            })
            .collect();
        let mut stored = view.tool_calls.clone();
        tool_calls.sort_by(|a, b| a.id.cmp(&b.id));
        stored.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(stored, tool_calls);

        let mut attachments: Vec<_> = batch
            .attachments
            .iter()
            .filter(|a| owned.contains(&a.message_id))
            .cloned()
            .map(|mut a| {
                a.created_at = at_millis(a.created_at);
                a
            })
            .collect();
        let mut stored = view.attachments.clone();
        attachments.sort_by(|a, b| a.id.cmp(&b.id));
        stored.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(stored, attachments);

        let mut artifacts: Vec<_> = batch
            .artifacts
            .iter()
            .filter(|a| a.conversation_id == conversation.id)
            .cloned()
            .map(|mut a| {
                a.created_at = at_millis(a.created_at);
                a
            })
            .collect();
        let mut stored = view.artifacts.clone();
        artifacts.sort_by(|a, b| a.id.cmp(&b.id));
        stored.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(stored, artifacts);

        let mut file_edits: Vec<_> = batch
            .file_edits
            .iter()
            .filter(|e| owned.contains(&e.message_id))
            .cloned()
            .map(|mut e| {
                e.created_at = at_millis(e.created_at);
                e
            })
            .collect();
        let mut stored = view.file_edits.clone();
        file_edits.sort_by(|a, b| a.id.cmp(&b.id));
        stored.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(stored, file_edits);
    }
}

#[tokio::test]
async fn test_chatgpt_records_survive_store() {
    let tmp = TempDir::new().unwrap();
    let (_config, store) = open(&tmp).await;
    let path = tmp.path().join("conversations.json");
    let export = json!([{
        "id": "g-7", "title": "Plotting", "create_time": 1704067200.0, "update_time": 1704067400.0,
        "default_model_slug": "gpt-4o", "gizmo_id": "g-123", "current_node": "n4",
        "mapping": {
            "root": {"message": null, "parent": null, "children": ["n1"]},
            "n1": {"parent": "root", "children": ["n2"], "message": {
                "author": {"role": "user"}, "create_time": 1704067210.0,
                "content": {"content_type": "multimodal_text", "parts": [
                    {"content_type": "image_asset_pointer", "asset_pointer": "file-service://file-abc",
                     "size_bytes": 2048, "mime_type": "image/png"},
                    "Plot this data"
                ]},
                "metadata": {}}},
            "n2": {"parent": "n1", "children": ["n3"], "message": {
                "author": {"role": "assistant"}, "create_time": 1704067220.0,
                "content": {"content_type": "thoughts", "thoughts": [{"summary": "Plan", "content": "Use matplotlib"}]},
                "metadata": {"model_slug": "o3"}}},
            "n3": {"parent": "n2", "children": ["n4"], "message": {
                "author": {"role": "assistant"}, "create_time": 1704067230.0, "recipient": "python",
                "content": {"content_type": "code", "language": "python", "text": "plot(data)"},
                "metadata": {"model_slug": "o3"}}},
            "n4": {"parent": "n3", "children": [], "message": {
                "author": {"role": "tool", "name": "python"}, "create_time": 1704067232.5,
                "content": {"content_type": "execution_output", "text": "<Figure>"},
                "metadata": {}}}
        }
    }]);
    std::fs::write(&path, export.to_string()).unwrap();

    let batch = import::normalize_path(&path, Source::Chatgpt).unwrap();
    assert_eq!(batch.tool_calls.len(), 1);
    assert_eq!(batch.attachments.len(), 1);
    assert!(batch.messages.iter().any(|m| m.thinking.is_some()));
    assert_round_trip(&store, &batch).await;
}

#[tokio::test]
async fn test_claude_records_survive_store() {
    let tmp = TempDir::new().unwrap();
    let (_config, store) = open(&tmp).await;
    let export = json!([{
        "uuid": "c-1", "name": "Landing page", "created_at": "2024-05-01T10:00:00Z",
        "updated_at": "2024-05-01T10:05:00Z", "project_uuid": "p-9",
        "chat_messages": [
            {"uuid": "m1", "sender": "human", "created_at": "2024-05-01T10:00:00Z",
             "parent_message_uuid": "00000000-0000-4000-8000-000000000000",
             "content": [{"type": "text", "text": "Build a landing page"}],
             "attachments": [{"file_name": "brief.txt", "file_type": "text/plain", "file_size": 120}]},
            {"uuid": "m2", "sender": "assistant", "created_at": "2024-05-01T10:01:00.250Z",
             "parent_message_uuid": "m1",
             "content": [
                 {"type": "thinking", "thinking": "Start with a hero section"},
                 {"type": "text", "text": "Here is a first version."},
                 {"type": "tool_use", "id": "toolu_a", "name": "artifacts", "input": {
                     "command": "create", "id": "landing", "type": "text/html",
                     "title": "Landing", "content": "<h1>Hello</h1>"}},
                 {"type": "tool_result", "tool_use_id": "toolu_a", "content": [{"type": "text", "text": "OK"}]}
             ]}
        ]
    }]);

    let batch = import::normalize_document(&export, Source::Claude).unwrap();
    assert_eq!(batch.tool_calls.len(), 1);
    assert_eq!(batch.tool_calls[0].status, ToolStatus::Complete);
    assert_eq!(batch.attachments.len(), 1);
    assert_eq!(batch.artifacts.len(), 1);
    assert!(batch.messages.iter().any(|m| m.thinking.is_some()));
    assert_round_trip(&store, &batch).await;
}

#[tokio::test]
async fn test_claude_code_records_survive_store() {
    let tmp = TempDir::new().unwrap();
    let (config, store) = open(&tmp).await;
    let project = config.sync.claude_code_dir.join("-work-app");
    std::fs::create_dir_all(&project).unwrap();
    let log = project.join("sess-1.jsonl");
    let mut lines = session_lines();
    lines[1] = json!({"type": "assistant", "uuid": "a1", "timestamp": "2024-06-01T09:00:05.123Z",
           "message": {"role": "assistant", "model": "claude-sonnet-4", "content": [
               {"type": "thinking", "thinking": "Check the config first"},
               {"type": "text", "text": "Updating the config."},
               {"type": "tool_use", "id": "toolu_1", "name": "Write",
                "input": {"file_path": "/work/app/build.toml", "content": "[build]"}}
           ]}})
    .to_string();
    write_lines(&log, &lines);

    let batch = import::normalize_path(&log, Source::ClaudeCode).unwrap();
    assert_eq!(batch.tool_calls.len(), 1);
    assert_eq!(batch.tool_calls[0].output, Some(json!("written")));
    assert!(!batch.file_edits.is_empty());
    assert!(batch.messages.iter().any(|m| m.thinking.is_some()));
    assert_eq!(batch.conversations[0].cwd.as_deref(), Some("/work/app"));
    assert_round_trip(&store, &batch).await;
}

#[tokio::test]
async fn test_codex_records_survive_store() {
    let tmp = TempDir::new().unwrap();
    let (config, store) = open(&tmp).await;
    let day = config.sync.codex_dir.join("sessions/2024/06/01");
    std::fs::create_dir_all(&day).unwrap();
    let log = day.join("rollout-abc.jsonl");
    let line = |ts: &str, kind: &str, payload: Value| {
        json!({"timestamp": ts, "type": kind, "payload": payload}).to_string()
    };
    write_lines(
        &log,
        &[
            line("2024-06-01T10:00:00Z", "session_meta", json!({
                "id": "abc", "cwd": "/work/app", "cli_version": "0.30.0",
                "git": {"branch": "feature", "commit_hash": "deadbeef"}
            })),
            line("2024-06-01T10:00:00Z", "turn_context", json!({"model": "gpt-5-codex", "cwd": "/work/app"})),
            line("2024-06-01T10:00:01Z", "response_item", json!({
                "type": "message", "role": "user", "content": [{"type": "input_text", "text": "Add a README"}]
            })),
            line("2024-06-01T10:00:02Z", "response_item", json!({
                "type": "reasoning", "summary": [{"type": "summary_text", "text": "Need a new file"}]
            })),
            line("2024-06-01T10:00:03Z", "response_item", json!({
                "type": "function_call", "name": "shell", "call_id": "call_1",
                "arguments": "{\"command\":[\"bash\",\"-lc\",\"echo hi > README.md\"],\"workdir\":\"/work/app\"}"
            })),
            line("2024-06-01T10:00:04.500Z", "response_item", json!({
                "type": "function_call_output", "call_id": "call_1",
                "output": "{\"output\":\"\",\"metadata\":{\"exit_code\":0,\"duration_seconds\":1.5}}"
            })),
            line("2024-06-01T10:00:05Z", "response_item", json!({
                "type": "message", "role": "assistant", "content": [{"type": "output_text", "text": "Done."}]
            })),
        ],
    );

    let batch = import::normalize_path(&log, Source::Codex).unwrap();
    assert_eq!(batch.tool_calls.len(), 1);
    assert!(batch.tool_calls[0].output.is_some());
    assert!(!batch.file_edits.is_empty());
    assert_eq!(batch.conversations[0].git_branch.as_deref(), Some("feature"));
    assert_round_trip(&store, &batch).await;
}

// ═══════════════════════════════════════════════════════════════════════
// Hosted pulls
// ═══════════════════════════════════════════════════════════════════════

fn account_time(hour: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::hours(hour as i64)
}

fn claude_payload(id: &str, at: DateTime<Utc>) -> Value {
    let ts = at.to_rfc3339();
    json!({
        "uuid": id, "name": format!("chat {}", id), "created_at": ts, "updated_at": ts,
        "chat_messages": [{
            "uuid": format!("{}-m1", id), "sender": "human", "created_at": ts,
            "parent_message_uuid": "00000000-0000-4000-8000-000000000000",
            "content": [{"type": "text", "text": "hello"}]
        }]
    })
}

/// A Claude.ai account served from memory. `conv-N` was last updated at
/// hour N, and the listing is newest first.
struct MemoryAccount {
    conversations: Vec<(String, DateTime<Utc>)>,
}

impl MemoryAccount {
    fn with(count: usize) -> Self {
        Self {
            conversations: (1..=count)
                .rev()
                .map(|n| (format!("conv-{}", n), account_time(n)))
                .collect(),
        }
    }
}

#[async_trait]
impl HostedFetcher for MemoryAccount {
    fn source(&self) -> Source {
        Source::Claude
    }

    async fn head(&self) -> convos::error::Result<Option<Head>> {
        Ok(self.conversations.first().map(|(id, at)| Head {
            id: id.clone(),
            updated_at: Some(*at),
        }))
    }

    async fn fetch(&self, window: &Window) -> convos::error::Result<Batch> {
        let mut batch = Batch::default();
        for (id, at) in &self.conversations {
            if !window.wants(Some(*at)) {
                continue;
            }
            batch.push(Some(*at), claude_payload(id, *at));
            if batch.len() >= window.limit {
                batch.truncated = true;
                break;
            }
        }
        Ok(batch)
    }
}

async fn pull(store: &Store, account: &MemoryAccount, limit: usize) -> Option<ReconcileStats> {
    let head = account.head().await.unwrap();
    sync::pull_hosted(store, account, head, limit).await.unwrap()
}

#[tokio::test]
async fn test_capped_hosted_pulls_work_through_backlog() {
    let tmp = TempDir::new().unwrap();
    let (_config, store) = open(&tmp).await;
    let account = MemoryAccount::with(5);

    let mut fetched = Vec::new();
    for _ in 0..3 {
        fetched.push(pull(&store, &account, 2).await.unwrap().new);
    }
    assert_eq!(fetched, [2, 2, 1]);
    assert_eq!(count(&store, "conversations").await, 5);
    assert_eq!(store.checkpoint("backlog:claude").await.unwrap(), None);
    assert_eq!(
        store.checkpoint("cursor:claude").await.unwrap(),
        Some(account_time(5).to_rfc3339())
    );

    // The drained pass never looked above its newest entry, so one more pass
    // from the top runs before an idle account is skipped.
    let top = pull(&store, &account, 2).await.unwrap();
    assert!(!top.changed());
    assert!(pull(&store, &account, 2).await.is_none());

    let grown = MemoryAccount::with(6);
    let stats = pull(&store, &grown, 2).await.unwrap();
    assert_eq!(stats.new, 1);
    assert_eq!(count(&store, "conversations").await, 6);
}

#[tokio::test]
async fn test_uncapped_hosted_pull_records_head() {
    let tmp = TempDir::new().unwrap();
    let (_config, store) = open(&tmp).await;
    let account = MemoryAccount::with(3);

    assert_eq!(pull(&store, &account, 100).await.unwrap().new, 3);
    assert_eq!(
        store.checkpoint("head:claude").await.unwrap(),
        Some(format!("conv-3@{}", account_time(3).to_rfc3339()))
    );
    assert!(pull(&store, &account, 100).await.is_none());
}
