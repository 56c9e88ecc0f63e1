//! Sync orchestration.
//!
//! One cycle plans the work, normalizes inputs on blocking threads, merges
//! each unit into the store and refreshes the search index once at the end:
//!
//! 1. import paths and session logs whose `mtime:length` changed since the
//!    last cycle;
//! 2. hosted sources whose newest conversation moved since the last cycle,
//!    or that still have a backlog from a capped fetch, trying credentials
//!    from the remembered origin first.
//!
//! A failing unit or source is reported alongside the ones that succeeded;
//! it never aborts the cycle. In watch mode cycles repeat until Ctrl-C. A
//! Ctrl-C that arrives mid-cycle lets the cycle finish and then stops.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;

use crate::config::{Config, HostedSourceConfig};
use crate::credentials;
use crate::db::{self, Store};
use crate::fetch::{self, Head, HostedFetcher, Window};
use crate::import;
use crate::index::{self, Scope};
use crate::models::Source;
use crate::normalize::RecordCounts;
use crate::reconcile::{reconcile, ReconcileStats};

/// Session logs normalized concurrently.
const PARALLEL_UNITS: usize = 4;

const HOSTED: [Source; 2] = [Source::Chatgpt, Source::Claude];

fn file_key(path: &Path) -> String {
    format!("file:{}", path.display())
}

fn credential_key(source: Source) -> String {
    format!("credential:{}", source)
}

fn head_key(source: Source) -> String {
    format!("head:{}", source)
}

fn cursor_key(source: Source) -> String {
    format!("cursor:{}", source)
}

fn backlog_key(source: Source) -> String {
    format!("backlog:{}", source)
}

fn pending_key(source: Source) -> String {
    format!("pending:{}", source)
}

async fn timestamp_checkpoint(store: &Store, key: &str) -> Result<Option<DateTime<Utc>>> {
    Ok(store
        .checkpoint(key)
        .await?
        .and_then(|c| DateTime::parse_from_rfc3339(&c).ok())
        .map(|t| t.with_timezone(&Utc)))
}

/// A source, unit or import path that could not be synced.
#[derive(Debug)]
pub struct Failure {
    pub label: String,
    pub error: anyhow::Error,
}

/// What one cycle did.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Merged stats per source label, in visiting order.
    pub sources: Vec<(String, ReconcileStats)>,
    pub failures: Vec<Failure>,
    pub total: ReconcileStats,
    /// Messages indexed, or `None` if nothing changed.
    pub indexed: Option<u64>,
}

impl SyncReport {
    fn record(&mut self, label: &str, stats: ReconcileStats) {
        self.total.add(&stats);
        match self.sources.iter_mut().find(|(l, _)| l == label) {
            Some((_, existing)) => existing.add(&stats),
            None => self.sources.push((label.to_string(), stats)),
        }
    }

    fn fail(&mut self, label: impl Into<String>, error: anyhow::Error) {
        let label = label.into();
        tracing::warn!(%label, error = %format!("{:#}", error), "sync unit failed");
        self.failures.push(Failure { label, error });
    }

    /// `Err` carrying the first failure when any unit failed, so the exit
    /// code reflects its cause.
    pub fn into_result(mut self) -> Result<()> {
        if self.failures.is_empty() {
            return Ok(());
        }
        let count = self.failures.len();
        let first = self.failures.remove(0);
        Err(first
            .error
            .context(format!("{} failed ({} failure(s) this sync)", first.label, count)))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Local planning
// ═══════════════════════════════════════════════════════════════════════

/// One local file to normalize and merge.
#[derive(Debug, Clone)]
struct LocalUnit {
    label: String,
    source: Source,
    path: PathBuf,
    fingerprint: String,
}

fn import_label(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    format!("import:{}", name)
}

struct Planner<'a> {
    seen: std::collections::BTreeMap<String, String>,
    units: Vec<LocalUnit>,
    report: &'a mut SyncReport,
}

impl Planner<'_> {
    fn add_file(&mut self, label: &str, source: Source, path: PathBuf) {
        let Some(fingerprint) = import::fingerprint(&path) else {
            return;
        };
        let key = path.display().to_string();
        if self.seen.get(&key) == Some(&fingerprint) {
            return;
        }
        self.units.push(LocalUnit {
            label: label.to_string(),
            source,
            path,
            fingerprint,
        });
    }

    fn add_tree(&mut self, label: &str, source: Source, root: &Path) {
        match import::session_files(root, source) {
            Ok(files) => {
                for file in files {
                    self.add_file(label, source, file);
                }
            }
            Err(e) => self.report.fail(label, e.into()),
        }
    }
}

async fn plan_local(store: &Store, config: &Config, report: &mut SyncReport) -> Result<Vec<LocalUnit>> {
    let mut planner = Planner {
        seen: store.checkpoints("file:").await?,
        units: Vec::new(),
        report,
    };

    for path in &config.sync.import_paths {
        let label = import_label(path);
        if !path.exists() {
            tracing::warn!(path = %path.display(), "import path does not exist, skipping");
            continue;
        }
        let source = match import::detect_source(path) {
            Ok(source) => source,
            Err(e) => {
                planner.report.fail(label, e.into());
                continue;
            }
        };
        if path.is_dir() {
            planner.add_tree(&label, source, path);
        } else {
            planner.add_file(&label, source, path.clone());
        }
    }

    if config.sync.claude_code {
        planner.add_tree(Source::ClaudeCode.as_str(), Source::ClaudeCode, &config.sync.claude_code_dir);
    }
    if config.sync.codex {
        planner.add_tree(Source::Codex.as_str(), Source::Codex, &config.sync.codex_dir);
    }

    tracing::debug!(units = planner.units.len(), "planned local units");
    Ok(planner.units)
}

async fn sync_local(store: &Store, units: Vec<LocalUnit>, report: &mut SyncReport) -> Result<()> {
    for batch in units.chunks(PARALLEL_UNITS) {
        let handles: Vec<_> = batch
            .iter()
            .map(|unit| {
                let path = unit.path.clone();
                let source = unit.source;
                tokio::task::spawn_blocking(move || import::normalize_path(&path, source))
            })
            .collect();

        for (unit, handle) in batch.iter().zip(handles) {
            let result = match handle.await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    report.fail(unit.path.display().to_string(), e.into());
                    continue;
                }
                Err(e) => {
                    report.fail(unit.path.display().to_string(), e.into());
                    continue;
                }
            };

            match reconcile(store, &unit.label, &result).await {
                Ok(stats) => {
                    store
                        .set_checkpoint(&file_key(&unit.path), &unit.fingerprint)
                        .await?;
                    report.record(&unit.label, stats);
                }
                Err(e) => report.fail(unit.label.clone(), e.into()),
            }
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Hosted sources
// ═══════════════════════════════════════════════════════════════════════

/// Find a credential that gets past the head probe.
async fn connect_hosted(
    store: &Store,
    source: Source,
    config: &HostedSourceConfig,
) -> Result<Option<(Box<dyn HostedFetcher>, Option<Head>)>> {
    let remembered = store.checkpoint(&credential_key(source)).await?;
    let candidates = credentials::prefer(
        credentials::candidates(source, config),
        remembered.as_deref(),
    );

    if candidates.is_empty() {
        if config.enabled == Some(true) {
            return Err(credentials::missing(source, config).into());
        }
        tracing::debug!(%source, "no credential configured, skipping");
        return Ok(None);
    }

    let mut rejected = None;
    for credential in candidates {
        let origin = credential.origin.clone();
        let fetcher = fetch::fetcher_for(source, config, credential)?;
        match fetcher.head().await {
            Ok(head) => {
                store.set_checkpoint(&credential_key(source), &origin).await?;
                return Ok(Some((fetcher, head)));
            }
            Err(e) if e.is_auth() => {
                tracing::warn!(%source, %origin, error = %e, "credential rejected, trying next");
                rejected = Some(e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(rejected
        .unwrap_or_else(|| credentials::missing(source, config))
        .into())
}

async fn sync_hosted(
    store: &Store,
    source: Source,
    config: &HostedSourceConfig,
) -> Result<Option<ReconcileStats>> {
    if config.enabled == Some(false) {
        return Ok(None);
    }
    let Some((fetcher, head)) = connect_hosted(store, source, config).await? else {
        return Ok(None);
    };
    pull_hosted(store, fetcher.as_ref(), head, config.limit).await
}

/// Fetch and merge what changed on a hosted account since the last pull.
///
/// Listings are walked newest first and at most `limit` conversations are
/// downloaded per call. When a pull stops at `limit`, the oldest timestamp
/// it reached is kept as `backlog:<source>` and the next pull resumes below
/// it; `cursor:<source>` only advances once the backlog is drained, so a
/// large account is imported over several cycles without gaps. `head` is the
/// listing's newest entry; a pull is skipped while it matches the head
/// stored by the last complete pass.
pub async fn pull_hosted(
    store: &Store,
    fetcher: &dyn HostedFetcher,
    head: Option<Head>,
    limit: usize,
) -> Result<Option<ReconcileStats>> {
    let source = fetcher.source();
    let Some(head) = head else {
        tracing::info!(%source, "account has no conversations");
        return Ok(None);
    };

    let backlog = timestamp_checkpoint(store, &backlog_key(source)).await?;
    let fingerprint = head.fingerprint();
    if backlog.is_none()
        && store.checkpoint(&head_key(source)).await?.as_deref() == Some(fingerprint.as_str())
    {
        tracing::debug!(%source, head = %fingerprint, "head unchanged, skipping fetch");
        return Ok(None);
    }

    let cursor = timestamp_checkpoint(store, &cursor_key(source)).await?;
    let window = Window {
        limit,
        since: cursor,
        before: backlog,
    };
    let batch = fetcher.fetch(&window).await?;
    let (oldest, newest, truncated) = (batch.oldest, batch.newest, batch.truncated);

    let document = Value::Array(batch.conversations);
    let result =
        tokio::task::spawn_blocking(move || import::normalize_document(&document, source)).await??;
    let stats = reconcile(store, source.as_str(), &result).await?;

    // Newest timestamp reached by the pass in progress.
    let pending = timestamp_checkpoint(store, &pending_key(source))
        .await?
        .max(newest)
        .max(cursor);

    if truncated {
        match oldest {
            Some(oldest) => {
                store
                    .set_checkpoint(&backlog_key(source), &oldest.to_rfc3339())
                    .await?
            }
            None => tracing::warn!(%source, "capped fetch carried no timestamps, cannot resume below it"),
        }
        if let Some(pending) = pending {
            store
                .set_checkpoint(&pending_key(source), &pending.to_rfc3339())
                .await?;
        }
        tracing::info!(%source, fetched = result.conversations.len(), "fetch capped, continuing next cycle");
        return Ok(Some(stats));
    }

    if let Some(pending) = pending {
        store
            .set_checkpoint(&cursor_key(source), &pending.to_rfc3339())
            .await?;
    }
    store.clear_checkpoint(&backlog_key(source)).await?;
    store.clear_checkpoint(&pending_key(source)).await?;
    // A drained backlog never looked above its pass's newest entry, so the
    // head is only recorded by a pass that started from the top.
    if backlog.is_none() {
        store.set_checkpoint(&head_key(source), &fingerprint).await?;
    }
    Ok(Some(stats))
}

// ═══════════════════════════════════════════════════════════════════════
// Cycles
// ═══════════════════════════════════════════════════════════════════════

/// Run one sync cycle against an open store.
pub async fn run_cycle(store: &Store, config: &Config, hosted: bool) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    let units = plan_local(store, config, &mut report).await?;
    sync_local(store, units, &mut report).await?;

    if hosted {
        for source in HOSTED {
            let Some(source_config) = config.hosted.get(source) else {
                continue;
            };
            match sync_hosted(store, source, source_config).await {
                Ok(Some(stats)) => report.record(source.as_str(), stats),
                Ok(None) => {}
                Err(e) => report.fail(source.as_str(), e),
            }
        }
    }

    report.indexed = index::refresh(store, Scope::After(&report.total)).await?;
    tracing::info!(
        new = report.total.new,
        updated = report.total.updated,
        failures = report.failures.len(),
        "sync cycle finished"
    );
    Ok(report)
}

fn summary_line(total: &ReconcileStats) -> String {
    let p = &total.processed;
    format!(
        "Updated {} new, {} updated convs; {} msgs, {} tools, {} attachs, {} edits",
        total.new, total.updated, p.messages, p.tool_calls, p.attachments, p.file_edits
    )
}

async fn stored_totals(store: &Store) -> Result<RecordCounts> {
    let mut totals = RecordCounts::default();
    for counts in store.counts_by_source().await?.values() {
        totals.add(counts);
    }
    Ok(totals)
}

fn print_report(report: &SyncReport, stamp: Option<&str>) {
    for (label, stats) in &report.sources {
        if stats.processed.total() == 0 {
            continue;
        }
        println!(
            "Updated {} ({} new, {} updated convs; {} processed)",
            label, stats.new, stats.updated, stats.processed
        );
    }
    for failure in &report.failures {
        eprintln!("Failed {}: {:#}", failure.label, failure.error);
    }
    match stamp {
        Some(stamp) => println!("[{}] {}", stamp, summary_line(&report.total)),
        None => println!("{}", summary_line(&report.total)),
    }
}

/// `convos sync`: one cycle, or repeated cycles with `watch`.
pub async fn run_sync(
    config: &Config,
    watch: bool,
    interval: Option<u64>,
    hosted: bool,
) -> Result<()> {
    let store = db::connect(config).await?;

    if !watch {
        let report = run_cycle(&store, config, hosted).await?;
        print_report(&report, None);
        println!("Total: {}", stored_totals(&store).await?);
        store.close().await;
        return report.into_result();
    }

    let secs = interval.unwrap_or(config.sync.interval_secs).max(1);
    println!("Daemon mode (interval: {}s)", secs);
    let mut stop = stop_signal();
    loop {
        let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        match run_cycle(&store, config, hosted).await {
            Ok(report) => print_report(&report, Some(&stamp)),
            Err(e) => eprintln!("[{}] Sync failed: {:#}", stamp, e),
        }

        if pause(&mut stop, Duration::from_secs(secs)).await {
            println!("Stopping.");
            break;
        }
    }

    store.close().await;
    Ok(())
}

/// Flips to `true` on the first Ctrl-C. The handler is installed once, so a
/// press during a cycle is not lost.
fn stop_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = tx.send(true);
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for Ctrl-C");
                // Keep the sender alive so waiting falls back to the timer.
                std::future::pending::<()>().await;
            }
        }
    });
    rx
}

/// Wait out `interval` between cycles. Returns `true` as soon as a stop was
/// requested, including one that arrived before the wait began.
async fn pause(stop: &mut watch::Receiver<bool>, interval: Duration) -> bool {
    if *stop.borrow_and_update() {
        return true;
    }
    let signalled = tokio::select! {
        _ = tokio::time::sleep(interval) => None,
        changed = stop.changed() => Some(changed.is_ok()),
    };
    match signalled {
        None => false,
        Some(true) => *stop.borrow(),
        // Listener gone: nothing can stop us early any more.
        Some(false) => {
            tokio::time::sleep(interval).await;
            false
        }
    }
}

/// `convos import`: normalize and merge one path right away.
pub async fn run_import(config: &Config, path: &Path, source: Option<Source>) -> Result<()> {
    let source = match source {
        Some(source) => source,
        None => import::detect_source(path)?,
    };
    let store = db::connect(config).await?;

    let owned = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || import::normalize_path(&owned, source)).await??;
    let stats = reconcile(&store, &import_label(path), &result).await?;
    index::refresh(&store, Scope::After(&stats)).await?;
    store.close().await;

    println!(
        "Imported {} as {} ({} new, {} updated convs; {} processed)",
        path.display(),
        source,
        stats.new,
        stats.updated,
        stats.processed
    );
    Ok(())
}
