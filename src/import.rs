//! Local inputs: data exports and session log directories.
//!
//! A path is mapped to a source (explicitly or by [`detect_source`]), read
//! from disk, and normalized by that source's adapter. Exports are single
//! JSON documents, optionally zipped; CLI tools keep one JSONL file per
//! session under a directory tree.

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::Value;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

use crate::adapters::{
    ChatgptAdapter, ClaudeAdapter, ClaudeCodeAdapter, CodexAdapter, SessionLog, SourceAdapter,
};
use crate::error::{ConvosError, Result};
use crate::models::Source;
use crate::normalize::NormalizationResult;

const EXPORT_ENTRY: &str = "conversations.json";

fn io_error(path: &Path, source: std::io::Error) -> ConvosError {
    ConvosError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Guess which provider produced `path`.
pub fn detect_source(path: &Path) -> Result<Source> {
    if path.is_dir() {
        return Ok(if path.join("sessions").is_dir() {
            Source::Codex
        } else {
            Source::ClaudeCode
        });
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.ends_with(".zip") || name.contains("chatgpt") {
        return Ok(Source::Chatgpt);
    }

    let document = read_document(path, Source::Claude)?;
    let sample = match &document {
        Value::Array(items) => items.first(),
        other => Some(other),
    };
    match sample {
        Some(item) if item.get("mapping").is_some() => Ok(Source::Chatgpt),
        Some(item) if item.get("chat_messages").is_some() => Ok(Source::Claude),
        _ => Err(ConvosError::malformed(
            Source::Claude,
            path.display().to_string(),
            "cannot tell which provider exported this file; pass --source",
        )),
    }
}

/// Read an export document, unzipping `conversations.json` if needed.
/// `source` only labels parse errors.
pub fn read_document(path: &Path, source: Source) -> Result<Value> {
    let unit = path.display().to_string();
    let text = if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("zip")) {
        read_zip_entry(path, source)?
    } else {
        std::fs::read_to_string(path).map_err(|e| io_error(path, e))?
    };
    serde_json::from_str(&text)
        .map_err(|e| ConvosError::malformed(source, unit, format!("not JSON: {}", e)))
}

fn read_zip_entry(path: &Path, source: Source) -> Result<String> {
    let unit = path.display().to_string();
    let file = File::open(path).map_err(|e| io_error(path, e))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| ConvosError::malformed(source, &unit, format!("bad zip: {}", e)))?;

    // Some exports nest the document one folder down.
    let entry = archive
        .file_names()
        .filter(|name| name.rsplit('/').next() == Some(EXPORT_ENTRY))
        .min_by_key(|name| name.len())
        .map(str::to_string)
        .ok_or_else(|| {
            ConvosError::malformed(source, &unit, format!("archive has no {}", EXPORT_ENTRY))
        })?;

    let mut text = String::new();
    archive
        .by_name(&entry)
        .map_err(|e| ConvosError::malformed(source, &unit, e.to_string()))?
        .read_to_string(&mut text)
        .map_err(|e| io_error(path, e))?;
    Ok(text)
}

fn session_globs() -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in ["**/*.jsonl"] {
        let glob = Glob::new(pattern).map_err(|e| {
            ConvosError::malformed(Source::ClaudeCode, pattern, e.to_string())
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| ConvosError::malformed(Source::ClaudeCode, "session globs", e.to_string()))
}

/// Every session log under `root`, sorted. A Codex home directory is
/// searched under its `sessions/` child.
pub fn session_files(root: &Path, source: Source) -> Result<Vec<PathBuf>> {
    let root = match source {
        Source::Codex if root.join("sessions").is_dir() => root.join("sessions"),
        _ => root.to_path_buf(),
    };
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let include = session_globs()?;
    let mut files = Vec::new();
    for entry in WalkDir::new(&root).follow_links(true) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root.as_path()).to_path_buf();
            io_error(&path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
        if include.is_match(relative) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// `mtime:length` of a file, used to skip unchanged inputs.
pub fn fingerprint(path: &Path) -> Option<String> {
    let meta = std::fs::metadata(path).ok()?;
    let mtime = meta
        .modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()?
        .as_millis();
    Some(format!("{}:{}", mtime, meta.len()))
}

/// Normalize one session log file.
pub fn normalize_session(path: &Path, source: Source) -> Result<NormalizationResult> {
    let log = SessionLog::read(path)?;
    match source {
        Source::Codex => CodexAdapter.normalize(&log),
        _ => ClaudeCodeAdapter.normalize(&log),
    }
}

/// Normalize an already-read hosted document.
pub fn normalize_document(document: &Value, source: Source) -> Result<NormalizationResult> {
    match source {
        Source::Chatgpt => ChatgptAdapter.normalize(document),
        _ => ClaudeAdapter.normalize(document),
    }
}

/// Normalize everything at `path` as `source`.
pub fn normalize_path(path: &Path, source: Source) -> Result<NormalizationResult> {
    if source.is_local() {
        if path.is_dir() {
            let mut out = NormalizationResult::new();
            for file in session_files(path, source)? {
                out.extend(normalize_session(&file, source)?);
            }
            Ok(out)
        } else {
            normalize_session(path, source)
        }
    } else {
        normalize_document(&read_document(path, source)?, source)
    }
}
