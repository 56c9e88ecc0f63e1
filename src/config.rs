use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::Source;

pub const PROJECT_ROOT_ENV: &str = "CONVOS_PROJECT_ROOT";
pub const IMPORT_PATHS_ENV: &str = "CONVOS_IMPORT_PATHS";
pub const CONFIG_FILE: &str = "convos.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub hosted: HostedConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    project_root().join("data").join("convos.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Exports and session directories ingested on every sync.
    #[serde(default)]
    pub import_paths: Vec<PathBuf>,
    #[serde(default = "default_claude_code_dir")]
    pub claude_code_dir: PathBuf,
    #[serde(default = "default_codex_dir")]
    pub codex_dir: PathBuf,
    #[serde(default = "default_true")]
    pub claude_code: bool,
    #[serde(default = "default_true")]
    pub codex: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            import_paths: Vec::new(),
            claude_code_dir: default_claude_code_dir(),
            codex_dir: default_codex_dir(),
            claude_code: true,
            codex: true,
        }
    }
}

fn default_interval_secs() -> u64 {
    300
}
fn default_claude_code_dir() -> PathBuf {
    home().join(".claude").join("projects")
}
fn default_codex_dir() -> PathBuf {
    home().join(".codex").join("sessions")
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_search_limit")]
    pub search_limit: i64,
    #[serde(default = "default_list_limit")]
    pub list_limit: i64,
    #[serde(default = "default_get_limit")]
    pub get_limit: i64,
    #[serde(default = "default_snippet_width")]
    pub snippet_width: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_limit: default_search_limit(),
            list_limit: default_list_limit(),
            get_limit: default_get_limit(),
            snippet_width: default_snippet_width(),
        }
    }
}

fn default_search_limit() -> i64 {
    20
}
fn default_list_limit() -> i64 {
    50
}
fn default_get_limit() -> i64 {
    50
}
fn default_snippet_width() -> usize {
    300
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct HostedConfig {
    #[serde(default)]
    pub chatgpt: HostedSourceConfig,
    #[serde(default)]
    pub claude: HostedSourceConfig,
}

impl HostedConfig {
    pub fn get(&self, source: Source) -> Option<&HostedSourceConfig> {
        match source {
            Source::Chatgpt => Some(&self.chatgpt),
            Source::Claude => Some(&self.claude),
            Source::ClaudeCode | Source::Codex => None,
        }
    }
}

/// Settings for one hosted provider.
///
/// `enabled` has three states: unset means "sync when a credential is
/// available", `true` makes a missing credential a sync failure, `false`
/// turns the source off.
#[derive(Debug, Deserialize, Clone)]
pub struct HostedSourceConfig {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Raw `Cookie` header value.
    #[serde(default)]
    pub cookie: Option<String>,
    /// Bearer token (ChatGPT only).
    #[serde(default)]
    pub token: Option<String>,
    /// Netscape-format cookie jar exported from a browser.
    #[serde(default)]
    pub cookie_file: Option<PathBuf>,
    /// Conversations fetched per sync.
    #[serde(default = "default_fetch_limit")]
    pub limit: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HostedSourceConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            base_url: None,
            cookie: None,
            token: None,
            cookie_file: None,
            limit: default_fetch_limit(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_fetch_limit() -> usize {
    100
}
fn default_timeout_secs() -> u64 {
    30
}

impl HostedSourceConfig {
    pub fn base_url(&self, source: Source) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| match source {
                Source::Claude => "https://claude.ai".to_string(),
                _ => "https://chatgpt.com".to_string(),
            })
            .trim_end_matches('/')
            .to_string()
    }
}

/// Where the active configuration came from; reported by `doctor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    Flag(PathBuf),
    ProjectRoot(PathBuf),
    Defaults,
}

impl std::fmt::Display for ConfigOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigOrigin::Flag(p) => write!(f, "{} (--config)", p.display()),
            ConfigOrigin::ProjectRoot(p) => write!(f, "{}", p.display()),
            ConfigOrigin::Defaults => f.write_str("built-in defaults"),
        }
    }
}

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) => home().join(rest.trim_start_matches('/')),
        None => PathBuf::from(path),
    }
}

/// Directory holding the database and the default config file.
pub fn project_root() -> PathBuf {
    match std::env::var(PROJECT_ROOT_ENV) {
        Ok(root) if !root.trim().is_empty() => expand_home(root.trim()),
        _ => dirs::data_dir()
            .unwrap_or_else(|| home().join(".local").join("share"))
            .join("ai-convos-db"),
    }
}

/// Comma-separated import paths, `~` expanded, empty entries dropped.
pub fn parse_import_paths(value: &str) -> Vec<PathBuf> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(expand_home)
        .collect()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load the active configuration: `--config` if given, else
/// `<project-root>/convos.toml` if present, else defaults. Import paths
/// from the environment are appended either way.
pub fn resolve_config(explicit: Option<&Path>) -> Result<(Config, ConfigOrigin)> {
    let (mut config, origin) = match explicit {
        Some(path) => (load_config(path)?, ConfigOrigin::Flag(path.to_path_buf())),
        None => {
            let candidate = project_root().join(CONFIG_FILE);
            if candidate.exists() {
                (load_config(&candidate)?, ConfigOrigin::ProjectRoot(candidate))
            } else {
                (Config::default(), ConfigOrigin::Defaults)
            }
        }
    };

    if let Ok(extra) = std::env::var(IMPORT_PATHS_ENV) {
        for path in parse_import_paths(&extra) {
            if !config.sync.import_paths.contains(&path) {
                config.sync.import_paths.push(path);
            }
        }
    }
    Ok((config, origin))
}

fn validate(config: &Config) -> Result<()> {
    if config.sync.interval_secs == 0 {
        bail!("sync.interval_secs must be > 0");
    }

    let retrieval = &config.retrieval;
    if retrieval.search_limit < 1 {
        bail!("retrieval.search_limit must be >= 1");
    }
    if retrieval.list_limit < 1 {
        bail!("retrieval.list_limit must be >= 1");
    }
    if retrieval.get_limit < 1 {
        bail!("retrieval.get_limit must be >= 1");
    }
    if retrieval.snippet_width == 0 {
        bail!("retrieval.snippet_width must be > 0");
    }

    for (name, hosted) in [("chatgpt", &config.hosted.chatgpt), ("claude", &config.hosted.claude)] {
        if let Some(url) = &hosted.base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!(
                    "hosted.{}.base_url must start with http:// or https://, got '{}'",
                    name,
                    url
                );
            }
        }
        if hosted.limit == 0 {
            bail!("hosted.{}.limit must be > 0", name);
        }
    }

    Ok(())
}
