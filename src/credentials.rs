//! Credential lookup for the hosted sources.
//!
//! Each hosted source can be authenticated from three places, tried in
//! order: the config file, an environment variable, and a Netscape-format
//! cookie jar exported from a browser. The origin that last worked is
//! remembered in the checkpoint table and moved to the front next time.

use std::path::Path;

use crate::config::HostedSourceConfig;
use crate::error::ConvosError;
use crate::models::Source;

pub const CHATGPT_TOKEN_ENV: &str = "CONVOS_CHATGPT_TOKEN";
pub const CHATGPT_COOKIE_ENV: &str = "CONVOS_CHATGPT_COOKIE";
pub const CLAUDE_COOKIE_ENV: &str = "CONVOS_CLAUDE_COOKIE";

/// One way of authenticating against a hosted source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Where it came from: `config`, `env`, or `cookie-file:<path>`.
    pub origin: String,
    /// `Cookie` header value.
    pub cookie: Option<String>,
    /// Bearer token.
    pub token: Option<String>,
}

impl Credential {
    fn is_empty(&self) -> bool {
        self.cookie.is_none() && self.token.is_none()
    }
}

/// The environment variable an operator should set for `source`.
pub fn credential_hint(source: Source) -> &'static str {
    match source {
        Source::Chatgpt => CHATGPT_COOKIE_ENV,
        _ => CLAUDE_COOKIE_ENV,
    }
}

fn cookie_domains(source: Source) -> &'static [&'static str] {
    match source {
        Source::Chatgpt => &["chatgpt.com", "chat.openai.com", "openai.com"],
        _ => &["claude.ai"],
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Every credential available for `source`, in fallback order. `env` is
/// the environment lookup, injectable for tests.
pub fn candidates_with<F>(source: Source, config: &HostedSourceConfig, env: F) -> Vec<Credential>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = Vec::new();

    let from_config = Credential {
        origin: "config".to_string(),
        cookie: non_empty(config.cookie.clone()),
        token: non_empty(config.token.clone()),
    };
    if !from_config.is_empty() {
        out.push(from_config);
    }

    let from_env = match source {
        Source::Chatgpt => Credential {
            origin: "env".to_string(),
            cookie: non_empty(env(CHATGPT_COOKIE_ENV)),
            token: non_empty(env(CHATGPT_TOKEN_ENV)),
        },
        _ => Credential {
            origin: "env".to_string(),
            cookie: non_empty(env(CLAUDE_COOKIE_ENV)),
            token: None,
        },
    };
    if !from_env.is_empty() {
        out.push(from_env);
    }

    if let Some(path) = &config.cookie_file {
        match read_cookie_jar(path, cookie_domains(source)) {
            Some(cookie) => out.push(Credential {
                origin: format!("cookie-file:{}", path.display()),
                cookie: Some(cookie),
                token: None,
            }),
            None => tracing::debug!(
                path = %path.display(),
                %source,
                "cookie file has no matching cookies"
            ),
        }
    }

    out
}

pub fn candidates(source: Source, config: &HostedSourceConfig) -> Vec<Credential> {
    candidates_with(source, config, |name| std::env::var(name).ok())
}

/// Move the remembered origin, if still available, to the front.
pub fn prefer(mut candidates: Vec<Credential>, remembered: Option<&str>) -> Vec<Credential> {
    if let Some(origin) = remembered {
        if let Some(pos) = candidates.iter().position(|c| c.origin == origin) {
            let preferred = candidates.remove(pos);
            candidates.insert(0, preferred);
        }
    }
    candidates
}

/// The error reported when no origin yields a credential.
pub fn missing(source: Source, config: &HostedSourceConfig) -> ConvosError {
    let mut tried = vec!["config".to_string()];
    match source {
        Source::Chatgpt => {
            tried.push(format!("${}", CHATGPT_COOKIE_ENV));
            tried.push(format!("${}", CHATGPT_TOKEN_ENV));
        }
        _ => tried.push(format!("${}", CLAUDE_COOKIE_ENV)),
    }
    if let Some(path) = &config.cookie_file {
        tried.push(format!("cookie file {}", path.display()));
    }
    ConvosError::MissingCredential {
        provider: source,
        credential: credential_hint(source).to_string(),
        tried: tried.join(", "),
    }
}

fn read_cookie_jar(path: &Path, domains: &[&str]) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    parse_cookie_jar(&text, domains)
}

/// Build a `Cookie` header from the entries of a Netscape cookie jar whose
/// domain matches one of `domains`.
pub fn parse_cookie_jar(text: &str, domains: &[&str]) -> Option<String> {
    let mut pairs = Vec::new();
    for line in text.lines() {
        let line = line.strip_prefix("#HttpOnly_").unwrap_or(line);
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 7 {
            continue;
        }
        let domain = fields[0].trim_start_matches('.');
        let matches = domains
            .iter()
            .any(|d| *d == domain || d.ends_with(&format!(".{}", domain)));
        if matches {
            pairs.push(format!("{}={}", fields[5], fields[6].trim_end()));
        }
    }
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}
