//! Thin HTTP transport for the hosted sources.
//!
//! A fetcher lists the account's conversations, downloads the detail payload
//! of each one that changed, and hands the payloads to the matching adapter
//! unchanged. There is no retry policy: a failed request fails the source
//! for this cycle and the next cycle starts over.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

use crate::config::HostedSourceConfig;
use crate::credentials::{credential_hint, Credential};
use crate::error::{ConvosError, Result};
use crate::models::{ts_from_epoch, ts_from_iso, Source};

const USER_AGENT: &str = concat!("convos/", env!("CARGO_PKG_VERSION"));
const CHATGPT_PAGE: usize = 100;

/// Newest entry of a conversation listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Head {
    pub id: String,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Head {
    /// Fingerprint stored in the checkpoint table.
    pub fn fingerprint(&self) -> String {
        match self.updated_at {
            Some(t) => format!("{}@{}", self.id, t.to_rfc3339()),
            None => self.id.clone(),
        }
    }
}

/// The slice of a newest-first listing one fetch covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Most detail payloads to download.
    pub limit: usize,
    /// Conversations updated at or before this are already stored.
    pub since: Option<DateTime<Utc>>,
    /// Conversations updated at or after this were fetched by an earlier,
    /// capped cycle.
    pub before: Option<DateTime<Utc>>,
}

impl Window {
    /// Whether a listing entry updated at `updated` is in the window.
    /// Entries without a timestamp always are.
    pub fn wants(&self, updated: Option<DateTime<Utc>>) -> bool {
        !self.passed(updated) && !matches!((self.before, updated), (Some(b), Some(u)) if u >= b)
    }

    /// Whether `updated` is at or below `since`; everything after it in a
    /// newest-first listing is too.
    fn passed(&self, updated: Option<DateTime<Utc>>) -> bool {
        matches!((self.since, updated), (Some(s), Some(u)) if u <= s)
    }
}

/// Detail payloads downloaded by one fetch.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    /// Payloads in listing order, in the shape the source adapter accepts.
    pub conversations: Vec<Value>,
    /// Oldest and newest listing timestamps among `conversations`.
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    /// The fetch stopped at the window's limit; older conversations may
    /// still be waiting.
    pub truncated: bool,
}

impl Batch {
    pub fn push(&mut self, updated: Option<DateTime<Utc>>, detail: Value) {
        if let Some(t) = updated {
            self.oldest = Some(self.oldest.map_or(t, |o| o.min(t)));
            self.newest = Some(self.newest.map_or(t, |n| n.max(t)));
        }
        self.conversations.push(detail);
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

/// One hosted provider reachable over HTTP.
#[async_trait]
pub trait HostedFetcher: Send + Sync {
    fn source(&self) -> Source;

    /// The newest conversation, or `None` for an empty account. One cheap
    /// request; used to skip a full fetch when nothing changed.
    async fn head(&self) -> Result<Option<Head>>;

    /// Detail payloads of up to `window.limit` conversations inside
    /// `window`, newest first.
    async fn fetch(&self, window: &Window) -> Result<Batch>;
}

/// Build the fetcher for a hosted `source`.
pub fn fetcher_for(
    source: Source,
    config: &HostedSourceConfig,
    credential: Credential,
) -> Result<Box<dyn HostedFetcher>> {
    let http = Http::new(source, config, credential)?;
    match source {
        Source::Chatgpt => Ok(Box::new(ChatgptFetcher { http })),
        Source::Claude => Ok(Box::new(ClaudeFetcher { http })),
        Source::ClaudeCode | Source::Codex => Err(ConvosError::Network {
            provider: source,
            reason: "not a hosted source".to_string(),
        }),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Shared transport
// ═══════════════════════════════════════════════════════════════════════

struct Http {
    client: Client,
    source: Source,
    base: String,
    credential: Credential,
}

impl Http {
    fn new(source: Source, config: &HostedSourceConfig, credential: Credential) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ConvosError::Network {
                provider: source,
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            source,
            base: config.base_url(source),
            credential,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        self.get_json_with(path, self.credential.token.as_deref()).await
    }

    async fn get_json_with(&self, path: &str, token: Option<&str>) -> Result<Value> {
        let url = self.url(path);
        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .header("Origin", &self.base)
            .header("Referer", format!("{}/", self.base));
        if let Some(cookie) = &self.credential.cookie {
            request = request.header("Cookie", cookie);
        }
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        tracing::debug!(source = %self.source, %url, "GET");
        let response = request.send().await.map_err(|e| self.network(e))?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(ConvosError::ExpiredCredential {
                provider: self.source,
                origin: self.credential.origin.clone(),
                credential: credential_hint(self.source).to_string(),
            });
        }
        if status == StatusCode::FORBIDDEN {
            return Err(ConvosError::PermissionDenied {
                provider: self.source,
                url,
            });
        }
        if !status.is_success() {
            return Err(ConvosError::Network {
                provider: self.source,
                reason: format!("HTTP {} from {}", status, url),
            });
        }

        let body = response.text().await.map_err(|e| self.network(e))?;
        serde_json::from_str(&body)
            .map_err(|e| ConvosError::malformed(self.source, url, format!("response is not JSON: {}", e)))
    }

    fn network(&self, err: reqwest::Error) -> ConvosError {
        ConvosError::Network {
            provider: self.source,
            reason: err.to_string(),
        }
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

// ═══════════════════════════════════════════════════════════════════════
// ChatGPT
// ═══════════════════════════════════════════════════════════════════════

pub struct ChatgptFetcher {
    http: Http,
}

impl ChatgptFetcher {
    /// A cookie session can be traded for a bearer token; an explicit token
    /// is used as is.
    async fn token(&self) -> Result<Option<String>> {
        if let Some(token) = &self.http.credential.token {
            return Ok(Some(token.clone()));
        }
        let session = self.http.get_json_with("/api/auth/session", None).await?;
        Ok(str_field(&session, "accessToken").map(str::to_string))
    }

    fn item_head(&self, item: &Value) -> Result<Head> {
        let id = str_field(item, "id").ok_or_else(|| {
            ConvosError::malformed(Source::Chatgpt, "conversation list", "item has no id")
        })?;
        Ok(Head {
            id: id.to_string(),
            updated_at: item.get("update_time").and_then(|v| {
                ts_from_epoch(v).or_else(|| v.as_str().and_then(ts_from_iso))
            }),
        })
    }

    async fn page(&self, token: Option<&str>, offset: usize, limit: usize) -> Result<Value> {
        self.http
            .get_json_with(
                &format!("/backend-api/conversations?offset={}&limit={}", offset, limit),
                token,
            )
            .await
    }
}

fn list_items(page: &Value, source: Source) -> Result<Vec<Value>> {
    let items = match page {
        Value::Array(items) => items,
        other => other.get("items").and_then(Value::as_array).ok_or_else(|| {
            ConvosError::malformed(source, "conversation list", "expected an item array")
        })?,
    };
    Ok(items.clone())
}

#[async_trait]
impl HostedFetcher for ChatgptFetcher {
    fn source(&self) -> Source {
        Source::Chatgpt
    }

    async fn head(&self) -> Result<Option<Head>> {
        let token = self.token().await?;
        let page = self.page(token.as_deref(), 0, 1).await?;
        match list_items(&page, Source::Chatgpt)?.first() {
            Some(item) => Ok(Some(self.item_head(item)?)),
            None => Ok(None),
        }
    }

    async fn fetch(&self, window: &Window) -> Result<Batch> {
        let token = self.token().await?;
        let mut batch = Batch::default();
        let mut offset = 0;

        'pages: loop {
            let page = self.page(token.as_deref(), offset, CHATGPT_PAGE).await?;
            let items = list_items(&page, Source::Chatgpt)?;
            if items.is_empty() {
                break;
            }
            offset += items.len();

            for item in &items {
                let head = self.item_head(item)?;
                if window.passed(head.updated_at) {
                    break 'pages;
                }
                if !window.wants(head.updated_at) {
                    continue;
                }
                let detail = self
                    .http
                    .get_json_with(&format!("/backend-api/conversation/{}", head.id), token.as_deref())
                    .await?;
                batch.push(head.updated_at, detail);
                if batch.len() >= window.limit {
                    batch.truncated = true;
                    break 'pages;
                }
            }

            let total = page.get("total").and_then(Value::as_u64).map(|t| t as usize);
            if total.is_some_and(|t| offset >= t) {
                break;
            }
        }

        tracing::info!(
            conversations = batch.len(),
            truncated = batch.truncated,
            "fetched chatgpt conversations"
        );
        Ok(batch)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Claude
// ═══════════════════════════════════════════════════════════════════════

pub struct ClaudeFetcher {
    http: Http,
}

impl ClaudeFetcher {
    async fn organization(&self) -> Result<String> {
        let orgs = self.http.get_json("/api/organizations").await?;
        orgs.as_array()
            .and_then(|list| list.first())
            .and_then(|org| str_field(org, "uuid"))
            .map(str::to_string)
            .ok_or_else(|| {
                ConvosError::malformed(Source::Claude, "organizations", "no organization uuid")
            })
    }

    async fn listing(&self, org: &str) -> Result<Vec<Value>> {
        let page = self
            .http
            .get_json(&format!("/api/organizations/{}/chat_conversations", org))
            .await?;
        list_items(&page, Source::Claude)
    }

    fn item_head(item: &Value) -> Result<Head> {
        let id = str_field(item, "uuid").ok_or_else(|| {
            ConvosError::malformed(Source::Claude, "conversation list", "item has no uuid")
        })?;
        Ok(Head {
            id: id.to_string(),
            updated_at: str_field(item, "updated_at")
                .or_else(|| str_field(item, "created_at"))
                .and_then(ts_from_iso),
        })
    }
}

#[async_trait]
impl HostedFetcher for ClaudeFetcher {
    fn source(&self) -> Source {
        Source::Claude
    }

    async fn head(&self) -> Result<Option<Head>> {
        let org = self.organization().await?;
        match self.listing(&org).await?.first() {
            Some(item) => Ok(Some(Self::item_head(item)?)),
            None => Ok(None),
        }
    }

    async fn fetch(&self, window: &Window) -> Result<Batch> {
        let org = self.organization().await?;
        let mut batch = Batch::default();
        // The listing is not reliably ordered, so every entry is checked.
        for item in &self.listing(&org).await? {
            let head = Self::item_head(item)?;
            if !window.wants(head.updated_at) {
                continue;
            }
            let detail = self
                .http
                .get_json(&format!(
                    "/api/organizations/{}/chat_conversations/{}?tree=True&rendering_mode=messages",
                    org, head.id
                ))
                .await?;
            batch.push(head.updated_at, detail);
            if batch.len() >= window.limit {
                batch.truncated = true;
                break;
            }
        }

        tracing::info!(
            conversations = batch.len(),
            truncated = batch.truncated,
            "fetched claude conversations"
        );
        Ok(batch)
    }
}
