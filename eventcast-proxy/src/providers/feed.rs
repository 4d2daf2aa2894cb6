//! Generic JSON feed provider.
//!
//! Polls a URL returning a JSON array of events:
//!
//! ```json
//! [{"id": "nhl-2231", "name": "Bruins at Rangers", "network": "NESN",
//!   "sport": "Hockey", "start": "2024-03-02T00:00:00Z", "end": 1709344800,
//!   "stream_url": "https://cdn.example.net/nhl-2231/master.m3u8"}]
//! ```
//!
//! `start`/`end` accept unix seconds or RFC 3339. When a token endpoint is
//! configured, a bearer token is fetched from it, persisted in the provider
//! row and attached to feed requests.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::ProviderAdapter;
use crate::database::{DatabaseHandle, Entry, NewEntry};
use eventcast_protocol::ProviderError;

/// Tokens are refreshed when they expire within this window.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 3600;

/// Feed provider configuration (`[[providers]]` in the config file).
#[derive(Debug, Clone, Deserialize)]
pub struct FeedProviderConfig {
    /// Provider name.
    pub name: String,
    /// Event feed URL.
    pub feed_url: String,
    /// Optional token endpoint.
    #[serde(default)]
    pub token_url: Option<String>,
    /// Key sent to the token endpoint.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Initial enable state, used only when the provider is first seen.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Persisted credential blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TokenSet {
    access_token: String,
    /// Unix seconds.
    expires_at: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    TOKEN_REFRESH_MARGIN_SECS * 4
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedTime {
    Unix(i64),
    Text(String),
}

impl FeedTime {
    fn timestamp(&self) -> Result<i64, ProviderError> {
        match self {
            FeedTime::Unix(secs) => Ok(*secs),
            FeedTime::Text(text) => chrono::DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.timestamp())
                .map_err(|e| ProviderError::Parse(format!("bad timestamp {:?}: {}", text, e))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FeedEvent {
    id: String,
    name: String,
    #[serde(default)]
    network: Option<String>,
    #[serde(default)]
    sport: Option<String>,
    #[serde(default)]
    image: Option<String>,
    start: FeedTime,
    end: FeedTime,
    stream_url: String,
    #[serde(default)]
    linear_channel: Option<String>,
}

impl FeedEvent {
    fn into_entry(self) -> Result<NewEntry, ProviderError> {
        Ok(NewEntry {
            start: self.start.timestamp()?,
            end: self.end.timestamp()?,
            event_id: self.id,
            name: self.name,
            network: self.network,
            sport: self.sport,
            image: self.image,
            upstream_ref: self.stream_url,
            linear_channel: self.linear_channel,
        })
    }
}

/// Parse a feed body, dropping malformed or empty-range events.
fn parse_feed(provider: &str, body: &str) -> Result<Vec<NewEntry>, ProviderError> {
    let events: Vec<FeedEvent> =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;

    let mut entries = Vec::with_capacity(events.len());
    for event in events {
        let id = event.id.clone();
        match event.into_entry() {
            Ok(entry) if entry.end > entry.start => entries.push(entry),
            Ok(_) => debug!("[{}] Skipping event {} with an empty time range", provider, id),
            Err(e) => warn!("[{}] Skipping event {}: {}", provider, id, e),
        }
    }
    Ok(entries)
}

/// Provider backed by a JSON event feed.
pub struct FeedProvider {
    config: FeedProviderConfig,
    client: reqwest::Client,
    database: DatabaseHandle,
    token: RwLock<Option<TokenSet>>,
}

impl FeedProvider {
    /// Create a new feed provider.
    pub fn new(
        config: FeedProviderConfig,
        database: DatabaseHandle,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Fetch(e.to_string()))?;

        Ok(Self {
            config,
            client,
            database,
            token: RwLock::new(None),
        })
    }

    async fn bearer(&self) -> Option<String> {
        self.token.read().await.as_ref().map(|t| t.access_token.clone())
    }

    async fn load_tokens(&self) -> Result<(), ProviderError> {
        let stored = {
            let db = self.database.lock().await;
            db.get_provider_tokens(&self.config.name)
                .map_err(|e| ProviderError::Fetch(e.to_string()))?
        };

        if let Some(blob) = stored {
            match serde_json::from_str::<TokenSet>(&blob) {
                Ok(tokens) => *self.token.write().await = Some(tokens),
                Err(e) => warn!("[{}] Ignoring unreadable stored tokens: {}", self.config.name, e),
            }
        }
        Ok(())
    }

    async fn fetch_token(&self, token_url: &str) -> Result<TokenSet, ProviderError> {
        let mut request = self.client.post(token_url);
        if let Some(key) = &self.config.api_key {
            request = request.json(&serde_json::json!({ "api_key": key }));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Fetch(e.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::Auth(format!("token endpoint answered {}", status)));
        }
        if !status.is_success() {
            return Err(ProviderError::Fetch(format!("token endpoint answered {}", status)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(TokenSet {
            access_token: token.access_token,
            expires_at: chrono::Utc::now().timestamp() + token.expires_in,
        })
    }
}

#[async_trait]
impl ProviderAdapter for FeedProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        {
            let db = self.database.lock().await;
            db.ensure_provider(&self.config.name, self.config.enabled)
                .map_err(|e| ProviderError::Fetch(e.to_string()))?;
        }
        self.load_tokens().await?;
        self.refresh_tokens().await
    }

    async fn refresh_tokens(&self) -> Result<(), ProviderError> {
        let Some(token_url) = &self.config.token_url else {
            return Ok(());
        };

        let now = chrono::Utc::now().timestamp();
        if let Some(current) = self.token.read().await.as_ref() {
            if current.expires_at - now > TOKEN_REFRESH_MARGIN_SECS {
                return Ok(());
            }
        }

        let tokens = self.fetch_token(token_url).await?;
        let blob = serde_json::to_string(&tokens).map_err(|e| ProviderError::Parse(e.to_string()))?;
        {
            let db = self.database.lock().await;
            db.set_provider_tokens(&self.config.name, Some(&blob))
                .map_err(|e| ProviderError::Fetch(e.to_string()))?;
        }
        *self.token.write().await = Some(tokens);

        info!("[{}] Refreshed access token", self.config.name);
        Ok(())
    }

    async fn get_schedule(&self) -> Result<Vec<NewEntry>, ProviderError> {
        let mut request = self.client.get(&self.config.feed_url);
        if let Some(token) = self.bearer().await {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Fetch(e.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::Auth(format!("feed answered {}", status)));
        }
        if !status.is_success() {
            return Err(ProviderError::Fetch(format!("feed answered {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Fetch(e.to_string()))?;
        parse_feed(&self.config.name, &body)
    }

    async fn resolve_stream_url(&self, entry: &Entry) -> Result<String, ProviderError> {
        if self.config.token_url.is_some() && self.bearer().await.is_none() {
            return Err(ProviderError::Auth(format!("{} has no access token", self.config.name)));
        }

        let url = url::Url::parse(&entry.upstream_ref)
            .map_err(|e| ProviderError::Parse(format!("{}: {}", entry.upstream_ref, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url.into()),
            other => Err(ProviderError::Parse(format!("unsupported stream scheme {}", other))),
        }
    }
}
