//! Per-channel upstream playback session.
//!
//! A session is created once per launch: it holds the rewritten top-level
//! playlist, knows which upstream URL hides behind every chunklist and part
//! id it handed out, and caches chunklist bodies for a short window.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info};
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::fetcher::UpstreamFetcher;
use crate::database::Entry;
use eventcast_protocol::hls::{self, LocalUris};
use eventcast_protocol::StreamError;

/// Parts not referenced by any chunklist for this long are forgotten.
const PART_RETENTION: Duration = Duration::from_secs(300);

struct CachedChunklist {
    body: String,
    fetched_at: Instant,
}

struct PartRef {
    url: String,
    last_seen: Instant,
}

/// Upstream playback state for one virtual channel.
pub struct StreamSession {
    channel_id: String,
    local: LocalUris,
    /// Entry being played.
    entry: Entry,
    upstream_url: String,
    playlist: String,
    /// Chunklist id to upstream URL. Fixed at launch.
    chunklists: HashMap<String, String>,
    chunklist_ttl: Duration,
    chunklist_cache: RwLock<HashMap<String, CachedChunklist>>,
    parts: RwLock<HashMap<String, PartRef>>,
    /// Keys never change for a given URL, so they are kept for the session's life.
    keys: RwLock<HashMap<String, Bytes>>,
}

impl StreamSession {
    /// Fetch and rewrite the top-level playlist at `upstream_url`.
    pub async fn launch(
        channel_id: &str,
        local: LocalUris,
        entry: Entry,
        upstream_url: String,
        fetcher: &dyn UpstreamFetcher,
        chunklist_ttl: Duration,
    ) -> Result<Self, StreamError> {
        let text = fetcher.get_text(&upstream_url).await?;
        let rewritten = hls::rewrite_master(&text, &upstream_url, &local)?;

        info!(
            "Channel {}: launched {} ({}) with {} chunklist(s)",
            channel_id,
            entry.name,
            entry.provider,
            rewritten.chunklists.len()
        );

        let now = Instant::now();
        let parts = rewritten
            .parts
            .into_iter()
            .map(|(id, url)| (id, PartRef { url, last_seen: now }))
            .collect();

        Ok(Self {
            channel_id: channel_id.to_string(),
            local,
            entry,
            upstream_url,
            playlist: rewritten.playlist,
            chunklists: rewritten.chunklists.into_iter().collect(),
            chunklist_ttl,
            chunklist_cache: RwLock::new(HashMap::new()),
            parts: RwLock::new(parts),
            keys: RwLock::new(HashMap::new()),
        })
    }

    /// Rewritten top-level playlist.
    pub fn playlist(&self) -> &str {
        &self.playlist
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn upstream_url(&self) -> &str {
        &self.upstream_url
    }

    /// Rewritten chunklist body, served from cache while fresh.
    pub async fn chunklist(
        &self,
        chunklist_id: &str,
        fetcher: &dyn UpstreamFetcher,
    ) -> Result<String, StreamError> {
        if let Some(cached) = self.chunklist_cache.read().await.get(chunklist_id) {
            if cached.fetched_at.elapsed() < self.chunklist_ttl {
                return Ok(cached.body.clone());
            }
        }

        let url = self.chunklists.get(chunklist_id).ok_or_else(|| {
            StreamError::NotFound(format!("channel {} has no chunklist {}", self.channel_id, chunklist_id))
        })?;

        let text = fetcher.get_text(url).await?;
        let rewritten = hls::rewrite_chunklist(&text, url, &self.local)?;
        self.remember_parts(rewritten.parts).await;

        self.chunklist_cache.write().await.insert(
            chunklist_id.to_string(),
            CachedChunklist {
                body: rewritten.playlist.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(rewritten.playlist)
    }

    /// Fetch a key or segment by part id.
    ///
    /// With `cache` set the bytes are kept for the rest of the session.
    pub async fn part(
        &self,
        part_id: &str,
        cache: bool,
        fetcher: &dyn UpstreamFetcher,
    ) -> Result<Bytes, StreamError> {
        if let Some(bytes) = self.keys.read().await.get(part_id) {
            return Ok(bytes.clone());
        }

        let url = self
            .parts
            .read()
            .await
            .get(part_id)
            .map(|part| part.url.clone())
            .ok_or_else(|| {
                StreamError::NotFound(format!("channel {} has no part {}", self.channel_id, part_id))
            })?;

        let bytes = fetcher.get_bytes(&url).await?;
        if cache {
            self.keys.write().await.insert(part_id.to_string(), bytes.clone());
        }
        Ok(bytes)
    }

    async fn remember_parts(&self, fresh: Vec<(String, String)>) {
        let now = Instant::now();
        let mut parts = self.parts.write().await;
        for (id, url) in fresh {
            parts.insert(id, PartRef { url, last_seen: now });
        }

        let before = parts.len();
        parts.retain(|_, part| now.saturating_duration_since(part.last_seen) < PART_RETENTION);
        if parts.len() < before {
            debug!("Channel {}: forgot {} stale part(s)", self.channel_id, before - parts.len());
            let mut keys = self.keys.write().await;
            keys.retain(|id, _| parts.contains_key(id));
        }
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("channel_id", &self.channel_id)
            .field("entry", &self.entry.id)
            .field("chunklists", &self.chunklists.len())
            .finish_non_exhaustive()
    }
}
