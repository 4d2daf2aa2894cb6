//! Upstream HTTP access for stream sessions.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;

use eventcast_protocol::StreamError;

/// Fetches playlists and media parts from upstream CDNs.
#[async_trait]
pub trait UpstreamFetcher: Send + Sync {
    /// Fetch a text resource (playlist or chunklist).
    async fn get_text(&self, url: &str) -> Result<String, StreamError>;

    /// Fetch a binary resource (key or segment).
    async fn get_bytes(&self, url: &str) -> Result<Bytes, StreamError>;
}

/// [`UpstreamFetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher whose requests time out after `timeout`.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| StreamError::UpstreamFetch(e.to_string()))?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, StreamError> {
        debug!("Fetching upstream {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StreamError::UpstreamFetch(format!("{}: {}", url, e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(StreamError::UpstreamAuth(format!("{} answered {}", url, status)));
        }
        if !status.is_success() {
            return Err(StreamError::UpstreamFetch(format!("{} answered {}", url, status)));
        }
        Ok(response)
    }
}

#[async_trait]
impl UpstreamFetcher for HttpFetcher {
    async fn get_text(&self, url: &str) -> Result<String, StreamError> {
        self.get(url)
            .await?
            .text()
            .await
            .map_err(|e| StreamError::UpstreamFetch(format!("{}: {}", url, e)))
    }

    async fn get_bytes(&self, url: &str) -> Result<Bytes, StreamError> {
        self.get(url)
            .await?
            .bytes()
            .await
            .map_err(|e| StreamError::UpstreamFetch(format!("{}: {}", url, e)))
    }
}
