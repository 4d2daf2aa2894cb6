//! Web server shared state.

use std::collections::HashSet;
use std::sync::Arc;

use axum::http::{header, HeaderMap};

use crate::database::{ChannelNumberingPolicy, DatabaseHandle, Result};
use crate::providers::ProviderRegistry;
use crate::scheduler::{ChannelScheduler, RefreshScheduler};
use crate::stream::StreamEngine;

/// State shared by every route handler.
pub struct WebState {
    pub database: DatabaseHandle,
    pub engine: Arc<StreamEngine>,
    pub scheduler: Arc<ChannelScheduler>,
    pub refresh: Arc<RefreshScheduler>,
    pub providers: ProviderRegistry,
    /// Seed for the channel policy row.
    pub default_policy: ChannelNumberingPolicy,
    /// Externally visible origin; derived from request headers when unset.
    pub base_url: Option<String>,
}

impl WebState {
    /// Create a new web state.
    pub fn new(
        database: DatabaseHandle,
        engine: Arc<StreamEngine>,
        scheduler: Arc<ChannelScheduler>,
        refresh: Arc<RefreshScheduler>,
        providers: ProviderRegistry,
        default_policy: ChannelNumberingPolicy,
        base_url: Option<String>,
    ) -> Self {
        Self {
            database,
            engine,
            scheduler,
            refresh,
            providers,
            default_policy,
            base_url: base_url.map(|url| url.trim_end_matches('/').to_string()),
        }
    }

    /// Origin clients reach this server on.
    ///
    /// Proxies are honored through `X-Forwarded-Proto` and `X-Forwarded-Host`.
    pub fn base_url(&self, headers: &HeaderMap) -> String {
        if let Some(url) = &self.base_url {
            return url.clone();
        }

        let value = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let proto = value("x-forwarded-proto").unwrap_or_else(|| "http".to_string());
        let host = value("x-forwarded-host")
            .or_else(|| value(header::HOST.as_str()))
            .unwrap_or_else(|| "localhost".to_string());

        format!("{}://{}", proto, host)
    }

    /// Current channel numbering policy.
    pub async fn policy(&self) -> Result<ChannelNumberingPolicy> {
        let db = self.database.lock().await;
        db.get_channel_policy(self.default_policy)
    }

    /// Names of enabled providers.
    pub async fn enabled_providers(&self) -> Result<HashSet<String>> {
        let db = self.database.lock().await;
        Ok(db
            .get_providers()?
            .into_iter()
            .filter(|p| p.enabled)
            .map(|p| p.name)
            .collect())
    }
}
