//! Stream session engine.
//!
//! Serves the four per-channel HLS resources:
//!
//! | Resource | On failure |
//! |---|---|
//! | channel playlist | runtime discarded, next request relaunches |
//! | chunklist | runtime evicted |
//! | key | nothing, player retries |
//! | segment | nothing, player retries |
//!
//! Playlist, chunklist and key requests refresh the channel heartbeat;
//! segment requests do not, since players poll the chunklist far more
//! steadily than they fetch individual byte ranges.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, warn};

use super::fetcher::UpstreamFetcher;
use super::registry::{ChannelRegistry, ChannelRuntime};
use super::session::StreamSession;
use crate::database::{ChannelNumberingPolicy, DatabaseHandle, Entry};
use crate::providers::ProviderRegistry;
use eventcast_protocol::hls::LocalUris;
use eventcast_protocol::{ProviderError, StreamError};

/// Stream engine configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// How long a fetched chunklist is served from cache.
    pub chunklist_ttl: Duration,
    /// Upper bound for resolving a stream URL with a provider.
    pub upstream_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunklist_ttl: Duration::from_secs(2),
            upstream_timeout: Duration::from_secs(15),
        }
    }
}

/// Resolves channels to upstream sessions and serves their resources.
pub struct StreamEngine {
    database: DatabaseHandle,
    providers: ProviderRegistry,
    registry: Arc<ChannelRegistry>,
    fetcher: Arc<dyn UpstreamFetcher>,
    default_policy: ChannelNumberingPolicy,
    config: StreamConfig,
}

impl StreamEngine {
    /// Create a new stream engine.
    pub fn new(
        database: DatabaseHandle,
        providers: ProviderRegistry,
        registry: Arc<ChannelRegistry>,
        fetcher: Arc<dyn UpstreamFetcher>,
        default_policy: ChannelNumberingPolicy,
        config: StreamConfig,
    ) -> Self {
        Self {
            database,
            providers,
            registry,
            fetcher,
            default_policy,
            config,
        }
    }

    /// Session registry shared with the idle reaper.
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Rewritten top-level playlist for a channel, launching it if needed.
    ///
    /// `base_url` is the origin clients reach this server on.
    pub async fn channel_playlist(&self, channel_id: &str, base_url: &str) -> Result<String, StreamError> {
        let (runtime, session) = self
            .registry
            .get_or_launch(channel_id, || self.launch(channel_id, base_url))
            .await?;
        runtime.touch().await;
        Ok(session.playlist().to_string())
    }

    /// Rewritten chunklist for a launched channel.
    pub async fn chunklist(&self, channel_id: &str, chunklist_id: &str) -> Result<String, StreamError> {
        let (runtime, session) = self.launched(channel_id).await?;

        match session.chunklist(chunklist_id, self.fetcher.as_ref()).await {
            Ok(body) => {
                runtime.touch().await;
                Ok(body)
            }
            Err(e) => {
                warn!("Channel {}: chunklist {} failed, dropping session: {}", channel_id, chunklist_id, e);
                self.registry.evict(&runtime).await;
                Err(e)
            }
        }
    }

    /// Encryption key for a launched channel.
    pub async fn key(&self, channel_id: &str, part_id: &str) -> Result<Bytes, StreamError> {
        let (runtime, session) = self.launched(channel_id).await?;
        let bytes = session.part(part_id, true, self.fetcher.as_ref()).await?;
        runtime.touch().await;
        Ok(bytes)
    }

    /// Media segment for a launched channel.
    pub async fn segment(&self, channel_id: &str, part_id: &str) -> Result<Bytes, StreamError> {
        let (_, session) = self.launched(channel_id).await?;
        session.part(part_id, false, self.fetcher.as_ref()).await
    }

    async fn launched(&self, channel_id: &str) -> Result<(Arc<ChannelRuntime>, Arc<StreamSession>), StreamError> {
        let not_launched = || StreamError::NotFound(format!("channel {} has not been launched", channel_id));

        let runtime = self.registry.get(channel_id).await.ok_or_else(not_launched)?;
        let session = runtime.session().await.ok_or_else(not_launched)?;
        Ok((runtime, session))
    }

    async fn launch(&self, channel_id: &str, base_url: &str) -> Result<StreamSession, StreamError> {
        let entry = self.current_entry(channel_id).await?;
        let provider = self.providers.get(&entry.provider)?;

        debug!(
            "Channel {}: resolving {} with {}",
            channel_id, entry.name, entry.provider
        );
        let upstream_url = tokio::time::timeout(self.config.upstream_timeout, provider.resolve_stream_url(&entry))
            .await
            .map_err(|_| {
                StreamError::UpstreamFetch(format!("{} timed out resolving the stream", entry.provider))
            })??;

        StreamSession::launch(
            channel_id,
            LocalUris::new(base_url, channel_id),
            entry,
            upstream_url,
            self.fetcher.as_ref(),
            self.config.chunklist_ttl,
        )
        .await
    }

    /// Entry airing on the channel right now, from an enabled provider.
    async fn current_entry(&self, channel_id: &str) -> Result<Entry, StreamError> {
        let number: u32 = channel_id
            .parse()
            .map_err(|_| StreamError::NotFound(format!("invalid channel {}", channel_id)))?;
        let now = chrono::Utc::now().timestamp();

        let db = self.database.lock().await;
        let store = |e: crate::database::DatabaseError| StreamError::Store(e.to_string());

        let policy = db.get_channel_policy(self.default_policy).map_err(store)?;
        let channel = policy.resolve(number);
        let entry = db
            .get_entry_on_channel(&channel, now)
            .map_err(store)?
            .ok_or_else(|| StreamError::NotFound(format!("nothing is airing on channel {}", channel_id)))?;

        if !db.is_provider_enabled(&entry.provider).map_err(store)? {
            return Err(ProviderError::Disabled(entry.provider).into());
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Database, NewEntry};
    use crate::providers::testing::FakeProvider;
    use crate::stream::fetcher::testing::FakeFetcher;

    const MASTER_URL: &str = "https://cdn.example.net/live/master.m3u8";
    const CHUNKLIST_URL: &str = "https://cdn.example.net/live/hi/index.m3u8";

    struct Fixture {
        engine: Arc<StreamEngine>,
        provider: Arc<FakeProvider>,
        fetcher: Arc<FakeFetcher>,
    }

    async fn fixture(provider: FakeProvider, fetcher: FakeFetcher) -> Fixture {
        let now = chrono::Utc::now().timestamp();
        let db = Database::open_in_memory().unwrap();
        db.set_provider_enabled(&provider.name, true).unwrap();
        db.insert_entries(&provider.name, &[NewEntry::event("live", "Live Game", now - 60, now + 3600)])
            .unwrap();
        let id = db.get_unscheduled_entries().unwrap()[0].id;
        db.assign_channel(id, 1).unwrap();

        let provider = Arc::new(provider);
        let fetcher = Arc::new(fetcher);
        let mut providers = ProviderRegistry::new();
        providers.register(provider.clone());

        let engine = StreamEngine::new(
            db.into_handle(),
            providers,
            Arc::new(ChannelRegistry::new()),
            fetcher.clone(),
            ChannelNumberingPolicy::default(),
            StreamConfig {
                chunklist_ttl: Duration::from_secs(60),
                upstream_timeout: Duration::from_secs(1),
            },
        );
        Fixture {
            engine: Arc::new(engine),
            provider,
            fetcher,
        }
    }

    fn upstream() -> FakeFetcher {
        FakeFetcher::new()
            .text(MASTER_URL, "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\nhi/index.m3u8\n")
            .text(
                CHUNKLIST_URL,
                "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"k.key\"\n#EXTINF:6.0,\ns1.ts\n",
            )
            .binary("https://cdn.example.net/live/hi/k.key", b"key")
            .binary("https://cdn.example.net/live/hi/s1.ts", b"segment")
    }

    #[tokio::test]
    async fn test_full_flow() {
        let f = fixture(FakeProvider::new("gotham", Some(MASTER_URL)), upstream()).await;

        let playlist = f.engine.channel_playlist("1", "http://tuner.lan").await.unwrap();
        assert!(playlist.contains("http://tuner.lan/chunklist/1/0.m3u8"));

        let chunklist = f.engine.chunklist("1", "0").await.unwrap();
        let key_id = eventcast_protocol::hls::part_id("https://cdn.example.net/live/hi/k.key");
        let seg_id = eventcast_protocol::hls::part_id("https://cdn.example.net/live/hi/s1.ts");
        assert!(chunklist.contains(&format!("http://tuner.lan/channels/1/{}.key", key_id)));
        assert!(chunklist.contains(&format!("http://tuner.lan/channels/1/{}.ts", seg_id)));

        assert_eq!(&f.engine.key("1", &key_id).await.unwrap()[..], b"key");
        assert_eq!(&f.engine.segment("1", &seg_id).await.unwrap()[..], b"segment");

        // Playlist is served from the session afterwards
        f.engine.channel_playlist("1", "http://tuner.lan").await.unwrap();
        assert_eq!(f.provider.resolve_calls(), 1);
        assert_eq!(f.fetcher.calls(MASTER_URL), 1);
    }

    #[tokio::test]
    async fn test_nothing_airing() {
        let f = fixture(FakeProvider::new("gotham", Some(MASTER_URL)), upstream()).await;

        let err = f.engine.channel_playlist("2", "http://tuner.lan").await.unwrap_err();
        assert!(matches!(err, StreamError::NotFound(_)));
        assert!(matches!(
            f.engine.channel_playlist("abc", "http://tuner.lan").await,
            Err(StreamError::NotFound(_))
        ));
        assert_eq!(f.engine.registry().count().await, 0);
    }

    #[tokio::test]
    async fn test_auth_failure_not_sticky() {
        let f = fixture(FakeProvider::new("gotham", None), upstream()).await;

        for _ in 0..2 {
            let err = f.engine.channel_playlist("1", "http://tuner.lan").await.unwrap_err();
            assert_eq!(err.domain(), "upstream-auth");
        }
        // Every request retried from scratch
        assert_eq!(f.provider.resolve_calls(), 2);
        assert_eq!(f.engine.registry().count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_timeout() {
        let mut provider = FakeProvider::new("gotham", Some(MASTER_URL));
        provider.resolve_delay = Duration::from_secs(5);
        let f = fixture(provider, upstream()).await;

        let err = f.engine.channel_playlist("1", "http://tuner.lan").await.unwrap_err();
        assert!(matches!(err, StreamError::UpstreamFetch(_)));
    }

    #[tokio::test]
    async fn test_disabled_provider() {
        let f = fixture(FakeProvider::new("gotham", Some(MASTER_URL)), upstream()).await;
        f.engine.database.lock().await.set_provider_enabled("gotham", false).unwrap();

        assert!(matches!(
            f.engine.channel_playlist("1", "http://tuner.lan").await,
            Err(StreamError::NotFound(_))
        ));
        assert_eq!(f.provider.resolve_calls(), 0);
    }

    #[tokio::test]
    async fn test_requires_launch() {
        let f = fixture(FakeProvider::new("gotham", Some(MASTER_URL)), upstream()).await;

        assert!(matches!(f.engine.chunklist("1", "0").await, Err(StreamError::NotFound(_))));
        assert!(matches!(f.engine.segment("1", "abc").await, Err(StreamError::NotFound(_))));
        assert_eq!(f.fetcher.total.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chunklist_failure_evicts_segment_failure_does_not() {
        let fetcher = upstream();
        fetcher.texts.lock().unwrap().remove(CHUNKLIST_URL);
        let f = fixture(FakeProvider::new("gotham", Some(MASTER_URL)), fetcher).await;

        f.engine.channel_playlist("1", "http://tuner.lan").await.unwrap();
        assert!(f.engine.segment("1", "0000000000000000").await.is_err());
        assert_eq!(f.engine.registry().count().await, 1);

        assert!(matches!(f.engine.chunklist("1", "0").await, Err(StreamError::UpstreamFetch(_))));
        assert_eq!(f.engine.registry().count().await, 0);

        // Next playlist request relaunches
        f.engine.channel_playlist("1", "http://tuner.lan").await.unwrap();
        assert_eq!(f.provider.resolve_calls(), 2);
    }

    #[tokio::test]
    async fn test_segment_does_not_touch_heartbeat() {
        let f = fixture(FakeProvider::new("gotham", Some(MASTER_URL)), upstream()).await;
        f.engine.channel_playlist("1", "http://tuner.lan").await.unwrap();
        f.engine.chunklist("1", "0").await.unwrap();

        let runtime = f.engine.registry().get("1").await.unwrap();
        let before = runtime.heartbeat().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let seg_id = eventcast_protocol::hls::part_id("https://cdn.example.net/live/hi/s1.ts");
        f.engine.segment("1", &seg_id).await.unwrap();
        assert_eq!(runtime.heartbeat().await.unwrap(), before);

        let key_id = eventcast_protocol::hls::part_id("https://cdn.example.net/live/hi/k.key");
        f.engine.key("1", &key_id).await.unwrap();
        assert!(runtime.heartbeat().await.unwrap() > before);
    }

    #[tokio::test]
    async fn test_concurrent_requests_resolve_once() {
        let mut provider = FakeProvider::new("gotham", Some(MASTER_URL));
        provider.resolve_delay = Duration::from_millis(50);
        let f = fixture(provider, upstream()).await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let engine = f.engine.clone();
            handles.push(tokio::spawn(async move {
                engine.channel_playlist("1", "http://tuner.lan").await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(f.provider.resolve_calls(), 1);
    }
}
