//! Registry of per-channel runtime state.
//!
//! Each requested channel gets a [`ChannelRuntime`] holding its launch state
//! and heartbeat. The launch state sits behind an async mutex, so concurrent
//! requests for a channel that is not launched yet queue behind the first
//! one and share its outcome instead of launching again.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use super::session::StreamSession;
use eventcast_protocol::StreamError;

enum LaunchState {
    /// Not launched yet, a launch is in progress, or a launch was cancelled.
    Idle,
    Ready(Arc<StreamSession>),
    /// Launch failed; kept so queued requests see the same error.
    Failed(StreamError),
}

/// Runtime state of one virtual channel.
pub struct ChannelRuntime {
    channel_id: String,
    launch: Mutex<LaunchState>,
    heartbeat: RwLock<Option<Instant>>,
}

impl ChannelRuntime {
    fn new(channel_id: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            launch: Mutex::new(LaunchState::Idle),
            heartbeat: RwLock::new(None),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Record activity on this channel.
    pub async fn touch(&self) {
        *self.heartbeat.write().await = Some(Instant::now());
    }

    /// Last recorded activity.
    pub async fn heartbeat(&self) -> Option<Instant> {
        *self.heartbeat.read().await
    }

    /// Launched session, waiting for an in-flight launch to finish.
    pub async fn session(&self) -> Option<Arc<StreamSession>> {
        match &*self.launch.lock().await {
            LaunchState::Ready(session) => Some(session.clone()),
            _ => None,
        }
    }
}

/// Snapshot of a channel runtime for the management API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub channel: String,
    pub provider: Option<String>,
    pub event: Option<String>,
    pub launching: bool,
    /// Seconds since the last heartbeat.
    pub idle_secs: Option<u64>,
}

/// Channel id to runtime state.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Arc<ChannelRuntime>>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the runtime for a channel, if one exists.
    pub async fn get(&self, channel_id: &str) -> Option<Arc<ChannelRuntime>> {
        self.channels.read().await.get(channel_id).cloned()
    }

    /// Get or create the runtime for a channel.
    async fn runtime(&self, channel_id: &str) -> Arc<ChannelRuntime> {
        // Fast path: runtime already exists
        {
            let channels = self.channels.read().await;
            if let Some(runtime) = channels.get(channel_id) {
                return Arc::clone(runtime);
            }
        }

        let mut channels = self.channels.write().await;

        // Double-check after acquiring write lock
        if let Some(runtime) = channels.get(channel_id) {
            return Arc::clone(runtime);
        }

        let runtime = Arc::new(ChannelRuntime::new(channel_id));
        channels.insert(channel_id.to_string(), Arc::clone(&runtime));
        runtime
    }

    /// Return the channel's session, launching it with `launch` if needed.
    ///
    /// At most one launch runs per channel. Requests arriving during a launch
    /// wait for it and share its result. A failed launch removes the runtime,
    /// so the next request starts from scratch.
    pub async fn get_or_launch<F, Fut>(
        &self,
        channel_id: &str,
        launch: F,
    ) -> Result<(Arc<ChannelRuntime>, Arc<StreamSession>), StreamError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<StreamSession, StreamError>>,
    {
        let runtime = self.runtime(channel_id).await;
        let mut state = runtime.launch.lock().await;

        match &*state {
            LaunchState::Ready(session) => return Ok((Arc::clone(&runtime), Arc::clone(session))),
            LaunchState::Failed(e) => return Err(e.clone()),
            LaunchState::Idle => {}
        }

        debug!("Channel {}: launching session", channel_id);
        match launch().await {
            Ok(session) => {
                let session = Arc::new(session);
                *state = LaunchState::Ready(Arc::clone(&session));
                // Heartbeat before releasing the lock so a sweep never sees a
                // ready runtime without one
                runtime.touch().await;
                drop(state);
                Ok((runtime, session))
            }
            Err(e) => {
                *state = LaunchState::Failed(e.clone());
                drop(state);
                self.evict(&runtime).await;
                Err(e)
            }
        }
    }

    /// Remove a runtime, unless it has already been replaced.
    pub async fn evict(&self, runtime: &Arc<ChannelRuntime>) -> bool {
        let mut channels = self.channels.write().await;
        match channels.get(runtime.channel_id()) {
            Some(current) if Arc::ptr_eq(current, runtime) => {
                channels.remove(runtime.channel_id());
                debug!("Channel {}: session state removed", runtime.channel_id());
                true
            }
            _ => false,
        }
    }

    /// Remove a runtime that never launched and that no request holds, such
    /// as one left behind by a cancelled launch.
    async fn remove_abandoned(&self, runtime: &Arc<ChannelRuntime>) -> bool {
        let mut channels = self.channels.write().await;
        match channels.get(runtime.channel_id()) {
            // The map and the caller hold the only references; with the write
            // lock held no request can pick it up
            Some(current) if Arc::ptr_eq(current, runtime) && Arc::strong_count(runtime) <= 2 => {
                channels.remove(runtime.channel_id());
                true
            }
            _ => false,
        }
    }

    /// Remove runtimes that are malformed, abandoned before launching, or idle
    /// for longer than `idle_timeout`.
    ///
    /// Runtimes with a launch in flight are left alone. Returns the removed
    /// channel ids.
    pub async fn sweep(&self, now: Instant, idle_timeout: Duration) -> Vec<String> {
        let runtimes: Vec<Arc<ChannelRuntime>> = self.channels.read().await.values().cloned().collect();
        let mut removed = Vec::new();

        for runtime in runtimes {
            let never_launched = match runtime.launch.try_lock() {
                Ok(state) => matches!(*state, LaunchState::Idle),
                // Launch in flight
                Err(_) => continue,
            };
            if never_launched {
                if self.remove_abandoned(&runtime).await {
                    warn!("Channel {}: launch abandoned, removing", runtime.channel_id());
                    removed.push(runtime.channel_id().to_string());
                }
                continue;
            }

            match runtime.heartbeat().await {
                None => {
                    warn!("Channel {}: no heartbeat recorded, removing", runtime.channel_id());
                }
                Some(beat) => {
                    let idle = now.saturating_duration_since(beat);
                    if idle <= idle_timeout {
                        continue;
                    }
                    info!(
                        "Channel {}: idle for {}s, tearing down session",
                        runtime.channel_id(),
                        idle.as_secs()
                    );
                }
            }

            if self.evict(&runtime).await {
                removed.push(runtime.channel_id().to_string());
            }
        }

        removed
    }

    /// Number of channel runtimes.
    pub async fn count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Describe every channel runtime, sorted by channel id.
    pub async fn snapshot(&self, now: Instant) -> Vec<SessionInfo> {
        let runtimes: Vec<Arc<ChannelRuntime>> = self.channels.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(runtimes.len());

        for runtime in runtimes {
            let (launching, session) = match runtime.launch.try_lock() {
                Ok(state) => match &*state {
                    LaunchState::Ready(session) => (false, Some(Arc::clone(session))),
                    // Idle with no other holder means the launch was abandoned
                    LaunchState::Idle => (Arc::strong_count(&runtime) > 2, None),
                    LaunchState::Failed(_) => (false, None),
                },
                Err(_) => (true, None),
            };
            let idle_secs = runtime
                .heartbeat()
                .await
                .map(|beat| now.saturating_duration_since(beat).as_secs());

            infos.push(SessionInfo {
                channel: runtime.channel_id().to_string(),
                provider: session.as_ref().map(|s| s.entry().provider.clone()),
                event: session.as_ref().map(|s| s.entry().name.clone()),
                launching,
                idle_secs,
            });
        }

        infos.sort_by(|a, b| a.channel.cmp(&b.channel));
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Entry;
    use crate::stream::fetcher::testing::FakeFetcher;
    use eventcast_protocol::hls::LocalUris;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const URL: &str = "https://cdn.example.net/live/index.m3u8";

    fn entry() -> Entry {
        Entry {
            id: 1,
            provider: "gotham".to_string(),
            event_id: "e1".to_string(),
            name: "Game".to_string(),
            network: None,
            sport: None,
            image: None,
            upstream_ref: URL.to_string(),
            start: 0,
            end: 3600,
            channel: None,
            linear: false,
        }
    }

    async fn session(channel_id: &str) -> Result<StreamSession, StreamError> {
        let fetcher = FakeFetcher::new().text(URL, "#EXTM3U\n#EXTINF:6.0,\nseg.ts\n");
        let local = LocalUris::new("http://tuner.lan", channel_id);
        StreamSession::launch(channel_id, local, entry(), URL.to_string(), &fetcher, Duration::from_secs(2)).await
    }

    #[tokio::test]
    async fn test_launch_once() {
        let registry = ChannelRegistry::new();
        let launches = AtomicUsize::new(0);

        for _ in 0..3 {
            registry
                .get_or_launch("5", || async {
                    launches.fetch_add(1, Ordering::SeqCst);
                    session("5").await
                })
                .await
                .unwrap();
        }
        assert_eq!(launches.load(Ordering::SeqCst), 1);
        assert!(registry.get("5").await.unwrap().heartbeat().await.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_launch_single_flight() {
        let registry = Arc::new(ChannelRegistry::new());
        let launches = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let launches = launches.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .get_or_launch("7", || async {
                        launches.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        session("7").await
                    })
                    .await
                    .map(|(_, s)| s.playlist().to_string())
            }));
        }

        let mut playlists = Vec::new();
        for handle in handles {
            playlists.push(handle.await.unwrap().unwrap());
        }
        assert_eq!(launches.load(Ordering::SeqCst), 1);
        assert!(playlists.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_failed_launch_is_shared_then_retried() {
        let registry = Arc::new(ChannelRegistry::new());
        let launches = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let registry = registry.clone();
            let launches = launches.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .get_or_launch("9", || async {
                        launches.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err(StreamError::NotFound("nothing on 9".into()))
                    })
                    .await
                    .map(|_| ())
            }));
        }
        for handle in handles {
            assert!(matches!(handle.await.unwrap(), Err(StreamError::NotFound(_))));
        }
        assert_eq!(launches.load(Ordering::SeqCst), 1);
        assert_eq!(registry.count().await, 0);

        // No sticky failure
        registry.get_or_launch("9", || session("9")).await.unwrap();
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_evict_only_current_runtime() {
        let registry = ChannelRegistry::new();
        let (old, _) = registry.get_or_launch("3", || session("3")).await.unwrap();
        assert!(registry.evict(&old).await);

        registry.get_or_launch("3", || session("3")).await.unwrap();
        // A stale handle must not remove the replacement
        assert!(!registry.evict(&old).await);
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_sweep() {
        let registry = ChannelRegistry::new();
        let idle = Duration::from_secs(300);
        registry.get_or_launch("1", || session("1")).await.unwrap();
        registry.get_or_launch("2", || session("2")).await.unwrap();

        let later = Instant::now() + Duration::from_secs(301);
        // Channel 2 is touched just before the sweep
        *registry.get("2").await.unwrap().heartbeat.write().await = Some(later - Duration::from_secs(10));

        assert_eq!(registry.sweep(later, idle).await, vec!["1".to_string()]);
        assert!(registry.get("1").await.is_none());
        assert!(registry.get("2").await.is_some());
    }

    #[tokio::test]
    async fn test_sweep_removes_malformed_and_skips_launching() {
        let registry = Arc::new(ChannelRegistry::new());
        registry.get_or_launch("1", || session("1")).await.unwrap();
        *registry.get("1").await.unwrap().heartbeat.write().await = None;

        // Hold a launch open on channel 2
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let launching = tokio::spawn({
            let registry = registry.clone();
            async move {
                registry
                    .get_or_launch("2", || async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        session("2").await
                    })
                    .await
                    .map(|_| ())
            }
        });
        started_rx.await.unwrap();

        let far = Instant::now() + Duration::from_secs(3600);
        assert_eq!(registry.sweep(far, Duration::from_secs(300)).await, vec!["1".to_string()]);
        assert!(registry.get("2").await.is_some());

        release_tx.send(()).unwrap();
        launching.await.unwrap().unwrap();
        let infos = registry.snapshot(Instant::now()).await;
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].provider.as_deref(), Some("gotham"));
        assert!(!infos[0].launching);
    }

    #[tokio::test]
    async fn test_sweep_removes_cancelled_launch() {
        let registry = Arc::new(ChannelRegistry::new());

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let request = tokio::spawn({
            let registry = registry.clone();
            async move {
                registry
                    .get_or_launch("7", || async move {
                        let _ = started_tx.send(());
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        session("7").await
                    })
                    .await
                    .map(|_| ())
            }
        });
        started_rx.await.unwrap();

        // Client went away mid-launch
        request.abort();
        assert!(request.await.unwrap_err().is_cancelled());
        assert_eq!(registry.count().await, 1);

        let infos = registry.snapshot(Instant::now()).await;
        assert!(!infos[0].launching);
        assert_eq!(infos[0].idle_secs, None);

        let far = Instant::now() + Duration::from_secs(3600);
        assert_eq!(registry.sweep(far, Duration::from_secs(300)).await, vec!["7".to_string()]);
        assert_eq!(registry.count().await, 0);

        // Next request launches from scratch
        registry.get_or_launch("7", || session("7")).await.unwrap();
        assert_eq!(registry.count().await, 1);
    }
}
