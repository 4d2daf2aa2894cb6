//! Periodic schedule discovery and token refresh.
//!
//! # How It Works
//!
//! 1. Every refresh interval (and on manual trigger) each enabled provider's
//!    schedule is fetched and new entries are stored
//! 2. Entries that already ended are purged
//! 3. The [`ChannelScheduler`] assigns channels to whatever is new
//!
//! A separate loop refreshes provider credentials. One provider failing never
//! stops the others from being serviced.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::time::interval;

use super::ChannelScheduler;
use crate::database::{DatabaseHandle, Result};
use crate::providers::ProviderRegistry;

/// Refresh scheduler configuration.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Interval between schedule refreshes (seconds).
    pub refresh_interval_secs: u64,
    /// Interval between token refreshes (seconds).
    pub token_refresh_interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 4 * 3600,     // Every 4 hours
            token_refresh_interval_secs: 30 * 60, // Every 30 minutes
        }
    }
}

/// Outcome of one refresh run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// New entries stored.
    pub discovered: usize,
    /// Providers whose discovery failed.
    pub failed: Vec<String>,
    /// Ended entries purged.
    pub purged: usize,
}

/// Drives schedule discovery and credential refresh for all providers.
pub struct RefreshScheduler {
    database: DatabaseHandle,
    providers: ProviderRegistry,
    scheduler: Arc<ChannelScheduler>,
    config: RefreshConfig,
    /// Serializes refresh runs.
    run_lock: tokio::sync::Mutex<()>,
}

impl RefreshScheduler {
    /// Create a new refresh scheduler.
    pub fn new(
        database: DatabaseHandle,
        providers: ProviderRegistry,
        scheduler: Arc<ChannelScheduler>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            database,
            providers,
            scheduler,
            config,
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Initialize every provider once.
    pub async fn initialize_providers(&self) {
        for provider in self.providers.iter() {
            match provider.initialize().await {
                Ok(()) => debug!("RefreshScheduler: Initialized {}", provider.name()),
                Err(e) => error!("RefreshScheduler: Failed to initialize {}: {}", provider.name(), e),
            }
        }
    }

    /// Start the refresh and token loops.
    pub fn start(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let refresh = {
            let this = self.clone();
            tokio::spawn(async move { this.run_refresh_loop().await })
        };
        let tokens = tokio::spawn(async move { self.run_token_loop().await });
        vec![refresh, tokens]
    }

    async fn run_refresh_loop(&self) {
        info!(
            "RefreshScheduler: Starting with refresh interval {} seconds",
            self.config.refresh_interval_secs
        );

        // First tick completes immediately, so the schedule is built at startup
        let mut refresh_interval = interval(Duration::from_secs(self.config.refresh_interval_secs));
        loop {
            refresh_interval.tick().await;
            self.refresh().await;
        }
    }

    async fn run_token_loop(&self) {
        let period = Duration::from_secs(self.config.token_refresh_interval_secs);
        let mut token_interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            token_interval.tick().await;
            self.refresh_tokens().await;
        }
    }

    /// Refresh credentials of every enabled provider.
    pub async fn refresh_tokens(&self) {
        for provider in self.providers.iter() {
            if !self.is_enabled(provider.name()).await {
                continue;
            }
            if let Err(e) = provider.refresh_tokens().await {
                warn!("RefreshScheduler: Token refresh failed for {}: {}", provider.name(), e);
            }
        }
    }

    /// Discover schedules, purge ended entries and assign channels.
    pub async fn refresh(&self) -> RefreshSummary {
        let _run = self.run_lock.lock().await;
        let mut summary = RefreshSummary::default();

        let policy = match self.scheduler.policy().await {
            Ok(policy) => policy,
            Err(e) => {
                error!("RefreshScheduler: Failed to load channel policy: {}", e);
                return summary;
            }
        };

        for provider in self.providers.iter() {
            let name = provider.name().to_string();
            if !self.is_enabled(&name).await {
                debug!("RefreshScheduler: {} is disabled, skipping", name);
                continue;
            }

            let entries: Vec<_> = match provider.get_schedule().await {
                Ok(entries) => entries.into_iter().filter_map(|e| policy.admit(e)).collect(),
                Err(e) => {
                    error!("RefreshScheduler: Schedule discovery failed for {}: {}", name, e);
                    summary.failed.push(name);
                    continue;
                }
            };

            let db = self.database.lock().await;
            match db.insert_entries(&name, &entries) {
                Ok(inserted) => {
                    info!(
                        "RefreshScheduler: {} returned {} usable events, {} new",
                        name,
                        entries.len(),
                        inserted
                    );
                    summary.discovered += inserted;
                }
                Err(e) => {
                    error!("RefreshScheduler: Failed to store entries of {}: {}", name, e);
                    summary.failed.push(name);
                }
            }
        }

        match self.purge_expired().await {
            Ok(purged) => summary.purged = purged,
            Err(e) => warn!("RefreshScheduler: Failed to purge ended entries: {}", e),
        }

        self.scheduler.schedule_entries().await;
        summary
    }

    /// Trigger an immediate refresh outside the regular schedule.
    pub async fn trigger_refresh(self: &Arc<Self>) {
        info!("RefreshScheduler: Manual refresh triggered");
        let this = self.clone();
        tokio::spawn(async move {
            this.refresh().await;
        });
    }

    /// Discard every entry and channel assignment, then rediscover from scratch.
    pub async fn rebuild_epg(&self) -> Result<RefreshSummary> {
        let (removed, cleared) = self.scheduler.discard_all().await?;
        info!(
            "RefreshScheduler: Rebuilding EPG, removed {} entries and {} channel slots",
            removed, cleared
        );
        Ok(self.refresh().await)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let db = self.database.lock().await;
        let purged = db.remove_expired_entries(now)?;
        if purged > 0 {
            debug!("RefreshScheduler: Purged {} ended entries", purged);
        }
        Ok(purged)
    }

    async fn is_enabled(&self, name: &str) -> bool {
        let db = self.database.lock().await;
        db.is_provider_enabled(name).unwrap_or_else(|e| {
            warn!("RefreshScheduler: Failed to read state of {}: {}", name, e);
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{ChannelNumberingPolicy, ChannelRef, Database, NewEntry};
    use crate::providers::testing::FakeProvider;
    use eventcast_protocol::ProviderError;

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn setup(providers: Vec<FakeProvider>) -> (Arc<RefreshScheduler>, DatabaseHandle, Vec<Arc<FakeProvider>>) {
        setup_with_policy(providers, ChannelNumberingPolicy::default())
    }

    fn setup_with_policy(
        providers: Vec<FakeProvider>,
        policy: ChannelNumberingPolicy,
    ) -> (Arc<RefreshScheduler>, DatabaseHandle, Vec<Arc<FakeProvider>>) {
        let db = Database::open_in_memory().unwrap().into_handle();
        let scheduler = Arc::new(ChannelScheduler::new(db.clone(), policy));
        let mut registry = ProviderRegistry::new();
        let mut fakes = Vec::new();
        for provider in providers {
            let provider = Arc::new(provider);
            registry.register(provider.clone());
            fakes.push(provider);
        }
        let refresh = Arc::new(RefreshScheduler::new(db.clone(), registry, scheduler, RefreshConfig::default()));
        (refresh, db, fakes)
    }

    #[tokio::test]
    async fn test_refresh_survives_failing_provider() {
        let t = now();
        let good = FakeProvider::new("gotham", None).with_events(vec![
            NewEntry::event("live", "Live", t - 60, t + 3600),
            NewEntry::event("ended", "Ended", t - 7200, t - 3600),
        ]);
        let bad = FakeProvider::new("nesn", None);
        *bad.events.lock().unwrap() = Err(ProviderError::Auth("expired".into()));
        let (refresh, db, _) = setup(vec![good, bad]);
        {
            let db = db.lock().await;
            db.set_provider_enabled("gotham", true).unwrap();
            db.set_provider_enabled("nesn", true).unwrap();
        }

        let summary = refresh.refresh().await;
        assert_eq!(summary.discovered, 2);
        assert_eq!(summary.purged, 1);
        assert_eq!(summary.failed, vec!["nesn".to_string()]);

        let scheduled = db.lock().await.get_scheduled_entries().unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].event_id, "live");
    }

    #[tokio::test]
    async fn test_disabled_provider_skipped() {
        let t = now();
        let provider = FakeProvider::new("gotham", None)
            .with_events(vec![NewEntry::event("a", "A", t, t + 60)]);
        let (refresh, db, fakes) = setup(vec![provider]);
        db.lock().await.set_provider_enabled("gotham", false).unwrap();

        assert_eq!(refresh.refresh().await.discovered, 0);
        refresh.refresh_tokens().await;
        assert_eq!(fakes[0].refresh_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rebuild_epg() {
        let t = now();
        let provider = FakeProvider::new("gotham", None)
            .with_events(vec![NewEntry::event("a", "A", t, t + 60)]);
        let (refresh, db, _) = setup(vec![provider]);
        {
            let db = db.lock().await;
            db.set_provider_enabled("gotham", true).unwrap();
            db.insert_entries("gone", &[NewEntry::event("old", "Old", t, t + 60)]).unwrap();
        }

        let summary = refresh.rebuild_epg().await.unwrap();
        assert_eq!(summary.discovered, 1);
        let scheduled = db.lock().await.get_scheduled_entries().unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].provider, "gotham");
    }

    #[tokio::test]
    async fn test_rebuild_epg_restores_channel() {
        let t = now();
        let provider = FakeProvider::new("gotham", None)
            .with_events(vec![NewEntry::event("live", "Live", t - 60, t + 3600)]);
        let policy = ChannelNumberingPolicy { start_channel: 10, num_of_channels: 1, use_linear: false };
        let (refresh, db, _) = setup_with_policy(vec![provider], policy);
        db.lock().await.set_provider_enabled("gotham", true).unwrap();

        refresh.refresh().await;
        assert_eq!(db.lock().await.get_scheduled_entries().unwrap().len(), 1);

        refresh.rebuild_epg().await.unwrap();
        let db = db.lock().await;
        let scheduled = db.get_scheduled_entries().unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].channel, Some(ChannelRef::Number(10)));
        assert!(db.get_unscheduled_entries().unwrap().is_empty());
        let slots = db.get_slots().unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].ends_at, t + 3600);
    }

    #[tokio::test]
    async fn test_linear_feed_does_not_migrate_every_refresh() {
        let t = now();
        let mut golazo = NewEntry::event("studio", "Studio", t - 600, t + 600);
        golazo.linear_channel = Some("golazo".to_string());
        let mut simulcast = NewEntry::event("simulcast", "Simulcast", t + 100, t + 900);
        simulcast.linear_channel = Some("espn".to_string());
        let events = vec![
            golazo,
            NewEntry::event("y", "Y", t - 300, t + 1000),
            NewEntry::event("x", "X", t + 500, t + 3000),
            simulcast,
        ];
        let provider = FakeProvider::new("cbs", None).with_events(events);
        let (refresh, db, _) = setup(vec![provider]);
        db.lock().await.set_provider_enabled("cbs", true).unwrap();

        let channel_of = |entries: &[crate::database::Entry], id: &str| {
            entries.iter().find(|e| e.event_id == id).and_then(|e| e.channel.clone())
        };

        refresh.refresh().await;
        let first = db.lock().await.get_scheduled_entries().unwrap();
        {
            let db = db.lock().await;
            assert_eq!(db.count_linear_entries().unwrap(), 0);
        }
        // Dedicated linear feed dropped, shared one scheduled as an event
        assert!(channel_of(&first, "studio").is_none());
        assert!(matches!(channel_of(&first, "simulcast"), Some(ChannelRef::Number(_))));

        for _ in 0..3 {
            refresh.refresh().await;
            let report = refresh.scheduler.try_schedule_entries().await.unwrap();
            assert!(!report.migrated);
        }

        let later = db.lock().await.get_scheduled_entries().unwrap();
        for id in ["x", "y", "simulcast"] {
            assert_eq!(channel_of(&first, id), channel_of(&later, id), "{} moved", id);
        }
    }
}
