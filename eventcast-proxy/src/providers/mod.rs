//! Upstream provider adapters.
//!
//! Each adapter discovers events for one streaming service and resolves a
//! playable HLS URL for an entry it discovered. Credential handling is the
//! adapter's own business; callers only drive `initialize` and
//! `refresh_tokens` on a timer.

pub mod feed;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::database::{Entry, NewEntry};
use eventcast_protocol::ProviderError;

pub use feed::{FeedProvider, FeedProviderConfig};

/// Interface the scheduler and stream engine use to talk to an upstream service.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Name stored in `Entry::provider`.
    fn name(&self) -> &str;

    /// One-time setup at startup.
    async fn initialize(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Refresh credentials. Must be safe to call repeatedly.
    async fn refresh_tokens(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Discover upcoming and live events.
    async fn get_schedule(&self) -> Result<Vec<NewEntry>, ProviderError>;

    /// Resolve the upstream HLS URL for an entry this adapter discovered.
    async fn resolve_stream_url(&self, entry: &Entry) -> Result<String, ProviderError>;
}

/// Registered provider adapters, keyed by name.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    adapters: BTreeMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one with the same name.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    /// Look up an adapter by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::Unknown(name.to_string()))
    }

    /// Iterate over adapters in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ProviderAdapter>> {
        self.adapters.values()
    }

    /// Registered adapter names.
    pub fn names(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("adapters", &self.names())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory adapter used by scheduler, stream and web tests.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    pub struct FakeProvider {
        pub name: String,
        pub events: Mutex<Result<Vec<NewEntry>, ProviderError>>,
        /// `None` makes resolution fail with an auth error.
        pub stream_url: Option<String>,
        pub resolve_delay: Duration,
        pub resolve_calls: AtomicUsize,
        pub refresh_calls: AtomicUsize,
    }

    impl FakeProvider {
        pub fn new(name: &str, stream_url: Option<&str>) -> Self {
            Self {
                name: name.to_string(),
                events: Mutex::new(Ok(Vec::new())),
                stream_url: stream_url.map(str::to_string),
                resolve_delay: Duration::ZERO,
                resolve_calls: AtomicUsize::new(0),
                refresh_calls: AtomicUsize::new(0),
            }
        }

        pub fn with_events(self, events: Vec<NewEntry>) -> Self {
            *self.events.lock().unwrap() = Ok(events);
            self
        }

        pub fn resolve_calls(&self) -> usize {
            self.resolve_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderAdapter for FakeProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn refresh_tokens(&self) -> Result<(), ProviderError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn get_schedule(&self) -> Result<Vec<NewEntry>, ProviderError> {
            self.events.lock().unwrap().clone()
        }

        async fn resolve_stream_url(&self, _entry: &Entry) -> Result<String, ProviderError> {
            self.resolve_calls.fetch_add(1, Ordering::SeqCst);
            if !self.resolve_delay.is_zero() {
                tokio::time::sleep(self.resolve_delay).await;
            }
            self.stream_url
                .clone()
                .ok_or_else(|| ProviderError::Auth(format!("{} rejected the token", self.name)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeProvider;
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(FakeProvider::new("nesn", None)));
        registry.register(Arc::new(FakeProvider::new("gotham", None)));

        assert_eq!(registry.names(), vec!["gotham", "nesn"]);
        assert_eq!(registry.get("nesn").unwrap().name(), "nesn");
        assert_eq!(
            registry.get("espn").err(),
            Some(ProviderError::Unknown("espn".to_string()))
        );
    }
}
