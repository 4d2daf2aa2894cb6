//! Idle session reaper.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::time::{interval, Instant};

use super::registry::ChannelRegistry;

/// Reaper configuration.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Time between sweeps.
    pub sweep_interval: Duration,
    /// Sessions without a heartbeat for this long are removed.
    pub idle_timeout: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Periodically tears down channel sessions nobody is watching.
///
/// No upstream call is made on removal; upstream sessions lapse once polling
/// stops. Channel assignments are not touched.
pub struct IdleReaper {
    registry: Arc<ChannelRegistry>,
    config: ReaperConfig,
}

impl IdleReaper {
    /// Create a new reaper.
    pub fn new(registry: Arc<ChannelRegistry>, config: ReaperConfig) -> Self {
        Self { registry, config }
    }

    /// Start the reaper background task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the sweep loop.
    pub async fn run(self) {
        info!(
            "IdleReaper: Starting with sweep interval {}s, idle timeout {}s",
            self.config.sweep_interval.as_secs(),
            self.config.idle_timeout.as_secs()
        );

        let mut ticker = interval(self.config.sweep_interval);
        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }

    /// Run a single sweep now.
    pub async fn sweep(&self) -> Vec<String> {
        let removed = self.registry.sweep(Instant::now(), self.config.idle_timeout).await;
        if !removed.is_empty() {
            debug!("IdleReaper: Removed {} session(s): {:?}", removed.len(), removed);
        }
        removed
    }
}
