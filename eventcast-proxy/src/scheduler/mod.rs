//! Scheduled task management for eventcast.
//!
//! This module provides:
//! - [`ChannelScheduler`]: Packs discovered entries onto numbered channels
//! - [`RefreshScheduler`]: Periodic schedule discovery and token refresh

pub mod channel_scheduler;
pub mod refresh;

pub use channel_scheduler::{ChannelScheduler, ScheduleReport};
pub use refresh::{RefreshConfig, RefreshScheduler, RefreshSummary};
