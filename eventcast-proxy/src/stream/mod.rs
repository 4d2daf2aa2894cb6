//! Stream session engine.
//!
//! This module provides:
//! - [`StreamEngine`]: resolves channels to upstream sessions and serves
//!   playlists, chunklists, keys and segments
//! - [`ChannelRegistry`]: per-channel runtime state with single-flight launch
//! - [`IdleReaper`]: background removal of sessions nobody is watching
//! - [`UpstreamFetcher`]: HTTP access to upstream CDNs

pub mod engine;
pub mod fetcher;
pub mod reaper;
pub mod registry;
pub mod session;

pub use engine::{StreamConfig, StreamEngine};
pub use fetcher::{HttpFetcher, UpstreamFetcher};
pub use reaper::{IdleReaper, ReaperConfig};
pub use registry::{ChannelRegistry, ChannelRuntime, SessionInfo};
pub use session::StreamSession;
