//! Shared definitions for the eventcast virtual tuner.
//!
//! This crate holds the pieces of eventcast that do not touch the network or
//! the database:
//!
//! - [`types`]: entries, channel slots and the channel numbering policy
//! - [`error`]: the error taxonomy surfaced by the stream engine and providers
//! - [`hls`]: the playlist rewriting codec that hides upstream URLs
//!
//! # Example
//!
//! ```rust
//! use eventcast_protocol::hls::{rewrite_chunklist, LocalUris};
//!
//! let local = LocalUris::new("http://tuner.lan:8000", "12");
//! let text = "#EXTM3U\n#EXTINF:6.0,\nseg1.ts\n";
//! let out = rewrite_chunklist(text, "https://cdn.example.net/live/index.m3u8", &local).unwrap();
//!
//! assert!(out.playlist.contains("http://tuner.lan:8000/channels/12/"));
//! assert_eq!(out.parts[0].1, "https://cdn.example.net/live/seg1.ts");
//! ```

pub mod error;
pub mod hls;
pub mod types;

pub use error::{PlaylistError, ProviderError, StreamError};
pub use types::{
    linear_channel, ChannelNumberingPolicy, ChannelRef, ChannelSlot, Entry, LinearChannel, NewEntry,
    DEDICATED_LINEAR_CHANNELS, LINEAR_CHANNELS, LINEAR_START_CHANNEL,
};
