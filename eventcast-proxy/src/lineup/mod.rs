//! Channel lineup rendering.
//!
//! - [`m3u`]: IPTV playlists pointing at `/channels/{n}.m3u8`
//! - [`xmltv`]: program guide built from scheduled entries
//!
//! Both consume the channel numbering policy; neither schedules anything.

pub mod m3u;
pub mod xmltv;

use std::collections::HashSet;

use thiserror::Error;

use eventcast_protocol::{LinearChannel, LINEAR_CHANNELS, LINEAR_START_CHANNEL};

pub use m3u::{event_m3u, linear_m3u};
pub use xmltv::generate_xmltv;

/// Display name prefix and `tvg-id` suffix.
pub const LINEUP_NAME: &str = "EventCast";
const TVG_SUFFIX: &str = "eventcast";

/// Lineup rendering errors.
#[derive(Error, Debug)]
pub enum LineupError {
    #[error("XML serialization failed: {0}")]
    Xml(String),
}

/// `tvg-id` / XMLTV channel id for a channel number.
pub fn tvg_id(channel: u32) -> String {
    format!("{}.{}", channel, TVG_SUFFIX)
}

/// Linear channels whose provider is enabled, with their channel numbers.
pub fn enabled_linear_channels(
    enabled_providers: &HashSet<String>,
) -> impl Iterator<Item = (u32, &'static LinearChannel)> + '_ {
    LINEAR_CHANNELS
        .iter()
        .enumerate()
        .filter(move |(_, ch)| enabled_providers.contains(ch.provider))
        .map(|(idx, ch)| (LINEAR_START_CHANNEL + idx as u32, ch))
}
