//! M3U playlist generation.

use std::collections::HashSet;
use std::fmt::Write;

use super::{enabled_linear_channels, tvg_id, LINEUP_NAME};
use crate::database::ChannelNumberingPolicy;

fn stream_url(base_url: &str, channel: u32) -> String {
    format!("{}/channels/{}.m3u8", base_url.trim_end_matches('/'), channel)
}

/// Playlist of every event channel in the numbering range.
pub fn event_m3u(base_url: &str, policy: &ChannelNumberingPolicy) -> String {
    let mut out = String::from("#EXTM3U");
    for channel in policy.event_channels() {
        let _ = write!(
            out,
            "\n#EXTINF:0 tvg-id=\"{id}\" channel-number=\"{n}\" tvg-chno=\"{n}\" tvg-name=\"{name} {n}\" group-title=\"{name}\", {name} {n}\n{url}\n",
            id = tvg_id(channel),
            n = channel,
            name = LINEUP_NAME,
            url = stream_url(base_url, channel),
        );
    }
    out
}

/// Playlist of linear channels whose provider is enabled.
pub fn linear_m3u(base_url: &str, enabled_providers: &HashSet<String>) -> String {
    let mut out = String::from("#EXTM3U");
    for (channel, linear) in enabled_linear_channels(enabled_providers) {
        let _ = write!(
            out,
            "\n#EXTINF:0 tvg-id=\"{id}\" channel-id=\"{title}\" channel-number=\"{n}\" tvg-chno=\"{n}\" tvg-name=\"{tvg}\"",
            id = tvg_id(channel),
            title = linear.name,
            n = channel,
            tvg = linear.tvg_name,
        );
        if let Some(station) = linear.station_id {
            let _ = write!(out, " tvc-guide-stationid=\"{}\"", station);
        }
        let _ = write!(
            out,
            " group-title=\"{group}\", {title}\n{url}\n",
            group = LINEUP_NAME,
            title = linear.name,
            url = stream_url(base_url, channel),
        );
    }
    out
}
