//! XMLTV guide generation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{enabled_linear_channels, tvg_id, LineupError, LINEUP_NAME};
use crate::database::{ChannelNumberingPolicy, ChannelRef, Entry};
use eventcast_protocol::linear_channel;

const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

#[derive(Debug, Serialize)]
#[serde(rename = "tv")]
struct Tv {
    #[serde(rename = "@generator-info-name")]
    generator: &'static str,

    #[serde(rename = "channel")]
    channels: Vec<XmlChannel>,

    #[serde(rename = "programme")]
    programmes: Vec<Programme>,
}

#[derive(Debug, Serialize)]
struct XmlChannel {
    #[serde(rename = "@id")]
    id: String,

    #[serde(rename = "display-name")]
    display_name: String,
}

#[derive(Debug, Serialize)]
struct Text {
    #[serde(rename = "@lang")]
    lang: &'static str,

    #[serde(rename = "$text")]
    value: String,
}

impl Text {
    fn en(value: impl Into<String>) -> Self {
        Self { lang: "en", value: value.into() }
    }
}

#[derive(Debug, Serialize)]
struct Icon {
    #[serde(rename = "@src")]
    src: String,
}

#[derive(Debug, Serialize)]
struct Programme {
    #[serde(rename = "@channel")]
    channel: String,

    #[serde(rename = "@start")]
    start: String,

    #[serde(rename = "@stop")]
    stop: String,

    title: Text,

    #[serde(skip_serializing_if = "Option::is_none")]
    desc: Option<Text>,

    #[serde(rename = "category")]
    categories: Vec<Text>,

    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<Icon>,
}

fn xmltv_time(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .unwrap_or_default()
        .format("%Y%m%d%H%M%S %z")
        .to_string()
}

fn programme(channel: u32, entry: &Entry) -> Programme {
    let mut categories = vec![Text::en("Sports")];
    if let Some(sport) = &entry.sport {
        categories.push(Text::en(sport.clone()));
    }

    Programme {
        channel: tvg_id(channel),
        start: xmltv_time(entry.start),
        stop: xmltv_time(entry.end),
        title: Text::en(entry.name.clone()),
        desc: entry
            .network
            .as_ref()
            .map(|network| Text::en(format!("{} on {}", entry.name, network))),
        categories,
        icon: entry.image.clone().map(|src| Icon { src }),
    }
}

/// Render the guide for the event lineup, or for the linear lineup when
/// `linear` is set.
///
/// `entries` are scheduled entries; ones that belong to the other lineup are
/// ignored.
pub fn generate_xmltv(
    entries: &[Entry],
    policy: &ChannelNumberingPolicy,
    linear: bool,
    enabled_providers: &HashSet<String>,
) -> Result<String, LineupError> {
    let channels: Vec<XmlChannel> = if linear {
        enabled_linear_channels(enabled_providers)
            .map(|(n, ch)| XmlChannel {
                id: tvg_id(n),
                display_name: ch.name.to_string(),
            })
            .collect()
    } else {
        policy
            .event_channels()
            .map(|n| XmlChannel {
                id: tvg_id(n),
                display_name: format!("{} {}", LINEUP_NAME, n),
            })
            .collect()
    };
    let listed: HashSet<&str> = channels.iter().map(|ch| ch.id.as_str()).collect();

    let programmes: Vec<Programme> = entries
        .iter()
        .filter_map(|entry| {
            let number = match (&entry.channel, linear) {
                (Some(ChannelRef::Number(n)), false) => *n,
                (Some(ChannelRef::Linear(id)), true) => linear_channel(id)?.0,
                _ => return None,
            };
            Some(programme(number, entry))
        })
        .filter(|p| listed.contains(p.channel.as_str()))
        .collect();

    let tv = Tv {
        generator: LINEUP_NAME,
        channels,
        programmes,
    };
    let body = quick_xml::se::to_string(&tv).map_err(|e| LineupError::Xml(e.to_string()))?;

    Ok(format!("{}{}", XML_HEADER, body))
}
