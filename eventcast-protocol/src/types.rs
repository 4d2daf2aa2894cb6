//! Data model shared between the event store, the scheduler and the lineup.

use std::fmt;

use serde::{Deserialize, Serialize};

/// First channel number of the linear (always-on) channel range.
pub const LINEAR_START_CHANNEL: u32 = 10000;

/// Linear channel identifiers that only exist while linear channels are enabled.
///
/// Entries parked on these channels are deleted when the schedule is rebuilt
/// after linear channels have been switched off.
pub const DEDICATED_LINEAR_CHANNELS: [&str; 4] =
    ["cbssportshq", "golazo", "NFLNETWORK", "NFLDIGITAL1_OO_v3"];

/// An always-on channel with a fixed number in the linear range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinearChannel {
    /// Identifier stored in `Entry::channel` for events on this channel.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// `tvg-name` attribute in the M3U lineup.
    pub tvg_name: &'static str,
    /// Gracenote station id, if known.
    pub station_id: Option<&'static str>,
    /// Provider that has to be enabled for this channel to be listed.
    pub provider: &'static str,
}

/// Linear channel table. Position in the table decides the channel number.
pub const LINEAR_CHANNELS: &[LinearChannel] = &[
    LinearChannel {
        id: "cbssportshq",
        name: "CBS Sports HQ",
        tvg_name: "CBSSPORTSHQ",
        station_id: Some("108919"),
        provider: "cbs",
    },
    LinearChannel {
        id: "golazo",
        name: "GOLAZO Network",
        tvg_name: "GOLAZO",
        station_id: Some("133691"),
        provider: "cbs",
    },
    LinearChannel {
        id: "NFLNETWORK",
        name: "NFL Network",
        tvg_name: "NFLNETWORK",
        station_id: Some("45399"),
        provider: "nfl",
    },
    LinearChannel {
        id: "NFLDIGITAL1_OO_v3",
        name: "NFL Channel",
        tvg_name: "NFLDIGITAL1",
        station_id: Some("121705"),
        provider: "nfl",
    },
];

/// Look up a linear channel by its identifier.
pub fn linear_channel(id: &str) -> Option<(u32, &'static LinearChannel)> {
    LINEAR_CHANNELS
        .iter()
        .enumerate()
        .find(|(_, ch)| ch.id == id)
        .map(|(idx, ch)| (LINEAR_START_CHANNEL + idx as u32, ch))
}

/// Channel an entry is parked on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelRef {
    /// Event channel assigned by the scheduler.
    Number(u32),
    /// Linear channel identifier assigned by the provider.
    Linear(String),
}

impl ChannelRef {
    /// Parse the textual form stored in the event store.
    pub fn parse(value: &str) -> Self {
        match value.parse::<u32>() {
            Ok(n) => ChannelRef::Number(n),
            Err(_) => ChannelRef::Linear(value.to_string()),
        }
    }

    /// Channel number, if this is an event channel.
    pub fn number(&self) -> Option<u32> {
        match self {
            ChannelRef::Number(n) => Some(*n),
            ChannelRef::Linear(_) => None,
        }
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRef::Number(n) => write!(f, "{}", n),
            ChannelRef::Linear(id) => f.write_str(id),
        }
    }
}

/// A scheduled event as persisted in the event store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    /// Row id; also the insertion order.
    pub id: i64,
    /// Provider that discovered the event.
    pub provider: String,
    /// Provider-scoped event id.
    pub event_id: String,
    /// Display name.
    pub name: String,
    pub network: Option<String>,
    pub sport: Option<String>,
    pub image: Option<String>,
    /// Opaque reference the provider uses to resolve the stream.
    pub upstream_ref: String,
    /// Start time (unix seconds).
    pub start: i64,
    /// End time (unix seconds).
    pub end: i64,
    /// Assigned channel, if any.
    pub channel: Option<ChannelRef>,
    /// Whether this entry was discovered on a linear feed.
    pub linear: bool,
}

/// An event discovered by a provider, not yet stored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewEntry {
    pub event_id: String,
    pub name: String,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub sport: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    pub upstream_ref: String,
    pub start: i64,
    pub end: i64,
    /// Linear channel id when the event belongs to an always-on feed.
    #[serde(default)]
    pub linear_channel: Option<String>,
}

impl NewEntry {
    /// Convenience constructor for a plain event.
    pub fn event(event_id: impl Into<String>, name: impl Into<String>, start: i64, end: i64) -> Self {
        let event_id = event_id.into();
        Self {
            upstream_ref: event_id.clone(),
            event_id,
            name: name.into(),
            network: None,
            sport: None,
            image: None,
            start,
            end,
            linear_channel: None,
        }
    }
}

/// A row of the live schedule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelSlot {
    pub channel: u32,
    /// End of the last entry packed onto this channel (unix seconds).
    pub ends_at: i64,
}

/// Channel numbering configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelNumberingPolicy {
    /// First event channel number.
    pub start_channel: u32,
    /// Number of event channels.
    pub num_of_channels: u32,
    /// Whether linear channels are exposed.
    pub use_linear: bool,
}

impl Default for ChannelNumberingPolicy {
    fn default() -> Self {
        Self {
            start_channel: 1,
            num_of_channels: 200,
            use_linear: false,
        }
    }
}

impl ChannelNumberingPolicy {
    /// Iterate over the event channel numbers.
    pub fn event_channels(&self) -> impl Iterator<Item = u32> {
        self.start_channel..self.start_channel.saturating_add(self.num_of_channels)
    }

    /// Map a requested channel number to the channel an entry would be parked on.
    pub fn resolve(&self, number: u32) -> ChannelRef {
        if self.use_linear && number >= LINEAR_START_CHANNEL {
            if let Some(ch) = LINEAR_CHANNELS.get((number - LINEAR_START_CHANNEL) as usize) {
                return ChannelRef::Linear(ch.id.to_string());
            }
        }
        ChannelRef::Number(number)
    }

    /// Shape a discovered event for storage under this policy.
    ///
    /// With linear channels off, events that only air on a dedicated linear
    /// channel are dropped and the rest lose their linear marker, so they are
    /// scheduled like any other event.
    pub fn admit(&self, mut entry: NewEntry) -> Option<NewEntry> {
        if self.use_linear {
            return Some(entry);
        }
        match entry.linear_channel.take() {
            Some(id) if DEDICATED_LINEAR_CHANNELS.contains(&id.as_str()) => None,
            _ => Some(entry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_ref_parse() {
        assert_eq!(ChannelRef::parse("12"), ChannelRef::Number(12));
        assert_eq!(ChannelRef::parse("golazo"), ChannelRef::Linear("golazo".into()));
        assert_eq!(ChannelRef::Number(7).to_string(), "7");
    }

    #[test]
    fn test_policy_resolve() {
        let mut policy = ChannelNumberingPolicy::default();
        assert_eq!(policy.resolve(LINEAR_START_CHANNEL + 1), ChannelRef::Number(LINEAR_START_CHANNEL + 1));

        policy.use_linear = true;
        assert_eq!(policy.resolve(LINEAR_START_CHANNEL + 1), ChannelRef::Linear("golazo".into()));
        assert_eq!(policy.resolve(5), ChannelRef::Number(5));
        // past the end of the linear table
        assert_eq!(policy.resolve(LINEAR_START_CHANNEL + 99), ChannelRef::Number(LINEAR_START_CHANNEL + 99));
    }

    #[test]
    fn test_event_channels() {
        let policy = ChannelNumberingPolicy { start_channel: 10, num_of_channels: 3, use_linear: false };
        assert_eq!(policy.event_channels().collect::<Vec<_>>(), vec![10, 11, 12]);
    }

    #[test]
    fn test_admit() {
        let mut hq = NewEntry::event("hq", "HQ", 0, 60);
        hq.linear_channel = Some("cbssportshq".into());
        let mut espn = NewEntry::event("espn", "ESPN", 0, 60);
        espn.linear_channel = Some("espn".into());

        let mut policy = ChannelNumberingPolicy::default();
        assert!(policy.admit(hq.clone()).is_none());
        assert_eq!(policy.admit(espn.clone()).unwrap().linear_channel, None);
        assert!(policy.admit(NewEntry::event("game", "Game", 0, 60)).is_some());

        policy.use_linear = true;
        assert_eq!(policy.admit(hq).unwrap().linear_channel.as_deref(), Some("cbssportshq"));
        assert_eq!(policy.admit(espn).unwrap().linear_channel.as_deref(), Some("espn"));
    }

    #[test]
    fn test_linear_lookup() {
        let (number, ch) = linear_channel("NFLNETWORK").unwrap();
        assert_eq!(number, LINEAR_START_CHANNEL + 2);
        assert_eq!(ch.provider, "nfl");
        assert!(linear_channel("espn").is_none());
    }
}
