//! Database model definitions.

use serde::Serialize;

pub use eventcast_protocol::{ChannelNumberingPolicy, ChannelRef, ChannelSlot, Entry, NewEntry};

/// Provider record from database.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderRecord {
    pub name: String,
    pub enabled: bool,
    /// Credential blob; never serialized to API clients.
    #[serde(skip)]
    pub tokens: Option<String>,
    pub updated_at: i64,
}

/// Counts returned by bulk entry operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationResult {
    /// Slots wiped.
    pub slots_cleared: usize,
    /// Entries on dedicated linear channels deleted.
    pub linear_removed: usize,
    /// Entries whose channel/linear fields were unset.
    pub entries_reset: usize,
}
