//! Entry CRUD operations.

use eventcast_protocol::DEDICATED_LINEAR_CHANNELS;
use rusqlite::{params, Row};

use super::{ChannelRef, Database, Entry, MigrationResult, NewEntry, Result};

const ENTRY_COLUMNS: &str = "id, provider, event_id, name, network, sport, image, upstream_ref, \
                             start_at, end_at, channel, is_linear";

impl Database {
    fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<Entry> {
        let channel: Option<String> = row.get(10)?;
        Ok(Entry {
            id: row.get(0)?,
            provider: row.get(1)?,
            event_id: row.get(2)?,
            name: row.get(3)?,
            network: row.get(4)?,
            sport: row.get(5)?,
            image: row.get(6)?,
            upstream_ref: row.get(7)?,
            start: row.get(8)?,
            end: row.get(9)?,
            channel: channel.as_deref().map(ChannelRef::parse),
            linear: row.get::<_, Option<i64>>(11)?.unwrap_or(0) != 0,
        })
    }

    fn query_entries(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Entry>> {
        let mut stmt = self.conn.prepare(sql)?;
        let entries = stmt
            .query_map(params, Self::row_to_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Insert entries discovered by `provider`, ignoring ones already stored.
    ///
    /// Entries on a linear feed are parked on their linear channel right away.
    /// Returns the number of rows actually inserted.
    pub fn insert_entries(&self, provider: &str, entries: &[NewEntry]) -> Result<usize> {
        let mut stmt = self.conn.prepare(
            "INSERT OR IGNORE INTO entries (
                provider, event_id, name, network, sport, image, upstream_ref,
                start_at, end_at, channel, is_linear
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;

        let mut inserted = 0;
        for entry in entries {
            inserted += stmt.execute(params![
                provider,
                entry.event_id,
                entry.name,
                entry.network,
                entry.sport,
                entry.image,
                entry.upstream_ref,
                entry.start,
                entry.end,
                entry.linear_channel,
                entry.linear_channel.as_ref().map(|_| 1),
            ])?;
        }
        Ok(inserted)
    }

    /// Get an entry by id.
    pub fn get_entry(&self, id: i64) -> Result<Option<Entry>> {
        let sql = format!("SELECT {} FROM entries WHERE id = ?1", ENTRY_COLUMNS);
        Ok(self.query_entries(&sql, [id])?.into_iter().next())
    }

    /// Entries without a channel, by start time then insertion order.
    pub fn get_unscheduled_entries(&self) -> Result<Vec<Entry>> {
        let sql = format!(
            "SELECT {} FROM entries WHERE channel IS NULL ORDER BY start_at ASC, id ASC",
            ENTRY_COLUMNS
        );
        self.query_entries(&sql, [])
    }

    /// Entries with a channel, ordered by channel then start time.
    pub fn get_scheduled_entries(&self) -> Result<Vec<Entry>> {
        let sql = format!(
            "SELECT {} FROM entries WHERE channel IS NOT NULL ORDER BY channel, start_at ASC",
            ENTRY_COLUMNS
        );
        self.query_entries(&sql, [])
    }

    /// Entry airing on `channel` at `now`.
    pub fn get_entry_on_channel(&self, channel: &ChannelRef, now: i64) -> Result<Option<Entry>> {
        let sql = format!(
            "SELECT {} FROM entries WHERE channel = ?1 AND start_at <= ?2 AND end_at > ?2
             ORDER BY start_at ASC, id ASC LIMIT 1",
            ENTRY_COLUMNS
        );
        Ok(self
            .query_entries(&sql, params![channel.to_string(), now])?
            .into_iter()
            .next())
    }

    /// Number of entries still carrying a linear marker.
    pub fn count_linear_entries(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE is_linear IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Persist a channel assignment.
    pub fn assign_channel(&self, entry_id: i64, channel: u32) -> Result<()> {
        self.conn.execute(
            "UPDATE entries SET channel = ?2 WHERE id = ?1",
            params![entry_id, channel.to_string()],
        )?;
        Ok(())
    }

    /// Discard every channel assignment in one transaction.
    ///
    /// Wipes the schedule, deletes entries parked on dedicated linear channels
    /// and unsets `channel`/`linear` on everything else.
    pub fn reset_channel_assignments(&self) -> Result<MigrationResult> {
        let tx = self.conn.unchecked_transaction()?;

        let slots_cleared = tx.execute("DELETE FROM schedule", [])?;

        let placeholders = vec!["?"; DEDICATED_LINEAR_CHANNELS.len()].join(", ");
        let linear_removed = tx.execute(
            &format!("DELETE FROM entries WHERE channel IN ({})", placeholders),
            rusqlite::params_from_iter(DEDICATED_LINEAR_CHANNELS.iter()),
        )?;

        let entries_reset = tx.execute(
            "UPDATE entries SET channel = NULL, is_linear = NULL
             WHERE channel IS NOT NULL OR is_linear IS NOT NULL",
            [],
        )?;

        tx.commit()?;

        Ok(MigrationResult {
            slots_cleared,
            linear_removed,
            entries_reset,
        })
    }

    /// Delete all entries of one provider.
    pub fn remove_entries_provider(&self, provider: &str) -> Result<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM entries WHERE provider = ?1", [provider])?)
    }

    /// Delete every entry.
    pub fn remove_all_entries(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM entries", [])?)
    }

    /// Delete entries that ended before `now`.
    pub fn remove_expired_entries(&self, now: i64) -> Result<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM entries WHERE end_at < ?1", [now])?)
    }
}
