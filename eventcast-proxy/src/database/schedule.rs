//! Channel schedule operations.

use super::{ChannelSlot, Database, Result};
use rusqlite::params;

impl Database {
    /// Lowest-numbered slot at or above `start_channel` that is free by `at`.
    ///
    /// Entry ranges are half-open, so a slot ending exactly at `at` is free.
    pub fn find_free_slot(&self, start_channel: u32, at: i64) -> Result<Option<ChannelSlot>> {
        let mut stmt = self.conn.prepare(
            "SELECT channel, ends_at FROM schedule
             WHERE channel >= ?1 AND ends_at <= ?2
             ORDER BY channel ASC LIMIT 1",
        )?;

        let result = stmt.query_row(params![start_channel, at], |row| {
            Ok(ChannelSlot {
                channel: row.get(0)?,
                ends_at: row.get(1)?,
            })
        });

        match result {
            Ok(slot) => Ok(Some(slot)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of slots in the schedule.
    pub fn count_slots(&self) -> Result<u32> {
        let count: u32 = self
            .conn
            .query_row("SELECT COUNT(*) FROM schedule", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Create a slot. Returns false if the channel number is already taken.
    pub fn insert_slot(&self, channel: u32, ends_at: i64) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO schedule (channel, ends_at) VALUES (?1, ?2)",
            params![channel, ends_at],
        )?;
        Ok(inserted > 0)
    }

    /// Move a slot's end forward. Never moves it backward.
    pub fn update_slot_ends_at(&self, channel: u32, ends_at: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE schedule SET ends_at = MAX(ends_at, ?2) WHERE channel = ?1",
            params![channel, ends_at],
        )?;
        Ok(())
    }

    /// Delete every slot.
    pub fn clear_slots(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM schedule", [])?)
    }

    /// All slots by channel number.
    pub fn get_slots(&self) -> Result<Vec<ChannelSlot>> {
        let mut stmt = self
            .conn
            .prepare("SELECT channel, ends_at FROM schedule ORDER BY channel ASC")?;

        let slots = stmt
            .query_map([], |row| {
                Ok(ChannelSlot {
                    channel: row.get(0)?,
                    ends_at: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(slots)
    }
}
