//! Database module for the event store.
//!
//! This module provides SQLite-based persistent storage for:
//! - Discovered entries and their channel assignments
//! - The live channel schedule (one slot per channel number)
//! - Provider enable state and credentials
//! - The channel numbering policy

mod entry;
mod models;
mod provider;
mod schedule;
mod schema;

pub use models::*;

use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Database error types.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Invalid channel policy: {0}")]
    InvalidPolicy(String),
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Database handle type shared between the web server and background tasks.
pub type DatabaseHandle = Arc<tokio::sync::Mutex<Database>>;

/// Main database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;

        let db = Self { conn };
        db.initialize_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        let db = Self { conn };
        db.initialize_schema()?;

        Ok(db)
    }

    /// Wrap the database in a shared handle.
    pub fn into_handle(self) -> DatabaseHandle {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// Initialize the database schema.
    fn initialize_schema(&self) -> Result<()> {
        self.conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(())
    }

    /// Get the underlying connection (for advanced queries).
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

/// Channel numbering policy storage.
impl Database {
    /// Get the channel numbering policy, seeding it with `default` on first use.
    pub fn get_channel_policy(&self, default: ChannelNumberingPolicy) -> Result<ChannelNumberingPolicy> {
        let mut stmt = self.conn.prepare(
            "SELECT start_channel, num_of_channels, use_linear FROM channel_policy WHERE id = 1",
        )?;

        let result = stmt.query_row([], |row| {
            Ok(ChannelNumberingPolicy {
                start_channel: row.get(0)?,
                num_of_channels: row.get(1)?,
                use_linear: row.get::<_, i64>(2)? != 0,
            })
        });

        match result {
            Ok(policy) => Ok(policy),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                self.update_channel_policy(&default)?;
                log::info!(
                    "Seeded channel policy: start={}, count={}, linear={}",
                    default.start_channel,
                    default.num_of_channels,
                    default.use_linear
                );
                Ok(default)
            }
            Err(e) => Err(DatabaseError::Sqlite(e)),
        }
    }

    /// Update the channel numbering policy.
    pub fn update_channel_policy(&self, policy: &ChannelNumberingPolicy) -> Result<()> {
        if policy.start_channel == 0 || policy.num_of_channels == 0 {
            return Err(DatabaseError::InvalidPolicy(format!(
                "start_channel and num_of_channels must be positive (got {} and {})",
                policy.start_channel, policy.num_of_channels
            )));
        }
        self.conn.execute(
            "INSERT OR REPLACE INTO channel_policy (id, start_channel, num_of_channels, use_linear, updated_at)
             VALUES (1, ?1, ?2, ?3, strftime('%s', 'now'))",
            rusqlite::params![
                policy.start_channel,
                policy.num_of_channels,
                policy.use_linear as i32
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.connection().is_autocommit());
    }

    #[test]
    fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eventcast.db");
        {
            let db = Database::open(&path).unwrap();
            db.set_provider_enabled("gotham", true).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert!(db.is_provider_enabled("gotham").unwrap());
    }

    #[test]
    fn test_channel_policy_seed_and_update() {
        let db = Database::open_in_memory().unwrap();
        let seed = ChannelNumberingPolicy { start_channel: 10, num_of_channels: 50, use_linear: true };

        assert_eq!(db.get_channel_policy(seed).unwrap(), seed);
        // Seed is only used once
        assert_eq!(db.get_channel_policy(ChannelNumberingPolicy::default()).unwrap(), seed);

        let updated = ChannelNumberingPolicy { use_linear: false, ..seed };
        db.update_channel_policy(&updated).unwrap();
        assert_eq!(db.get_channel_policy(seed).unwrap(), updated);
    }

    #[test]
    fn test_channel_policy_rejects_zero() {
        let db = Database::open_in_memory().unwrap();
        let bad = ChannelNumberingPolicy { start_channel: 1, num_of_channels: 0, use_linear: false };
        assert!(matches!(db.update_channel_policy(&bad), Err(DatabaseError::InvalidPolicy(_))));
    }
}
