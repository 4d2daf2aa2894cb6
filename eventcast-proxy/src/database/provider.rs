//! Provider state operations.

use super::{Database, DatabaseError, ProviderRecord, Result};
use rusqlite::params;

impl Database {
    /// Register a provider if it is not known yet.
    ///
    /// Existing rows keep their enable state.
    pub fn ensure_provider(&self, name: &str, enabled: bool) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO providers (name, enabled) VALUES (?1, ?2)",
            params![name, enabled as i32],
        )?;
        Ok(())
    }

    /// Whether a provider is enabled. Unknown providers are disabled.
    pub fn is_provider_enabled(&self, name: &str) -> Result<bool> {
        let result = self.conn.query_row(
            "SELECT enabled FROM providers WHERE name = ?1",
            [name],
            |row| row.get::<_, i32>(0),
        );

        match result {
            Ok(enabled) => Ok(enabled != 0),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Set a provider's enable state, creating the row if needed.
    pub fn set_provider_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        self.conn.execute(
            "INSERT INTO providers (name, enabled) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET
                enabled = excluded.enabled,
                updated_at = strftime('%s', 'now')",
            params![name, enabled as i32],
        )?;
        Ok(())
    }

    /// Get all providers.
    pub fn get_providers(&self) -> Result<Vec<ProviderRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, enabled, tokens, updated_at FROM providers ORDER BY name",
        )?;

        let providers = stmt
            .query_map([], |row| {
                Ok(ProviderRecord {
                    name: row.get(0)?,
                    enabled: row.get::<_, i32>(1)? != 0,
                    tokens: row.get(2)?,
                    updated_at: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(providers)
    }

    /// Get a provider's stored credential blob.
    pub fn get_provider_tokens(&self, name: &str) -> Result<Option<String>> {
        let result = self.conn.query_row(
            "SELECT tokens FROM providers WHERE name = ?1",
            [name],
            |row| row.get::<_, Option<String>>(0),
        );

        match result {
            Ok(tokens) => Ok(tokens),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace a provider's credential blob.
    pub fn set_provider_tokens(&self, name: &str, tokens: Option<&str>) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE providers SET tokens = ?2, updated_at = strftime('%s', 'now') WHERE name = ?1",
            params![name, tokens],
        )?;
        if updated == 0 {
            return Err(DatabaseError::ProviderNotFound(name.to_string()));
        }
        Ok(())
    }
}
