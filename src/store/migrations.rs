// Schema migration system for database versioning

use super::IndexStore;
use anyhow::{anyhow, Result};
use rusqlite::params;
use tracing::{debug, info};

/// Current schema version - increment when adding migrations
pub const LATEST_SCHEMA_VERSION: i32 = 3;

impl IndexStore {
    /// Run all pending schema migrations
    pub(super) fn run_migrations(&mut self) -> Result<()> {
        self.create_schema_version_table()?;

        let current_version = self.get_schema_version()?;
        let target_version = LATEST_SCHEMA_VERSION;

        if current_version >= target_version {
            debug!(
                "Database schema is up-to-date at version {}",
                current_version
            );
            return Ok(());
        }

        info!(
            "Running schema migrations: version {} -> {}",
            current_version, target_version
        );

        for version in (current_version + 1)..=target_version {
            info!("Applying migration to version {}", version);
            self.apply_migration(version)?;
            self.record_migration(version)?;
        }

        Ok(())
    }

    fn create_schema_version_table(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL,
                description TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    pub fn get_schema_version(&self) -> Result<i32> {
        let table_exists: bool = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master
             WHERE type='table' AND name='schema_version'",
            [],
            |row| {
                let count: i32 = row.get(0)?;
                Ok(count > 0)
            },
        )?;

        if !table_exists {
            return Ok(0);
        }

        let version: Result<i32, rusqlite::Error> = self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        );

        Ok(version.unwrap_or(0))
    }

    fn apply_migration(&mut self, version: i32) -> Result<()> {
        match version {
            // Versions 1 and 2 predate the open-source history of this
            // schema; a fresh database is created directly at the current
            // shape, so they are no-ops kept for databases that recorded
            // them before the tables stabilized.
            1 => {}
            2 => {}
            3 => self.migration_003_add_tool_calls_session()?,
            _ => return Err(anyhow!("Unknown migration version: {}", version)),
        }
        Ok(())
    }

    fn record_migration(&self, version: i32) -> Result<()> {
        let description = match version {
            1 => "Initial schema",
            2 => "Asset folder column and folder index",
            3 => "Add session_id to tool_calls",
            _ => "Unknown migration",
        };

        let now = super::unix_now();
        self.conn.execute(
            "INSERT OR REPLACE INTO schema_version (version, applied_at, description)
             VALUES (?1, ?2, ?3)",
            params![version, now, description],
        )?;
        Ok(())
    }

    fn migration_003_add_tool_calls_session(&self) -> Result<()> {
        let has_column: bool = self
            .conn
            .prepare("SELECT 1 FROM pragma_table_info('tool_calls') WHERE name = 'session_id'")?
            .exists([])?;
        if !has_column {
            self.conn
                .execute("ALTER TABLE tool_calls ADD COLUMN session_id TEXT", [])?;
        }
        Ok(())
    }
}
