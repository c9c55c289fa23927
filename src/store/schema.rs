// Schema initialization and table creation

use super::IndexStore;
use anyhow::Result;
use tracing::debug;

impl IndexStore {
    /// Initialize the complete schema. Tables are created in dependency
    /// order; everything hanging off `files` cascades on delete.
    pub(super) fn initialize_schema(&mut self) -> Result<()> {
        debug!("Creating database schema");

        self.conn.execute("PRAGMA foreign_keys = ON", [])?;

        self.create_files_table()?;
        self.create_types_table()?;
        self.create_members_table()?;
        self.create_assets_table()?;
        self.create_file_content_table()?;
        self.create_trigram_postings_table()?;
        self.create_index_status_table()?;
        self.create_metadata_table()?;
        self.create_tool_calls_table()?;

        debug!("Database schema created successfully");
        Ok(())
    }

    fn create_files_table(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY,
                path TEXT NOT NULL UNIQUE,
                relative_path TEXT NOT NULL,
                project TEXT NOT NULL,
                language TEXT NOT NULL,
                module TEXT NOT NULL,
                mtime INTEGER NOT NULL,
                content_hash INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_files_project ON files(project)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_files_language ON files(language)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_files_module ON files(module)",
            [],
        )?;

        debug!("Created files table and indexes");
        Ok(())
    }

    fn create_types_table(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS types (
                id INTEGER PRIMARY KEY,
                file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                parent_name TEXT,
                line INTEGER NOT NULL,
                specifiers TEXT,
                UNIQUE(file_id, name, kind, line)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_types_name ON types(name)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_types_parent ON types(parent_name)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_types_file ON types(file_id)",
            [],
        )?;

        debug!("Created types table and indexes");
        Ok(())
    }

    fn create_members_table(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS members (
                id INTEGER PRIMARY KEY,
                file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
                owner_name TEXT NOT NULL DEFAULT '',
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                line INTEGER NOT NULL,
                signature TEXT,
                specifiers TEXT,
                UNIQUE(file_id, owner_name, name, kind, line)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_members_name ON members(name)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_members_owner ON members(owner_name)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_members_file ON members(file_id)",
            [],
        )?;

        debug!("Created members table and indexes");
        Ok(())
    }

    fn create_assets_table(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS assets (
                id INTEGER PRIMARY KEY,
                project TEXT NOT NULL,
                path TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                class TEXT NOT NULL,
                parent_class TEXT,
                folder TEXT NOT NULL DEFAULT ''
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_assets_name ON assets(name)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_assets_project ON assets(project)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_assets_folder ON assets(folder)",
            [],
        )?;

        debug!("Created assets table and indexes");
        Ok(())
    }

    fn create_file_content_table(&self) -> Result<()> {
        // Present iff the file's language class stores content.
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS file_content (
                file_id INTEGER PRIMARY KEY REFERENCES files(id) ON DELETE CASCADE,
                content BLOB NOT NULL
            )",
            [],
        )?;

        debug!("Created file_content table");
        Ok(())
    }

    fn create_trigram_postings_table(&self) -> Result<()> {
        // Posting list is a blob of sorted little-endian u32 file ids.
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS trigram_postings (
                trigram INTEGER PRIMARY KEY,
                file_ids BLOB NOT NULL
            )",
            [],
        )?;

        debug!("Created trigram_postings table");
        Ok(())
    }

    fn create_index_status_table(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS index_status (
                language TEXT PRIMARY KEY,
                state TEXT NOT NULL DEFAULT 'unknown',
                progress_current INTEGER,
                progress_total INTEGER,
                error TEXT,
                updated_at INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        debug!("Created index_status table");
        Ok(())
    }

    fn create_metadata_table(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        debug!("Created metadata table");
        Ok(())
    }

    fn create_tool_calls_table(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS tool_calls (
                id INTEGER PRIMARY KEY,
                ts INTEGER NOT NULL,
                tool TEXT NOT NULL,
                args_digest TEXT,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                result_bytes INTEGER NOT NULL DEFAULT 0,
                session_id TEXT
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tool_calls_ts ON tool_calls(ts)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tool_calls_tool ON tool_calls(tool)",
            [],
        )?;

        debug!("Created tool_calls table and indexes");
        Ok(())
    }
}
