// Durable store - SQLite source of truth
//!
//! This module provides persistent storage for files, type declarations,
//! members, assets, compressed file content, and trigram posting lists.
//! The in-memory query index is derived from it and must be
//! reconstructable from it at any time.
//!
//! Key properties:
//! - All ingest writes are transactional per batch
//! - Cascade deletes keep dependents consistent with their file
//! - Posting lists are diffed minimally on content change
//! - Row-count stats are cached with a short TTL and invalidated on ingest

pub mod assets;
pub mod files;
mod migrations;
pub mod postings;
mod schema;
mod stats;
pub mod types;

pub use stats::STATS_TTL;
pub use types::*;

use crate::error::ServiceError;
use anyhow::{anyhow, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// The main database connection and operations.
pub struct IndexStore {
    conn: Connection,
    file_path: PathBuf,
    stats_cache: std::sync::Mutex<Option<(Instant, StoreStats)>>,
    /// Set when a unique-constraint violation surfaced; the service keeps
    /// serving reads but refuses new writes until inspection.
    write_fence: std::sync::atomic::AtomicBool,
}

impl IndexStore {
    /// Open (or create) the store and bring the schema up to date.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let file_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening index database at: {}", file_path.display());

        let conn = Connection::open(&file_path)
            .map_err(|e| anyhow!(ServiceError::Unavailable(format!("cannot open store: {}", e))))?;

        // WAL before anything else so schema work is already journaled that way
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute("PRAGMA synchronous = NORMAL", [])?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let mut store = Self {
            conn,
            file_path,
            stats_cache: std::sync::Mutex::new(None),
            write_fence: std::sync::atomic::AtomicBool::new(false),
        };
        store.initialize_schema()?;
        store.run_migrations()?;
        store.seed_index_status()?;

        info!("Index database ready");
        Ok(store)
    }

    /// Open a second, read-only connection to the same database file.
    /// Query-pool workers each own one of these.
    pub fn open_read_only<P: AsRef<Path>>(db_path: P) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            db_path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| anyhow!(ServiceError::Unavailable(format!("cannot open store: {}", e))))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    pub fn db_path(&self) -> &Path {
        &self.file_path
    }

    pub(super) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Refuse writes after a corruption sighting; reads continue.
    pub fn check_write_fence(&self) -> Result<()> {
        if self.write_fence.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(anyhow!(ServiceError::Corrupt(
                "store refused write after earlier invariant violation".to_string()
            )));
        }
        Ok(())
    }

    pub(super) fn raise_write_fence(&self) {
        self.write_fence
            .store(true, std::sync::atomic::Ordering::Relaxed);
    }

    /// Map a rusqlite error to the service taxonomy: unique-constraint
    /// violations are logic bugs (Corrupt, writes fenced), everything else
    /// is transient (Unavailable, ingest retries at its outer layer).
    pub(super) fn classify_write_error(&self, err: rusqlite::Error) -> anyhow::Error {
        if let rusqlite::Error::SqliteFailure(code, ref msg) = err {
            if code.code == rusqlite::ErrorCode::ConstraintViolation {
                self.raise_write_fence();
                return anyhow!(ServiceError::Corrupt(format!(
                    "unique constraint violated: {}",
                    msg.as_deref().unwrap_or("unknown")
                )));
            }
        }
        anyhow!(ServiceError::Unavailable(format!("store write failed: {}", err)))
    }

    fn seed_index_status(&self) -> Result<()> {
        for language in Language::ALL {
            self.conn.execute(
                "INSERT OR IGNORE INTO index_status (language, state, updated_at)
                 VALUES (?1, 'unknown', ?2)",
                rusqlite::params![language.as_str(), unix_now()],
            )?;
        }
        Ok(())
    }

    // ---- index status -------------------------------------------------

    pub fn get_index_status(&self) -> Result<Vec<IndexStatusRecord>> {
        read_index_status(&self.conn)
    }

    pub fn set_index_status(
        &self,
        language: Language,
        state: IndexState,
        progress: Option<(i64, i64)>,
        error: Option<&str>,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO index_status
                     (language, state, progress_current, progress_total, error, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(language) DO UPDATE SET
                     state = excluded.state,
                     progress_current = excluded.progress_current,
                     progress_total = excluded.progress_total,
                     error = excluded.error,
                     updated_at = excluded.updated_at",
                rusqlite::params![
                    language.as_str(),
                    state.as_str(),
                    progress.map(|p| p.0),
                    progress.map(|p| p.1),
                    error,
                    unix_now()
                ],
            )
            .map_err(|e| self.classify_write_error(e))?;
        Ok(())
    }

    // ---- metadata -----------------------------------------------------

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM metadata WHERE key = ?1")?;
        match stmt.query_row([key], |row| row.get::<_, String>(0)) {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(anyhow!("metadata read failed: {}", e)),
        }
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
                [key, value],
            )
            .map_err(|e| self.classify_write_error(e))?;
        Ok(())
    }

    // ---- analytics sink -----------------------------------------------

    pub fn append_tool_call(
        &self,
        tool: &str,
        args_digest: Option<&str>,
        duration_ms: i64,
        result_bytes: i64,
        session_id: Option<&str>,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO tool_calls (ts, tool, args_digest, duration_ms, result_bytes, session_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![unix_now(), tool, args_digest, duration_ms, result_bytes, session_id],
            )
            .map_err(|e| self.classify_write_error(e))?;
        Ok(())
    }

    /// Drop analytics rows older than the retention window.
    pub fn prune_tool_calls(&self, retention_days: i64) -> Result<usize> {
        let cutoff = unix_now() - retention_days * 86_400;
        let pruned = self
            .conn
            .execute("DELETE FROM tool_calls WHERE ts < ?1", [cutoff])
            .map_err(|e| self.classify_write_error(e))?;
        if pruned > 0 {
            debug!("Pruned {} tool-call rows past retention", pruned);
        }
        Ok(pruned)
    }

    // ---- transactions -------------------------------------------------
    //
    // Explicit statements instead of rusqlite's borrowing Transaction
    // type: the ingest batch spans many store methods and owns the
    // commit/rollback decision.

    pub fn begin_transaction(&self) -> Result<()> {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| anyhow!(ServiceError::Unavailable(format!("cannot begin tx: {}", e))))?;
        Ok(())
    }

    pub fn commit_transaction(&self) -> Result<()> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| anyhow!(ServiceError::Unavailable(format!("cannot commit tx: {}", e))))?;
        Ok(())
    }

    pub fn rollback_transaction(&self) -> Result<()> {
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| anyhow!(ServiceError::Unavailable(format!("cannot rollback tx: {}", e))))?;
        Ok(())
    }

    /// Passive WAL checkpoint; called on shutdown so the WAL does not grow
    /// without bound across long-running sessions.
    pub fn checkpoint_wal(&self) -> Result<(i64, i64, i64)> {
        let result = self.conn.query_row(
            "PRAGMA wal_checkpoint(PASSIVE)",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)),
        )?;
        Ok(result)
    }
}

/// Per-language status read usable from any connection (pool workers read
/// through their own handles).
pub fn read_index_status(conn: &Connection) -> Result<Vec<IndexStatusRecord>> {
    let mut stmt = conn.prepare(
        "SELECT language, state, progress_current, progress_total, error, updated_at
         FROM index_status ORDER BY language",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<i64>>(2)?,
            row.get::<_, Option<i64>>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, i64>(5)?,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (language, state, current, total, error, updated_at) = row?;
        out.push(IndexStatusRecord {
            language: Language::parse(&language)?,
            state: IndexState::parse(&state),
            progress_current: current,
            progress_total: total,
            error,
            updated_at,
        });
    }
    Ok(out)
}

/// Per-tool aggregation over the analytics sink.
pub fn aggregate_tool_calls(conn: &Connection) -> Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT tool, COUNT(*), AVG(duration_ms), SUM(result_bytes), MAX(ts)
         FROM tool_calls GROUP BY tool ORDER BY COUNT(*) DESC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(serde_json::json!({
            "tool": row.get::<_, String>(0)?,
            "calls": row.get::<_, i64>(1)?,
            "avgDurationMs": row.get::<_, f64>(2)?,
            "totalResultBytes": row.get::<_, i64>(3)?,
            "lastCallAt": row.get::<_, i64>(4)?,
        }))
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
