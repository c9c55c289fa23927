// Cached row-count stats
//
// /stats and /summary hit this on every bridge tool call; the counts are
// cached in-process with a short TTL and invalidated by ingest.

use super::types::StoreStats;
use super::IndexStore;
use anyhow::Result;
use rusqlite::Connection;
use std::time::{Duration, Instant};
use tracing::debug;

pub const STATS_TTL: Duration = Duration::from_secs(5);

impl IndexStore {
    pub fn get_stats(&self) -> Result<StoreStats> {
        {
            let cache = self.stats_cache.lock().unwrap();
            if let Some((at, ref stats)) = *cache {
                if at.elapsed() < STATS_TTL {
                    return Ok(stats.clone());
                }
            }
        }

        let stats = compute_stats(self.conn())?;
        *self.stats_cache.lock().unwrap() = Some((Instant::now(), stats.clone()));
        Ok(stats)
    }

    /// Called after every committed ingest batch.
    pub fn invalidate_stats(&self) {
        debug!("Invalidating cached stats after ingest");
        *self.stats_cache.lock().unwrap() = None;
    }
}

pub fn compute_stats(conn: &Connection) -> Result<StoreStats> {
    let total_files: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?;
    let total_types: i64 = conn.query_row("SELECT COUNT(*) FROM types", [], |r| r.get(0))?;
    let total_members: i64 = conn.query_row("SELECT COUNT(*) FROM members", [], |r| r.get(0))?;
    let total_assets: i64 = conn.query_row("SELECT COUNT(*) FROM assets", [], |r| r.get(0))?;

    let mut by_language = Vec::new();
    {
        let mut stmt =
            conn.prepare("SELECT language, COUNT(*) FROM files GROUP BY language ORDER BY language")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            by_language.push(row?);
        }
    }

    let mut by_project = Vec::new();
    {
        let mut stmt =
            conn.prepare("SELECT project, COUNT(*) FROM files GROUP BY project ORDER BY project")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            by_project.push(row?);
        }
    }

    Ok(StoreStats {
        total_files,
        total_types,
        total_members,
        total_assets,
        files_by_language: by_language,
        files_by_project: by_project,
    })
}
