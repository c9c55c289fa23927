// Asset operations
//
// Assets have no content and no postings; they are upserted by
// content-browser path, which is globally unique (names are not).

use super::types::*;
use super::IndexStore;
use anyhow::Result;
use rusqlite::{params, Connection};

impl IndexStore {
    /// Upsert a batch of assets by path. Runs inside the caller's ingest
    /// transaction. Returns the rows with assigned ids.
    pub fn upsert_assets(&self, assets: &[AssetRecord]) -> Result<Vec<AssetRecord>> {
        let mut stored = Vec::with_capacity(assets.len());
        let mut stmt = self.conn().prepare(
            "INSERT INTO assets (project, path, name, class, parent_class, folder)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(path) DO UPDATE SET
                 project = excluded.project,
                 name = excluded.name,
                 class = excluded.class,
                 parent_class = excluded.parent_class,
                 folder = excluded.folder",
        )?;
        for asset in assets {
            let folder = if asset.folder.is_empty() {
                folder_of(&asset.path)
            } else {
                asset.folder.clone()
            };
            stmt.execute(params![
                asset.project,
                asset.path,
                asset.name,
                asset.class,
                asset.parent_class,
                folder,
            ])
            .map_err(|e| self.classify_write_error(e))?;

            let id: i64 = self.conn().query_row(
                "SELECT id FROM assets WHERE path = ?1",
                [&asset.path],
                |row| row.get(0),
            )?;
            let mut record = asset.clone();
            record.id = id;
            record.folder = folder;
            stored.push(record);
        }
        Ok(stored)
    }

    pub fn delete_asset_by_path(&self, path: &str) -> Result<usize> {
        let deleted = self
            .conn()
            .execute("DELETE FROM assets WHERE path = ?1", [path])
            .map_err(|e| self.classify_write_error(e))?;
        Ok(deleted)
    }

    pub fn delete_assets_by_prefix(&self, prefix: &str) -> Result<usize> {
        let escaped = prefix
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let deleted = self
            .conn()
            .execute(
                "DELETE FROM assets WHERE path LIKE ?1 ESCAPE '\\'",
                [format!("{}%", escaped)],
            )
            .map_err(|e| self.classify_write_error(e))?;
        Ok(deleted)
    }
}

/// Folder prefix of a content-browser path (`/Game/Weapons/Rifle` ->
/// `/Game/Weapons`).
pub fn folder_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(pos) => path[..pos].to_string(),
    }
}

pub fn read_all_assets(conn: &Connection) -> Result<Vec<AssetRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, project, path, name, class, parent_class, folder FROM assets",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(AssetRecord {
            id: row.get(0)?,
            project: row.get(1)?,
            path: row.get(2)?,
            name: row.get(3)?,
            class: row.get(4)?,
            parent_class: row.get(5)?,
            folder: row.get(6)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
