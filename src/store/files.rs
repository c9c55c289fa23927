// File, type and member operations
//
// `upsert_file` is the single write path for source files. It runs inside
// the ingest batch transaction owned by the caller and keeps the trigram
// posting lists minimally diffed against the stored content.

use super::types::*;
use super::{unix_now, IndexStore};
use crate::trigram;
use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use tracing::debug;

/// Outcome of a single file upsert, consumed by the memory-index patch
/// and the mirror update.
#[derive(Debug, Clone)]
pub struct FileUpsert {
    pub file: FileRecord,
    pub types: Vec<TypeDeclRecord>,
    pub members: Vec<MemberRecord>,
    /// False when the content hash matched and only mtime/decls were
    /// refreshed; the mirror and postings were left untouched.
    pub content_changed: bool,
}

impl IndexStore {
    /// Insert or update one file with its declarations and content.
    ///
    /// Content-hash match short-circuits the expensive work: postings,
    /// content blob and mirror stay untouched, but mtime is refreshed and
    /// declarations are replaced (parser output can change without a
    /// content change when the parser itself changed).
    ///
    /// The (project, language) pair is immutable for a path's lifetime: a
    /// mismatch is handled as delete + insert.
    pub fn upsert_file(
        &self,
        path: &str,
        relative_path: &str,
        project: &str,
        language: Language,
        module: &str,
        mtime: i64,
        content: Option<&str>,
        types: &[TypeDeclRecord],
        members: &[MemberRecord],
    ) -> Result<FileUpsert> {
        let existing = self
            .conn()
            .query_row(
                "SELECT id, content_hash, project, language FROM files WHERE path = ?1",
                [path],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        // A file that changed project or language class is a new identity
        let existing = match existing {
            Some((id, _, ref old_project, ref old_language))
                if old_project != project || old_language != language.as_str() =>
            {
                debug!(
                    "File {} moved project/language ({}:{} -> {}:{}), re-creating",
                    path, old_project, old_language, project, language.as_str()
                );
                self.delete_file_by_id(id)?;
                None
            }
            other => other,
        };

        let new_hash = content.map(|c| trigram::content_hash(c.as_bytes())).unwrap_or(0);

        let (file_id, content_changed) = match existing {
            Some((id, old_hash, _, _)) if old_hash == new_hash => {
                self.conn()
                    .execute(
                        "UPDATE files SET mtime = ?1, relative_path = ?2, module = ?3 WHERE id = ?4",
                        params![mtime, relative_path, module, id],
                    )
                    .map_err(|e| self.classify_write_error(e))?;
                (id, false)
            }
            Some((id, _, _, _)) => {
                let old_trigrams = self.stored_trigrams(id)?;
                let new_trigrams = content
                    .map(trigram::extract_trigrams)
                    .unwrap_or_default();
                self.conn()
                    .execute(
                        "UPDATE files SET relative_path = ?1, module = ?2, mtime = ?3,
                                          content_hash = ?4
                         WHERE id = ?5",
                        params![relative_path, module, mtime, new_hash, id],
                    )
                    .map_err(|e| self.classify_write_error(e))?;
                self.update_postings_for_file(id, &old_trigrams, &new_trigrams)?;
                self.store_content(id, content)?;
                (id, true)
            }
            None => {
                self.conn()
                    .execute(
                        "INSERT INTO files
                             (path, relative_path, project, language, module, mtime, content_hash)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            path,
                            relative_path,
                            project,
                            language.as_str(),
                            module,
                            mtime,
                            new_hash
                        ],
                    )
                    .map_err(|e| self.classify_write_error(e))?;
                let id = self.conn().last_insert_rowid();
                let new_trigrams = content
                    .map(trigram::extract_trigrams)
                    .unwrap_or_default();
                self.update_postings_for_file(id, &HashSet::new(), &new_trigrams)?;
                self.store_content(id, content)?;
                (id, true)
            }
        };

        let (types, members) = self.replace_decls(file_id, types, members)?;

        Ok(FileUpsert {
            file: FileRecord {
                id: file_id,
                path: path.to_string(),
                relative_path: relative_path.to_string(),
                project: project.to_string(),
                language,
                module: module.to_string(),
                mtime,
                content_hash: new_hash,
            },
            types,
            members,
            content_changed,
        })
    }

    /// Replace all declarations for a file in one pass (delete-then-insert
    /// under the same file id). Returns the rows with assigned ids.
    fn replace_decls(
        &self,
        file_id: i64,
        types: &[TypeDeclRecord],
        members: &[MemberRecord],
    ) -> Result<(Vec<TypeDeclRecord>, Vec<MemberRecord>)> {
        self.conn()
            .execute("DELETE FROM types WHERE file_id = ?1", [file_id])?;
        self.conn()
            .execute("DELETE FROM members WHERE file_id = ?1", [file_id])?;

        let mut stored_types = Vec::with_capacity(types.len());
        {
            let mut stmt = self.conn().prepare(
                "INSERT INTO types (file_id, name, kind, parent_name, line, specifiers)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for decl in types {
                stmt.execute(params![
                    file_id,
                    decl.name,
                    decl.kind.as_str(),
                    decl.parent_name,
                    decl.line,
                    specifiers_to_column(&decl.specifiers),
                ])
                .map_err(|e| self.classify_write_error(e))?;
                let mut stored = decl.clone();
                stored.id = self.conn().last_insert_rowid();
                stored.file_id = file_id;
                stored_types.push(stored);
            }
        }

        let mut stored_members = Vec::with_capacity(members.len());
        {
            let mut stmt = self.conn().prepare(
                "INSERT INTO members
                     (file_id, owner_name, name, kind, line, signature, specifiers)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for member in members {
                stmt.execute(params![
                    file_id,
                    member.owner_name,
                    member.name,
                    member.kind.as_str(),
                    member.line,
                    member.signature,
                    specifiers_to_column(&member.specifiers),
                ])
                .map_err(|e| self.classify_write_error(e))?;
                let mut stored = member.clone();
                stored.id = self.conn().last_insert_rowid();
                stored.file_id = file_id;
                stored_members.push(stored);
            }
        }

        Ok((stored_types, stored_members))
    }

    fn store_content(&self, file_id: i64, content: Option<&str>) -> Result<()> {
        match content {
            Some(text) => {
                let compressed = zstd::stream::encode_all(text.as_bytes(), 3)
                    .map_err(|e| anyhow!("content compression failed: {}", e))?;
                self.conn()
                    .execute(
                        "INSERT OR REPLACE INTO file_content (file_id, content) VALUES (?1, ?2)",
                        params![file_id, compressed],
                    )
                    .map_err(|e| self.classify_write_error(e))?;
            }
            None => {
                self.conn()
                    .execute("DELETE FROM file_content WHERE file_id = ?1", [file_id])?;
            }
        }
        Ok(())
    }

    /// Trigrams of the content currently stored for a file (empty when no
    /// content is stored).
    fn stored_trigrams(&self, file_id: i64) -> Result<HashSet<u32>> {
        match read_file_content(self.conn(), file_id)? {
            Some(text) => Ok(trigram::extract_trigrams(&text)),
            None => Ok(HashSet::new()),
        }
    }

    /// Delete one path with all dependents. Fails soft: deleting an
    /// unknown path is a no-op, and doing it twice equals doing it once.
    pub fn delete_by_path(&self, path: &str) -> Result<usize> {
        let id: Option<i64> = self
            .conn()
            .query_row("SELECT id FROM files WHERE path = ?1", [path], |row| row.get(0))
            .optional()?;
        match id {
            Some(id) => {
                self.delete_file_by_id(id)?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    /// Tombstone form: delete every file whose path starts with `prefix`.
    /// Used when the watcher reconciles a project root.
    pub fn delete_by_prefix(&self, prefix: &str) -> Result<usize> {
        let escaped = prefix
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("{}%", escaped);

        let ids: Vec<i64> = {
            let mut stmt = self
                .conn()
                .prepare("SELECT id FROM files WHERE path LIKE ?1 ESCAPE '\\'")?;
            let rows = stmt.query_map([&pattern], |row| row.get(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        for &id in &ids {
            self.delete_file_by_id(id)?;
        }
        Ok(ids.len())
    }

    fn delete_file_by_id(&self, file_id: i64) -> Result<()> {
        // Postings are derived from content; strip this id before the
        // cascade removes the blob.
        let trigrams = self.stored_trigrams(file_id)?;
        self.update_postings_for_file(file_id, &trigrams, &HashSet::new())?;
        self.conn()
            .execute("DELETE FROM files WHERE id = ?1", [file_id])
            .map_err(|e| self.classify_write_error(e))?;
        Ok(())
    }

    pub fn get_file_by_path(&self, path: &str) -> Result<Option<FileRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, path, relative_path, project, language, module, mtime, content_hash
             FROM files WHERE path = ?1",
        )?;
        match stmt.query_row([path], map_file_row).optional()? {
            Some(record) => Ok(Some(record?)),
            None => Ok(None),
        }
    }

    pub fn get_all_files(&self) -> Result<Vec<FileRecord>> {
        read_all_files(self.conn(), None, None)
    }

    pub fn get_file_content(&self, file_id: i64) -> Result<Option<String>> {
        read_file_content(self.conn(), file_id)
    }

    pub fn update_file_mtime(&self, path: &str, mtime: i64) -> Result<()> {
        self.conn()
            .execute("UPDATE files SET mtime = ?1 WHERE path = ?2", params![mtime, path])
            .map_err(|e| self.classify_write_error(e))?;
        Ok(())
    }

    pub fn touch_last_build(&self) -> Result<()> {
        self.set_metadata("last_build", &unix_now().to_string())
    }
}

fn map_file_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<FileRecord>> {
    let id: i64 = row.get(0)?;
    let path: String = row.get(1)?;
    let relative_path: String = row.get(2)?;
    let project: String = row.get(3)?;
    let language: String = row.get(4)?;
    let module: String = row.get(5)?;
    let mtime: i64 = row.get(6)?;
    let content_hash: i64 = row.get(7)?;
    Ok(Language::parse(&language).map(|language| FileRecord {
        id,
        path,
        relative_path,
        project,
        language,
        module,
        mtime,
        content_hash,
    }))
}

// ---- connection-level reads ------------------------------------------
//
// These take a plain Connection so pool and grep workers can use their own
// read-only handles.

pub fn read_file_content(conn: &Connection, file_id: i64) -> Result<Option<String>> {
    let blob: Option<Vec<u8>> = conn
        .query_row(
            "SELECT content FROM file_content WHERE file_id = ?1",
            [file_id],
            |row| row.get(0),
        )
        .optional()?;
    match blob {
        Some(blob) => {
            let raw = zstd::stream::decode_all(&blob[..])
                .map_err(|e| anyhow!("content decompression failed: {}", e))?;
            Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
        }
        None => Ok(None),
    }
}

pub fn read_all_files(
    conn: &Connection,
    project: Option<&str>,
    language: Option<Language>,
) -> Result<Vec<FileRecord>> {
    let mut sql = String::from(
        "SELECT id, path, relative_path, project, language, module, mtime, content_hash
         FROM files WHERE 1=1",
    );
    let mut params: Vec<String> = Vec::new();
    if let Some(project) = project {
        sql.push_str(" AND project = ?");
        params.push(project.to_string());
    }
    if let Some(language) = language {
        sql.push_str(" AND language = ?");
        params.push(language.as_str().to_string());
    }
    sql.push_str(" ORDER BY id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), map_file_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row??);
    }
    Ok(out)
}

pub fn read_all_types(conn: &Connection) -> Result<Vec<TypeDeclRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, file_id, name, kind, parent_name, line, specifiers FROM types",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, u32>(5)?,
            row.get::<_, Option<String>>(6)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (id, file_id, name, kind, parent_name, line, specifiers) = row?;
        out.push(TypeDeclRecord {
            id,
            file_id,
            name,
            kind: TypeKind::parse(&kind)?,
            parent_name,
            line,
            specifiers: specifiers_from_column(specifiers),
        });
    }
    Ok(out)
}

pub fn read_all_members(conn: &Connection) -> Result<Vec<MemberRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, file_id, owner_name, name, kind, line, signature, specifiers FROM members",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, u32>(5)?,
            row.get::<_, Option<String>>(6)?,
            row.get::<_, Option<String>>(7)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (id, file_id, owner_name, name, kind, line, signature, specifiers) = row?;
        out.push(MemberRecord {
            id,
            file_id,
            owner_name,
            name,
            kind: MemberKind::parse(&kind)?,
            line,
            signature,
            specifiers: specifiers_from_column(specifiers),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, IndexStore) {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::open(dir.path().join("test.db")).unwrap();
        (dir, store)
    }

    fn sample_type(name: &str, line: u32) -> TypeDeclRecord {
        TypeDeclRecord {
            id: 0,
            file_id: 0,
            name: name.to_string(),
            kind: TypeKind::Class,
            parent_name: Some("AActor".to_string()),
            line,
            specifiers: vec!["BlueprintType".to_string()],
        }
    }

    #[test]
    fn upsert_then_reload_round_trips() {
        let (_dir, store) = open_temp();
        let result = store
            .upsert_file(
                "C:/Game/Source/MyGame/Pawn.h",
                "Source/MyGame/Pawn.h",
                "MyGame",
                Language::Cpp,
                "MyGame.Source.MyGame",
                1_700_000_000,
                Some("class AMyPawn : public APawn {};\n"),
                &[sample_type("AMyPawn", 1)],
                &[],
            )
            .unwrap();

        assert!(result.content_changed);
        assert_eq!(result.types.len(), 1);
        assert!(result.types[0].id > 0);

        let file = store
            .get_file_by_path("C:/Game/Source/MyGame/Pawn.h")
            .unwrap()
            .unwrap();
        assert_eq!(file.project, "MyGame");
        assert_eq!(file.language, Language::Cpp);
        assert_ne!(file.content_hash, 0);

        let content = store.get_file_content(file.id).unwrap().unwrap();
        assert!(content.contains("AMyPawn"));
    }

    #[test]
    fn hash_match_skips_content_work() {
        let (_dir, store) = open_temp();
        let content = "class AMyPawn {};\n";
        let first = store
            .upsert_file(
                "/p/Pawn.h",
                "Pawn.h",
                "MyGame",
                Language::Cpp,
                "MyGame",
                100,
                Some(content),
                &[sample_type("AMyPawn", 1)],
                &[],
            )
            .unwrap();
        assert!(first.content_changed);

        let second = store
            .upsert_file(
                "/p/Pawn.h",
                "Pawn.h",
                "MyGame",
                Language::Cpp,
                "MyGame",
                200,
                Some(content),
                &[sample_type("AMyPawn", 1)],
                &[],
            )
            .unwrap();
        assert!(!second.content_changed);
        assert_eq!(second.file.id, first.file.id);
        assert_eq!(second.file.mtime, 200);
    }

    #[test]
    fn delete_cascades_and_is_idempotent() {
        let (_dir, store) = open_temp();
        store
            .upsert_file(
                "/p/A.h",
                "A.h",
                "P",
                Language::Cpp,
                "P",
                1,
                Some("class AActor {};\n"),
                &[sample_type("AActor", 1)],
                &[],
            )
            .unwrap();

        assert_eq!(store.delete_by_path("/p/A.h").unwrap(), 1);
        assert_eq!(store.delete_by_path("/p/A.h").unwrap(), 0);
        assert!(store.get_file_by_path("/p/A.h").unwrap().is_none());
        assert!(read_all_types(store.conn()).unwrap().is_empty());

        // Postings were stripped too
        let candidates = store
            .get_trigram_candidates(&trigram::extract_trigrams("AActor"), None, None)
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn prefix_delete_removes_subtree_only() {
        let (_dir, store) = open_temp();
        for path in ["/root/ProjA/a.h", "/root/ProjA/b.h", "/root/ProjB/c.h"] {
            store
                .upsert_file(path, "x.h", "P", Language::Cpp, "P", 1, Some("class X {};\n"), &[], &[])
                .unwrap();
        }
        assert_eq!(store.delete_by_prefix("/root/ProjA/").unwrap(), 2);
        let left = store.get_all_files().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].path, "/root/ProjB/c.h");
    }

    #[test]
    fn trigram_candidates_follow_content_changes() {
        let (_dir, store) = open_temp();
        let upsert = store
            .upsert_file(
                "/p/T.cpp",
                "T.cpp",
                "P",
                Language::Cpp,
                "P",
                1,
                Some("void DestroyActor();\n"),
                &[],
                &[],
            )
            .unwrap();

        let hit = store
            .get_trigram_candidates(&trigram::extract_trigrams("DestroyActor"), None, None)
            .unwrap();
        assert_eq!(hit, vec![upsert.file.id]);

        // Rewrite the file without the old identifier
        store
            .upsert_file(
                "/p/T.cpp",
                "T.cpp",
                "P",
                Language::Cpp,
                "P",
                2,
                Some("void SpawnActor();\n"),
                &[],
                &[],
            )
            .unwrap();

        let stale = store
            .get_trigram_candidates(&trigram::extract_trigrams("DestroyActor"), None, None)
            .unwrap();
        assert!(stale.is_empty());
        let fresh = store
            .get_trigram_candidates(&trigram::extract_trigrams("SpawnActor"), None, None)
            .unwrap();
        assert_eq!(fresh, vec![upsert.file.id]);
    }

    #[test]
    fn project_change_recreates_file_identity() {
        let (_dir, store) = open_temp();
        let first = store
            .upsert_file("/p/A.h", "A.h", "ProjA", Language::Cpp, "ProjA", 1, Some("x\n"), &[], &[])
            .unwrap();
        let second = store
            .upsert_file("/p/A.h", "A.h", "ProjB", Language::Cpp, "ProjB", 2, Some("x\n"), &[], &[])
            .unwrap();
        assert_ne!(first.file.id, second.file.id);
        assert_eq!(store.get_all_files().unwrap().len(), 1);
    }

    #[test]
    fn content_class_files_store_no_content() {
        let (_dir, store) = open_temp();
        let upsert = store
            .upsert_file(
                "/p/Game.uasset",
                "Game.uasset",
                "P",
                Language::Content,
                "P",
                1,
                None,
                &[],
                &[],
            )
            .unwrap();
        assert!(store.get_file_content(upsert.file.id).unwrap().is_none());
        assert_eq!(upsert.file.content_hash, 0);
    }
}
