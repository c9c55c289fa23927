//! Mirror maintainer
//!
//! Keeps a directory tree of decompressed source files for the external
//! full-text engine. Paths are rebased under `mirror_dir` by stripping the
//! longest common prefix of all indexed paths; the prefix is recomputed on
//! bootstrap and persisted in a marker file so later single-file updates
//! rebase consistently.
//!
//! The mirror is advisory: rebuilding it from the store is always safe
//! and deterministic.

use crate::store::IndexStore;
use crate::utils::paths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

const MARKER_FILE: &str = ".marker";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MirrorMarker {
    timestamp: i64,
    file_count: usize,
    path_prefix: String,
}

pub struct MirrorMaintainer {
    mirror_dir: PathBuf,
    /// Longest common prefix of indexed paths at bootstrap time.
    prefix: Mutex<String>,
}

impl MirrorMaintainer {
    pub fn new<P: AsRef<Path>>(mirror_dir: P) -> Self {
        Self {
            mirror_dir: mirror_dir.as_ref().to_path_buf(),
            prefix: Mutex::new(String::new()),
        }
    }

    pub fn mirror_dir(&self) -> &Path {
        &self.mirror_dir
    }

    pub fn path_prefix(&self) -> String {
        self.prefix.lock().unwrap().clone()
    }

    /// Rewrite the mirror from the store in one pass. Existing content is
    /// removed first; the marker records when and from how many files the
    /// mirror was last built.
    pub fn bootstrap(&self, store: &IndexStore) -> Result<usize> {
        let all_files = store.get_all_files()?;
        let prefix =
            paths::longest_common_prefix(all_files.iter().map(|f| f.path.as_str()));
        *self.prefix.lock().unwrap() = prefix.clone();

        info!(
            "Bootstrapping mirror at {} ({} files, prefix '{}')",
            self.mirror_dir.display(),
            all_files.len(),
            prefix
        );

        if self.mirror_dir.exists() {
            std::fs::remove_dir_all(&self.mirror_dir)
                .with_context(|| format!("cannot clear mirror at {}", self.mirror_dir.display()))?;
        }
        std::fs::create_dir_all(&self.mirror_dir)?;

        let mut written = 0usize;
        for file in &all_files {
            if !file.language.stores_content() {
                continue;
            }
            match store.get_file_content(file.id)? {
                Some(content) => {
                    self.write_rebased(&file.path, &content)?;
                    written += 1;
                }
                None => {
                    warn!("File {} has no stored content, skipping mirror copy", file.path);
                }
            }
        }

        let marker = MirrorMarker {
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
            file_count: written,
            path_prefix: prefix,
        };
        std::fs::write(
            self.mirror_dir.join(MARKER_FILE),
            serde_json::to_string_pretty(&marker)?,
        )?;

        info!("✅ Mirror bootstrap complete: {} files", written);
        Ok(written)
    }

    /// True when a marker from an earlier bootstrap exists; startup skips
    /// the full rewrite and trusts incremental updates in that case.
    pub fn load_marker(&self) -> bool {
        let marker_path = self.mirror_dir.join(MARKER_FILE);
        let Ok(raw) = std::fs::read_to_string(&marker_path) else {
            return false;
        };
        match serde_json::from_str::<MirrorMarker>(&raw) {
            Ok(marker) => {
                debug!(
                    "Mirror marker found: {} files, prefix '{}'",
                    marker.file_count, marker.path_prefix
                );
                *self.prefix.lock().unwrap() = marker.path_prefix;
                true
            }
            Err(e) => {
                warn!("Unreadable mirror marker, forcing bootstrap: {}", e);
                false
            }
        }
    }

    pub fn update_file(&self, path: &str, content: &str) -> Result<()> {
        self.write_rebased(path, content)
    }

    pub fn delete_file(&self, path: &str) -> Result<()> {
        let target = self.rebased(path);
        match std::fs::remove_file(&target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("cannot delete mirror file {}", target.display())),
        }
    }

    fn rebased(&self, path: &str) -> PathBuf {
        let prefix = self.prefix.lock().unwrap();
        let relative = paths::strip_path_prefix(path, &prefix);
        // Windows drive colons cannot appear in mirrored names
        let relative = relative.replace(':', "");
        self.mirror_dir.join(relative)
    }

    fn write_rebased(&self, path: &str, content: &str) -> Result<()> {
        let target = self.rebased(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, content)
            .with_context(|| format!("cannot write mirror file {}", target.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Language;
    use tempfile::TempDir;

    fn seeded_store(dir: &TempDir) -> IndexStore {
        let store = IndexStore::open(dir.path().join("test.db")).unwrap();
        store
            .upsert_file(
                "C:/Game/Source/MyGame/Pawn.h",
                "Source/MyGame/Pawn.h",
                "MyGame",
                Language::Cpp,
                "MyGame.Source.MyGame",
                1,
                Some("class AMyPawn {};\n"),
                &[],
                &[],
            )
            .unwrap();
        store
            .upsert_file(
                "C:/Game/Script/Abilities.as",
                "Script/Abilities.as",
                "MyGame",
                Language::Angelscript,
                "MyGame.Script",
                1,
                Some("class UAbility {}\n"),
                &[],
                &[],
            )
            .unwrap();
        store
    }

    #[test]
    fn bootstrap_rebases_under_common_prefix() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir);
        let mirror = MirrorMaintainer::new(dir.path().join("mirror"));

        let written = mirror.bootstrap(&store).unwrap();
        assert_eq!(written, 2);
        assert_eq!(mirror.path_prefix(), "C:/Game/");

        let pawn = dir.path().join("mirror/Source/MyGame/Pawn.h");
        assert!(pawn.exists());
        assert!(std::fs::read_to_string(pawn).unwrap().contains("AMyPawn"));
        assert!(dir.path().join("mirror/.marker").exists());
    }

    #[test]
    fn marker_survives_reload() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir);
        let mirror = MirrorMaintainer::new(dir.path().join("mirror"));
        mirror.bootstrap(&store).unwrap();

        let reloaded = MirrorMaintainer::new(dir.path().join("mirror"));
        assert!(reloaded.load_marker());
        assert_eq!(reloaded.path_prefix(), "C:/Game/");
    }

    #[test]
    fn update_and_delete_single_files() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir);
        let mirror = MirrorMaintainer::new(dir.path().join("mirror"));
        mirror.bootstrap(&store).unwrap();

        mirror
            .update_file("C:/Game/Script/New.as", "class UNew {}\n")
            .unwrap();
        let new_file = dir.path().join("mirror/Script/New.as");
        assert!(new_file.exists());

        mirror.delete_file("C:/Game/Script/New.as").unwrap();
        assert!(!new_file.exists());
        // Deleting again is a no-op
        mirror.delete_file("C:/Game/Script/New.as").unwrap();
    }
}
