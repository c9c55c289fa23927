//! Ingest service
//!
//! The only path that mutates durable state. The watcher pushes batches of
//! parsed files, assets, and deletions; each batch runs in one store
//! transaction, and only after commit are the memory index, the mirror,
//! and the (debounced) engine reindex updated. Concurrent ingests
//! serialize FIFO behind one writer lock.
//!
//! Replaying a batch is a no-op: upserts key on path with a content-hash
//! short-circuit, and deletes fail soft.

use crate::config::Config;
use crate::engine::ZoektDriver;
use crate::error::ServiceError;
use crate::memory::MemoryIndex;
use crate::mirror::MirrorMaintainer;
use crate::store::files::FileUpsert;
use crate::store::{AssetRecord, IndexState, IndexStore, Language, MemberRecord, TypeDeclRecord};
use crate::utils::paths;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const UNAVAILABLE_RETRIES: usize = 2;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestFile {
    pub path: String,
    #[serde(default)]
    pub relative_path: Option<String>,
    pub project: String,
    pub language: Language,
    /// Omitted when language is `content`.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub mtime: i64,
    #[serde(default)]
    pub types: Vec<TypeDeclRecord>,
    #[serde(default)]
    pub members: Vec<MemberRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestDelete {
    pub path: String,
    /// Tombstone form: delete everything under the path prefix.
    #[serde(default)]
    pub prefix: bool,
}

/// Progress marker for a per-language reconciliation; updates
/// index_status without touching data.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStatusMarker {
    pub language: Language,
    pub state: IndexState,
    #[serde(default)]
    pub current: Option<i64>,
    #[serde(default)]
    pub total: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    #[serde(default)]
    pub files: Vec<IngestFile>,
    #[serde(default)]
    pub assets: Vec<AssetRecord>,
    #[serde(default)]
    pub deletes: Vec<IngestDelete>,
    #[serde(default)]
    pub status: Vec<IngestStatusMarker>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub ok: bool,
    pub files_upserted: usize,
    pub assets_upserted: usize,
    pub deleted: usize,
    pub duration_ms: u64,
}

pub struct IngestService {
    store: Arc<tokio::sync::Mutex<IndexStore>>,
    memory: Arc<MemoryIndex>,
    mirror: Arc<MirrorMaintainer>,
    engine: Arc<ZoektDriver>,
    config: Config,
}

struct BatchOutcome {
    upserts: Vec<FileUpsert>,
    removed_file_ids: Vec<i64>,
    removed_file_paths: Vec<String>,
    upserted_assets: Vec<AssetRecord>,
    removed_asset_paths: Vec<String>,
    removed_asset_prefixes: Vec<String>,
    deleted: usize,
}

impl IngestService {
    pub fn new(
        store: Arc<tokio::sync::Mutex<IndexStore>>,
        memory: Arc<MemoryIndex>,
        mirror: Arc<MirrorMaintainer>,
        engine: Arc<ZoektDriver>,
        config: Config,
    ) -> Self {
        Self {
            store,
            memory,
            mirror,
            engine,
            config,
        }
    }

    /// Apply one batch. Store mutations are all-or-nothing; the memory
    /// index, mirror, and reindex trigger only see committed state.
    pub async fn apply(&self, request: IngestRequest) -> Result<IngestResponse> {
        let started = Instant::now();

        for file in &request.files {
            if !self.config.knows_project(&file.project) {
                return Err(anyhow!(ServiceError::BadRequest(format!(
                    "unknown project: {}",
                    file.project
                ))));
            }
        }

        // FIFO writer lock: one transaction, one snapshot publication
        let store = self.store.lock().await;
        store.check_write_fence()?;

        let outcome = tokio::task::block_in_place(|| {
            let mut attempt = 0;
            loop {
                match run_batch(&store, &request) {
                    Ok(outcome) => return Ok(outcome),
                    Err(err) => {
                        let transient = matches!(
                            err.downcast_ref::<ServiceError>(),
                            Some(ServiceError::Unavailable(_))
                        );
                        if transient && attempt < UNAVAILABLE_RETRIES {
                            attempt += 1;
                            warn!("Ingest batch retry {} after: {}", attempt, err);
                            std::thread::sleep(std::time::Duration::from_millis(
                                50 * attempt as u64,
                            ));
                            continue;
                        }
                        return Err(err);
                    }
                }
            }
        })?;

        store.invalidate_stats();

        // Status markers are not part of batch atomicity; they describe
        // watcher progress, not data
        for marker in &request.status {
            store.set_index_status(
                marker.language,
                marker.state,
                marker.current.zip(marker.total),
                marker.error.as_deref(),
            )?;
        }
        drop(store);

        self.memory.ingest_diff(
            &outcome.removed_file_ids,
            &outcome.upserts,
            &outcome.upserted_assets,
            &outcome.removed_asset_paths,
            &outcome.removed_asset_prefixes,
        )?;

        let mut mirror_touched = false;
        for upsert in &outcome.upserts {
            if !upsert.content_changed || !upsert.file.language.stores_content() {
                continue;
            }
            if let Some(source) = request
                .files
                .iter()
                .find(|f| paths::normalize_slashes(&f.path) == upsert.file.path)
            {
                if let Some(ref content) = source.content {
                    if let Err(e) = self.mirror.update_file(&upsert.file.path, content) {
                        warn!("Mirror update failed for {}: {}", upsert.file.path, e);
                    }
                    mirror_touched = true;
                }
            }
        }
        for path in &outcome.removed_file_paths {
            if let Err(e) = self.mirror.delete_file(path) {
                warn!("Mirror delete failed for {}: {}", path, e);
            }
            mirror_touched = true;
        }

        if mirror_touched {
            self.engine.clone().trigger_reindex();
        }

        let response = IngestResponse {
            ok: true,
            files_upserted: outcome.upserts.len(),
            assets_upserted: outcome.upserted_assets.len(),
            deleted: outcome.deleted,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "Ingest batch: {} files, {} assets, {} deleted in {}ms",
            response.files_upserted, response.assets_upserted, response.deleted, response.duration_ms
        );
        Ok(response)
    }
}

/// The transactional section. Rolls back on any error.
fn run_batch(store: &IndexStore, request: &IngestRequest) -> Result<BatchOutcome> {
    store.begin_transaction()?;

    let result = (|| -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome {
            upserts: Vec::new(),
            removed_file_ids: Vec::new(),
            removed_file_paths: Vec::new(),
            upserted_assets: Vec::new(),
            removed_asset_paths: Vec::new(),
            removed_asset_prefixes: Vec::new(),
            deleted: 0,
        };

        // Deletes first so a delete+reinsert within one batch lands in
        // insert order
        for delete in &request.deletes {
            let path = paths::normalize_slashes(&delete.path);
            if delete.prefix {
                let ids = collect_ids_by_prefix(store, &path)?;
                for (id, file_path) in ids {
                    outcome.removed_file_ids.push(id);
                    outcome.removed_file_paths.push(file_path);
                }
                outcome.deleted += store.delete_by_prefix(&path)?;
                outcome.deleted += store.delete_assets_by_prefix(&path)?;
                outcome.removed_asset_prefixes.push(path);
            } else {
                if let Some(file) = store.get_file_by_path(&path)? {
                    outcome.removed_file_ids.push(file.id);
                    outcome.removed_file_paths.push(file.path);
                }
                outcome.deleted += store.delete_by_path(&path)?;
                outcome.deleted += store.delete_asset_by_path(&path)?;
                outcome.removed_asset_paths.push(path);
            }
        }

        for file in &request.files {
            let path = paths::normalize_slashes(&file.path);
            let relative = file
                .relative_path
                .as_deref()
                .map(paths::normalize_slashes)
                .unwrap_or_else(|| paths::file_name(&path).to_string());
            let module = paths::derive_module(&file.project, &relative);
            let content = if file.language.stores_content() {
                file.content.as_deref()
            } else {
                None
            };

            let upsert = store.upsert_file(
                &path,
                &relative,
                &file.project,
                file.language,
                &module,
                file.mtime,
                content,
                &file.types,
                &file.members,
            )?;
            outcome.upserts.push(upsert);
        }

        if !request.assets.is_empty() {
            outcome.upserted_assets = store.upsert_assets(&request.assets)?;
        }

        if !request.files.is_empty() || !request.assets.is_empty() || outcome.deleted > 0 {
            store.touch_last_build()?;
        }

        Ok(outcome)
    })();

    match result {
        Ok(outcome) => {
            store.commit_transaction()?;
            debug!("Ingest transaction committed");
            Ok(outcome)
        }
        Err(err) => {
            if let Err(rollback_err) = store.rollback_transaction() {
                warn!("Rollback after failed ingest also failed: {}", rollback_err);
            }
            Err(err)
        }
    }
}

fn collect_ids_by_prefix(store: &IndexStore, prefix: &str) -> Result<Vec<(i64, String)>> {
    let all = store.get_all_files()?;
    Ok(all
        .into_iter()
        .filter(|f| f.path.starts_with(prefix))
        .map(|f| (f.id, f.path))
        .collect())
}
