//! Endpoint handlers served from the memory-index snapshot
//!
//! Every handler takes one snapshot up front and answers from it; context
//! attachment is the only store read and goes through the query pool.

use super::context::ContentCache;
use super::{Params, SharedState};
use crate::error::ServiceError;
use crate::memory::lookup::{self, MemberFilter, MemberHit, TypeFilter, TypeHit};
use crate::memory::Snapshot;
use crate::store::{self, FileRecord};
use axum::extract::{Query, State};
use axum::Json;
use serde_json::{json, Value};
use std::collections::HashMap;

pub const DEFAULT_MAX_RESULTS: usize = 20;
pub const MAX_RESULTS_CAP: usize = 200;
pub const MAX_CONTEXT_LINES: i64 = 50;

/// Empty result envelope while the memory index is still loading.
pub fn loading_response(snapshot: &Snapshot) -> Option<Json<Value>> {
    if snapshot.loaded {
        None
    } else {
        Some(Json(json!({
            "results": [],
            "hints": ["index still loading"],
        })))
    }
}

pub fn type_hit_json(hit: &TypeHit, context: Option<super::context::SourceContext>) -> Value {
    let entry = &hit.entry;
    let mut value = json!({
        "name": entry.name,
        "kind": entry.kind,
        "project": entry.project,
        "language": entry.language,
        "path": entry.path,
        "relativePath": entry.relative_path,
        "module": entry.module,
        "line": entry.line,
        "score": hit.score,
    });
    let map = value.as_object_mut().unwrap();
    if let Some(ref parent) = entry.parent_name {
        map.insert("parentName".to_string(), json!(parent));
    }
    if !entry.specifiers.is_empty() {
        map.insert("specifiers".to_string(), json!(entry.specifiers));
    }
    if let Some(ref implementation) = hit.implementation_path {
        map.insert("implementationPath".to_string(), json!(implementation));
    }
    if let Some(context) = context {
        map.insert("context".to_string(), serde_json::to_value(context).unwrap_or(Value::Null));
    }
    value
}

pub fn member_hit_json(
    hit: &MemberHit,
    signature: Option<String>,
    context: Option<super::context::SourceContext>,
) -> Value {
    let entry = &hit.entry;
    let mut value = json!({
        "name": entry.name,
        "ownerName": entry.owner_name,
        "memberKind": entry.kind,
        "project": entry.project,
        "language": entry.language,
        "path": entry.path,
        "line": entry.line,
        "score": hit.score,
    });
    let map = value.as_object_mut().unwrap();
    if !entry.specifiers.is_empty() {
        map.insert("specifiers".to_string(), json!(entry.specifiers));
    }
    if let Some(signature) = signature {
        map.insert("signature".to_string(), json!(signature));
    }
    if let Some(context) = context {
        map.insert("context".to_string(), serde_json::to_value(context).unwrap_or(Value::Null));
    }
    value
}

pub fn file_json(file: &FileRecord) -> Value {
    json!({
        "file": file.path,
        "name": crate::utils::paths::file_name(&file.path),
        "relativePath": file.relative_path,
        "project": file.project,
        "language": file.language,
        "module": file.module,
    })
}

fn asset_json(asset: &store::AssetRecord, score: Option<f32>) -> Value {
    let mut value = json!({
        "name": asset.name,
        "path": asset.path,
        "project": asset.project,
        "class": asset.class,
        "folder": asset.folder,
    });
    let map = value.as_object_mut().unwrap();
    if let Some(ref parent) = asset.parent_class {
        map.insert("parentClass".to_string(), json!(parent));
    }
    if let Some(score) = score {
        map.insert("score".to_string(), json!(score));
    }
    value
}

// ---- liveness and projections -----------------------------------------

/// Liveness. Never suspends on the store, the pool, or the engine; it
/// must answer within tens of milliseconds while grep and ingest are both
/// busy.
pub async fn health(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
        "memory": { "residentBytes": resident_bytes() },
        "memoryIndex": { "loaded": state.memory.is_loaded() },
        "searchEngine": if state.engine.is_healthy() { "zoekt" } else { "internal" },
    }))
}

#[cfg(target_os = "linux")]
fn resident_bytes() -> u64 {
    std::fs::read_to_string("/proc/self/statm")
        .ok()
        .and_then(|statm| {
            statm
                .split_whitespace()
                .nth(1)
                .and_then(|pages| pages.parse::<u64>().ok())
        })
        .map(|pages| pages * 4096)
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn resident_bytes() -> u64 {
    0
}

pub async fn status(State(state): State<SharedState>) -> Result<Json<Value>, ServiceError> {
    let statuses = state
        .pool
        .run(|conn| store::read_index_status(conn))
        .await
        .map_err(ServiceError::from_anyhow)?;
    Ok(Json(json!({ "statuses": statuses })))
}

pub async fn stats(State(state): State<SharedState>) -> Result<Json<Value>, ServiceError> {
    let stats = state
        .store
        .lock()
        .await
        .get_stats()
        .map_err(ServiceError::from_anyhow)?;
    Ok(Json(serde_json::to_value(stats).unwrap_or(Value::Null)))
}

pub async fn summary(State(state): State<SharedState>) -> Result<Json<Value>, ServiceError> {
    let (stats, last_build) = {
        let store = state.store.lock().await;
        let stats = store.get_stats().map_err(ServiceError::from_anyhow)?;
        let last_build = store
            .get_metadata("last_build")
            .map_err(ServiceError::from_anyhow)?;
        (stats, last_build)
    };
    let statuses = state
        .pool
        .run(|conn| store::read_index_status(conn))
        .await
        .map_err(ServiceError::from_anyhow)?;

    let mut projects = state.config.project_names();
    for (project, _) in &stats.files_by_project {
        if !projects.contains(project) {
            projects.push(project.clone());
        }
    }
    let languages: Vec<String> = stats
        .files_by_language
        .iter()
        .map(|(language, _)| language.clone())
        .collect();

    Ok(Json(json!({
        "generatedAt": chrono_now(),
        "stats": stats,
        "projects": projects,
        "languages": languages,
        "lastBuild": last_build,
        "statuses": statuses,
        "watcher": {
            "stopRequested": state.stop_watcher.load(std::sync::atomic::Ordering::Relaxed),
            "debounceMs": state.config.watcher.debounce_ms,
            "reconcileIntervalMinutes": state.config.watcher.reconcile_interval_minutes,
        },
    })))
}

fn chrono_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// ---- type and member lookups ------------------------------------------

pub async fn find_type(
    State(state): State<SharedState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ServiceError> {
    let params = Params(raw);
    let snapshot = state.memory.snapshot();
    if let Some(loading) = loading_response(&snapshot) {
        return Ok(loading);
    }

    let name = params.required("name")?;
    let fuzzy = params.boolean("fuzzy", false)?;
    let filter = TypeFilter {
        project: params.project(&state)?,
        language: params.language()?,
        kind: params.type_kind()?,
    };
    let limit = params.limit("maxResults", DEFAULT_MAX_RESULTS, MAX_RESULTS_CAP)?;
    let context_lines = params.integer("contextLines", 0)?.clamp(0, MAX_CONTEXT_LINES) as u32;

    let hits = lookup::find_type(&snapshot, name, fuzzy, &filter, limit);

    let mut cache = ContentCache::default();
    let mut results = Vec::with_capacity(hits.len());
    for hit in &hits {
        let context = if context_lines > 0 {
            cache
                .window(&state.pool, hit.entry.file_id, hit.entry.line, context_lines)
                .await
                .map_err(ServiceError::from_anyhow)?
        } else {
            None
        };
        results.push(type_hit_json(hit, context));
    }

    Ok(Json(json!({ "results": results, "totalMatches": results.len() })))
}

pub async fn find_member(
    State(state): State<SharedState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ServiceError> {
    let params = Params(raw);
    let snapshot = state.memory.snapshot();
    if let Some(loading) = loading_response(&snapshot) {
        return Ok(loading);
    }

    let name = params.required("name")?;
    let fuzzy = params.boolean("fuzzy", false)?;
    let include_signatures = params.boolean("includeSignatures", false)?;
    let filter = MemberFilter {
        project: params.project(&state)?,
        language: params.language()?,
        containing_type: params.string("containingType"),
        kind: params.member_kind()?,
    };
    let limit = params.limit("maxResults", DEFAULT_MAX_RESULTS, MAX_RESULTS_CAP)?;
    let context_lines = params.integer("contextLines", 0)?.clamp(0, MAX_CONTEXT_LINES) as u32;

    let hits = lookup::find_member(&snapshot, name, fuzzy, &filter, limit);

    let mut cache = ContentCache::default();
    let mut results = Vec::with_capacity(hits.len());
    for hit in &hits {
        let signature = if include_signatures {
            cache
                .declaration_line(&state.pool, hit.entry.file_id, hit.entry.line)
                .await
                .map_err(ServiceError::from_anyhow)?
                .or_else(|| hit.entry.signature.clone())
        } else {
            None
        };
        let context = if context_lines > 0 {
            cache
                .window(&state.pool, hit.entry.file_id, hit.entry.line, context_lines)
                .await
                .map_err(ServiceError::from_anyhow)?
        } else {
            None
        };
        results.push(member_hit_json(hit, signature, context));
    }

    Ok(Json(json!({ "results": results, "totalMatches": results.len() })))
}

pub async fn find_children(
    State(state): State<SharedState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ServiceError> {
    let params = Params(raw);
    let snapshot = state.memory.snapshot();
    if let Some(loading) = loading_response(&snapshot) {
        return Ok(loading);
    }

    let name = params.required("name")?;
    let recursive = params.boolean("recursive", false)?;
    let filter = TypeFilter {
        project: params.project(&state)?,
        language: params.language()?,
        kind: params.type_kind()?,
    };
    let limit = params.limit("maxResults", 50, MAX_RESULTS_CAP)?;

    let children = lookup::find_children(&snapshot, name, recursive, &filter, limit);
    let results: Vec<Value> = children
        .iter()
        .map(|entry| {
            type_hit_json(
                &TypeHit {
                    entry: entry.clone(),
                    score: 0.0,
                    implementation_path: None,
                },
                None,
            )
        })
        .collect();

    Ok(Json(json!({
        "parent": name,
        "recursive": recursive,
        "results": results,
        "totalMatches": results.len(),
    })))
}

pub async fn find_file(
    State(state): State<SharedState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ServiceError> {
    let params = Params(raw);
    let snapshot = state.memory.snapshot();
    if let Some(loading) = loading_response(&snapshot) {
        return Ok(loading);
    }

    let name = params.required("name")?;
    let project = params.project(&state)?;
    let language = params.language()?;
    let limit = params.limit("maxResults", 30, MAX_RESULTS_CAP)?;

    let hits = lookup::find_file(&snapshot, name, project.as_deref(), language, limit);
    let results: Vec<Value> = hits
        .iter()
        .filter_map(|hit| snapshot.files.entries.get(&hit.id))
        .map(|file| file_json(file))
        .collect();

    Ok(Json(json!({ "results": results, "totalMatches": results.len() })))
}

// ---- module browsing ---------------------------------------------------

pub async fn browse_module(
    State(state): State<SharedState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ServiceError> {
    let params = Params(raw);
    let snapshot = state.memory.snapshot();
    if let Some(loading) = loading_response(&snapshot) {
        return Ok(loading);
    }

    let module = params.required("module")?;
    let limit = params.limit("maxResults", 100, 1000)?;

    let browse = lookup::browse_module(&snapshot, module);
    let types: Vec<Value> = browse
        .type_ids
        .iter()
        .take(limit)
        .filter_map(|id| snapshot.types.entries.get(id))
        .map(|entry| {
            type_hit_json(
                &TypeHit {
                    entry: entry.clone(),
                    score: 0.0,
                    implementation_path: None,
                },
                None,
            )
        })
        .collect();
    let files: Vec<Value> = browse
        .file_ids
        .iter()
        .take(limit)
        .filter_map(|id| snapshot.files.entries.get(id))
        .map(|file| file_json(file))
        .collect();

    Ok(Json(json!({
        "module": module,
        "types": types,
        "files": files,
        "totalTypes": browse.type_ids.len(),
        "totalFiles": browse.file_ids.len(),
    })))
}

pub async fn list_modules(
    State(state): State<SharedState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ServiceError> {
    let params = Params(raw);
    let snapshot = state.memory.snapshot();
    if let Some(loading) = loading_response(&snapshot) {
        return Ok(loading);
    }

    let parent = params.string("parent").unwrap_or_default();
    let depth = params.integer("depth", 1)?.clamp(1, 10) as u32;

    let modules = lookup::list_modules(&snapshot, &parent, depth);
    Ok(Json(json!({ "parent": parent, "modules": modules })))
}

// ---- asset queries -----------------------------------------------------

/// Asset lookups default to fuzzy matching (substring with prefix
/// preference); pass fuzzy=false for exact names. This is the opposite
/// default from type queries, and callers depend on it.
pub async fn find_asset(
    State(state): State<SharedState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ServiceError> {
    let params = Params(raw);
    let snapshot = state.memory.snapshot();
    if let Some(loading) = loading_response(&snapshot) {
        return Ok(loading);
    }

    let name = params.required("name")?;
    let fuzzy = params.boolean("fuzzy", true)?;
    let project = params.project(&state)?;
    let limit = params.limit("maxResults", 30, MAX_RESULTS_CAP)?;

    let hits = lookup::find_asset(&snapshot, name, fuzzy, project.as_deref(), limit);
    let results: Vec<Value> = hits
        .iter()
        .map(|hit| asset_json(&hit.entry, Some(hit.score)))
        .collect();

    Ok(Json(json!({ "results": results, "totalMatches": results.len() })))
}

pub async fn browse_assets(
    State(state): State<SharedState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ServiceError> {
    let params = Params(raw);
    let snapshot = state.memory.snapshot();
    if let Some(loading) = loading_response(&snapshot) {
        return Ok(loading);
    }

    let folder = params.required("folder")?;
    let recursive = params.boolean("recursive", false)?;
    let project = params.project(&state)?;
    let limit = params.limit("maxResults", 100, 1000)?;

    let assets = lookup::browse_assets(&snapshot, folder, project.as_deref(), recursive, limit);
    let results: Vec<Value> = assets.iter().map(|a| asset_json(a, None)).collect();

    Ok(Json(json!({
        "folder": folder,
        "results": results,
        "totalMatches": results.len(),
    })))
}

pub async fn list_asset_folders(
    State(state): State<SharedState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ServiceError> {
    let params = Params(raw);
    let snapshot = state.memory.snapshot();
    if let Some(loading) = loading_response(&snapshot) {
        return Ok(loading);
    }

    let parent = params.string("parent").unwrap_or_default();
    let folders: Vec<Value> = lookup::list_asset_folders(&snapshot, &parent)
        .into_iter()
        .map(|(folder, count)| json!({ "folder": folder, "assetCount": count }))
        .collect();

    Ok(Json(json!({ "parent": parent, "folders": folders })))
}

pub async fn asset_stats(State(state): State<SharedState>) -> Result<Json<Value>, ServiceError> {
    let snapshot = state.memory.snapshot();
    if let Some(loading) = loading_response(&snapshot) {
        return Ok(loading);
    }
    let stats = lookup::asset_stats(&snapshot);
    Ok(Json(serde_json::to_value(stats).unwrap_or(Value::Null)))
}
