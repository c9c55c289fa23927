//! HTTP API
//!
//! Loopback JSON API, one port per workspace. Hot lookups are answered
//! straight from the memory-index snapshot; cold reads go through the
//! query pool; grep runs on its own dedicated worker. CORS is open for
//! local tooling.

pub mod admin;
pub mod batch;
pub mod context;
pub mod explain;
pub mod grep;
pub mod handlers;

use crate::config::Config;
use crate::engine::ZoektDriver;
use crate::error::ServiceError;
use crate::ingest::IngestService;
use crate::memory::MemoryIndex;
use crate::mirror::MirrorMaintainer;
use crate::pool::QueryPool;
use crate::store::{IndexStore, Language, MemberKind, TypeKind};
use axum::routing::{get, post};
use axum::Router;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;

pub struct AppState {
    pub config: Config,
    pub db_path: PathBuf,
    pub store: Arc<tokio::sync::Mutex<IndexStore>>,
    pub pool: Arc<QueryPool>,
    pub memory: Arc<MemoryIndex>,
    pub mirror: Arc<MirrorMaintainer>,
    pub engine: Arc<ZoektDriver>,
    pub ingest: Arc<IngestService>,
    pub started_at: Instant,
    /// Set by /internal/stop-watcher, polled by the watcher heartbeat.
    pub stop_watcher: AtomicBool,
    /// Bounded queue into the analytics writer task.
    pub analytics: tokio::sync::mpsc::Sender<admin::ToolCallEvent>,
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/stats", get(handlers::stats))
        .route("/summary", get(handlers::summary))
        .route("/find-type", get(handlers::find_type))
        .route("/find-member", get(handlers::find_member))
        .route("/find-children", get(handlers::find_children))
        .route("/find-file", get(handlers::find_file))
        .route("/browse-module", get(handlers::browse_module))
        .route("/list-modules", get(handlers::list_modules))
        .route("/find-asset", get(handlers::find_asset))
        .route("/browse-assets", get(handlers::browse_assets))
        .route("/list-asset-folders", get(handlers::list_asset_folders))
        .route("/asset-stats", get(handlers::asset_stats))
        .route("/grep", get(grep::grep))
        .route("/explain-type", get(explain::explain_type))
        .route("/batch", post(batch::batch))
        .route("/refresh", post(admin::refresh))
        .route("/internal/ingest", post(admin::ingest))
        .route("/internal/mcp-tool-call", post(admin::mcp_tool_call))
        .route("/internal/mcp-tool-call/stats", get(admin::mcp_tool_call_stats))
        .route("/internal/stop-watcher", post(admin::stop_watcher))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Query-parameter bag with the coercion rules every non-trivial endpoint
/// shares: "true"/"false" become booleans, decimal strings become
/// integers, absent parameters fall back to documented defaults.
pub struct Params(pub HashMap<String, String>);

impl Params {
    pub fn required(&self, key: &str) -> Result<&str, ServiceError> {
        match self.0.get(key).map(String::as_str).filter(|v| !v.is_empty()) {
            Some(value) => Ok(value),
            None => Err(ServiceError::BadRequest(format!(
                "missing required parameter: {}",
                key
            ))),
        }
    }

    pub fn string(&self, key: &str) -> Option<String> {
        self.0.get(key).filter(|v| !v.is_empty()).cloned()
    }

    pub fn boolean(&self, key: &str, default: bool) -> Result<bool, ServiceError> {
        match self.0.get(key).map(String::as_str) {
            None | Some("") => Ok(default),
            Some("true") => Ok(true),
            Some("false") => Ok(false),
            Some(other) => Err(ServiceError::BadRequest(format!(
                "parameter {} must be true or false, got: {}",
                key, other
            ))),
        }
    }

    pub fn integer(&self, key: &str, default: i64) -> Result<i64, ServiceError> {
        match self.0.get(key).map(String::as_str) {
            None | Some("") => Ok(default),
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                ServiceError::BadRequest(format!(
                    "parameter {} must be an integer, got: {}",
                    key, raw
                ))
            }),
        }
    }

    pub fn limit(&self, key: &str, default: usize, cap: usize) -> Result<usize, ServiceError> {
        let value = self.integer(key, default as i64)?;
        if value < 0 {
            return Err(ServiceError::BadRequest(format!(
                "parameter {} must not be negative",
                key
            )));
        }
        Ok((value as usize).min(cap))
    }

    pub fn language(&self) -> Result<Option<Language>, ServiceError> {
        match self.string("language") {
            None => Ok(None),
            Some(raw) => Language::parse(&raw)
                .map(Some)
                .map_err(|e| ServiceError::BadRequest(e.to_string())),
        }
    }

    pub fn type_kind(&self) -> Result<Option<TypeKind>, ServiceError> {
        match self.string("kind") {
            None => Ok(None),
            Some(raw) => TypeKind::parse(&raw)
                .map(Some)
                .map_err(|e| ServiceError::BadRequest(e.to_string())),
        }
    }

    pub fn member_kind(&self) -> Result<Option<MemberKind>, ServiceError> {
        match self.string("memberKind") {
            None => Ok(None),
            Some(raw) => MemberKind::parse(&raw)
                .map(Some)
                .map_err(|e| ServiceError::BadRequest(e.to_string())),
        }
    }

    /// Project filter, validated against the configured project set.
    pub fn project(&self, state: &AppState) -> Result<Option<String>, ServiceError> {
        match self.string("project") {
            None => Ok(None),
            Some(project) => {
                if state.config.knows_project(&project) {
                    Ok(Some(project))
                } else {
                    Err(ServiceError::BadRequest(format!(
                        "unknown project: {}",
                        project
                    )))
                }
            }
        }
    }
}
