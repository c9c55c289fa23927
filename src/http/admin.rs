//! Internal control endpoints
//!
//! The ingest protocol, the refresh/stop-watcher control flags, and the
//! MCP analytics sink. Analytics appends ride a bounded queue to a single
//! writer task so a chatty bridge can never block query traffic; when the
//! queue is full events are dropped, not delayed.

use super::SharedState;
use crate::error::ServiceError;
use crate::ingest::IngestRequest;
use crate::store::{self, IndexState, IndexStore, Language};
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const ANALYTICS_QUEUE_DEPTH: usize = 256;
pub const ANALYTICS_RETENTION_DAYS: i64 = 30;
/// Prune roughly once per this many appends.
const PRUNE_EVERY: u64 = 512;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallEvent {
    pub tool: String,
    #[serde(default)]
    pub args_digest: Option<String>,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub result_size: i64,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Single writer draining the analytics queue into the store.
pub fn spawn_analytics_writer(
    store: Arc<tokio::sync::Mutex<IndexStore>>,
) -> tokio::sync::mpsc::Sender<ToolCallEvent> {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<ToolCallEvent>(ANALYTICS_QUEUE_DEPTH);
    tokio::spawn(async move {
        let mut appended: u64 = 0;
        while let Some(event) = rx.recv().await {
            let store = store.lock().await;
            if let Err(e) = store.append_tool_call(
                &event.tool,
                event.args_digest.as_deref(),
                event.duration_ms,
                event.result_size,
                event.session_id.as_deref(),
            ) {
                warn!("Analytics append failed: {}", e);
                continue;
            }
            appended += 1;
            if appended % PRUNE_EVERY == 0 {
                if let Err(e) = store.prune_tool_calls(ANALYTICS_RETENTION_DAYS) {
                    warn!("Analytics retention prune failed: {}", e);
                }
            }
        }
        debug!("Analytics writer stopped");
    });
    tx
}

pub async fn mcp_tool_call(
    State(state): State<SharedState>,
    Json(event): Json<ToolCallEvent>,
) -> Result<Json<Value>, ServiceError> {
    if event.tool.is_empty() {
        return Err(ServiceError::BadRequest("missing tool name".to_string()));
    }
    // Bounded sink: drop on overflow rather than backpressure the bridge
    let accepted = state.analytics.try_send(event).is_ok();
    Ok(Json(json!({ "ok": true, "accepted": accepted })))
}

pub async fn mcp_tool_call_stats(
    State(state): State<SharedState>,
) -> Result<Json<Value>, ServiceError> {
    let aggregated = state
        .pool
        .run(|conn| store::aggregate_tool_calls(conn))
        .await
        .map_err(ServiceError::from_anyhow)?;
    Ok(Json(json!({ "tools": aggregated })))
}

pub async fn ingest(
    State(state): State<SharedState>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<Value>, ServiceError> {
    let response = state
        .ingest
        .apply(request)
        .await
        .map_err(ServiceError::from_anyhow)?;
    Ok(Json(serde_json::to_value(response).unwrap_or(Value::Null)))
}

/// Record a rebuild request for the watcher. The service itself cannot
/// rebuild (it never touches the source tree); the watcher picks this up
/// on its next heartbeat and pushes a fresh reconciliation.
pub async fn refresh(
    State(state): State<SharedState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ServiceError> {
    let params = super::Params(raw);
    let language = params.language()?;

    let store = state.store.lock().await;
    let scope = language.map(|l| l.as_str().to_string()).unwrap_or_else(|| "all".to_string());
    store
        .set_metadata("refresh_requested", &scope)
        .map_err(ServiceError::from_anyhow)?;

    match language {
        Some(language) => {
            store
                .set_index_status(language, IndexState::Indexing, None, None)
                .map_err(ServiceError::from_anyhow)?;
        }
        None => {
            for language in Language::ALL {
                store
                    .set_index_status(language, IndexState::Indexing, None, None)
                    .map_err(ServiceError::from_anyhow)?;
            }
        }
    }
    drop(store);

    info!("Refresh requested (scope: {})", scope);
    Ok(Json(json!({ "ok": true, "scope": scope })))
}

/// Sets a flag the watcher polls on its next heartbeat (surfaced in
/// /summary).
pub async fn stop_watcher(State(state): State<SharedState>) -> Json<Value> {
    state
        .stop_watcher
        .store(true, std::sync::atomic::Ordering::Relaxed);
    info!("Watcher stop requested");
    Json(json!({ "ok": true }))
}
