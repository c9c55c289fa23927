//! Batch endpoint
//!
//! Up to ten inner queries executed in sequence, each dispatched through
//! a closed method table. A failing inner query errors its own result
//! entry and never affects siblings. Result paths are stripped of the
//! indexed prefix so downstream tools see project-relative paths.

use super::{grep, handlers, SharedState};
use crate::error::ServiceError;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

pub const MAX_BATCH_QUERIES: usize = 10;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    #[serde(default)]
    pub queries: Vec<BatchQuery>,
    /// Forwarded into every inner type/member query.
    #[serde(default)]
    pub context_lines: Option<i64>,
    #[serde(default)]
    pub include_signatures: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct BatchQuery {
    pub method: String,
    #[serde(default)]
    pub params: HashMap<String, Value>,
}

/// The closed set of inner methods; anything else errors its entry.
const METHODS: &[&str] = &[
    "find-type",
    "find-member",
    "find-children",
    "find-file",
    "browse-module",
    "list-modules",
    "grep",
    "find-asset",
    "browse-assets",
];

pub async fn batch(
    State(state): State<SharedState>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<Value>, ServiceError> {
    if request.queries.is_empty() {
        return Err(ServiceError::BadRequest(
            "batch requires at least one query".to_string(),
        ));
    }
    if request.queries.len() > MAX_BATCH_QUERIES {
        return Err(ServiceError::BadRequest(format!(
            "batch accepts at most {} queries, got {}",
            MAX_BATCH_QUERIES,
            request.queries.len()
        )));
    }

    // The mirror prefix is pinned at bootstrap; a service that started
    // empty derives it from the current snapshot instead
    let mut prefix = state.mirror.path_prefix();
    if prefix.is_empty() {
        let snapshot = state.memory.snapshot();
        prefix = crate::utils::paths::longest_common_prefix(
            snapshot.files.entries.values().map(|f| f.path.as_str()),
        );
    }

    let mut results = Vec::with_capacity(request.queries.len());
    for query in &request.queries {
        let mut outcome = dispatch(&state, query, &request).await;
        if let Ok(ref mut value) = outcome {
            strip_prefix_in_place(value, &prefix);
        }
        results.push(match outcome {
            Ok(value) => json!({ "method": query.method, "result": value }),
            Err(e) => json!({ "method": query.method, "error": e.to_string() }),
        });
    }

    Ok(Json(json!({ "results": results })))
}

async fn dispatch(
    state: &SharedState,
    query: &BatchQuery,
    request: &BatchRequest,
) -> Result<Value, ServiceError> {
    if !METHODS.contains(&query.method.as_str()) {
        return Err(ServiceError::BadRequest(format!(
            "unknown batch method: {}",
            query.method
        )));
    }

    let mut params: HashMap<String, String> = query
        .params
        .iter()
        .map(|(key, value)| (key.clone(), scalar_to_string(value)))
        .collect();

    // Top-level context/signature options ride into the lookups that
    // understand them
    if matches!(query.method.as_str(), "find-type" | "find-member") {
        if let Some(context_lines) = request.context_lines {
            params
                .entry("contextLines".to_string())
                .or_insert_with(|| context_lines.to_string());
        }
    }
    if query.method == "find-member" {
        if let Some(include) = request.include_signatures {
            params
                .entry("includeSignatures".to_string())
                .or_insert_with(|| include.to_string());
        }
    }

    let state = State(state.clone());
    let params = Query(params);
    let Json(value) = match query.method.as_str() {
        "find-type" => handlers::find_type(state, params).await?,
        "find-member" => handlers::find_member(state, params).await?,
        "find-children" => handlers::find_children(state, params).await?,
        "find-file" => handlers::find_file(state, params).await?,
        "browse-module" => handlers::browse_module(state, params).await?,
        "list-modules" => handlers::list_modules(state, params).await?,
        "grep" => grep::grep(state, params).await?,
        "find-asset" => handlers::find_asset(state, params).await?,
        "browse-assets" => handlers::browse_assets(state, params).await?,
        _ => unreachable!("method checked against the closed table"),
    };
    Ok(value)
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Rewrite path-bearing fields to be project-relative.
fn strip_prefix_in_place(value: &mut Value, prefix: &str) {
    if prefix.is_empty() {
        return;
    }
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if matches!(key.as_str(), "path" | "file" | "implementationPath") {
                    if let Value::String(path) = field {
                        *path = crate::utils::paths::strip_path_prefix(path, prefix).to_string();
                    }
                } else {
                    strip_prefix_in_place(field, prefix);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_prefix_in_place(item, prefix);
            }
        }
        _ => {}
    }
}
