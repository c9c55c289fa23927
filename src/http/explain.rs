//! Compound explain-type endpoint
//!
//! One response composing the type definition, its members partitioned
//! into functions and properties, and its direct or recursive children.
//! Each kind carries an independent budget so a god-class with hundreds
//! of members cannot starve the children listing.

use super::context::ContentCache;
use super::handlers::{member_hit_json, type_hit_json};
use super::{Params, SharedState};
use crate::error::ServiceError;
use crate::memory::lookup::{self, MemberHit, TypeFilter, TypeHit};
use crate::store::MemberKind;
use axum::extract::{Query, State};
use axum::Json;
use serde_json::{json, Value};
use std::collections::HashMap;

const DEFAULT_MEMBER_BUDGET: usize = 10;
const DEFAULT_CHILD_BUDGET: usize = 10;
const BUDGET_CAP: usize = 500;

pub async fn explain_type(
    State(state): State<SharedState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ServiceError> {
    let params = Params(raw);
    let snapshot = state.memory.snapshot();
    if let Some(loading) = super::handlers::loading_response(&snapshot) {
        return Ok(loading);
    }

    let name = params.required("name")?;
    let filter = TypeFilter {
        project: params.project(&state)?,
        language: params.language()?,
        kind: None,
    };
    let max_functions = params.limit("maxFunctions", DEFAULT_MEMBER_BUDGET, BUDGET_CAP)?;
    let max_properties = params.limit("maxProperties", DEFAULT_MEMBER_BUDGET, BUDGET_CAP)?;
    let max_children = params.limit("maxChildren", DEFAULT_CHILD_BUDGET, BUDGET_CAP)?;
    let recursive = params.boolean("recursive", false)?;
    let context_lines = params
        .integer("contextLines", 0)?
        .clamp(0, super::handlers::MAX_CONTEXT_LINES) as u32;

    // Exact lookup first; fuzzy rescue so a close miss still explains the
    // best-scored type
    let mut hits = lookup::find_type(&snapshot, name, false, &filter, 1);
    if hits.is_empty() {
        hits = lookup::find_type(&snapshot, name, true, &filter, 1);
    }
    let Some(best) = hits.into_iter().next() else {
        return Err(ServiceError::NotFound(format!("type not found: {}", name)));
    };
    let type_name = best.entry.name.clone();

    let members = lookup::members_of(&snapshot, &type_name);
    let mut functions = Vec::new();
    let mut properties = Vec::new();
    let mut total_functions = 0usize;
    let mut total_properties = 0usize;
    for member in members {
        match member.kind {
            MemberKind::Function => {
                total_functions += 1;
                if functions.len() < max_functions {
                    functions.push(member);
                }
            }
            MemberKind::Property | MemberKind::EnumValue => {
                total_properties += 1;
                if properties.len() < max_properties {
                    properties.push(member);
                }
            }
        }
    }

    let children = lookup::find_children(&snapshot, &type_name, recursive, &filter, max_children);

    let mut cache = ContentCache::default();
    let type_context = if context_lines > 0 {
        cache
            .window(&state.pool, best.entry.file_id, best.entry.line, context_lines)
            .await
            .map_err(ServiceError::from_anyhow)?
    } else {
        None
    };

    let mut function_values = Vec::with_capacity(functions.len());
    for member in &functions {
        function_values.push(
            member_json_with_context(&state, &mut cache, member, context_lines).await?,
        );
    }
    let mut property_values = Vec::with_capacity(properties.len());
    for member in &properties {
        property_values.push(
            member_json_with_context(&state, &mut cache, member, context_lines).await?,
        );
    }

    let child_values: Vec<Value> = children
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
        "type": type_hit_json(&best, type_context),
        "functions": function_values,
        "properties": property_values,
        "children": child_values,
        "totals": {
            "functions": total_functions,
            "properties": total_properties,
            "children": child_values.len(),
        },
    })))
}

async fn member_json_with_context(
    state: &SharedState,
    cache: &mut ContentCache,
    member: &std::sync::Arc<crate::memory::MemberEntry>,
    context_lines: u32,
) -> Result<Value, ServiceError> {
    let context = if context_lines > 0 {
        cache
            .window(&state.pool, member.file_id, member.line, context_lines)
            .await
            .map_err(ServiceError::from_anyhow)?
    } else {
        None
    };
    Ok(member_hit_json(
        &MemberHit {
            entry: member.clone(),
            score: 0.0,
        },
        member.signature.clone(),
        context,
    ))
}
