// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::Response,
};
use serde_json::{Value, json};
use tracing::info;

use crate::{
    api::{
        response::{error_response, success_response},
        validation::{split_tags_param, unknown_tag_paths},
    },
    tags::{TagEngine, TagValue},
};

pub const SERVICE_NAME: &str = "PLC API";

/// Shared state of the REST surface.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<TagEngine>,
    pub max_batch_size: usize,
}

/// `GET /health`
pub async fn health(State(_state): State<ApiState>) -> Response {
    success_response(
        json!({
            "status": "healthy",
            "service": SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        }),
        "service healthy",
    )
}

/// `GET /api/plc/read?tags=a,b,c` — serves the mirrored cache.
pub async fn read_tags(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    info!(?params, "api read request");
    let Some(raw) = params.get("tags") else {
        return error_response("missing tags parameter", None, StatusCode::BAD_REQUEST);
    };
    let paths = split_tags_param(raw);
    if paths.is_empty() {
        return error_response("tag list is empty", None, StatusCode::BAD_REQUEST);
    }

    let unknown = unknown_tag_paths(state.engine.registry(), paths.iter().map(String::as_str));
    if !unknown.is_empty() {
        return error_response(
            "unknown tag paths",
            Some(json!(unknown)),
            StatusCode::BAD_REQUEST,
        );
    }
    if paths.len() > state.max_batch_size {
        return error_response(
            &format!(
                "batch read exceeds limit: {} > {}",
                paths.len(),
                state.max_batch_size
            ),
            None,
            StatusCode::PAYLOAD_TOO_LARGE,
        );
    }

    let values = state.engine.cached_values(&paths);
    match serde_json::to_value(values) {
        Ok(data) => success_response(data, "read ok"),
        Err(e) => error_response(&e.to_string(), None, StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// `POST /api/plc/write` — stages the values and flushes them to the PLC.
pub async fn write_tags(
    State(state): State<ApiState>,
    body: Result<axum::Json<Value>, JsonRejection>,
) -> Response {
    let Ok(axum::Json(body)) = body else {
        return error_response("request body must be JSON", None, StatusCode::BAD_REQUEST);
    };
    info!(?body, "api write request");
    let Some(entries) = body.as_object() else {
        return error_response(
            "request body must be a tag/value object",
            None,
            StatusCode::BAD_REQUEST,
        );
    };
    if entries.is_empty() {
        return error_response("no tags to write", None, StatusCode::BAD_REQUEST);
    }

    let unknown = unknown_tag_paths(state.engine.registry(), entries.keys().map(String::as_str));
    if !unknown.is_empty() {
        return error_response(
            "unknown tag paths",
            Some(json!(unknown)),
            StatusCode::BAD_REQUEST,
        );
    }
    if entries.len() > state.max_batch_size {
        return error_response(
            &format!(
                "batch write exceeds limit: {} > {}",
                entries.len(),
                state.max_batch_size
            ),
            None,
            StatusCode::PAYLOAD_TOO_LARGE,
        );
    }

    match write_through(&state.engine, entries).await {
        Ok(results) => {
            let failed: HashMap<&String, bool> =
                results.iter().filter(|(_, ok)| !**ok).map(|(k, v)| (k, *v)).collect();
            if failed.is_empty() {
                success_response(json!(results), "write ok")
            } else {
                error_response(
                    "some tags failed to write",
                    Some(json!(failed)),
                    StatusCode::BAD_REQUEST,
                )
            }
        },
        Err(errors) => error_response(
            "invalid tag values",
            Some(json!(errors)),
            StatusCode::BAD_REQUEST,
        ),
    }
}

/// `POST /api/plc/batch` — mixed read and write in one call.
pub async fn batch_operations(
    State(state): State<ApiState>,
    body: Result<axum::Json<Value>, JsonRejection>,
) -> Response {
    let Ok(axum::Json(body)) = body else {
        return error_response("request body must be JSON", None, StatusCode::BAD_REQUEST);
    };
    info!(?body, "api batch request");

    let read_paths: Vec<String> = match body.get("read") {
        None => Vec::new(),
        Some(raw) => match serde_json::from_value(raw.clone()) {
            Ok(paths) => paths,
            Err(_) => {
                return error_response(
                    "read must be a list of tag paths",
                    None,
                    StatusCode::BAD_REQUEST,
                );
            },
        },
    };
    let write_entries = match body.get("write") {
        None => serde_json::Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            return error_response(
                "write must be a tag/value object",
                None,
                StatusCode::BAD_REQUEST,
            );
        },
    };

    let unknown_reads =
        unknown_tag_paths(state.engine.registry(), read_paths.iter().map(String::as_str));
    if !unknown_reads.is_empty() {
        return error_response(
            "unknown read tag paths",
            Some(json!(unknown_reads)),
            StatusCode::BAD_REQUEST,
        );
    }
    let unknown_writes =
        unknown_tag_paths(state.engine.registry(), write_entries.keys().map(String::as_str));
    if !unknown_writes.is_empty() {
        return error_response(
            "unknown write tag paths",
            Some(json!(unknown_writes)),
            StatusCode::BAD_REQUEST,
        );
    }

    let total = read_paths.len() + write_entries.len();
    if total > state.max_batch_size {
        return error_response(
            &format!("batch exceeds limit: {total} > {}", state.max_batch_size),
            None,
            StatusCode::PAYLOAD_TOO_LARGE,
        );
    }

    let read_results = state.engine.cached_values(&read_paths);
    let write_results = if write_entries.is_empty() {
        HashMap::new()
    } else {
        match write_through(&state.engine, &write_entries).await {
            Ok(results) => results,
            Err(errors) => {
                return error_response(
                    "invalid tag values",
                    Some(json!(errors)),
                    StatusCode::BAD_REQUEST,
                );
            },
        }
    };

    success_response(
        json!({ "read": read_results, "write": write_results }),
        "batch ok",
    )
}

/// Fallback for unknown routes.
pub async fn not_found() -> Response {
    error_response("resource not found", None, StatusCode::NOT_FOUND)
}

/// Converts, stages and flushes a set of writes. Returns per-tag success,
/// or the conversion errors if any value does not fit its declared type.
async fn write_through(
    engine: &TagEngine,
    entries: &serde_json::Map<String, Value>,
) -> std::result::Result<HashMap<String, bool>, HashMap<String, String>> {
    let mut converted: Vec<(String, TagValue)> = Vec::with_capacity(entries.len());
    let mut errors = HashMap::new();
    for (path, raw) in entries {
        let Some(tag) = engine.registry().get(path) else {
            errors.insert(path.clone(), "unknown tag".to_string());
            continue;
        };
        match TagValue::from_json(tag.declaration().data_type, raw) {
            Ok(value) => converted.push((path.clone(), value)),
            Err(e) => {
                errors.insert(path.clone(), e.to_string());
            },
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    for (path, value) in converted {
        if let Err(e) = engine.stage_write(&path, value) {
            errors.insert(path, e.to_string());
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    let flushed = engine.flush_pending().await;
    Ok(entries
        .keys()
        .map(|path| (path.clone(), flushed.get(path).copied().unwrap_or(false)))
        .collect())
}
