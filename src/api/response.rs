// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::info;

/// Envelope of every successful reply.
#[derive(Debug, Serialize)]
pub struct SuccessBody {
    pub success: bool,
    pub message: String,
    pub data: serde_json::Value,
}

/// Envelope of every failed reply.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
    pub errors: serde_json::Value,
}

pub fn success_response(data: serde_json::Value, message: &str) -> Response {
    let body = SuccessBody { success: true, message: message.to_string(), data };
    info!(message = %body.message, "api request served");
    (StatusCode::OK, Json(body)).into_response()
}

pub fn error_response(message: &str, errors: Option<serde_json::Value>, status: StatusCode) -> Response {
    let body = ErrorBody {
        success: false,
        message: message.to_string(),
        errors: errors.unwrap_or(serde_json::Value::Null),
    };
    info!(message = %body.message, status = %status, "api request rejected");
    (status, Json(body)).into_response()
}
