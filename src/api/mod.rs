// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! REST surface of the gateway. The surface is trusted: no authentication,
//! permissive CORS, JSON throughout.

pub mod response;
pub mod routes;
pub mod validation;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

pub use routes::ApiState;

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/plc/read", get(routes::read_tags))
        .route("/api/plc/write", post(routes::write_tags))
        .route("/api/plc/batch", post(routes::batch_operations))
        .fallback(routes::not_found)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the API until the cancellation token fires.
pub async fn serve(state: ApiState, addr: String, cancel: CancellationToken) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr, "api server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}
