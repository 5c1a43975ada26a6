// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use s7_gateway::{
    api::{ApiState, build_router},
    tags::{DataType, TagDeclaration, TagEngine, TagRegistry, TagValue},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use super::{decl, engine_over, mock_plc::MockPlc, session_for};

async fn router_over(engine: Arc<TagEngine>) -> Router {
    build_router(ApiState { engine, max_batch_size: 100 })
}

/// An engine whose sessions never connect; everything these tests hit must
/// be rejected before any I/O.
async fn offline_engine(declarations: Vec<TagDeclaration>) -> Arc<TagEngine> {
    let mock = MockPlc::start().await;
    mock.set_online(false);
    let registry = TagRegistry::initialize(declarations).await.expect("registry");
    TagEngine::new(
        registry,
        session_for(&mock, "sync"),
        session_for(&mock, "async"),
    )
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
        .await
        .expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, serde_json::from_slice(&bytes).expect("json body"))
}

async fn post(router: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
        )
        .await
        .expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, serde_json::from_slice(&bytes).expect("json body"))
}

#[tokio::test]
async fn health_reports_the_service() {
    let engine = offline_engine(vec![]).await;
    let router = router_over(engine).await;

    let (status, body) = get(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["status"], json!("healthy"));
    assert_eq!(body["data"]["service"], json!("PLC API"));
    assert!(body["data"]["version"].is_string());
}

#[tokio::test]
async fn read_serves_the_mirrored_cache() {
    let mut speed = decl("Motor1_Speed", 101, 2, 2, DataType::Int, None);
    speed.default_value = Some(TagValue::Int(17));
    let engine = offline_engine(vec![speed]).await;
    let router = router_over(engine).await;

    let (status, body) = get(&router, "/api/plc/read?tags=Motor1_Speed").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["Motor1_Speed"], json!(17));
}

#[tokio::test]
async fn read_requires_the_tags_parameter() {
    let engine = offline_engine(vec![]).await;
    let router = router_over(engine).await;

    let (status, body) = get(&router, "/api/plc/read").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn unknown_tags_are_rejected_before_io() {
    let engine = offline_engine(vec![decl("known", 1, 0, 2, DataType::Int, None)]).await;
    let router = router_over(engine).await;

    let (status, body) = get(&router, "/api/plc/read?tags=known,ghost").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"], json!(["ghost"]));

    let (status, _) = post(&router, "/api/plc/write", json!({ "ghost": 1 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// 101 distinct tags in one write is over the batch limit; the request
/// dies with 413 before any PLC traffic.
#[tokio::test]
async fn oversized_write_batch_is_rejected() {
    let declarations: Vec<TagDeclaration> = (0..101u16)
        .map(|i| decl(&format!("tag_{i:03}"), 1, i * 2, 2, DataType::Int, None))
        .collect();
    let engine = offline_engine(declarations).await;
    let router = router_over(engine).await;

    let body: Value = (0..101)
        .map(|i| (format!("tag_{i:03}"), json!(1)))
        .collect::<serde_json::Map<String, Value>>()
        .into();
    let (status, reply) = post(&router, "/api/plc/write", body).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(reply["success"], json!(false));
}

#[tokio::test]
async fn oversized_batch_operation_is_rejected() {
    let declarations: Vec<TagDeclaration> = (0..101u16)
        .map(|i| decl(&format!("tag_{i:03}"), 1, i * 2, 2, DataType::Int, None))
        .collect();
    let engine = offline_engine(declarations).await;
    let router = router_over(engine).await;

    let reads: Vec<String> = (0..60).map(|i| format!("tag_{i:03}")).collect();
    let writes: Value = (60..101)
        .map(|i| (format!("tag_{i:03}"), json!(1)))
        .collect::<serde_json::Map<String, Value>>()
        .into();
    let (status, _) = post(
        &router,
        "/api/plc/batch",
        json!({ "read": reads, "write": writes }),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn mistyped_values_are_rejected() {
    let engine = offline_engine(vec![decl("speed", 1, 0, 2, DataType::Int, None)]).await;
    let router = router_over(engine).await;

    let (status, body) = post(&router, "/api/plc/write", json!({ "speed": "fast" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
    assert!(body["errors"]["speed"].is_string());
}

#[tokio::test]
async fn unknown_routes_return_the_error_envelope() {
    let engine = offline_engine(vec![]).await;
    let router = router_over(engine).await;

    let (status, body) = get(&router, "/api/plc/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], json!(false));
}

/// Write-through against the mock PLC: the value lands in the data block
/// and the response reports per-tag success.
#[tokio::test]
async fn write_reaches_the_plc() {
    let mock = MockPlc::start().await;
    mock.set_db(101, vec![0u8; 4]);
    let engine = engine_over(&mock, vec![decl("Motor1_Speed", 101, 2, 2, DataType::Int, None)]).await;
    let router = router_over(Arc::clone(&engine)).await;

    let (status, body) = post(&router, "/api/plc/write", json!({ "Motor1_Speed": 77 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["Motor1_Speed"], json!(true));
    assert_eq!(&mock.db(101)[2..4], &77i16.to_be_bytes());

    // The committed value is visible to the cache-backed read.
    let (status, body) = get(&router, "/api/plc/read?tags=Motor1_Speed").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["Motor1_Speed"], json!(77));
}

#[tokio::test]
async fn batch_mixes_cache_reads_and_writes() {
    let mock = MockPlc::start().await;
    mock.set_db(101, vec![0u8; 4]);
    let engine = engine_over(
        &mock,
        vec![
            decl("Motor1_Speed", 101, 2, 2, DataType::Int, None),
            decl("Motor1_Level", 101, 0, 2, DataType::Int, None),
        ],
    )
    .await;
    engine.read_all().await;
    let router = router_over(Arc::clone(&engine)).await;

    let (status, body) = post(
        &router,
        "/api/plc/batch",
        json!({ "read": ["Motor1_Level"], "write": { "Motor1_Speed": 5 } }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["read"]["Motor1_Level"], json!(0));
    assert_eq!(body["data"]["write"]["Motor1_Speed"], json!(true));
    assert_eq!(&mock.db(101)[2..4], &5i16.to_be_bytes());
}
