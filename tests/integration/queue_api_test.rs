// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::create_test_app;
use axum::http::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn test_health_and_version() {
    let app = create_test_app(|_| {}).await;

    let response = app.server.get("/health").await;
    response.assert_status_ok();
    response.assert_text("OK");

    let response = app.server.get("/v1/version").await;
    response.assert_text(env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_enqueue_returns_created_entry() {
    let app = create_test_app(|_| {}).await;

    let response = app
        .server
        .post("/v1/queue")
        .json(&json!({"project_id": 7, "priority": 2, "task_config": {"epochs": 10}}))
        .await;
    response.assert_status(StatusCode::CREATED);

    let body: Value = response.json();
    assert_eq!(body["project_id"], 7);
    assert_eq!(body["priority"], 2);
    assert_eq!(body["status"], "queued");
    assert_eq!(body["retry_count"], 0);
    assert_eq!(body["max_retries"], 3);
    assert_eq!(body["task_config"]["epochs"], 10);

    let id = body["id"].as_i64().unwrap();
    let fetched: Value = app.server.get(&format!("/v1/queue/{}", id)).await.json();
    assert_eq!(fetched["id"], id);
}

#[tokio::test]
async fn test_duplicate_active_project_conflicts() {
    let app = create_test_app(|_| {}).await;

    app.server
        .post("/v1/queue")
        .json(&json!({"project_id": 1}))
        .await
        .assert_status(StatusCode::CREATED);

    let response = app
        .server
        .post("/v1/queue")
        .json(&json!({"project_id": 1, "priority": 1}))
        .await;
    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("already has an active"));
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let app = create_test_app(|s| s.scheduler.priority_levels = 5).await;

    app.server
        .post("/v1/queue")
        .json(&json!({"project_id": 1, "priority": 9}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.server
        .post("/v1/queue")
        .json(&json!({"project_id": 0}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_full_queue_returns_too_many_requests() {
    let app = create_test_app(|s| s.scheduler.queue_size_limit = 1).await;

    app.server
        .post("/v1/queue")
        .json(&json!({"project_id": 1}))
        .await
        .assert_status(StatusCode::CREATED);
    app.server
        .post("/v1/queue")
        .json(&json!({"project_id": 2}))
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_cancel_reports_outcome() {
    let app = create_test_app(|_| {}).await;

    let created: Value = app
        .server
        .post("/v1/queue")
        .json(&json!({"project_id": 3}))
        .await
        .json();
    let id = created["id"].as_i64().unwrap();

    let body: Value = app.server.delete(&format!("/v1/queue/{}", id)).await.json();
    assert_eq!(body, json!({"id": id, "cancelled": true}));

    let body: Value = app.server.delete(&format!("/v1/queue/{}", id)).await.json();
    assert_eq!(body["cancelled"], false);

    // 取消后同一项目可以重新入队
    app.server
        .post("/v1/queue")
        .json(&json!({"project_id": 3}))
        .await
        .assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn test_unknown_entry_is_not_found() {
    let app = create_test_app(|_| {}).await;

    app.server
        .get("/v1/queue/999")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    app.server
        .get("/v1/projects/42/queue")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_project_status_and_stats() {
    let app = create_test_app(|s| s.scheduler.max_concurrent_tasks = 3).await;

    for (project_id, priority) in [(1, 4), (2, 1), (3, 8)] {
        app.server
            .post("/v1/queue")
            .json(&json!({"project_id": project_id, "priority": priority}))
            .await
            .assert_status(StatusCode::CREATED);
    }

    let status: Value = app.server.get("/v1/projects/1/queue").await.json();
    assert_eq!(status["entry"]["project_id"], 1);
    assert_eq!(status["progress"]["state"], "queued");
    assert_eq!(status["progress"]["position"], 2);

    let stats: Value = app.server.get("/v1/queue/stats").await.json();
    assert_eq!(stats["scheduler_running"], false);
    assert_eq!(stats["concurrent_limit"], 3);
    assert_eq!(stats["counts"]["queued"], 3);
    assert_eq!(stats["counts"]["running"], 0);
    let order: Vec<i64> = stats["queued_tasks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["project_id"].as_i64().unwrap())
        .collect();
    assert_eq!(order, vec![2, 1, 3]);
}
