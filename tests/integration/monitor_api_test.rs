// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::create_test_app;
use axum::http::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn test_metrics_are_collected_on_demand() {
    let app = create_test_app(|_| {}).await;
    app.server
        .post("/v1/queue")
        .json(&json!({"project_id": 1}))
        .await
        .assert_status(StatusCode::CREATED);

    let response = app.server.get("/v1/monitor/metrics").await;
    response.assert_status_ok();
    let metrics: Value = response.json();
    assert_eq!(metrics["total_tasks"], 1);
    assert_eq!(metrics["queued_tasks"], 1);
    assert_eq!(metrics["success_rate"], 0.0);
}

#[tokio::test]
async fn test_health_reports_queue_alerts() {
    let app = create_test_app(|s| s.monitor.high_queue_threshold = 1).await;
    for project_id in 1..=2 {
        app.server
            .post("/v1/queue")
            .json(&json!({"project_id": project_id}))
            .await;
    }

    let response = app.server.get("/v1/monitor/health").await;
    response.assert_status_ok();
    let health: Value = response.json();
    assert_eq!(health["database_connected"], true);
    assert_eq!(health["scheduler_running"], false);
    assert_eq!(health["high_queue_length"], true);
    assert!(health["alerts"]
        .as_array()
        .unwrap()
        .iter()
        .any(|a| a["kind"] == "high_queue_length"));
}

#[tokio::test]
async fn test_events_respect_limit() {
    let app = create_test_app(|_| {}).await;
    for project_id in 1..=3 {
        app.server
            .post("/v1/queue")
            .json(&json!({"project_id": project_id}))
            .await;
    }

    let events: Value = app
        .server
        .get("/v1/monitor/events")
        .add_query_param("limit", 2)
        .await
        .json();
    let events = events.as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e["event_type"] == "task_queued"));
    assert_eq!(events[1]["data"]["project_id"], 3);

    app.server
        .get("/v1/monitor/events")
        .add_query_param("limit", 0)
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_summary_and_history_start_empty() {
    let app = create_test_app(|_| {}).await;

    let summary: Value = app.server.get("/v1/monitor/summary").await.json();
    assert_eq!(summary["samples"], 0);
    assert!(summary["current"].is_null());

    let history: Value = app.server.get("/v1/monitor/history").await.json();
    assert_eq!(history, json!([]));
}

#[tokio::test]
async fn test_config_reload_applies_defaults() {
    let app = create_test_app(|s| s.scheduler.max_concurrent_tasks = 4).await;

    let response = app.server.post("/v1/admin/config/reload").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["reloaded"], true);
    assert_eq!(body["log_level_applied"], false);

    let settings = app.runtime.settings().current();
    assert_eq!(
        body["scheduler"]["max_concurrent_tasks"],
        settings.scheduler.max_concurrent_tasks
    );
}
