// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{create_test_app_with_executor, test_settings};
use axum::http::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use trainq::infrastructure::executors::remote_executor::RemoteTrainingExecutor;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_runtime_drains_queue_and_shuts_down() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/train"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "task_id": "job"
        })))
        .mount(&server)
        .await;

    let settings = test_settings(|s| {
        s.executor.base_url = server.uri();
        s.scheduler.max_concurrent_tasks = 2;
    });
    let executor = Arc::new(RemoteTrainingExecutor::new(&settings.executor).unwrap());
    let mut app = create_test_app_with_executor(settings, executor).await;

    app.runtime.start();
    for project_id in 1..=3 {
        app.server
            .post("/v1/queue")
            .json(&json!({"project_id": project_id}))
            .await
            .assert_status(StatusCode::CREATED);
    }

    let mut drained = false;
    for _ in 0..200 {
        let stats: Value = app.server.get("/v1/queue/stats").await.json();
        assert!(stats["counts"]["running"].as_u64().unwrap() <= 2);
        if stats["counts"]["completed"] == 3 {
            assert_eq!(stats["scheduler_running"], true);
            drained = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(drained);

    app.runtime.shutdown().await;
    assert!(!app.runtime.queue().is_scheduler_running());
    assert!(!app.runtime.scheduler().is_running());
    assert!(app.runtime.monitor().current().is_some());

    let completed = app
        .runtime
        .monitor()
        .recent_events(100)
        .iter()
        .filter(|e| e.event_type == "task_completed")
        .count();
    assert_eq!(completed, 3);
}

#[tokio::test]
async fn test_runtime_without_monitor_loop() {
    let server = MockServer::start().await;
    let settings = test_settings(|s| {
        s.executor.base_url = server.uri();
        s.monitor.enabled = false;
    });
    let executor = Arc::new(RemoteTrainingExecutor::new(&settings.executor).unwrap());
    let mut app = create_test_app_with_executor(settings, executor).await;

    app.runtime.start();
    tokio::time::sleep(Duration::from_millis(100)).await;
    app.runtime.shutdown().await;

    assert!(app.runtime.monitor().current().is_none());
    assert_eq!(app.repository.count_by_status().await.unwrap().values().sum::<u64>(), 0);
}
