// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{create_test_app_with_executor, test_settings, TestApp};
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use trainq::config::settings::Settings;
use trainq::domain::models::queue_entry::QueueStatus;
use trainq::infrastructure::executors::remote_executor::RemoteTrainingExecutor;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn app_against(server: &MockServer, configure: impl FnOnce(&mut Settings)) -> TestApp {
    let settings = test_settings(|s| {
        s.executor.base_url = server.uri();
        s.executor.train_path = "/train".to_string();
        configure(s);
    });
    let executor = Arc::new(RemoteTrainingExecutor::new(&settings.executor).unwrap());
    create_test_app_with_executor(settings, executor).await
}

async fn enqueue(app: &TestApp, body: Value) -> i64 {
    let response = app.server.post("/v1/queue").json(&body).await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()["id"].as_i64().unwrap()
}

#[tokio::test]
async fn test_lower_priority_value_is_scheduled_first() {
    let server = MockServer::start().await;
    let app = app_against(&server, |_| {}).await;

    enqueue(&app, json!({"project_id": 1, "priority": 5})).await;
    let urgent = enqueue(&app, json!({"project_id": 2, "priority": 1})).await;

    let next = app.runtime.queue().next_eligible().await.unwrap().unwrap();
    assert_eq!(next.id, urgent);
    assert_eq!(next.project_id, 2);
}

#[tokio::test]
async fn test_single_slot_keeps_second_project_queued() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/train"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true, "task_id": "job-1"}))
                .set_delay(std::time::Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    let app = app_against(&server, |s| s.scheduler.max_concurrent_tasks = 1).await;

    let first = enqueue(&app, json!({"project_id": 1})).await;
    let second = enqueue(&app, json!({"project_id": 2})).await;

    let scheduler = app.runtime.scheduler();
    scheduler.run_cycle().await;

    let stats: Value = app.server.get("/v1/queue/stats").await.json();
    assert_eq!(stats["counts"]["running"], 1);
    assert_eq!(stats["counts"]["queued"], 1);
    assert_eq!(stats["running_tasks"][0]["id"], first);
    assert_eq!(stats["queued_tasks"][0]["id"], second);

    scheduler.wait_idle().await;
    let entry: Value = app.server.get(&format!("/v1/queue/{}", first)).await.json();
    assert_eq!(entry["status"], "completed");
    assert_eq!(entry["external_task_id"], "job-1");
}

#[tokio::test]
async fn test_failing_executor_exhausts_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/train"))
        .respond_with(ResponseTemplate::new(500).set_body_string("cuda error"))
        .expect(3)
        .mount(&server)
        .await;
    let app = app_against(&server, |s| s.scheduler.max_retry_count = 2).await;

    let id = enqueue(&app, json!({"project_id": 9})).await;
    let scheduler = app.runtime.scheduler();
    for _ in 0..3 {
        assert_eq!(scheduler.process_queue().await.unwrap(), Some(id));
        scheduler.wait_idle().await;
    }
    assert_eq!(scheduler.process_queue().await.unwrap(), None);

    let entry = app.runtime.queue().get(id).await.unwrap();
    assert_eq!(entry.status, QueueStatus::Failed);
    assert_eq!(entry.retry_count, 2);
    assert!(entry.error_message.unwrap().contains("cuda error"));

    // 失败后项目可以重新提交
    enqueue(&app, json!({"project_id": 9})).await;
}

#[tokio::test]
async fn test_timed_out_entry_is_requeued() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/train"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true}))
                .set_delay(std::time::Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    let app = app_against(&server, |s| s.scheduler.task_timeout_secs = 60).await;

    let id = enqueue(&app, json!({"project_id": 4})).await;
    let scheduler = app.runtime.scheduler();
    scheduler.process_queue().await.unwrap();

    let handled = scheduler
        .check_timeouts_at(Utc::now() + Duration::seconds(61))
        .await;
    assert_eq!(handled, 1);

    let status: Value = app.server.get("/v1/projects/4/queue").await.json();
    assert_eq!(status["entry"]["id"], id);
    assert_eq!(status["entry"]["status"], "queued");
    assert_eq!(status["entry"]["retry_count"], 1);
    assert_eq!(status["entry"]["error_message"], "Task timed out - retrying");
    assert_eq!(status["progress"]["position"], 1);

    let events: Value = app.server.get("/v1/monitor/events").await.json();
    assert!(events
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e["event_type"] == "task_timeout"));
}
