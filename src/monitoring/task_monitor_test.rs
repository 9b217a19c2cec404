use super::*;
use crate::config::settings::Settings;
use crate::domain::models::queue_entry::{FailureKind, NewQueueEntry};
use crate::infrastructure::repositories::queue_repo_impl::QueueRepositoryImpl;
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;

async fn setup(
    configure: impl FnOnce(&mut Settings),
) -> (Arc<dyn QueueRepository>, TaskMonitor) {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    let repository: Arc<dyn QueueRepository> = Arc::new(QueueRepositoryImpl::new(Arc::new(db)));

    let mut settings = Settings::load(Settings::defaults().unwrap()).unwrap();
    configure(&mut settings);
    let settings = Arc::new(SharedSettings::new(settings));

    let monitor = TaskMonitor::new(repository.clone(), settings);
    (repository, monitor)
}

async fn enqueue(repository: &Arc<dyn QueueRepository>, project_id: i64) -> QueueEntry {
    repository
        .insert_if_no_active(NewQueueEntry {
            project_id,
            priority: 5,
            task_config: json!({}),
            max_retries: 0,
            created_at: Utc::now() - Duration::seconds(30),
        })
        .await
        .unwrap()
}

async fn start(repository: &Arc<dyn QueueRepository>, entry: QueueEntry, at: DateTime<Utc>) -> QueueEntry {
    let running = entry.start(at).unwrap();
    assert!(repository
        .compare_and_update(&running, QueueStatus::Queued, 0)
        .await
        .unwrap());
    running
}

#[tokio::test]
async fn test_collect_metrics_rates_and_averages() {
    let (repository, monitor) = setup(|_| {}).await;
    let now = Utc::now();

    let a = enqueue(&repository, 1).await;
    let a = start(&repository, a, now - Duration::seconds(20)).await;
    let done = a.complete(now - Duration::seconds(10), Some("x".into())).unwrap();
    repository
        .compare_and_update(&done, QueueStatus::Running, 0)
        .await
        .unwrap();

    let b = enqueue(&repository, 2).await;
    let b = start(&repository, b, now).await;
    let failed = b
        .fail_attempt(now, &FailureKind::ExecutionFailure("boom".into()), Duration::zero())
        .unwrap();
    repository
        .compare_and_update(&failed, QueueStatus::Running, 0)
        .await
        .unwrap();

    enqueue(&repository, 3).await;
    enqueue(&repository, 4).await;

    let metrics = monitor.collect_metrics().await.unwrap();
    assert_eq!(metrics.total_tasks, 4);
    assert_eq!(metrics.completed_tasks, 1);
    assert_eq!(metrics.failed_tasks, 1);
    assert_eq!(metrics.queued_tasks, 2);
    assert!((metrics.success_rate - 25.0).abs() < f64::EPSILON);
    assert!((metrics.failure_rate - 25.0).abs() < f64::EPSILON);
    assert!((metrics.avg_execution_time_secs - 10.0).abs() < 0.01);
    assert!((metrics.avg_queue_time_secs - 10.0).abs() < 1.0);
    assert!((metrics.tasks_per_hour - 1.0 / 24.0).abs() < 1e-9);
    assert_eq!(metrics.recent_completions.len(), 1);
    assert_eq!(metrics.recent_failures[0].error_message.as_deref(), Some("boom"));
}

#[tokio::test]
async fn test_run_cycle_raises_alerts_over_thresholds() {
    let (repository, monitor) = setup(|s| {
        s.monitor.high_queue_threshold = 1;
        s.monitor.long_running_secs = 60;
    })
    .await;

    enqueue(&repository, 1).await;
    enqueue(&repository, 2).await;
    let entry = enqueue(&repository, 3).await;
    start(&repository, entry, Utc::now() - Duration::minutes(5)).await;

    monitor.run_cycle(true).await;

    let health = monitor.latest_health().unwrap();
    assert!(health.database_connected);
    assert!(health.scheduler_running);
    assert!(health.high_queue_length);
    assert!(health.long_running_tasks);
    assert!(!health.high_failure_rate);
    assert!(!health.is_healthy());

    let events = monitor.recent_events(10);
    assert_eq!(events[0].event_type, "metrics_collected");
    assert_eq!(
        events.iter().filter(|e| e.event_type == "alert").count(),
        2
    );
    assert!(monitor.current().is_some());
}

#[tokio::test]
async fn test_event_and_history_buffers_are_bounded() {
    let (_repository, monitor) = setup(|s| {
        s.monitor.event_capacity = 3;
        s.monitor.history_capacity = 2;
    })
    .await;

    for id in 0..5 {
        monitor.record_task_event("task_started", id, json!({"project_id": id}));
    }
    let events = monitor.recent_events(10);
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].data["queue_id"], 2);
    assert_eq!(events[2].data["queue_id"], 4);
    assert_eq!(monitor.recent_events(1)[0].data["project_id"], 4);

    for _ in 0..3 {
        monitor.run_cycle(false).await;
    }
    assert_eq!(monitor.history(10).len(), 2);
    assert_eq!(monitor.history(1).len(), 1);

    let summary = monitor.performance_summary();
    assert_eq!(summary.samples, 2);
    assert_eq!(summary.peak_running_tasks, 0);
    assert_eq!(summary.event_counts.get("metrics_collected"), Some(&3));
}

#[test]
fn test_rates_serialize_with_two_decimals() {
    let summary = TaskSummary {
        queue_id: 1,
        project_id: 1,
        retry_count: 0,
        completed_at: None,
        execution_time_secs: Some(1.23456),
        error_message: None,
    };
    let value = serde_json::to_value(&summary).unwrap();
    assert_eq!(value["execution_time_secs"], json!(1.23));
}
