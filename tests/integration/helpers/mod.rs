// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use axum_test::TestServer;
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use std::sync::Arc;
use trainq::config::settings::{Settings, SharedSettings};
use trainq::domain::repositories::queue_repository::QueueRepository;
use trainq::domain::services::training_executor::TrainingExecutor;
use trainq::infrastructure::executors::remote_executor::RemoteTrainingExecutor;
use trainq::infrastructure::repositories::queue_repo_impl::QueueRepositoryImpl;
use trainq::presentation::routes;
use trainq::workers::manager::SchedulerRuntime;

pub struct TestApp {
    pub server: TestServer,
    pub runtime: SchedulerRuntime,
    pub repository: Arc<dyn QueueRepository>,
}

/// 测试默认配置：重试无退避，循环间隔最短
pub fn test_settings(configure: impl FnOnce(&mut Settings)) -> Settings {
    let mut settings = Settings::load(Settings::defaults().unwrap()).unwrap();
    settings.scheduler.queue_check_interval_secs = 1;
    settings.scheduler.retry_delay_base_secs = 0;
    settings.scheduler.retry_delay_max_secs = 0;
    settings.monitor.interval_secs = 1;
    configure(&mut settings);
    settings
}

pub async fn memory_repository() -> Arc<dyn QueueRepository> {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    Arc::new(QueueRepositoryImpl::new(Arc::new(db)))
}

/// 创建不启动后台循环的测试应用
pub async fn create_test_app(configure: impl FnOnce(&mut Settings)) -> TestApp {
    let settings = test_settings(configure);
    let executor: Arc<dyn TrainingExecutor> =
        Arc::new(RemoteTrainingExecutor::new(&settings.executor).unwrap());
    create_test_app_with_executor(settings, executor).await
}

pub async fn create_test_app_with_executor(
    settings: Settings,
    executor: Arc<dyn TrainingExecutor>,
) -> TestApp {
    let repository = memory_repository().await;
    let settings = Arc::new(SharedSettings::new(settings));
    let runtime = SchedulerRuntime::new(repository.clone(), executor, settings.clone());

    let app = routes::app(runtime.queue(), runtime.monitor(), settings);
    let server = TestServer::new(app).unwrap();

    TestApp {
        server,
        runtime,
        repository,
    }
}
