// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use trainq::config::settings::{Settings, SharedSettings};
use trainq::domain::repositories::queue_repository::QueueRepository;
use trainq::domain::services::training_executor::TrainingExecutor;
use trainq::infrastructure::database::connection;
use trainq::infrastructure::executors::remote_executor::RemoteTrainingExecutor;
use trainq::infrastructure::metrics::init_metrics;
use trainq::infrastructure::repositories::queue_repo_impl::QueueRepositoryImpl;
use trainq::presentation::routes;
use trainq::utils::telemetry;
use trainq::workers::manager::SchedulerRuntime;

/// 主函数
///
/// 应用程序入口点，负责初始化所有组件并启动服务
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration
    let settings = Settings::new()?;

    // 2. Initialize logging
    telemetry::init_telemetry(&settings.log);
    info!("Starting trainq...");
    info!("Configuration loaded");

    // Initialize Prometheus Metrics
    init_metrics(settings.monitor.metrics_addr.as_deref())?;

    // 3. Connect to database and apply migrations
    let db = Arc::new(connection::connect_and_migrate(&settings.database).await?);
    info!("Database connection established");

    // 4. Initialize Components
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let executor: Arc<dyn TrainingExecutor> =
        Arc::new(RemoteTrainingExecutor::new(&settings.executor)?);
    let repository: Arc<dyn QueueRepository> = Arc::new(QueueRepositoryImpl::new(db.clone()));
    let settings = Arc::new(SharedSettings::new(settings));

    // 5. Start scheduler, monitor and cleanup loops
    let mut runtime = SchedulerRuntime::new(repository, executor, settings.clone());
    runtime.start();

    // 6. Start HTTP server
    let app = routes::app(runtime.queue(), runtime.monitor(), settings);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.changed().await;
            })
            .await;
        if let Err(e) = result {
            error!("HTTP server error: {}", e);
        }
    });

    // 7. Wait for Ctrl-C, then stop loops and drain in-flight executions
    runtime.wait_for_shutdown().await;
    stop_tx.send_replace(true);
    if let Err(e) = server.await {
        error!("HTTP server task failed: {}", e);
    }

    drop(runtime);
    match Arc::try_unwrap(db) {
        Ok(db) => db.close().await?,
        Err(_) => info!("Database handle still shared, dropping without explicit close"),
    }
    info!("trainq stopped");

    Ok(())
}
