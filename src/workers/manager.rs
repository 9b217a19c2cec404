// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::SharedSettings;
use crate::domain::repositories::queue_repository::QueueRepository;
use crate::domain::services::training_executor::TrainingExecutor;
use crate::monitoring::task_monitor::TaskMonitor;
use crate::queue::scheduler::TaskScheduler;
use crate::queue::task_queue::TaskQueueService;
use crate::workers::cleanup_worker::CleanupWorker;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// 调度运行时
///
/// 在进程启动时构建一次，持有调度器、监控器与清理工作器，
/// 负责启动全部后台循环并在关闭时按顺序停止它们
pub struct SchedulerRuntime {
    settings: Arc<SharedSettings>,
    queue: Arc<TaskQueueService>,
    monitor: Arc<TaskMonitor>,
    scheduler: Arc<TaskScheduler>,
    cleanup: Arc<CleanupWorker>,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl SchedulerRuntime {
    /// 组装运行时
    ///
    /// # 参数
    ///
    /// * `repository` - 队列仓库
    /// * `executor` - 训练执行器
    /// * `settings` - 共享配置
    pub fn new(
        repository: Arc<dyn QueueRepository>,
        executor: Arc<dyn TrainingExecutor>,
        settings: Arc<SharedSettings>,
    ) -> Self {
        let monitor = Arc::new(TaskMonitor::new(repository.clone(), settings.clone()));
        let queue = Arc::new(TaskQueueService::new(
            repository.clone(),
            settings.clone(),
            monitor.clone(),
        ));
        let scheduler = Arc::new(TaskScheduler::new(
            queue.clone(),
            executor,
            settings.clone(),
            monitor.clone(),
        ));
        let cleanup = Arc::new(CleanupWorker::new(repository, settings.clone()));
        let (shutdown, _) = watch::channel(false);

        Self {
            settings,
            queue,
            monitor,
            scheduler,
            cleanup,
            shutdown,
            handles: Vec::new(),
        }
    }

    pub fn queue(&self) -> Arc<TaskQueueService> {
        self.queue.clone()
    }

    pub fn monitor(&self) -> Arc<TaskMonitor> {
        self.monitor.clone()
    }

    pub fn scheduler(&self) -> Arc<TaskScheduler> {
        self.scheduler.clone()
    }

    pub fn settings(&self) -> Arc<SharedSettings> {
        self.settings.clone()
    }

    /// 启动调度、清理与监控循环
    pub fn start(&mut self) {
        if !self.handles.is_empty() {
            return;
        }

        self.shutdown.send_replace(false);
        self.scheduler.start();
        self.handles
            .push(self.cleanup.clone().start(self.shutdown.subscribe()));

        if self.settings.current().monitor.enabled {
            self.handles.push(self.spawn_monitor_loop());
        } else {
            info!("Task monitor disabled by configuration");
        }

        info!(loops = self.handles.len() + 1, "Scheduler runtime started");
    }

    fn spawn_monitor_loop(&self) -> JoinHandle<()> {
        let monitor = self.monitor.clone();
        let queue = self.queue.clone();
        let settings = self.settings.clone();
        let mut stop = self.shutdown.subscribe();

        tokio::spawn(async move {
            info!("Task monitor started");
            loop {
                if *stop.borrow() {
                    break;
                }

                monitor.run_cycle(queue.is_scheduler_running()).await;

                let interval = settings.current().monitor.interval();
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stop.changed() => {}
                }
            }
            info!("Task monitor stopped");
        })
    }

    /// 关闭运行时
    ///
    /// 先停止全部循环，再等待执行中的训练调用返回；返回后调用方可以释放存储连接
    pub async fn shutdown(&mut self) {
        info!("Shutting down scheduler runtime...");
        self.shutdown.send_replace(true);

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!("Background loop terminated abnormally: {}", e);
            }
        }

        self.scheduler.stop().await;
        info!("Scheduler runtime shut down successfully");
    }

    /// 等待关闭信号后关闭运行时
    pub async fn wait_for_shutdown(&mut self) {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        }

        self.shutdown().await;
    }
}
