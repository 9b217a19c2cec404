// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::SharedSettings;
use crate::domain::repositories::queue_repository::{QueueRepository, RepositoryError};
use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// 终态记录清理工作器
///
/// 定期删除 completed_at 早于保留期的 completed / failed / cancelled 记录，
/// 排队中与执行中的记录永远不会被删除
pub struct CleanupWorker {
    repository: Arc<dyn QueueRepository>,
    settings: Arc<SharedSettings>,
}

impl CleanupWorker {
    pub fn new(repository: Arc<dyn QueueRepository>, settings: Arc<SharedSettings>) -> Self {
        Self {
            repository,
            settings,
        }
    }

    /// 运行工作器，直到收到停止信号
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        info!("Queue cleanup worker started");

        loop {
            if *stop.borrow() {
                break;
            }

            if let Err(e) = self.sweep().await {
                error!("Failed to clean up finished queue entries: {}", e);
            }

            let interval = self.settings.current().cleanup.interval();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop.changed() => {}
            }
        }

        info!("Queue cleanup worker stopped");
    }

    /// 启动后台运行
    pub fn start(self: Arc<Self>, stop: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(stop).await;
        })
    }

    /// 以当前时间执行一次清理
    pub async fn sweep(&self) -> Result<u64, RepositoryError> {
        self.sweep_at(Utc::now()).await
    }

    /// 删除在 `now - retention` 之前进入终态的记录
    ///
    /// # 返回值
    ///
    /// 删除的记录数量，没有可删除记录时为 0
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let cutoff = now - self.settings.current().cleanup.retention();
        let deleted = self.repository.delete_terminal_before(cutoff).await?;

        if deleted > 0 {
            counter!("trainq_tasks_cleaned_total").increment(deleted);
            info!(deleted, cutoff = %cutoff, "Cleaned up finished queue entries");
        } else {
            debug!("No finished queue entries to clean up");
        }

        Ok(deleted)
    }
}

#[cfg(test)]
#[path = "cleanup_worker_test.rs"]
mod tests;
