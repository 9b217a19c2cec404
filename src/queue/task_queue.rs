// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::SharedSettings;
use crate::domain::models::queue_entry::{DomainError, NewQueueEntry, QueueEntry, QueueStatus};
use crate::domain::repositories::queue_repository::{QueueRepository, RepositoryError};
use crate::monitoring::task_monitor::TaskMonitor;
use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// 队列错误类型
#[derive(Error, Debug)]
pub enum QueueError {
    /// 项目已有排队中或执行中的任务
    #[error("Project {project_id} already has an active training task")]
    DuplicateActiveTask { project_id: i64 },

    /// 记录不存在
    #[error("Queue entry not found: {0}")]
    NotFound(i64),

    /// 优先级超出范围
    #[error("Priority {priority} is outside the allowed range [{min}, {max}]")]
    InvalidPriority { priority: i32, min: i32, max: i32 },

    /// 排队数量已达上限
    #[error("Queue is full (limit {limit})")]
    QueueFull { limit: u64 },

    /// 仓库错误
    #[error("Repository error: {0}")]
    Repository(RepositoryError),

    /// 领域错误
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

impl From<RepositoryError> for QueueError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::ActiveEntryExists { project_id } => {
                QueueError::DuplicateActiveTask { project_id }
            }
            other => QueueError::Repository(other),
        }
    }
}

/// 项目任务进度
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskProgress {
    /// 排队中，position 为在可调度记录中的位置，从 1 开始；
    /// 重试退避尚未到期时为 None
    Queued { position: Option<usize> },
    /// 执行中
    Running { elapsed_secs: i64 },
    /// 已进入终态
    Finished,
}

/// 项目的队列状态
#[derive(Debug, Clone, Serialize)]
pub struct ProjectQueueStatus {
    pub entry: QueueEntry,
    pub progress: TaskProgress,
}

/// 队列统计
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub scheduler_running: bool,
    pub concurrent_limit: u32,
    pub counts: BTreeMap<String, u64>,
    /// 按调度顺序排列的排队记录
    pub queued_tasks: Vec<QueueEntry>,
    pub running_tasks: Vec<QueueEntry>,
}

/// 任务队列服务
///
/// 在队列存储之上施加配置驱动的准入规则，是外部调用方使用的最小接口：
/// 入队、查询状态、取消与统计
pub struct TaskQueueService {
    repository: Arc<dyn QueueRepository>,
    settings: Arc<SharedSettings>,
    monitor: Arc<TaskMonitor>,
    scheduler_running: AtomicBool,
}

impl TaskQueueService {
    pub fn new(
        repository: Arc<dyn QueueRepository>,
        settings: Arc<SharedSettings>,
        monitor: Arc<TaskMonitor>,
    ) -> Self {
        Self {
            repository,
            settings,
            monitor,
            scheduler_running: AtomicBool::new(false),
        }
    }

    pub fn repository(&self) -> Arc<dyn QueueRepository> {
        self.repository.clone()
    }

    pub fn is_scheduler_running(&self) -> bool {
        self.scheduler_running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_scheduler_running(&self, running: bool) {
        self.scheduler_running.store(running, Ordering::SeqCst);
    }

    /// 入队训练任务
    ///
    /// # 参数
    ///
    /// * `project_id` - 项目ID
    /// * `priority` - 优先级，缺省时使用配置的默认优先级
    /// * `task_config` - 任务配置，缺省时为空对象
    ///
    /// # 返回值
    ///
    /// * `Ok(QueueEntry)` - 新创建的排队记录
    /// * `Err(QueueError)` - 优先级非法、队列已满或项目已有活跃任务
    pub async fn enqueue(
        &self,
        project_id: i64,
        priority: Option<i32>,
        task_config: Option<serde_json::Value>,
    ) -> Result<QueueEntry, QueueError> {
        let settings = self.settings.current();
        let scheduler = &settings.scheduler;

        let priority = priority.unwrap_or(scheduler.default_priority);
        let range = scheduler.priority_range();
        if !range.contains(&priority) {
            return Err(QueueError::InvalidPriority {
                priority,
                min: *range.start(),
                max: *range.end(),
            });
        }

        let queued = self
            .repository
            .count_by_status()
            .await?
            .get(&QueueStatus::Queued)
            .copied()
            .unwrap_or(0);
        if queued >= scheduler.queue_size_limit {
            return Err(QueueError::QueueFull {
                limit: scheduler.queue_size_limit,
            });
        }

        let entry = self
            .repository
            .insert_if_no_active(NewQueueEntry {
                project_id,
                priority,
                task_config: task_config.unwrap_or_else(|| json!({})),
                max_retries: scheduler.max_retry_count as i32,
                created_at: Utc::now(),
            })
            .await?;

        info!(
            queue_id = entry.id,
            project_id,
            priority,
            "Training task queued"
        );
        counter!("trainq_tasks_enqueued_total").increment(1);
        self.monitor.record_task_event(
            "task_queued",
            entry.id,
            json!({ "project_id": project_id, "priority": priority }),
        );

        Ok(entry)
    }

    /// 下一条可调度记录
    pub async fn next_eligible(&self) -> Result<Option<QueueEntry>, QueueError> {
        Ok(self.repository.next_eligible(Utc::now()).await?)
    }

    /// 根据ID获取记录
    pub async fn get(&self, id: i64) -> Result<QueueEntry, QueueError> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or(QueueError::NotFound(id))
    }

    /// 项目最近一次任务的状态与进度
    pub async fn status_for_project(
        &self,
        project_id: i64,
    ) -> Result<ProjectQueueStatus, QueueError> {
        let entry = self
            .repository
            .find_latest_by_project(project_id)
            .await?
            .ok_or(QueueError::NotFound(project_id))?;

        let progress = match entry.status {
            QueueStatus::Queued => {
                let now = Utc::now();
                let queued = self.repository.list_by_status(QueueStatus::Queued).await?;
                TaskProgress::Queued {
                    position: queued
                        .iter()
                        .filter(|e| e.scheduled_at.map_or(true, |at| at <= now))
                        .position(|e| e.id == entry.id)
                        .map(|p| p + 1),
                }
            }
            QueueStatus::Running => TaskProgress::Running {
                elapsed_secs: entry
                    .started_at
                    .map(|started| (Utc::now() - started).num_seconds())
                    .unwrap_or(0),
            },
            _ => TaskProgress::Finished,
        };

        Ok(ProjectQueueStatus { entry, progress })
    }

    /// 取消排队中的任务
    ///
    /// 执行中、已结束或不存在的记录返回 false，执行中的任务不支持取消
    pub async fn cancel(&self, id: i64) -> Result<bool, QueueError> {
        let cancelled = self.repository.cancel_queued(id, Utc::now()).await?;
        if cancelled {
            info!(queue_id = id, "Training task cancelled");
            self.monitor
                .record_task_event("task_cancelled", id, serde_json::Value::Null);
        }
        Ok(cancelled)
    }

    /// 队列统计
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let counts = self
            .repository
            .count_by_status()
            .await?
            .into_iter()
            .map(|(status, count)| (status.to_string(), count))
            .collect();

        Ok(QueueStats {
            scheduler_running: self.is_scheduler_running(),
            concurrent_limit: self.settings.current().scheduler.max_concurrent_tasks,
            counts,
            queued_tasks: self.repository.list_by_status(QueueStatus::Queued).await?,
            running_tasks: self.repository.list_by_status(QueueStatus::Running).await?,
        })
    }
}

#[cfg(test)]
#[path = "task_queue_test.rs"]
mod tests;
