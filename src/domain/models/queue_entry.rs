// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 队列记录
///
/// 表示某个项目的一次训练任务排队记录。记录由入队操作创建，
/// 之后只由调度器（状态、时间戳、重试计数）和显式取消修改，
/// 最终由清理任务在进入终态并超过保留期后删除。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// 记录ID，单调递增
    pub id: i64,
    /// 外部项目ID
    pub project_id: i64,
    /// 当前状态
    pub status: QueueStatus,
    /// 优先级，数值越小越先调度
    pub priority: i32,
    /// 透传给执行器的任务配置
    pub task_config: serde_json::Value,
    /// 已重试次数
    pub retry_count: i32,
    /// 最大重试次数
    pub max_retries: i32,
    /// 最近一次失败、超时或重试的错误信息
    pub error_message: Option<String>,
    /// 执行器返回的外部任务ID
    pub external_task_id: Option<String>,
    /// 重新入队后最早可再次调度的时间
    pub scheduled_at: Option<DateTime<Utc>>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 最近一次开始执行的时间
    pub started_at: Option<DateTime<Utc>>,
    /// 进入终态的时间
    pub completed_at: Option<DateTime<Utc>>,
    /// 更新时间
    pub updated_at: DateTime<Utc>,
}

/// 待插入的队列记录
#[derive(Debug, Clone)]
pub struct NewQueueEntry {
    pub project_id: i64,
    pub priority: i32,
    pub task_config: serde_json::Value,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
}

/// 队列状态
///
/// 状态转换：
/// Queued → Running → Completed / Failed，或失败可重试时 Running → Queued；
/// Queued → Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// 排队中
    #[default]
    Queued,
    /// 执行中
    Running,
    /// 已完成
    Completed,
    /// 已失败，重试次数已耗尽
    Failed,
    /// 已取消
    Cancelled,
}

impl QueueStatus {
    pub const ALL: [QueueStatus; 5] = [
        QueueStatus::Queued,
        QueueStatus::Running,
        QueueStatus::Completed,
        QueueStatus::Failed,
        QueueStatus::Cancelled,
    ];

    /// 终态不再发生任何转换
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Cancelled
        )
    }

    /// 处于活跃状态（排队或执行中）
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Running => "running",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(QueueStatus::Queued),
            "running" => Ok(QueueStatus::Running),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            "cancelled" => Ok(QueueStatus::Cancelled),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// 执行失败的类别
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// 执行器返回失败或调用出错
    ExecutionFailure(String),
    /// 执行超过截止时间
    Timeout,
}

impl FailureKind {
    fn message(&self, will_retry: bool) -> String {
        match (self, will_retry) {
            (FailureKind::ExecutionFailure(msg), _) => msg.clone(),
            (FailureKind::Timeout, true) => "Task timed out - retrying".to_string(),
            (FailureKind::Timeout, false) => "Task timed out - max retries exceeded".to_string(),
        }
    }
}

/// 领域错误类型
#[derive(Error, Debug)]
pub enum DomainError {
    /// 无效的状态转换
    #[error("Invalid state transition: cannot {action} a {from} entry")]
    InvalidStateTransition {
        from: QueueStatus,
        action: &'static str,
    },

    /// 无法识别的状态字符串
    #[error("Unknown queue status: {0}")]
    UnknownStatus(String),
}

impl QueueEntry {
    /// 开始执行
    ///
    /// 将记录从 Queued 变更为 Running，并记录开始时间
    ///
    /// # 返回值
    ///
    /// * `Ok(QueueEntry)` - 已进入执行状态的记录
    /// * `Err(DomainError)` - 状态转换失败
    pub fn start(mut self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        match self.status {
            QueueStatus::Queued => {
                self.status = QueueStatus::Running;
                self.started_at = Some(now);
                self.scheduled_at = None;
                self.updated_at = now;
                Ok(self)
            }
            from => Err(DomainError::InvalidStateTransition {
                from,
                action: "start",
            }),
        }
    }

    /// 执行成功
    ///
    /// 将记录从 Running 变更为 Completed，并记录外部任务ID
    pub fn complete(
        mut self,
        now: DateTime<Utc>,
        external_task_id: Option<String>,
    ) -> Result<Self, DomainError> {
        match self.status {
            QueueStatus::Running => {
                self.status = QueueStatus::Completed;
                self.completed_at = Some(now);
                self.external_task_id = external_task_id;
                self.updated_at = now;
                Ok(self)
            }
            from => Err(DomainError::InvalidStateTransition {
                from,
                action: "complete",
            }),
        }
    }

    /// 执行失败或超时
    ///
    /// 仍有重试次数时重新入队（retry_count 加一，并在 `retry_delay` 之后才可再次调度），
    /// 否则进入 Failed 终态。两种情况都会保留错误信息。
    pub fn fail_attempt(
        mut self,
        now: DateTime<Utc>,
        failure: &FailureKind,
        retry_delay: Duration,
    ) -> Result<Self, DomainError> {
        if self.status != QueueStatus::Running {
            return Err(DomainError::InvalidStateTransition {
                from: self.status,
                action: "fail",
            });
        }

        let will_retry = self.can_retry();
        self.error_message = Some(failure.message(will_retry));
        self.updated_at = now;

        if will_retry {
            self.retry_count += 1;
            self.status = QueueStatus::Queued;
            self.scheduled_at = if retry_delay > Duration::zero() {
                Some(now + retry_delay)
            } else {
                None
            };
        } else {
            self.status = QueueStatus::Failed;
            self.completed_at = Some(now);
        }

        Ok(self)
    }

    /// 取消排队中的记录
    ///
    /// 执行中的记录不支持取消
    pub fn cancel(mut self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        match self.status {
            QueueStatus::Queued => {
                self.status = QueueStatus::Cancelled;
                self.completed_at = Some(now);
                self.updated_at = now;
                Ok(self)
            }
            from => Err(DomainError::InvalidStateTransition {
                from,
                action: "cancel",
            }),
        }
    }

    /// 是否还有重试次数
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// 排队时长（秒），仅在已开始执行后可用
    pub fn queue_time_secs(&self) -> Option<f64> {
        self.started_at
            .map(|started| (started - self.created_at).num_milliseconds() as f64 / 1000.0)
    }

    /// 执行时长（秒），仅在已开始并进入终态后可用
    pub fn execution_time_secs(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => {
                Some((completed - started).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        }
    }
}
