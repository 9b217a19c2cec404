// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::queue_entry::{NewQueueEntry, QueueEntry, QueueStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DbErr;
use std::collections::HashMap;
use thiserror::Error;

/// 仓库错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// 数据库错误
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    /// 项目已有排队中或执行中的记录
    #[error("Project {project_id} already has an active queue entry")]
    ActiveEntryExists { project_id: i64 },
}

/// 队列仓库特质
///
/// 定义训练任务队列记录的数据访问接口
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// 插入新记录
    ///
    /// 项目已存在 queued/running 记录时返回 `ActiveEntryExists`
    async fn insert_if_no_active(&self, entry: NewQueueEntry)
        -> Result<QueueEntry, RepositoryError>;

    /// 根据ID查找记录
    async fn find_by_id(&self, id: i64) -> Result<Option<QueueEntry>, RepositoryError>;

    /// 查找项目最近创建的记录
    async fn find_latest_by_project(
        &self,
        project_id: i64,
    ) -> Result<Option<QueueEntry>, RepositoryError>;

    /// 获取下一条可调度记录
    ///
    /// 只考虑 `scheduled_at` 为空或不晚于 `now` 的 queued 记录，
    /// 按 priority 升序、created_at 升序、id 升序排序
    async fn next_eligible(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, RepositoryError>;

    /// 按状态列出记录，排序与调度顺序一致
    async fn list_by_status(&self, status: QueueStatus)
        -> Result<Vec<QueueEntry>, RepositoryError>;

    /// 最近进入指定终态的记录，按 completed_at 降序
    async fn recent_by_status(
        &self,
        status: QueueStatus,
        limit: u64,
    ) -> Result<Vec<QueueEntry>, RepositoryError>;

    /// 各状态的记录数量
    async fn count_by_status(&self) -> Result<HashMap<QueueStatus, u64>, RepositoryError>;

    /// 自 `since` 起完成的记录数量
    async fn count_completed_since(&self, since: DateTime<Utc>) -> Result<u64, RepositoryError>;

    /// 比较并写入
    ///
    /// 仅当数据库中的记录仍处于 `expected_status` 且 retry_count 等于
    /// `expected_retry_count` 时写入 `entry` 的新状态；返回是否写入成功
    async fn compare_and_update(
        &self,
        entry: &QueueEntry,
        expected_status: QueueStatus,
        expected_retry_count: i32,
    ) -> Result<bool, RepositoryError>;

    /// 取消 queued 记录，返回是否发生了状态变更
    async fn cancel_queued(&self, id: i64, now: DateTime<Utc>) -> Result<bool, RepositoryError>;

    /// 删除 completed_at 早于 `cutoff` 的终态记录
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>)
        -> Result<u64, RepositoryError>;

    /// 存储健康探测
    async fn ping(&self) -> Result<(), RepositoryError>;
}
