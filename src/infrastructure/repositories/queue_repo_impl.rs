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

use crate::domain::models::queue_entry::{NewQueueEntry, QueueEntry, QueueStatus};
use crate::domain::repositories::queue_repository::{QueueRepository, RepositoryError};
use crate::infrastructure::database::entities::task_queue as queue_entity;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition,
    DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    Select, Set, SqlErr, TransactionTrait,
};
use std::collections::HashMap;
use std::sync::Arc;

/// 队列仓库实现
///
/// 基于SeaORM实现的 task_queue 数据访问层
#[derive(Clone)]
pub struct QueueRepositoryImpl {
    /// 数据库连接
    db: Arc<DatabaseConnection>,
}

impl QueueRepositoryImpl {
    /// 创建新的队列仓库实例
    ///
    /// # 参数
    ///
    /// * `db` - 数据库连接
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

fn to_utc(value: DateTime<FixedOffset>) -> DateTime<Utc> {
    value.with_timezone(&Utc)
}

fn to_fixed(value: DateTime<Utc>) -> DateTime<FixedOffset> {
    value.into()
}

fn active_statuses() -> Vec<String> {
    vec![
        QueueStatus::Queued.to_string(),
        QueueStatus::Running.to_string(),
    ]
}

fn terminal_statuses() -> Vec<String> {
    QueueStatus::ALL
        .iter()
        .filter(|s| s.is_terminal())
        .map(|s| s.to_string())
        .collect()
}

/// 按调度顺序排序：priority 升序，created_at 升序，id 升序
fn in_eligibility_order(select: Select<queue_entity::Entity>) -> Select<queue_entity::Entity> {
    select
        .order_by_asc(queue_entity::Column::Priority)
        .order_by_asc(queue_entity::Column::CreatedAt)
        .order_by_asc(queue_entity::Column::Id)
}

impl From<queue_entity::Model> for QueueEntry {
    fn from(model: queue_entity::Model) -> Self {
        Self {
            id: model.id,
            project_id: model.project_id,
            status: model.status.parse().unwrap_or_default(),
            priority: model.priority,
            task_config: model.task_config,
            retry_count: model.retry_count,
            max_retries: model.max_retries,
            error_message: model.error_message,
            external_task_id: model.external_task_id,
            scheduled_at: model.scheduled_at.map(to_utc),
            created_at: to_utc(model.created_at),
            started_at: model.started_at.map(to_utc),
            completed_at: model.completed_at.map(to_utc),
            updated_at: to_utc(model.updated_at),
        }
    }
}

impl From<QueueEntry> for queue_entity::ActiveModel {
    fn from(entry: QueueEntry) -> Self {
        Self {
            id: Set(entry.id),
            project_id: Set(entry.project_id),
            status: Set(entry.status.to_string()),
            priority: Set(entry.priority),
            task_config: Set(entry.task_config),
            retry_count: Set(entry.retry_count),
            max_retries: Set(entry.max_retries),
            error_message: Set(entry.error_message),
            external_task_id: Set(entry.external_task_id),
            scheduled_at: Set(entry.scheduled_at.map(to_fixed)),
            created_at: Set(to_fixed(entry.created_at)),
            started_at: Set(entry.started_at.map(to_fixed)),
            completed_at: Set(entry.completed_at.map(to_fixed)),
            updated_at: Set(to_fixed(entry.updated_at)),
        }
    }
}

impl From<NewQueueEntry> for queue_entity::ActiveModel {
    fn from(entry: NewQueueEntry) -> Self {
        let created_at = to_fixed(entry.created_at);
        Self {
            id: NotSet,
            project_id: Set(entry.project_id),
            status: Set(QueueStatus::Queued.to_string()),
            priority: Set(entry.priority),
            task_config: Set(entry.task_config),
            retry_count: Set(0),
            max_retries: Set(entry.max_retries),
            error_message: Set(None),
            external_task_id: Set(None),
            scheduled_at: Set(None),
            created_at: Set(created_at),
            started_at: Set(None),
            completed_at: Set(None),
            updated_at: Set(created_at),
        }
    }
}

/// 唯一索引冲突说明并发入队已抢先写入
fn map_insert_error(err: DbErr, project_id: i64) -> RepositoryError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            RepositoryError::ActiveEntryExists { project_id }
        }
        _ => RepositoryError::Database(err),
    }
}

#[async_trait]
impl QueueRepository for QueueRepositoryImpl {
    async fn insert_if_no_active(
        &self,
        entry: NewQueueEntry,
    ) -> Result<QueueEntry, RepositoryError> {
        let project_id = entry.project_id;
        let txn = self.db.begin().await?;

        let active = queue_entity::Entity::find()
            .filter(queue_entity::Column::ProjectId.eq(project_id))
            .filter(queue_entity::Column::Status.is_in(active_statuses()))
            .count(&txn)
            .await?;

        if active > 0 {
            txn.rollback().await?;
            return Err(RepositoryError::ActiveEntryExists { project_id });
        }

        let model: queue_entity::ActiveModel = entry.into();
        let inserted = model
            .insert(&txn)
            .await
            .map_err(|e| map_insert_error(e, project_id))?;

        txn.commit().await?;
        Ok(inserted.into())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<QueueEntry>, RepositoryError> {
        let model = queue_entity::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?;

        Ok(model.map(Into::into))
    }

    async fn find_latest_by_project(
        &self,
        project_id: i64,
    ) -> Result<Option<QueueEntry>, RepositoryError> {
        let model = queue_entity::Entity::find()
            .filter(queue_entity::Column::ProjectId.eq(project_id))
            .order_by_desc(queue_entity::Column::CreatedAt)
            .order_by_desc(queue_entity::Column::Id)
            .one(self.db.as_ref())
            .await?;

        Ok(model.map(Into::into))
    }

    async fn next_eligible(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, RepositoryError> {
        let select = queue_entity::Entity::find()
            .filter(queue_entity::Column::Status.eq(QueueStatus::Queued.to_string()))
            .filter(
                Condition::any()
                    .add(queue_entity::Column::ScheduledAt.is_null())
                    .add(queue_entity::Column::ScheduledAt.lte(to_fixed(now))),
            );

        let model = in_eligibility_order(select).one(self.db.as_ref()).await?;
        Ok(model.map(Into::into))
    }

    async fn list_by_status(
        &self,
        status: QueueStatus,
    ) -> Result<Vec<QueueEntry>, RepositoryError> {
        let select = queue_entity::Entity::find()
            .filter(queue_entity::Column::Status.eq(status.to_string()));

        let models = in_eligibility_order(select).all(self.db.as_ref()).await?;
        Ok(models.into_iter().map(QueueEntry::from).collect())
    }

    async fn recent_by_status(
        &self,
        status: QueueStatus,
        limit: u64,
    ) -> Result<Vec<QueueEntry>, RepositoryError> {
        let models = queue_entity::Entity::find()
            .filter(queue_entity::Column::Status.eq(status.to_string()))
            .order_by_desc(queue_entity::Column::CompletedAt)
            .order_by_desc(queue_entity::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await?;

        Ok(models.into_iter().map(QueueEntry::from).collect())
    }

    async fn count_by_status(&self) -> Result<HashMap<QueueStatus, u64>, RepositoryError> {
        let rows: Vec<(String, i64)> = queue_entity::Entity::find()
            .select_only()
            .column(queue_entity::Column::Status)
            .column_as(Expr::col(queue_entity::Column::Id).count(), "count")
            .group_by(queue_entity::Column::Status)
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        let mut counts: HashMap<QueueStatus, u64> =
            QueueStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for (status, count) in rows {
            if let Ok(status) = status.parse::<QueueStatus>() {
                counts.insert(status, count.max(0) as u64);
            }
        }

        Ok(counts)
    }

    async fn count_completed_since(&self, since: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let count = queue_entity::Entity::find()
            .filter(queue_entity::Column::Status.eq(QueueStatus::Completed.to_string()))
            .filter(queue_entity::Column::CompletedAt.gte(to_fixed(since)))
            .count(self.db.as_ref())
            .await?;

        Ok(count)
    }

    async fn compare_and_update(
        &self,
        entry: &QueueEntry,
        expected_status: QueueStatus,
        expected_retry_count: i32,
    ) -> Result<bool, RepositoryError> {
        let mut active: queue_entity::ActiveModel = entry.clone().into();
        // 只写入调度器会修改的列
        active.id = NotSet;
        active.project_id = NotSet;
        active.priority = NotSet;
        active.task_config = NotSet;
        active.max_retries = NotSet;
        active.created_at = NotSet;

        let result = queue_entity::Entity::update_many()
            .set(active)
            .filter(queue_entity::Column::Id.eq(entry.id))
            .filter(queue_entity::Column::Status.eq(expected_status.to_string()))
            .filter(queue_entity::Column::RetryCount.eq(expected_retry_count))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn cancel_queued(&self, id: i64, now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let now = to_fixed(now);
        let result = queue_entity::Entity::update_many()
            .col_expr(
                queue_entity::Column::Status,
                Expr::value(QueueStatus::Cancelled.to_string()),
            )
            .col_expr(queue_entity::Column::CompletedAt, Expr::value(Some(now)))
            .col_expr(queue_entity::Column::UpdatedAt, Expr::value(now))
            .filter(queue_entity::Column::Id.eq(id))
            .filter(queue_entity::Column::Status.eq(QueueStatus::Queued.to_string()))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn delete_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = queue_entity::Entity::delete_many()
            .filter(queue_entity::Column::Status.is_in(terminal_statuses()))
            .filter(queue_entity::Column::CompletedAt.is_not_null())
            .filter(queue_entity::Column::CompletedAt.lt(to_fixed(cutoff)))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        self.db.ping().await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "queue_repo_impl_test.rs"]
mod tests;
