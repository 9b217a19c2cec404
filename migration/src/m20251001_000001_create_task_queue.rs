// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::DbBackend;

/// 训练任务队列表迁移
#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    /// 创建 task_queue 表及其索引
    ///
    /// # 参数
    ///
    /// * `manager` - 数据库模式管理器
    ///
    /// # 返回值
    ///
    /// * `Ok(())` - 迁移成功
    /// * `Err(DbErr)` - 迁移失败
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TaskQueue::Table)
                    .if_not_exists()
                    .col({
                        let mut col = ColumnDef::new(TaskQueue::Id);
                        // SQLite only accepts AUTOINCREMENT on an INTEGER PRIMARY KEY
                        if manager.get_database_backend() == DbBackend::Postgres {
                            col.big_integer();
                        } else {
                            col.integer();
                        }
                        col.not_null().auto_increment().primary_key();
                        col
                    })
                    .col(ColumnDef::new(TaskQueue::ProjectId).big_integer().not_null())
                    .col(
                        ColumnDef::new(TaskQueue::Status)
                            .string()
                            .not_null()
                            .default("queued"),
                    )
                    .col(
                        ColumnDef::new(TaskQueue::Priority)
                            .integer()
                            .not_null()
                            .default(5),
                    )
                    .col(ColumnDef::new(TaskQueue::TaskConfig).json().not_null())
                    .col(
                        ColumnDef::new(TaskQueue::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(TaskQueue::MaxRetries)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(ColumnDef::new(TaskQueue::ErrorMessage).text().null())
                    .col(ColumnDef::new(TaskQueue::ExternalTaskId).string().null())
                    .col(
                        ColumnDef::new(TaskQueue::ScheduledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TaskQueue::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(TaskQueue::StartedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(TaskQueue::CompletedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(TaskQueue::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_task_queue_status_priority_created")
                    .table(TaskQueue::Table)
                    .col(TaskQueue::Status)
                    .col(TaskQueue::Priority)
                    .col(TaskQueue::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_task_queue_status_completed")
                    .table(TaskQueue::Table)
                    .col(TaskQueue::Status)
                    .col(TaskQueue::CompletedAt)
                    .to_owned(),
            )
            .await?;

        // 每个项目最多一个 queued/running 记录；Postgres 与 SQLite 都支持部分索引
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_task_queue_active_project \
                 ON task_queue (project_id) WHERE status IN ('queued', 'running')",
            )
            .await?;

        Ok(())
    }

    /// 回滚迁移
    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TaskQueue::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TaskQueue {
    Table,
    Id,
    ProjectId,
    Status,
    Priority,
    TaskConfig,
    RetryCount,
    MaxRetries,
    ErrorMessage,
    ExternalTaskId,
    ScheduledAt,
    CreatedAt,
    StartedAt,
    CompletedAt,
    UpdatedAt,
}
