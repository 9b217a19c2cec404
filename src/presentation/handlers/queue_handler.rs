// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::application::dto::queue_request::{CancelResponseDto, EnqueueRequestDto};
use crate::domain::models::queue_entry::QueueEntry;
use crate::presentation::errors::AppError;
use crate::queue::task_queue::{ProjectQueueStatus, QueueStats, TaskQueueService};
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use validator::Validate;

/// 提交训练任务
///
/// 成功返回 201 与新建的排队记录；同一项目已有活跃任务时返回 409
pub async fn enqueue(
    Extension(queue): Extension<Arc<TaskQueueService>>,
    Json(payload): Json<EnqueueRequestDto>,
) -> Result<(StatusCode, Json<QueueEntry>), AppError> {
    payload.validate()?;

    let entry = queue
        .enqueue(payload.project_id, payload.priority, payload.task_config)
        .await?;

    Ok((StatusCode::CREATED, Json(entry)))
}

/// 获取排队记录
pub async fn get_entry(
    Extension(queue): Extension<Arc<TaskQueueService>>,
    Path(id): Path<i64>,
) -> Result<Json<QueueEntry>, AppError> {
    Ok(Json(queue.get(id).await?))
}

/// 取消排队中的任务
///
/// 只有 queued 状态的记录能被取消，其余情况返回 `cancelled: false`
pub async fn cancel(
    Extension(queue): Extension<Arc<TaskQueueService>>,
    Path(id): Path<i64>,
) -> Result<Json<CancelResponseDto>, AppError> {
    let cancelled = queue.cancel(id).await?;
    Ok(Json(CancelResponseDto { id, cancelled }))
}

/// 项目最近一次任务的状态
pub async fn project_status(
    Extension(queue): Extension<Arc<TaskQueueService>>,
    Path(project_id): Path<i64>,
) -> Result<Json<ProjectQueueStatus>, AppError> {
    Ok(Json(queue.status_for_project(project_id).await?))
}

/// 队列统计
pub async fn stats(
    Extension(queue): Extension<Arc<TaskQueueService>>,
) -> Result<Json<QueueStats>, AppError> {
    Ok(Json(queue.stats().await?))
}
