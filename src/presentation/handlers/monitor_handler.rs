// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::application::dto::queue_request::LimitQueryDto;
use crate::config::settings::SharedSettings;
use crate::monitoring::task_monitor::{
    MonitorEvent, PerformanceSummary, SystemHealth, TaskMetrics, TaskMonitor,
};
use crate::presentation::errors::AppError;
use crate::queue::task_queue::TaskQueueService;
use crate::utils::telemetry::reload_log_level;
use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use validator::Validate;

const DEFAULT_LIST_LIMIT: usize = 50;

/// 当前指标
///
/// 监控循环尚未采集过时即时采集一次
pub async fn metrics(
    Extension(monitor): Extension<Arc<TaskMonitor>>,
) -> Result<Json<TaskMetrics>, AppError> {
    match monitor.current() {
        Some(metrics) => Ok(Json(metrics)),
        None => Ok(Json(monitor.collect_metrics().await?)),
    }
}

/// 即时健康检查
///
/// 存储不可达时返回 503
pub async fn health(
    Extension(monitor): Extension<Arc<TaskMonitor>>,
    Extension(queue): Extension<Arc<TaskQueueService>>,
) -> (StatusCode, Json<SystemHealth>) {
    let health = monitor.check_health(queue.is_scheduler_running()).await;
    let status = if health.database_connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

pub async fn summary(
    Extension(monitor): Extension<Arc<TaskMonitor>>,
) -> Json<PerformanceSummary> {
    Json(monitor.performance_summary())
}

pub async fn events(
    Extension(monitor): Extension<Arc<TaskMonitor>>,
    Query(query): Query<LimitQueryDto>,
) -> Result<Json<Vec<MonitorEvent>>, AppError> {
    query.validate()?;
    Ok(Json(
        monitor.recent_events(query.limit_or(DEFAULT_LIST_LIMIT)),
    ))
}

pub async fn history(
    Extension(monitor): Extension<Arc<TaskMonitor>>,
    Query(query): Query<LimitQueryDto>,
) -> Result<Json<Vec<TaskMetrics>>, AppError> {
    query.validate()?;
    Ok(Json(monitor.history(query.limit_or(DEFAULT_LIST_LIMIT))))
}

/// 重新加载配置
///
/// 新配置校验失败时返回 400，旧配置继续生效
pub async fn reload_config(
    Extension(settings): Extension<Arc<SharedSettings>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let current = settings.reload()?;
    let log_level_applied = reload_log_level(&current.log);
    info!("Configuration reloaded via admin endpoint");
    Ok(Json(json!({
        "reloaded": true,
        "log_level_applied": log_level_applied,
        "scheduler": current.scheduler,
        "cleanup": current.cleanup,
        "monitor": current.monitor,
    })))
}
