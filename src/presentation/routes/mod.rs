// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::SharedSettings;
use crate::monitoring::task_monitor::TaskMonitor;
use crate::presentation::handlers::{monitor_handler, queue_handler};
use crate::queue::task_queue::TaskQueueService;
use axum::{
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// 创建应用路由
///
/// # 返回值
///
/// 返回未注入依赖的路由
pub fn routes() -> Router {
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/v1/version", get(version));

    let queue_routes = Router::new()
        .route("/v1/queue", post(queue_handler::enqueue))
        .route("/v1/queue/stats", get(queue_handler::stats))
        .route(
            "/v1/queue/{id}",
            get(queue_handler::get_entry).delete(queue_handler::cancel),
        )
        .route(
            "/v1/projects/{project_id}/queue",
            get(queue_handler::project_status),
        );

    let monitor_routes = Router::new()
        .route("/v1/monitor/metrics", get(monitor_handler::metrics))
        .route("/v1/monitor/health", get(monitor_handler::health))
        .route("/v1/monitor/summary", get(monitor_handler::summary))
        .route("/v1/monitor/events", get(monitor_handler::events))
        .route("/v1/monitor/history", get(monitor_handler::history))
        .route(
            "/v1/admin/config/reload",
            post(monitor_handler::reload_config),
        );

    Router::new()
        .merge(public_routes)
        .merge(queue_routes)
        .merge(monitor_routes)
}

/// 创建注入了队列、监控与配置的完整应用
pub fn app(
    queue: Arc<TaskQueueService>,
    monitor: Arc<TaskMonitor>,
    settings: Arc<SharedSettings>,
) -> Router {
    routes()
        .layer(Extension(queue))
        .layer(Extension(monitor))
        .layer(Extension(settings))
        .layer(TraceLayer::new_for_http())
}

/// 健康检查端点
///
/// # 返回值
///
/// 返回"OK"字符串
pub async fn health_check() -> &'static str {
    "OK"
}

/// 版本信息端点
pub async fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
