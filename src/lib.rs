// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 应用程序模块
///
/// 接口层使用的数据传输对象
pub mod application;

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 领域模块
///
/// 包含排队记录模型、状态机、仓库接口与训练执行器接口
pub mod domain;

/// 基础设施模块
///
/// 提供数据库、远程训练服务与指标导出的具体实现
pub mod infrastructure;

/// 监控模块
///
/// 汇总队列指标、健康检查、告警与事件记录
pub mod monitoring;

/// 表示层模块
///
/// 处理HTTP请求和响应，包括路由与处理器
pub mod presentation;

/// 队列模块
///
/// 实现训练任务队列和调度功能
pub mod queue;

/// 工具模块
///
/// 提供重试策略与日志初始化等辅助功能
pub mod utils;

/// 工作器模块
///
/// 实现后台清理与运行时生命周期管理
pub mod workers;
