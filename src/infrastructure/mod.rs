// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 基础设施层模块
///
/// 包含系统的技术实现细节：
/// - 数据库（database）：连接池和实体映射
/// - 执行器（executors）：远程训练服务客户端
/// - 指标（metrics）：Prometheus 导出与系统资源采样
/// - 仓库实现（repositories）：领域仓库接口的具体实现
pub mod database;
pub mod executors;
pub mod metrics;
pub mod repositories;
