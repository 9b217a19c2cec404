// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 监控模块
///
/// 周期性汇总队列指标、探测存储健康、检测告警并保留有界的事件与指标历史
pub mod task_monitor;
