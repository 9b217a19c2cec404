// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工具模块
///
/// - 重试策略（retry_policy）：失败重新入队的退避计算
/// - 遥测（telemetry）：日志初始化
pub mod retry_policy;
pub mod telemetry;
