// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 测试主模块
///
/// 集成测试通过 HTTP 接口和调度运行时驱动完整的入队、调度与监控流程
mod integration;
