// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 配置模块
///
/// 处理调度器、监控、清理、执行器与日志等配置，支持环境变量覆盖与运行时重载
pub mod settings;
